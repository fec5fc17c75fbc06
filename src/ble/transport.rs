//! Transport abstraction.
//!
//! [`Transport`] and [`DeviceLink`] separate the session state machine from
//! the BLE stack, so a session can run against btleplug ([`BleTransport`])
//! or an in-memory device ([`crate::mock::MockTransport`]).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::ValueNotification;
use bytes::Bytes;
use futures::stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::connection::ConnectionManager;
use crate::ble::scanner::BleScanner;
use crate::config::MonitorConfig;
use crate::error::Result;

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Bytes,
}

impl NotificationEvent {
    /// Create a new notification event.
    pub fn new(characteristic_uuid: Uuid, data: impl Into<Bytes>) -> Self {
        Self {
            characteristic_uuid,
            data: data.into(),
        }
    }
}

impl From<ValueNotification> for NotificationEvent {
    fn from(notification: ValueNotification) -> Self {
        Self::new(notification.uuid, notification.value)
    }
}

/// Stream of notifications from a connected device.
///
/// The stream ends when the link goes away.
pub type NotificationStream = Pin<Box<dyn Stream<Item = NotificationEvent> + Send>>;

/// What to look for during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Advertised name, matched exactly.
    pub name: String,
    /// Service the device must expose once connected.
    pub service: Uuid,
    /// Discovery window. `None` scans until a match appears.
    pub timeout: Option<Duration>,
}

impl DiscoveryRequest {
    /// Request for the device described by `config`.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            name: config.device_name.clone(),
            service: config.service_uuid,
            timeout: config.scan_timeout,
        }
    }
}

/// Discovers devices by advertised name.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Link type handed out for a discovered device.
    type Link: DeviceLink + 'static;

    /// Scan until a device matching `request` is seen, the window elapses or
    /// `cancel` fires. `None` means no device was found (or the scan was
    /// cancelled). The scan is stopped before this returns in every case.
    ///
    /// The returned link requires `request.service` when connecting.
    async fn discover(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Link>>;
}

/// Operations on one discovered device.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Platform identifier of the device.
    fn identifier(&self) -> String;

    /// Connect and discover services.
    async fn connect(&self) -> Result<()>;

    /// Open the notification stream. Call before subscribing so no early
    /// notification is missed.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Liveness check.
    async fn is_connected(&self) -> bool;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// btleplug-backed transport using the first available adapter.
pub struct BleTransport {
    scanner: BleScanner,
}

impl BleTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_scanner(BleScanner::new().await?))
    }

    /// Create a transport from an existing scanner.
    pub fn with_scanner(scanner: BleScanner) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    async fn discover(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<BleLink>> {
        let found = self
            .scanner
            .find_by_name(&request.name, request.timeout, cancel)
            .await?;
        Ok(found.map(|device| BleLink::new(device.identifier, device.peripheral, request.service)))
    }
}

/// Link to a btleplug peripheral.
pub struct BleLink {
    identifier: String,
    connection: ConnectionManager,
    characteristics: CharacteristicHandler,
}

impl BleLink {
    fn new(identifier: String, peripheral: btleplug::platform::Peripheral, service: Uuid) -> Self {
        Self {
            identifier,
            characteristics: CharacteristicHandler::new(peripheral.clone(), service),
            connection: ConnectionManager::new(peripheral, service),
        }
    }

    /// The connection manager for this link.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

#[async_trait]
impl DeviceLink for BleLink {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.connection.connect().await?;
        if self.characteristics.discover_characteristics() == 0 {
            warn!("Sensor service on {} has no characteristics", self.identifier);
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        self.characteristics.notification_stream().await
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.characteristics.subscribe(&characteristic).await
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.characteristics.unsubscribe(&characteristic).await
    }

    async fn is_connected(&self) -> bool {
        self.connection.is_alive().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }
}
