//! In-memory transport for tests and simulations.
//!
//! [`MockTransport`] "discovers" the [`MockDevice`]s registered with it by
//! name. A [`MockDevice`] is a cheap handle: clones share state, so a test can
//! keep one clone to inject notifications and failures while a session owns
//! another.
//!
//! ```
//! use crop_monitor_ble::ble::TEMPERATURE_CHARACTERISTIC_UUID;
//! use crop_monitor_ble::mock::{MockDevice, MockTransport};
//!
//! let device = MockDevice::new("EnvSensor");
//! let transport = MockTransport::with_device(device.clone());
//!
//! // Not connected yet, so nothing is delivered
//! assert!(!device.notify_value(TEMPERATURE_CHARACTERISTIC_UUID, 21.5));
//! # let _ = transport;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::ble::transport::{
    DeviceLink, DiscoveryRequest, NotificationEvent, NotificationStream, Transport,
};
use crate::ble::uuids::SENSOR_SERVICE_UUID;
use crate::error::{Error, Result};
use crate::protocol::encode;

/// Transport over a fixed set of in-memory devices.
#[derive(Default)]
pub struct MockTransport {
    devices: Mutex<Vec<MockDevice>>,
    discovery_error: Mutex<Option<String>>,
    scan_delay: Mutex<Duration>,
    scanning: AtomicBool,
    last_request: Mutex<Option<DiscoveryRequest>>,
    discover_calls: AtomicU32,
}

impl MockTransport {
    /// Transport with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport advertising a single device.
    pub fn with_device(device: MockDevice) -> Self {
        let transport = Self::new();
        transport.add_device(device);
        transport
    }

    /// Register another device.
    pub fn add_device(&self, device: MockDevice) {
        self.devices.lock().push(device);
    }

    /// Make every following discovery fail with `message`.
    pub fn fail_discovery(&self, message: impl Into<String>) {
        *self.discovery_error.lock() = Some(message.into());
    }

    /// Let discovery succeed again.
    pub fn clear_discovery_failure(&self) {
        *self.discovery_error.lock() = None;
    }

    /// Simulated scan time before discovery returns.
    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock() = delay;
    }

    /// Number of discoveries performed.
    pub fn discover_calls(&self) -> u32 {
        self.discover_calls.load(Ordering::SeqCst)
    }

    /// Check if a simulated scan is in progress.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// The most recent discovery request.
    pub fn last_request(&self) -> Option<DiscoveryRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockDevice;

    async fn discover(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<MockDevice>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        let delay = *self.scan_delay.lock();
        let delay = request.timeout.map_or(delay, |timeout| delay.min(timeout));

        self.scanning.store(true, Ordering::SeqCst);
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        self.scanning.store(false, Ordering::SeqCst);

        if cancelled {
            debug!("Mock discovery for '{}' cancelled", request.name);
            return Ok(None);
        }

        if let Some(message) = self.discovery_error.lock().clone() {
            return Err(Error::Internal(message));
        }

        let found = self
            .devices
            .lock()
            .iter()
            .find(|device| device.name() == request.name)
            .cloned();
        if let Some(device) = &found {
            *device.inner.required_service.lock() = Some(request.service);
        }
        debug!(
            "Mock discovery for '{}': found={}",
            request.name,
            found.is_some()
        );
        Ok(found)
    }
}

struct MockDeviceInner {
    name: String,
    identifier: String,
    connected: AtomicBool,
    connect_failures: AtomicU32,
    connect_calls: AtomicU32,
    fail_subscribe: AtomicBool,
    services: Mutex<Vec<Uuid>>,
    required_service: Mutex<Option<Uuid>>,
    subscriptions: Mutex<Vec<Uuid>>,
    sender: Mutex<Option<UnboundedSender<NotificationEvent>>>,
}

/// Simulated sensor.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<MockDeviceInner>,
}

impl MockDevice {
    /// Create a device advertising `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MockDeviceInner {
                name: name.into(),
                identifier: Uuid::new_v4().to_string(),
                connected: AtomicBool::new(false),
                connect_failures: AtomicU32::new(0),
                connect_calls: AtomicU32::new(0),
                fail_subscribe: AtomicBool::new(false),
                services: Mutex::new(vec![SENSOR_SERVICE_UUID]),
                required_service: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                sender: Mutex::new(None),
            }),
        }
    }

    /// Advertised name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fail the next `count` connection attempts.
    pub fn set_connect_failures(&self, count: u32) {
        self.inner.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Replace the services the device exposes. Defaults to the sensor
    /// service.
    pub fn set_services(&self, services: Vec<Uuid>) {
        *self.inner.services.lock() = services;
    }

    /// Make subscriptions fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Number of connection attempts seen.
    pub fn connect_calls(&self) -> u32 {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    /// Check if the simulated link is up.
    pub fn is_link_up(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Characteristics with notifications enabled, in subscription order.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.inner.subscriptions.lock().clone()
    }

    /// Send a raw notification. Returns `false` if nobody is listening.
    pub fn notify(&self, characteristic: Uuid, payload: impl Into<Bytes>) -> bool {
        if !self.is_link_up() {
            return false;
        }

        match self.inner.sender.lock().as_ref() {
            Some(sender) => sender
                .unbounded_send(NotificationEvent::new(characteristic, payload))
                .is_ok(),
            None => false,
        }
    }

    /// Send a value encoded the way the sensor firmware does.
    pub fn notify_value(&self, characteristic: Uuid, value: f32) -> bool {
        self.notify(characteristic, encode(value).to_vec())
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.sender.lock().take();
        debug!("Mock device '{}' dropped its link", self.inner.name);
    }
}

#[async_trait]
impl DeviceLink for MockDevice {
    fn identifier(&self) -> String {
        self.inner.identifier.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);

        let failures = &self.inner.connect_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::ConnectionFailed {
                reason: "simulated connection failure".to_string(),
            });
        }

        let required = *self.inner.required_service.lock();
        if let Some(service) = required {
            if !self.inner.services.lock().contains(&service) {
                return Err(Error::ServiceNotFound {
                    uuid: service.to_string(),
                });
            }
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        if !self.is_link_up() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = unbounded();
        *self.inner.sender.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        if !self.is_link_up() {
            return Err(Error::NotConnected);
        }
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            });
        }

        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.contains(&characteristic) {
            subscriptions.push(characteristic);
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.inner
            .subscriptions
            .lock()
            .retain(|uuid| *uuid != characteristic);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.is_link_up()
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.sender.lock().take();
        self.inner.subscriptions.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::TEMPERATURE_CHARACTERISTIC_UUID;

    fn request(name: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            name: name.to_string(),
            service: SENSOR_SERVICE_UUID,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_discovery_by_exact_name() {
        let transport = MockTransport::with_device(MockDevice::new("EnvSensor"));
        let cancel = CancellationToken::new();

        let found = transport.discover(&request("EnvSensor"), &cancel).await;
        assert!(found.unwrap().is_some());
        let missing = transport.discover(&request("Other"), &cancel).await;
        assert!(missing.unwrap().is_none());
        assert_eq!(transport.discover_calls(), 2);
        assert_eq!(transport.last_request(), Some(request("Other")));
    }

    #[tokio::test]
    async fn test_discovery_failure_injection() {
        let transport = MockTransport::new();
        let cancel = CancellationToken::new();
        transport.fail_discovery("no adapter");
        assert!(transport.discover(&request("EnvSensor"), &cancel).await.is_err());

        transport.clear_discovery_failure();
        let found = transport.discover(&request("EnvSensor"), &cancel).await;
        assert!(found.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_discovery_stops_scanning() {
        let transport = Arc::new(MockTransport::with_device(MockDevice::new("EnvSensor")));
        transport.set_scan_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let handle = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { transport.discover(&request("EnvSensor"), &cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while !transport.is_scanning() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scan never started");

        cancel.cancel();
        assert!(handle.await.unwrap().unwrap().is_none());
        assert!(!transport.is_scanning());
    }

    #[tokio::test]
    async fn test_connect_requires_requested_service() {
        let device = MockDevice::new("EnvSensor");
        let transport = MockTransport::with_device(device.clone());
        let other_service = Uuid::from_u128(0x0000_181a_0000_1000_8000_00805f9b34fb);
        let wanted = DiscoveryRequest {
            service: other_service,
            ..request("EnvSensor")
        };

        let link = transport
            .discover(&wanted, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            link.connect().await,
            Err(Error::ServiceNotFound { ref uuid }) if *uuid == other_service.to_string()
        ));
        assert!(!device.is_link_up());

        device.set_services(vec![SENSOR_SERVICE_UUID, other_service]);
        assert!(link.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failures_count_down() {
        let device = MockDevice::new("EnvSensor");
        device.set_connect_failures(2);

        assert!(device.connect().await.is_err());
        assert!(device.connect().await.is_err());
        assert!(device.connect().await.is_ok());
        assert_eq!(device.connect_calls(), 3);
        assert!(device.is_link_up());
    }

    #[tokio::test]
    async fn test_notifications_flow_until_link_drops() {
        let device = MockDevice::new("EnvSensor");
        device.connect().await.unwrap();
        let mut stream = device.notifications().await.unwrap();

        assert!(device.notify_value(TEMPERATURE_CHARACTERISTIC_UUID, 19.25));
        let event = stream.next().await.unwrap();
        assert_eq!(event.characteristic_uuid, TEMPERATURE_CHARACTERISTIC_UUID);
        assert_eq!(event.data.as_ref(), &19.25f32.to_le_bytes());

        device.drop_link();
        assert!(stream.next().await.is_none());
        assert!(!device.notify_value(TEMPERATURE_CHARACTERISTIC_UUID, 1.0));
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let device = MockDevice::new("EnvSensor");
        assert!(matches!(
            tokio_test::block_on(device.subscribe(TEMPERATURE_CHARACTERISTIC_UUID)),
            Err(Error::NotConnected)
        ));

        tokio_test::block_on(async {
            device.connect().await.unwrap();
            device.subscribe(TEMPERATURE_CHARACTERISTIC_UUID).await.unwrap();
            device.subscribe(TEMPERATURE_CHARACTERISTIC_UUID).await.unwrap();
        });
        assert_eq!(device.subscriptions(), vec![TEMPERATURE_CHARACTERISTIC_UUID]);
    }
}
