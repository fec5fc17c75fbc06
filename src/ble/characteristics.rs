//! GATT characteristic handling.
//!
//! Looks up the sample characteristics inside the sensor service, toggles
//! their notifications and exposes the peripheral's notification stream.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{NotificationEvent, NotificationStream};
use crate::error::{Error, Result};

/// Characteristics of one service on a connected peripheral.
pub struct CharacteristicHandler {
    peripheral: Peripheral,
    service: Uuid,
    /// Cached by UUID, filled by [`Self::discover_characteristics`].
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl CharacteristicHandler {
    /// Create a handler for the characteristics of `service`.
    pub fn new(peripheral: Peripheral, service: Uuid) -> Self {
        Self {
            peripheral,
            service,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    /// Cache the characteristics of the service.
    ///
    /// Call after services were discovered. Returns how many were found.
    pub fn discover_characteristics(&self) -> usize {
        let found: HashMap<Uuid, Characteristic> = self
            .peripheral
            .services()
            .into_iter()
            .filter(|service| service.uuid == self.service)
            .flat_map(|service| service.characteristics)
            .map(|characteristic| {
                debug!(
                    "Found characteristic {} ({:?})",
                    characteristic.uuid, characteristic.properties
                );
                (characteristic.uuid, characteristic)
            })
            .collect();

        let count = found.len();
        *self.characteristics.write() = found;
        debug!("Cached {} characteristics of {}", count, self.service);
        count
    }

    /// Get a characteristic by UUID.
    pub fn get_characteristic(&self, uuid: &Uuid) -> Option<Characteristic> {
        self.characteristics.read().get(uuid).cloned()
    }

    /// Check if a characteristic exists and can notify.
    pub fn can_notify(&self, uuid: &Uuid) -> bool {
        self.get_characteristic(uuid).is_some_and(|c| {
            c.properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        })
    }

    fn notifiable(&self, uuid: &Uuid) -> Result<Characteristic> {
        let characteristic =
            self.get_characteristic(uuid)
                .ok_or_else(|| Error::CharacteristicNotFound {
                    uuid: uuid.to_string(),
                })?;

        if !self.can_notify(uuid) {
            return Err(Error::InvalidParameter {
                name: "characteristic".to_string(),
                value: format!("{} does not support notifications", uuid),
            });
        }

        Ok(characteristic)
    }

    /// Enable notifications on a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.notifiable(uuid)?;
        self.peripheral.subscribe(&characteristic).await?;
        debug!("Subscribed to notifications from {}", uuid);
        Ok(())
    }

    /// Disable notifications on a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.notifiable(uuid)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        debug!("Unsubscribed from notifications from {}", uuid);
        Ok(())
    }

    /// Stream of every notification the peripheral sends.
    pub async fn notification_stream(&self) -> Result<NotificationStream> {
        let notifications = self.peripheral.notifications().await?;

        Ok(notifications
            .map(|notification| {
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                NotificationEvent::from(notification)
            })
            .boxed())
    }
}
