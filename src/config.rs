//! Monitor configuration.
//!
//! [`MonitorConfig`] carries the device identity, buffer sizes and timing
//! used by a monitoring session. Defaults match the stock sensor firmware.
//!
//! ```
//! use std::time::Duration;
//! use crop_monitor_ble::MonitorConfig;
//!
//! let config = MonitorConfig::builder()
//!     .device_name("Greenhouse-2")
//!     .scan_timeout(Some(Duration::from_secs(10)))
//!     .connect_attempts(3)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.history_capacity, 100);
//! ```

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{
    DEFAULT_DEVICE_NAME, HUMIDITY_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID,
    TEMPERATURE_CHARACTERISTIC_UUID,
};
use crate::data::{HISTORY_CAPACITY, MAX_HISTORY_CAPACITY};
use crate::error::{Error, Result};
use crate::protocol::ChannelMap;

/// How the alert engine pairs the two independently arriving channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PairingPolicy {
    /// Evaluate against the latest value of each channel, however old the
    /// other channel's value is.
    #[default]
    Latest,
    /// Evaluate only when both channels were updated within the window;
    /// otherwise no alert is active.
    FreshWithin(Duration),
}

/// Configuration for a monitoring session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorConfig {
    /// Advertised name of the target device (exact match).
    pub device_name: String,
    /// Service the sample characteristics belong to.
    pub service_uuid: Uuid,
    /// Temperature notification characteristic.
    pub temperature_uuid: Uuid,
    /// Humidity notification characteristic.
    pub humidity_uuid: Uuid,
    /// Values kept per channel.
    pub history_capacity: usize,
    /// Discovery window. `None` scans until the device shows up.
    pub scan_timeout: Option<Duration>,
    /// How often the streaming loop checks that the link is still up.
    pub liveness_interval: Duration,
    /// Connection attempts before the session fails.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub retry_delay: Duration,
    /// Channel pairing policy for alert evaluation.
    pub pairing: PairingPolicy,
    /// Depth of the queue between a session and its consumer.
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            service_uuid: SENSOR_SERVICE_UUID,
            temperature_uuid: TEMPERATURE_CHARACTERISTIC_UUID,
            humidity_uuid: HUMIDITY_CHARACTERISTIC_UUID,
            history_capacity: HISTORY_CAPACITY,
            scan_timeout: Some(Duration::from_secs(5)),
            liveness_interval: Duration::from_millis(100),
            connect_attempts: 1,
            retry_delay: Duration::from_secs(1),
            pairing: PairingPolicy::Latest,
            event_buffer: 64,
        }
    }
}

impl MonitorConfig {
    /// Create a new builder.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Characteristic-to-channel map for this configuration.
    pub fn channel_map(&self) -> ChannelMap {
        ChannelMap::new(self.temperature_uuid, self.humidity_uuid)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty device name, a
    /// history capacity of zero or above [`MAX_HISTORY_CAPACITY`], a zero
    /// interval, zero connect attempts, a zero event
    /// buffer, or identical characteristic UUIDs.
    pub fn validate(&self) -> Result<()> {
        fn invalid(name: &str, value: impl ToString) -> Error {
            Error::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            }
        }

        if self.device_name.trim().is_empty() {
            return Err(invalid("device_name", format!("{:?}", self.device_name)));
        }
        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(invalid("history_capacity", self.history_capacity));
        }
        if self.liveness_interval.is_zero() {
            return Err(invalid("liveness_interval", "0ms"));
        }
        if self.scan_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("scan_timeout", "0ms"));
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts", 0));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", 0));
        }
        if self.temperature_uuid == self.humidity_uuid {
            return Err(invalid("humidity_uuid", self.humidity_uuid));
        }
        if let PairingPolicy::FreshWithin(window) = self.pairing {
            if window.is_zero() {
                return Err(invalid("pairing", "FreshWithin(0ms)"));
            }
        }
        Ok(())
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Debug, Clone, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    /// Set the target device name.
    #[must_use]
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device_name = name.into();
        self
    }

    /// Set the service UUID.
    #[must_use]
    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.config.service_uuid = uuid;
        self
    }

    /// Set the temperature and humidity characteristic UUIDs.
    #[must_use]
    pub fn characteristics(mut self, temperature: Uuid, humidity: Uuid) -> Self {
        self.config.temperature_uuid = temperature;
        self.config.humidity_uuid = humidity;
        self
    }

    /// Set the history capacity per channel.
    #[must_use]
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Set the discovery window.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.scan_timeout = timeout;
        self
    }

    /// Set the liveness poll interval.
    #[must_use]
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.config.liveness_interval = interval;
        self
    }

    /// Set the number of connection attempts.
    #[must_use]
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }

    /// Set the delay between connection attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the pairing policy.
    #[must_use]
    pub fn pairing(mut self, pairing: PairingPolicy) -> Self {
        self.config.pairing = pairing;
        self
    }

    /// Set the session event queue depth.
    #[must_use]
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.event_buffer = size;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<MonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
