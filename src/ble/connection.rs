//! BLE connection management.
//!
//! Connects to the sensor, checks that it exposes the sample service, and
//! answers liveness polls while the session streams.

use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Link-layer state of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected with services discovered.
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Owns the connection to one sensor.
pub struct ConnectionManager {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Service that must be present after discovery.
    service: Uuid,
    /// Current link state.
    state: RwLock<LinkState>,
}

impl ConnectionManager {
    /// Create a manager for `peripheral` that requires `service`.
    pub fn new(peripheral: Peripheral, service: Uuid) -> Self {
        Self {
            peripheral,
            service,
            state: RwLock::new(LinkState::Disconnected),
        }
    }

    /// Get the current link state.
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Connect and discover services. A single attempt; retries are up to the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the link cannot be established
    /// and [`Error::ServiceNotFound`] if the sensor service is missing.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            LinkState::Connected => {
                debug!("Already connected");
                return Ok(());
            }
            LinkState::Connecting => {
                return Err(Error::ConnectionFailed {
                    reason: "Connection already in progress".to_string(),
                });
            }
            LinkState::Disconnected => {}
        }

        self.set_state(LinkState::Connecting);

        if let Err(e) = self.establish().await {
            self.set_state(LinkState::Disconnected);
            return Err(e);
        }

        info!("Connected to sensor");
        self.set_state(LinkState::Connected);
        Ok(())
    }

    async fn establish(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            self.peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectionFailed {
                    reason: e.to_string(),
                })?;
        }

        self.peripheral.discover_services().await?;

        let services = self.peripheral.services();
        if !services.iter().any(|service| service.uuid == self.service) {
            warn!(
                "Service {} missing ({} services discovered)",
                self.service,
                services.len()
            );
            // Leave the link down rather than half-open
            log_cleanup_failure(self.peripheral.disconnect().await);
            return Err(Error::ServiceNotFound {
                uuid: self.service.to_string(),
            });
        }

        Ok(())
    }

    /// Ask the peripheral whether the link is still up.
    pub async fn is_alive(&self) -> bool {
        let alive = self.peripheral.is_connected().await.unwrap_or(false);
        if !alive && self.state() == LinkState::Connected {
            self.set_state(LinkState::Disconnected);
        }
        alive
    }

    /// Disconnect from the sensor.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == LinkState::Disconnected
            && !self.peripheral.is_connected().await.unwrap_or(false)
        {
            return Ok(());
        }

        let result = self.peripheral.disconnect().await;
        self.set_state(LinkState::Disconnected);

        match result {
            Ok(()) => {
                info!("Disconnected from sensor");
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    fn set_state(&self, new_state: LinkState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Link state changed: {} -> {}", old_state, new_state);
        }
    }
}

/// Log a failed disconnect that runs while another error is being returned.
/// Returns `true` if there was a failure to log.
fn log_cleanup_failure(result: std::result::Result<(), btleplug::Error>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            warn!("Failed to disconnect after missing service: {}", e);
            true
        }
    }
}
