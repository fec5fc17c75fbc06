//! BLE scanning functionality.
//!
//! Provides the scanner that locates the sensor by its advertised name.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

/// A device whose advertised name matched the scan target.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// The peripheral handle.
    pub peripheral: Peripheral,
    /// Advertised local name.
    pub local_name: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// BLE scanner for locating the sensor.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
        }
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until a peripheral advertising `name` shows up.
    ///
    /// With a `timeout` the scan ends after that long and returns `Ok(None)`
    /// if nothing matched. Without one the scan runs until a match or until
    /// the adapter's event stream closes. Cancelling `cancel` also ends the
    /// search with `Ok(None)`. The adapter scan is stopped on every path.
    pub async fn find_by_name(
        &self,
        name: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<DiscoveredDevice>> {
        info!("Scanning for device '{}'", name);

        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;
        *self.is_scanning.write() = true;

        let search = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.search(events, name)).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("Scan window of {:?} elapsed without a match", limit);
                        Ok(None)
                    }
                },
                None => self.search(events, name).await,
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scan for '{}' cancelled", name);
                Ok(None)
            }
            result = search => result,
        };

        if let Err(e) = self.stop_scanning().await {
            warn!("Failed to stop scan: {}", e);
        }

        if let Ok(Some(device)) = &result {
            info!(
                "Found '{}' ({}), rssi {:?}",
                device.local_name, device.identifier, device.rssi
            );
        }

        result
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn search(
        &self,
        mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
        name: &str,
    ) -> Result<Option<DiscoveredDevice>> {
        // Peripherals already cached by the adapter never raise a discovery event
        for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
            if let Some(device) = Self::match_peripheral(peripheral, name).await {
                return Ok(Some(device));
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            if let Some(device) = self.process_peripheral(id, name).await {
                return Ok(Some(device));
            }
        }

        debug!("Adapter event stream ended");
        Ok(None)
    }

    async fn process_peripheral(&self, id: PeripheralId, name: &str) -> Option<DiscoveredDevice> {
        trace!("Device discovered or updated: {:?}", id);

        match self.adapter.peripheral(&id).await {
            Ok(peripheral) => Self::match_peripheral(peripheral, name).await,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                None
            }
        }
    }

    /// Exact advertised-name match.
    async fn match_peripheral(peripheral: Peripheral, name: &str) -> Option<DiscoveredDevice> {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let local_name = properties.local_name?;
        if local_name != name {
            return None;
        }

        Some(DiscoveredDevice {
            identifier: peripheral.id().to_string(),
            peripheral,
            local_name,
            rssi: properties.rssi,
        })
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
