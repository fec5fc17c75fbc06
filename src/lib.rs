// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # crop-monitor-ble
//!
//! A Rust library that streams temperature and relative humidity from a
//! Bluetooth Low Energy environmental sensor and raises crop disease-risk
//! alerts when conditions favour a known pathogen.
//!
//! ## Features
//!
//! - **Discovery by name**: Find the sensor by its advertised local name
//! - **Sample decoding**: One little-endian `f32` per notification
//! - **Rolling history**: The last 100 values of each channel, for plotting
//! - **Disease alerts**: Five fixed rules over temperature and humidity
//! - **Session lifecycle**: Scanning, connecting, streaming and teardown with
//!   user-visible status text
//! - **Display seam**: Push updates to any [`DisplaySink`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crop_monitor_ble::{BleTransport, MonitorConfig, Result, SessionController, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = Arc::new(BleTransport::new().await?);
//!     let controller =
//!         SessionController::with_sink(transport, MonitorConfig::default(), Arc::new(TracingSink))?;
//!
//!     controller.start()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!
//!     let snapshot = controller.snapshot();
//!     println!("{} / {:.2} °C / {:.2} %", snapshot.status_text(), snapshot.temperature, snapshot.humidity);
//!     for message in &snapshot.alert_messages {
//!         println!("{}", message);
//!     }
//!
//!     controller.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod data;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod sink;

// Re-exports for convenience
pub use ble::transport::{BleTransport, DeviceLink, DiscoveryRequest, Transport};
pub use config::{MonitorConfig, MonitorConfigBuilder, PairingPolicy};
pub use controller::SessionController;
pub use error::{DecodeError, Error, Result};
pub use pipeline::{DisplayUpdate, MonitorSnapshot, Pipeline};
pub use session::{DeviceSession, FailureReason, SessionEvent, SessionState};
pub use sink::{DisplaySink, NullSink, TracingSink};

// Re-export commonly used types from submodules
pub use data::{
    ActiveAlerts, AlertEngine, AlertId, AlertRule, Channel, HistoryBuffer, HistoryStats, Reading,
    DISEASE_RULES, HISTORY_CAPACITY,
};
pub use protocol::decode;
