//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy plumbing for discovering
//! the sensor, holding its connection and receiving its notifications.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::CharacteristicHandler;
pub use connection::{ConnectionManager, LinkState};
pub use scanner::{BleScanner, DiscoveredDevice};
pub use transport::{
    BleLink, BleTransport, DeviceLink, DiscoveryRequest, NotificationEvent, NotificationStream,
    Transport,
};
pub use uuids::*;
