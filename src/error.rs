//! Error types for the crop-monitor-ble crate.

use thiserror::Error;

/// Error produced when a notification payload cannot be turned into a reading.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload does not have the fixed sample width.
    #[error("bad payload length: expected {expected} bytes, got {actual}")]
    BadLength {
        /// The required payload length.
        expected: usize,
        /// The length that was received.
        actual: usize,
    },
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No advertising device matched the configured name.
    #[error("Device '{name}' not found")]
    DeviceNotFound {
        /// The advertised name that was searched for.
        name: String,
    },

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the device was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// A monitoring session is already running.
    #[error("A monitoring session is already active")]
    SessionActive,

    /// A notification payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::BadLength {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "bad payload length: expected 4 bytes, got 3"
        );
    }

    #[test]
    fn test_decode_error_converts() {
        let err: Error = DecodeError::BadLength {
            expected: 4,
            actual: 0,
        }
        .into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::DeviceNotFound {
            name: "EnvSensor".to_string(),
        };
        assert_eq!(err.to_string(), "Device 'EnvSensor' not found");
    }
}
