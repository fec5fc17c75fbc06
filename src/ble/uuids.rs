//! BLE Service and Characteristic UUIDs.
//!
//! Contains the identifiers the environmental sensor advertises and exposes.

use uuid::Uuid;

/// Advertised name of the sensor device.
pub const DEFAULT_DEVICE_NAME: &str = "EnvSensor";

/// Service UUID the sensor exposes its characteristics under.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);

/// Temperature characteristic UUID (Notify, 4-byte f32 LE, °C).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a6e_0000_1000_8000_00805f9b34fb);

/// Humidity characteristic UUID (Notify, 4-byte f32 LE, %RH).
pub const HUMIDITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a6f_0000_1000_8000_00805f9b34fb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            SENSOR_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            "00002a6e-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HUMIDITY_CHARACTERISTIC_UUID.to_string(),
            "00002a6f-0000-1000-8000-00805f9b34fb"
        );
    }
}
