//! Sample payload decoding.
//!
//! Each notification from the sensor carries exactly one little-endian
//! IEEE-754 `f32`, with no header or checksum:
//!
//! - Bytes 0-3: value (f32 little-endian)
//!
//! The channel is not part of the payload; it is inferred from the
//! characteristic that produced the notification (see [`ChannelMap`]).

use uuid::Uuid;

use crate::data::{Channel, Reading};
use crate::error::DecodeError;

/// Width of a sample payload in bytes.
pub const SAMPLE_LEN: usize = 4;

/// Decode a notification payload into a reading for `channel`.
///
/// # Errors
///
/// Returns [`DecodeError::BadLength`] when the payload is not exactly
/// [`SAMPLE_LEN`] bytes long.
///
/// # Example
///
/// ```
/// use crop_monitor_ble::data::Channel;
/// use crop_monitor_ble::protocol::decode;
///
/// let reading = decode(Channel::Temperature, &21.5f32.to_le_bytes()).unwrap();
/// assert_eq!(reading.value(), 21.5);
/// assert!(decode(Channel::Temperature, &[0, 1, 2]).is_err());
/// ```
pub fn decode(channel: Channel, payload: &[u8]) -> Result<Reading, DecodeError> {
    let bytes: [u8; SAMPLE_LEN] = payload.try_into().map_err(|_| DecodeError::BadLength {
        expected: SAMPLE_LEN,
        actual: payload.len(),
    })?;

    Ok(Reading::new(channel, f32::from_le_bytes(bytes)))
}

/// Encode a value the way the sensor does.
#[inline]
pub fn encode(value: f32) -> [u8; SAMPLE_LEN] {
    value.to_le_bytes()
}

/// Maps notification characteristics to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    temperature: Uuid,
    humidity: Uuid,
}

impl ChannelMap {
    /// Create a map from the two characteristic UUIDs.
    pub fn new(temperature: Uuid, humidity: Uuid) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Characteristic UUID for a channel.
    pub fn characteristic(&self, channel: Channel) -> Uuid {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
        }
    }

    /// Resolve the channel a characteristic belongs to.
    ///
    /// `Uuid` equality compares the parsed 128-bit value, so textual case of
    /// the identifier never matters.
    pub fn resolve(&self, characteristic: &Uuid) -> Option<Channel> {
        if *characteristic == self.temperature {
            Some(Channel::Temperature)
        } else if *characteristic == self.humidity {
            Some(Channel::Humidity)
        } else {
            None
        }
    }

    /// Resolve a textual characteristic identifier, ignoring ASCII case.
    pub fn resolve_str(&self, identifier: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|&channel| {
            self.characteristic(channel)
                .hyphenated()
                .to_string()
                .eq_ignore_ascii_case(identifier.trim())
        })
    }
}
