//! Sensor wire protocol.
//!
//! This module decodes the notification payloads the sensor sends.

pub mod sample;

pub use sample::{decode, encode, ChannelMap, SAMPLE_LEN};
