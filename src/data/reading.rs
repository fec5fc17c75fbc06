//! Channel and reading types.
//!
//! A [`Reading`] is one decoded sample tagged with the [`Channel`] that
//! produced it. Readings are immutable once built.

/// One of the two monitored physical quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Channel {
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
}

impl Channel {
    /// Both channels, temperature first.
    pub const ALL: [Channel; 2] = [Channel::Temperature, Channel::Humidity];

    /// Unit suffix used when rendering values of this channel.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
        }
    }

    /// Render a value with two decimals and this channel's unit.
    pub fn format_value(&self, value: f32) -> String {
        format!("{}: {:.2} {}", self.label(), value, self.unit())
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single decoded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    channel: Channel,
    value: f32,
}

impl Reading {
    /// Create a new reading.
    pub fn new(channel: Channel, value: f32) -> Self {
        Self { channel, value }
    }

    /// The channel this reading belongs to.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The decoded value.
    pub fn value(&self) -> f32 {
        self.value
    }
}
