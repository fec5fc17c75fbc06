//! Presentation seam.
//!
//! A [`DisplaySink`] receives every observable change of the monitor as a
//! pull-free push: status text, the newest value of a channel, the channel's
//! plot points, and the active alert messages. Rendering is entirely the
//! sink's business.

use tracing::{info, warn};

use crate::data::Channel;

/// Receiver of monitor updates.
///
/// Calls are serialized: session updates and a reset's cleared state never
/// interleave, and each batch arrives in the order its changes were applied.
/// Implementations should return quickly and must not call
/// `SessionController::reset` from inside a callback.
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink: Send + Sync {
    /// The session status changed.
    fn on_status_changed(&self, status: &str);

    /// A channel has a new current value.
    fn on_reading(&self, channel: Channel, value: f32);

    /// A channel's history changed. `points` is the full buffer.
    fn on_buffer_updated(&self, channel: Channel, points: &[(usize, f32)]);

    /// The set of active alerts changed. An empty slice clears the list.
    fn on_alerts_changed(&self, messages: &[String]);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn on_status_changed(&self, _status: &str) {}

    fn on_reading(&self, _channel: Channel, _value: f32) {}

    fn on_buffer_updated(&self, _channel: Channel, _points: &[(usize, f32)]) {}

    fn on_alerts_changed(&self, _messages: &[String]) {}
}

/// Sink that writes updates to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DisplaySink for TracingSink {
    fn on_status_changed(&self, status: &str) {
        info!(target: "crop_monitor_ble::display", "Status: {}", status);
    }

    fn on_reading(&self, channel: Channel, value: f32) {
        info!(target: "crop_monitor_ble::display", "{}", channel.format_value(value));
    }

    fn on_buffer_updated(&self, channel: Channel, points: &[(usize, f32)]) {
        tracing::debug!(
            target: "crop_monitor_ble::display",
            "{} history: {} points",
            channel.label(),
            points.len()
        );
    }

    fn on_alerts_changed(&self, messages: &[String]) {
        if messages.is_empty() {
            info!(target: "crop_monitor_ble::display", "No active alerts");
        }
        for message in messages {
            warn!(target: "crop_monitor_ble::display", "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_accept_updates() {
        let sinks: Vec<Box<dyn DisplaySink>> = vec![Box::new(NullSink), Box::new(TracingSink)];

        for sink in &sinks {
            sink.on_status_changed("Streaming");
            sink.on_reading(Channel::Temperature, 21.5);
            sink.on_buffer_updated(Channel::Humidity, &[(0, 80.0), (1, 81.0)]);
            sink.on_alerts_changed(&[]);
        }
    }

    #[test]
    fn test_mock_sink_records_calls() {
        let mut sink = MockDisplaySink::new();
        sink.expect_on_reading()
            .withf(|channel, value| *channel == Channel::Humidity && *value == 82.5)
            .times(1)
            .return_const(());

        sink.on_reading(Channel::Humidity, 82.5);
    }
}
