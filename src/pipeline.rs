//! Session event application.
//!
//! The [`Pipeline`] is the single owner of everything a display shows: the
//! current value of each channel, the rolling history, the active alerts and
//! the status. Session events are applied to it one at a time; each
//! application returns the [`DisplayUpdate`]s a sink should receive.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::{MonitorConfig, PairingPolicy};
use crate::data::{ActiveAlerts, AlertEngine, AlertId, Channel, HistoryBuffer, Reading};
use crate::session::{SessionEvent, SessionMessage, SessionState};
use crate::sink::DisplaySink;

/// A single change a sink should render.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUpdate {
    /// New status text.
    Status(String),
    /// New current value for a channel.
    Reading {
        /// Channel.
        channel: Channel,
        /// Value.
        value: f32,
    },
    /// Full history of a channel.
    Buffer {
        /// Channel.
        channel: Channel,
        /// Plot points.
        points: Vec<(usize, f32)>,
    },
    /// Messages of the active alerts, in declaration order.
    Alerts(Vec<String>),
}

impl DisplayUpdate {
    /// Hand this update to a sink.
    pub fn deliver(&self, sink: &dyn DisplaySink) {
        match self {
            Self::Status(status) => sink.on_status_changed(status),
            Self::Reading { channel, value } => sink.on_reading(*channel, *value),
            Self::Buffer { channel, points } => sink.on_buffer_updated(*channel, points),
            Self::Alerts(messages) => sink.on_alerts_changed(messages),
        }
    }
}

/// Current value of a channel and when it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ValueSlot {
    /// Latest value, 0 when nothing has arrived.
    pub value: f32,
    /// Arrival time of the latest value.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the monitor state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MonitorSnapshot {
    /// Session status.
    pub status: SessionState,
    /// Current temperature in °C.
    pub temperature: f32,
    /// Current relative humidity in %.
    pub humidity: f32,
    /// Arrival time of the current temperature.
    pub temperature_updated_at: Option<DateTime<Utc>>,
    /// Arrival time of the current humidity.
    pub humidity_updated_at: Option<DateTime<Utc>>,
    /// Active rules in declaration order.
    pub active_alerts: Vec<AlertId>,
    /// Messages of the active rules.
    pub alert_messages: Vec<String>,
    /// Temperature plot points.
    pub temperature_history: Vec<(usize, f32)>,
    /// Humidity plot points.
    pub humidity_history: Vec<(usize, f32)>,
    /// Notifications dropped because they could not be decoded.
    pub dropped_samples: u64,
}

impl MonitorSnapshot {
    /// Status as displayed.
    pub fn status_text(&self) -> String {
        self.status.to_string()
    }

    /// Current value of a channel.
    pub fn value(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
        }
    }

    /// Plot points of a channel.
    pub fn history(&self, channel: Channel) -> &[(usize, f32)] {
        match channel {
            Channel::Temperature => &self.temperature_history,
            Channel::Humidity => &self.humidity_history,
        }
    }
}

/// Owner of the displayed state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    history: HistoryBuffer,
    temperature: ValueSlot,
    humidity: ValueSlot,
    alerts: ActiveAlerts,
    engine: AlertEngine,
    pairing: PairingPolicy,
    status: SessionState,
    session_id: u64,
    dropped_samples: u64,
}

impl Pipeline {
    /// Create an idle pipeline.
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            history: HistoryBuffer::new(config.history_capacity),
            temperature: ValueSlot::default(),
            humidity: ValueSlot::default(),
            alerts: ActiveAlerts::new(),
            engine: AlertEngine::new(),
            pairing: config.pairing,
            status: SessionState::Idle,
            session_id: 0,
            dropped_samples: 0,
        }
    }

    /// Accept events from session `id` from now on; events from any other
    /// session are ignored.
    pub fn begin_session(&mut self, id: u64) {
        debug!("Pipeline now following session {}", id);
        self.session_id = id;
    }

    /// Session whose events are accepted.
    pub fn current_session(&self) -> u64 {
        self.session_id
    }

    /// Apply a session message.
    pub fn apply(&mut self, message: SessionMessage) -> Vec<DisplayUpdate> {
        if message.session_id != self.session_id {
            trace!(
                "Ignoring event from stale session {} (current {})",
                message.session_id,
                self.session_id
            );
            return Vec::new();
        }

        match message.event {
            SessionEvent::StateChanged(state) => {
                let text = state.to_string();
                self.status = state;
                vec![DisplayUpdate::Status(text)]
            }
            SessionEvent::Reading(reading) => self.record(reading, Utc::now()),
            SessionEvent::DecodeFailed { .. } => {
                self.dropped_samples += 1;
                Vec::new()
            }
        }
    }

    /// Record a reading that arrived at `at`.
    ///
    /// Updates the current value and history of the reading's channel, then
    /// re-evaluates the alert rules against both current values.
    pub fn record(&mut self, reading: Reading, at: DateTime<Utc>) -> Vec<DisplayUpdate> {
        let channel = reading.channel();
        let value = reading.value();

        self.history.push(channel, value);
        *self.slot_mut(channel) = ValueSlot {
            value,
            updated_at: Some(at),
        };

        let mut updates = vec![
            DisplayUpdate::Reading { channel, value },
            DisplayUpdate::Buffer {
                channel,
                points: self.history.snapshot(channel),
            },
        ];
        updates.extend(self.evaluate_alerts(at));
        updates
    }

    /// Zero both values, clear both histories and all alerts, and show
    /// "Disconnected". The session (if any) keeps running.
    pub fn reset(&mut self) -> Vec<DisplayUpdate> {
        self.history.clear_all();
        self.temperature = ValueSlot::default();
        self.humidity = ValueSlot::default();
        self.dropped_samples = 0;
        self.status = SessionState::Disconnected;

        let mut updates = vec![DisplayUpdate::Status(self.status.to_string())];
        for channel in Channel::ALL {
            updates.push(DisplayUpdate::Reading {
                channel,
                value: 0.0,
            });
            updates.push(DisplayUpdate::Buffer {
                channel,
                points: Vec::new(),
            });
        }

        if !self.alerts.is_empty() {
            self.alerts = ActiveAlerts::new();
            updates.push(DisplayUpdate::Alerts(Vec::new()));
        }

        updates
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            status: self.status.clone(),
            temperature: self.temperature.value,
            humidity: self.humidity.value,
            temperature_updated_at: self.temperature.updated_at,
            humidity_updated_at: self.humidity.updated_at,
            active_alerts: self.alerts.ids(),
            alert_messages: self.alerts.messages(),
            temperature_history: self.history.snapshot(Channel::Temperature),
            humidity_history: self.history.snapshot(Channel::Humidity),
            dropped_samples: self.dropped_samples,
        }
    }

    /// Current status.
    pub fn status(&self) -> &SessionState {
        &self.status
    }

    /// Active alerts.
    pub fn alerts(&self) -> &ActiveAlerts {
        &self.alerts
    }

    /// Rolling history.
    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    fn slot_mut(&mut self, channel: Channel) -> &mut ValueSlot {
        match channel {
            Channel::Temperature => &mut self.temperature,
            Channel::Humidity => &mut self.humidity,
        }
    }

    fn evaluate_alerts(&mut self, now: DateTime<Utc>) -> Option<DisplayUpdate> {
        let next = if self.pair_is_fresh(now) {
            self.engine.evaluate(self.temperature.value, self.humidity.value)
        } else {
            ActiveAlerts::new()
        };

        if next == self.alerts {
            return None;
        }

        debug!("Active alerts changed: {:?}", next.ids());
        self.alerts = next;
        Some(DisplayUpdate::Alerts(self.alerts.messages()))
    }

    fn pair_is_fresh(&self, now: DateTime<Utc>) -> bool {
        let PairingPolicy::FreshWithin(window) = self.pairing else {
            return true;
        };

        [self.temperature, self.humidity].iter().all(|slot| {
            slot.updated_at.is_some_and(|at| {
                // Negative ages come from clock adjustments; treat as fresh
                (now - at).to_std().map_or(true, |age| age <= window)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FailureReason;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new(&MonitorConfig::default());
        pipeline.begin_session(1);
        pipeline
    }

    fn message(session_id: u64, event: SessionEvent) -> SessionMessage {
        SessionMessage { session_id, event }
    }

    fn reading(channel: Channel, value: f32) -> SessionMessage {
        message(1, SessionEvent::Reading(Reading::new(channel, value)))
    }

    #[test]
    fn test_initial_snapshot() {
        let snapshot = Pipeline::new(&MonitorConfig::default()).snapshot();

        assert_eq!(snapshot.status, SessionState::Idle);
        assert_eq!(snapshot.temperature, 0.0);
        assert_eq!(snapshot.humidity, 0.0);
        assert!(snapshot.temperature_history.is_empty());
        assert!(snapshot.active_alerts.is_empty());
    }

    #[test]
    fn test_reading_updates_value_buffer_and_alerts() {
        let mut pipeline = pipeline();

        let updates = pipeline.apply(reading(Channel::Temperature, 20.0));
        assert_eq!(
            updates,
            vec![
                DisplayUpdate::Reading {
                    channel: Channel::Temperature,
                    value: 20.0
                },
                DisplayUpdate::Buffer {
                    channel: Channel::Temperature,
                    points: vec![(0, 20.0)]
                },
            ]
        );

        let updates = pipeline.apply(reading(Channel::Humidity, 75.0));
        let alert_update = updates.last().unwrap();
        match alert_update {
            DisplayUpdate::Alerts(messages) => {
                assert_eq!(messages.len(), 3);
                assert!(messages[0].contains("anthracnose"));
                assert!(messages[1].contains("root rot"));
                assert!(messages[2].contains("mosaic virus"));
            }
            other => panic!("expected alerts update, got {:?}", other),
        }

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.temperature, 20.0);
        assert_eq!(snapshot.humidity, 75.0);
        assert_eq!(
            snapshot.active_alerts,
            vec![AlertId::Anthracnose, AlertId::RootRot, AlertId::MosaicVirus]
        );
        assert!(snapshot.temperature_updated_at.is_some());
    }

    #[test]
    fn test_alerts_published_only_on_change() {
        let mut pipeline = pipeline();
        pipeline.apply(reading(Channel::Temperature, 25.0));
        pipeline.apply(reading(Channel::Humidity, 95.0));

        // Same set again: no alert update
        let updates = pipeline.apply(reading(Channel::Humidity, 96.0));
        assert!(!updates
            .iter()
            .any(|u| matches!(u, DisplayUpdate::Alerts(_))));

        // Leaving every rule clears the list
        let updates = pipeline.apply(reading(Channel::Humidity, 10.0));
        assert_eq!(updates.last(), Some(&DisplayUpdate::Alerts(Vec::new())));
    }

    #[test]
    fn test_stale_session_events_ignored() {
        let mut pipeline = pipeline();
        pipeline.begin_session(2);

        let updates = pipeline.apply(reading(Channel::Temperature, 30.0));
        assert!(updates.is_empty());
        assert_eq!(pipeline.snapshot().temperature, 0.0);
    }

    #[test]
    fn test_status_and_decode_failures() {
        let mut pipeline = pipeline();

        let updates = pipeline.apply(message(
            1,
            SessionEvent::StateChanged(SessionState::Failed(FailureReason::NotFound {
                name: "EnvSensor".to_string(),
            })),
        ));
        assert_eq!(
            updates,
            vec![DisplayUpdate::Status("Device 'EnvSensor' not found".to_string())]
        );

        pipeline.apply(message(
            1,
            SessionEvent::DecodeFailed {
                channel: Channel::Humidity,
                error: crate::error::DecodeError::BadLength {
                    expected: 4,
                    actual: 2,
                },
            },
        ));
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.dropped_samples, 1);
        assert!(snapshot.humidity_history.is_empty());
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut pipeline = pipeline();
        pipeline.apply(message(1, SessionEvent::StateChanged(SessionState::Streaming)));
        pipeline.apply(reading(Channel::Temperature, 20.0));
        pipeline.apply(reading(Channel::Humidity, 75.0));

        let updates = pipeline.reset();
        assert_eq!(updates.first(), Some(&DisplayUpdate::Status("Disconnected".to_string())));
        assert_eq!(updates.last(), Some(&DisplayUpdate::Alerts(Vec::new())));

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.status_text(), "Disconnected");
        assert_eq!(snapshot.temperature, 0.0);
        assert_eq!(snapshot.humidity, 0.0);
        assert!(snapshot.temperature_history.is_empty());
        assert!(snapshot.humidity_history.is_empty());
        assert!(snapshot.alert_messages.is_empty());

        // Without alerts there is nothing to clear
        let updates = pipeline.reset();
        assert!(!updates
            .iter()
            .any(|u| matches!(u, DisplayUpdate::Alerts(_))));
    }

    #[test]
    fn test_history_capacity_respected() {
        let config = MonitorConfig {
            history_capacity: 5,
            ..MonitorConfig::default()
        };
        let mut pipeline = Pipeline::new(&config);
        pipeline.begin_session(1);

        for i in 0..12 {
            pipeline.apply(reading(Channel::Temperature, i as f32));
        }

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.temperature_history.len(), 5);
        assert_eq!(snapshot.temperature_history[0], (0, 7.0));
        assert_eq!(snapshot.temperature, 11.0);
    }

    #[test]
    fn test_fresh_within_pairing() {
        let config = MonitorConfig {
            pairing: PairingPolicy::FreshWithin(Duration::from_secs(10)),
            ..MonitorConfig::default()
        };
        let mut pipeline = Pipeline::new(&config);
        let start = Utc::now();

        pipeline.record(Reading::new(Channel::Temperature, 25.0), start);
        let updates = pipeline.record(
            Reading::new(Channel::Humidity, 95.0),
            start + chrono::Duration::seconds(5),
        );
        assert!(matches!(updates.last(), Some(DisplayUpdate::Alerts(m)) if m.len() == 1));

        // Temperature is now 60s old: the pair no longer counts
        let updates = pipeline.record(
            Reading::new(Channel::Humidity, 95.0),
            start + chrono::Duration::seconds(60),
        );
        assert_eq!(updates.last(), Some(&DisplayUpdate::Alerts(Vec::new())));
        assert!(pipeline.alerts().is_empty());
    }

    #[test]
    fn test_deliver_routes_to_sink() {
        use crate::sink::MockDisplaySink;

        let mut sink = MockDisplaySink::new();
        sink.expect_on_status_changed()
            .withf(|status| status == "Streaming")
            .times(1)
            .return_const(());
        sink.expect_on_buffer_updated()
            .withf(|channel, points| *channel == Channel::Humidity && points.len() == 1)
            .times(1)
            .return_const(());

        DisplayUpdate::Status("Streaming".to_string()).deliver(&sink);
        DisplayUpdate::Buffer {
            channel: Channel::Humidity,
            points: vec![(0, 80.0)],
        }
        .deliver(&sink);
    }
}
