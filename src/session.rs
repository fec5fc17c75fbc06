//! Device session state machine.
//!
//! A [`DeviceSession`] drives one end-to-end lifecycle:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Connected -> Streaming -> Disconnected
//!            |            |             |
//!            +------------+-------------+----> Failed(reason)
//! ```
//!
//! `Failed` and `Disconnected` are terminal for a session; a new session is
//! needed to try again. Every state change and every decoded reading is
//! pushed, in order, onto one queue read by a single consumer.

use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ble::transport::{
    DeviceLink, DiscoveryRequest, NotificationEvent, NotificationStream, Transport,
};
use crate::config::MonitorConfig;
use crate::data::{Channel, Reading};
use crate::error::{DecodeError, Error, Result};
use crate::protocol::{decode, ChannelMap};

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
    /// Discovery completed without seeing the target name.
    NotFound {
        /// The advertised name that was searched for.
        name: String,
    },
    /// Connecting to the device failed.
    Connect(String),
    /// The transport failed while scanning or subscribing.
    Transport(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "Device '{}' not found", name),
            Self::Connect(reason) => write!(f, "Connection error: {}", reason),
            Self::Transport(reason) => write!(f, "Transport error: {}", reason),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Looking for the device.
    Scanning,
    /// Device found, connecting.
    Connecting,
    /// Connected, subscribing to notifications.
    Connected,
    /// Receiving notifications.
    Streaming,
    /// The link went away or the session was stopped.
    Disconnected,
    /// The session gave up.
    Failed(FailureReason),
}

impl SessionState {
    /// Check if the session is between start and a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Connected | Self::Streaming
        )
    }

    /// Check if the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Something a session reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// A notification decoded into a reading.
    Reading(Reading),
    /// A notification for a known channel was malformed and dropped.
    DecodeFailed {
        /// Channel the payload arrived on.
        channel: Channel,
        /// Why decoding failed.
        error: DecodeError,
    },
}

/// A [`SessionEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    /// Producing session.
    pub session_id: u64,
    /// The event.
    pub event: SessionEvent,
}

/// How the streaming loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Cancelled,
    LinkLost,
}

/// One discovery-through-streaming lifecycle.
pub struct DeviceSession<T: Transport> {
    id: u64,
    transport: Arc<T>,
    config: MonitorConfig,
    channels: ChannelMap,
    state: Arc<RwLock<SessionState>>,
    events: mpsc::Sender<SessionMessage>,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a session that reports on `events`.
    pub fn new(
        id: u64,
        transport: Arc<T>,
        config: MonitorConfig,
        events: mpsc::Sender<SessionMessage>,
    ) -> Self {
        Self {
            id,
            transport,
            channels: config.channel_map(),
            config,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            events,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Shared handle for observing the state from outside the session task.
    pub fn state_handle(&self) -> Arc<RwLock<SessionState>> {
        self.state.clone()
    }

    /// Run the session to completion and return its terminal state.
    ///
    /// Cancelling `cancel` unsubscribes, disconnects and ends the session in
    /// [`SessionState::Disconnected`].
    pub async fn run(self, cancel: CancellationToken) -> SessionState {
        let final_state = self.drive(&cancel).await;

        match &final_state {
            SessionState::Failed(reason) => error!("Session {} failed: {}", self.id, reason),
            state => info!("Session {} ended: {}", self.id, state),
        }

        self.set_state(final_state.clone()).await;
        final_state
    }

    async fn drive(&self, cancel: &CancellationToken) -> SessionState {
        self.set_state(SessionState::Scanning).await;

        // The transport sees the token so it can stop its own scan
        let request = DiscoveryRequest::from_config(&self.config);
        let discovery = self.transport.discover(&request, cancel).await;
        let name = request.name.as_str();

        if cancel.is_cancelled() {
            debug!("Session {} cancelled while scanning", self.id);
            if let Ok(Some(link)) = &discovery {
                self.teardown(link, false).await;
            }
            return SessionState::Disconnected;
        }

        let link = match discovery {
            Ok(Some(link)) => link,
            Ok(None) => {
                warn!("Device '{}' not found", name);
                return SessionState::Failed(FailureReason::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return SessionState::Failed(FailureReason::Transport(e.to_string())),
        };

        info!("Session {}: found '{}' ({})", self.id, name, link.identifier());
        self.set_state(SessionState::Connecting).await;

        match self.connect(&link, cancel).await {
            None => {
                self.teardown(&link, false).await;
                return SessionState::Disconnected;
            }
            Some(Err(e)) => return SessionState::Failed(FailureReason::Connect(e.to_string())),
            Some(Ok(())) => {}
        }

        self.set_state(SessionState::Connected).await;

        let notifications = match self.subscribe(&link).await {
            Ok(stream) => stream,
            Err(e) => {
                self.teardown(&link, false).await;
                return SessionState::Failed(FailureReason::Transport(e.to_string()));
            }
        };

        self.set_state(SessionState::Streaming).await;

        let end = self.stream(&link, notifications, cancel).await;
        self.teardown(&link, end == StreamEnd::Cancelled).await;

        SessionState::Disconnected
    }

    /// Connect with up to `connect_attempts` tries. `None` means cancelled.
    async fn connect(&self, link: &T::Link, cancel: &CancellationToken) -> Option<Result<()>> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!("Connection attempt {} of {}", attempt, attempts);

            match cancellable(cancel, link.connect()).await? {
                Ok(()) => return Some(Ok(())),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                cancellable(cancel, tokio::time::sleep(self.config.retry_delay)).await?;
            }
        }

        Some(Err(last_error.unwrap_or_else(|| Error::ConnectionFailed {
            reason: format!("Failed after {} attempts", attempts),
        })))
    }

    /// Open the notification stream, then enable both channels.
    async fn subscribe(&self, link: &T::Link) -> Result<NotificationStream> {
        let notifications = link.notifications().await?;

        for channel in Channel::ALL {
            let uuid = self.channels.characteristic(channel);
            link.subscribe(uuid).await?;
            debug!("Subscribed to {} ({})", channel, uuid);
        }

        Ok(notifications)
    }

    async fn stream(
        &self,
        link: &T::Link,
        mut notifications: NotificationStream,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session {} cancelled while streaming", self.id);
                    return StreamEnd::Cancelled;
                }
                notification = notifications.next() => match notification {
                    Some(event) => self.handle_notification(event).await,
                    None => {
                        info!("Notification stream closed");
                        return StreamEnd::LinkLost;
                    }
                },
                _ = liveness.tick() => {
                    if !link.is_connected().await {
                        info!("Link to sensor lost");
                        return StreamEnd::LinkLost;
                    }
                }
            }
        }
    }

    async fn handle_notification(&self, event: NotificationEvent) {
        let Some(channel) = self.channels.resolve(&event.characteristic_uuid) else {
            trace!("Ignoring notification from {}", event.characteristic_uuid);
            return;
        };

        trace!("{} payload: {:02X?}", channel, event.data.as_ref());

        let session_event = match decode(channel, &event.data) {
            Ok(reading) => SessionEvent::Reading(reading),
            Err(error) => {
                warn!("Dropping {} sample: {}", channel, error);
                SessionEvent::DecodeFailed { channel, error }
            }
        };

        self.emit(session_event).await;
    }

    async fn teardown(&self, link: &T::Link, unsubscribe: bool) {
        if unsubscribe {
            for channel in Channel::ALL {
                let uuid = self.channels.characteristic(channel);
                if let Err(e) = link.unsubscribe(uuid).await {
                    warn!("Failed to unsubscribe from {}: {}", uuid, e);
                }
            }
        }

        if let Err(e) = link.disconnect().await {
            warn!("Error disconnecting from {}: {}", link.identifier(), e);
        }
    }

    async fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };

        if old_state != new_state {
            info!("Session {}: {} -> {}", self.id, old_state, new_state);
            self.emit(SessionEvent::StateChanged(new_state)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        let message = SessionMessage {
            session_id: self.id,
            event,
        };
        if self.events.send(message).await.is_err() {
            trace!("Session {} consumer has gone away", self.id);
        }
    }
}

/// Race `future` against cancellation.
async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{HUMIDITY_CHARACTERISTIC_UUID, TEMPERATURE_CHARACTERISTIC_UUID};
    use crate::mock::{MockDevice, MockTransport};
    use std::time::Duration;

    fn test_config() -> MonitorConfig {
        MonitorConfig::builder()
            .liveness_interval(Duration::from_millis(10))
            .retry_delay(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<SessionMessage>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            events.push(message.event);
        }
        events
    }

    fn states(events: &[SessionEvent]) -> Vec<SessionState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged(state) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "Streaming");
        assert_eq!(SessionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            SessionState::Failed(FailureReason::NotFound {
                name: "EnvSensor".to_string()
            })
            .to_string(),
            "Device 'EnvSensor' not found"
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Scanning.is_active());
        assert!(SessionState::Streaming.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Disconnected.is_terminal());
        assert!(SessionState::Failed(FailureReason::Connect("x".into())).is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }

    #[tokio::test]
    async fn test_not_found_never_connects() {
        let transport = Arc::new(MockTransport::new());
        let (tx, mut rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport.clone(), test_config(), tx);

        let final_state = session.run(CancellationToken::new()).await;

        assert_eq!(
            final_state,
            SessionState::Failed(FailureReason::NotFound {
                name: "EnvSensor".to_string()
            })
        );
        let seen = states(&drain(&mut rx));
        assert_eq!(seen.first(), Some(&SessionState::Scanning));
        assert!(!seen.contains(&SessionState::Connecting));
        assert_eq!(transport.discover_calls(), 1);
    }

    #[tokio::test]
    async fn test_name_must_match_exactly() {
        let transport = Arc::new(MockTransport::with_device(MockDevice::new("envsensor")));
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, test_config(), tx);

        let final_state = session.run(CancellationToken::new()).await;
        assert!(matches!(
            final_state,
            SessionState::Failed(FailureReason::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_discovery_error_fails_session() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_discovery("adapter powered off");
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, test_config(), tx);

        let final_state = session.run(CancellationToken::new()).await;
        assert!(matches!(
            final_state,
            SessionState::Failed(FailureReason::Transport(ref reason)) if reason.contains("adapter powered off")
        ));
    }

    #[tokio::test]
    async fn test_connect_error_fails_session() {
        let device = MockDevice::new("EnvSensor");
        device.set_connect_failures(1);
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let (tx, mut rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, test_config(), tx);

        let final_state = session.run(CancellationToken::new()).await;

        assert!(matches!(
            final_state,
            SessionState::Failed(FailureReason::Connect(_))
        ));
        assert_eq!(device.connect_calls(), 1);
        let seen = states(&drain(&mut rx));
        assert!(seen.contains(&SessionState::Connecting));
        assert!(!seen.contains(&SessionState::Connected));
    }

    #[tokio::test]
    async fn test_bounded_connect_retry() {
        let device = MockDevice::new("EnvSensor");
        device.set_connect_failures(2);
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let config = MonitorConfig {
            connect_attempts: 3,
            ..test_config()
        };
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, config, tx);
        let state = session.state_handle();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone()));

        wait_until(|| *state.read() == SessionState::Streaming).await;
        assert_eq!(device.connect_calls(), 3);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribe_error_fails_session() {
        let device = MockDevice::new("EnvSensor");
        device.fail_subscribe(true);
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, test_config(), tx);

        let final_state = session.run(CancellationToken::new()).await;

        assert!(matches!(
            final_state,
            SessionState::Failed(FailureReason::Transport(_))
        ));
        assert!(!device.is_link_up());
    }

    #[tokio::test]
    async fn test_streaming_pipeline_and_link_loss() {
        let device = MockDevice::new("EnvSensor");
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let (tx, mut rx) = mpsc::channel(32);
        let session = DeviceSession::new(7, transport, test_config(), tx);
        let state = session.state_handle();

        let handle = tokio::spawn(session.run(CancellationToken::new()));
        wait_until(|| *state.read() == SessionState::Streaming).await;

        assert_eq!(
            device.subscriptions(),
            vec![TEMPERATURE_CHARACTERISTIC_UUID, HUMIDITY_CHARACTERISTIC_UUID]
        );

        assert!(device.notify_value(TEMPERATURE_CHARACTERISTIC_UUID, 21.5));
        assert!(device.notify(HUMIDITY_CHARACTERISTIC_UUID, vec![1u8, 2, 3]));
        assert!(device.notify_value(uuid::Uuid::nil(), 99.0));
        assert!(device.notify_value(HUMIDITY_CHARACTERISTIC_UUID, 88.0));

        // Give the loop a moment to drain before the link goes
        tokio::time::sleep(Duration::from_millis(30)).await;
        device.drop_link();

        assert_eq!(handle.await.unwrap(), SessionState::Disconnected);

        let events = drain(&mut rx);
        let payload_events: Vec<_> = events
            .iter()
            .filter(|e| !matches!(e, SessionEvent::StateChanged(_)))
            .cloned()
            .collect();
        assert_eq!(
            payload_events,
            vec![
                SessionEvent::Reading(Reading::new(Channel::Temperature, 21.5)),
                SessionEvent::DecodeFailed {
                    channel: Channel::Humidity,
                    error: DecodeError::BadLength {
                        expected: 4,
                        actual: 3
                    },
                },
                SessionEvent::Reading(Reading::new(Channel::Humidity, 88.0)),
            ]
        );
        assert_eq!(
            states(&events),
            vec![
                SessionState::Scanning,
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Streaming,
                SessionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_unsubscribes_and_disconnects() {
        let device = MockDevice::new("EnvSensor");
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let (tx, _rx) = mpsc::channel(32);
        let session = DeviceSession::new(1, transport, test_config(), tx);
        let state = session.state_handle();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone()));
        wait_until(|| *state.read() == SessionState::Streaming).await;

        cancel.cancel();

        assert_eq!(handle.await.unwrap(), SessionState::Disconnected);
        assert!(device.subscriptions().is_empty());
        assert!(!device.is_link_up());
    }

    #[tokio::test]
    async fn test_cancel_during_scan() {
        let transport = Arc::new(MockTransport::new());
        transport.set_scan_delay(Duration::from_secs(30));
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport, test_config(), tx);

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(session.run(cancel).await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancel_mid_scan_stops_scanning() {
        let device = MockDevice::new("EnvSensor");
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        transport.set_scan_delay(Duration::from_secs(30));
        let config = MonitorConfig {
            scan_timeout: None,
            ..test_config()
        };
        let (tx, mut rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport.clone(), config, tx);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone()));
        wait_until(|| transport.is_scanning()).await;

        cancel.cancel();

        assert_eq!(handle.await.unwrap(), SessionState::Disconnected);
        assert!(!transport.is_scanning());
        assert_eq!(device.connect_calls(), 0);
        assert_eq!(
            states(&drain(&mut rx)),
            vec![SessionState::Scanning, SessionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_discovery_uses_configured_service() {
        let service = uuid::Uuid::from_u128(0x0000_181a_0000_1000_8000_00805f9b34fb);
        let device = MockDevice::new("EnvSensor");
        let transport = Arc::new(MockTransport::with_device(device.clone()));
        let config = MonitorConfig {
            service_uuid: service,
            ..test_config()
        };
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(1, transport.clone(), config.clone(), tx);

        // The device only exposes the default sensor service
        let final_state = session.run(CancellationToken::new()).await;
        assert!(matches!(
            final_state,
            SessionState::Failed(FailureReason::Connect(ref reason)) if reason.contains(&service.to_string())
        ));
        assert_eq!(
            transport.last_request(),
            Some(DiscoveryRequest::from_config(&config))
        );
        assert!(!device.is_link_up());

        device.set_services(vec![service]);
        let (tx, _rx) = mpsc::channel(16);
        let session = DeviceSession::new(2, transport, config, tx);
        let state = session.state_handle();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone()));

        wait_until(|| *state.read() == SessionState::Streaming).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SessionState::Disconnected);
    }
}
