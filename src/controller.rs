//! Session controller.
//!
//! The [`SessionController`] owns at most one running [`DeviceSession`] and
//! the [`Pipeline`] its events feed. Every session event flows through one
//! consumer task, which applies it to the pipeline and forwards the resulting
//! updates to the [`DisplaySink`]. Events from a replaced session are dropped.
//!
//! Applying a change and delivering its updates happen under one delivery
//! lock, shared by the consumer and [`SessionController::reset`], so the sink
//! sees changes in the order the pipeline applied them.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ble::transport::Transport;
use crate::config::MonitorConfig;
use crate::data::{Channel, HistoryStats};
use crate::error::{Error, Result};
use crate::pipeline::{DisplayUpdate, MonitorSnapshot, Pipeline};
use crate::session::{DeviceSession, FailureReason, SessionMessage, SessionState};
use crate::sink::{DisplaySink, NullSink};

/// Handles of the running session.
struct ActiveSession {
    id: u64,
    state: Arc<parking_lot::RwLock<SessionState>>,
    cancel: CancellationToken,
    session: JoinHandle<SessionState>,
    consumer: JoinHandle<()>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.session.is_finished() && !self.state.read().is_terminal()
    }

    /// Wait for both tasks and return the session's terminal state.
    async fn join(self) -> SessionState {
        let state = match self.session.await {
            Ok(state) => state,
            Err(e) => {
                error!("Session {} task failed: {}", self.id, e);
                SessionState::Failed(FailureReason::Transport(e.to_string()))
            }
        };

        // The consumer ends once the session has dropped its sender
        if let Err(e) = self.consumer.await {
            error!("Session {} consumer failed: {}", self.id, e);
        }

        state
    }
}

/// Starts, stops and resets monitoring sessions.
pub struct SessionController<T: Transport> {
    /// Transport sessions discover devices through.
    transport: Arc<T>,
    /// Configuration for every session.
    config: MonitorConfig,
    /// Displayed state.
    pipeline: Arc<Mutex<Pipeline>>,
    /// Where updates go.
    sink: Arc<dyn DisplaySink>,
    /// Held from applying a change until its updates are delivered.
    delivery: Arc<Mutex<()>>,
    /// The current session, if any.
    active: Mutex<Option<ActiveSession>>,
    /// Session ID counter.
    session_counter: AtomicU64,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller that discards display updates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid.
    pub fn new(transport: Arc<T>, config: MonitorConfig) -> Result<Self> {
        Self::with_sink(transport, config, Arc::new(NullSink))
    }

    /// Create a controller that pushes display updates to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid.
    pub fn with_sink(
        transport: Arc<T>,
        config: MonitorConfig,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            pipeline: Arc::new(Mutex::new(Pipeline::new(&config))),
            config,
            sink,
            delivery: Arc::new(Mutex::new(())),
            active: Mutex::new(None),
            session_counter: AtomicU64::new(0),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start a new session and return its id.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is still running.
    pub fn start(&self) -> Result<u64> {
        let mut active = self.active.lock();

        if active.as_ref().is_some_and(ActiveSession::is_running) {
            warn!("Refusing to start: a session is already running");
            return Err(Error::SessionActive);
        }

        let session = self.spawn_session();
        let id = session.id;
        *active = Some(session);
        Ok(id)
    }

    /// Stop the running session, if any, then start a new one.
    pub async fn restart(&self) -> Result<u64> {
        if let Some(previous) = self.stop().await {
            debug!("Previous session ended as: {}", previous);
        }
        self.start()
    }

    /// Cancel the running session and wait for it to wind down.
    ///
    /// Returns the terminal state of the stopped session, or `None` if there
    /// was nothing to stop.
    pub async fn stop(&self) -> Option<SessionState> {
        let previous = self.active.lock().take()?;

        info!("Stopping session {}", previous.id);
        previous.cancel.cancel();
        Some(previous.join().await)
    }

    /// Clear all displayed data and show "Disconnected".
    ///
    /// This never touches the running session; it keeps streaming into the
    /// cleared state. Updates the consumer is delivering finish first, so the
    /// sink ends up showing the cleared state.
    pub fn reset(&self) {
        info!("Resetting monitor state");

        let _delivering = self.delivery.lock();
        let updates = self.pipeline.lock().reset();
        deliver_all(&updates, self.sink.as_ref());
    }

    /// Copy of the displayed state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.pipeline.lock().snapshot()
    }

    /// Statistics over a channel's history, `None` when it is empty.
    pub fn history_stats(&self, channel: Channel) -> Option<HistoryStats> {
        self.pipeline.lock().history().stats(channel)
    }

    /// State of the current session, [`SessionState::Idle`] if none was
    /// started.
    pub fn session_state(&self) -> SessionState {
        self.active
            .lock()
            .as_ref()
            .map_or(SessionState::Idle, |session| session.state.read().clone())
    }

    /// Check if a session is running.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(ActiveSession::is_running)
    }

    /// Id of the current session.
    pub fn session_id(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|session| session.id)
    }

    fn spawn_session(&self) -> ActiveSession {
        let id = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.config.event_buffer);

        let session = DeviceSession::new(id, self.transport.clone(), self.config.clone(), tx);
        let state = session.state_handle();
        let cancel = CancellationToken::new();

        self.pipeline.lock().begin_session(id);

        info!("Starting session {} for '{}'", id, self.config.device_name);

        let consumer = tokio::spawn(Self::consume(
            rx,
            self.pipeline.clone(),
            self.delivery.clone(),
            self.sink.clone(),
        ));
        let session = tokio::spawn(session.run(cancel.clone()));

        ActiveSession {
            id,
            state,
            cancel,
            session,
            consumer,
        }
    }

    /// Apply session events in order and forward the resulting updates.
    async fn consume(
        mut rx: mpsc::Receiver<SessionMessage>,
        pipeline: Arc<Mutex<Pipeline>>,
        delivery: Arc<Mutex<()>>,
        sink: Arc<dyn DisplaySink>,
    ) {
        while let Some(message) = rx.recv().await {
            apply_and_deliver(&pipeline, &delivery, sink.as_ref(), message);
        }

        debug!("Session consumer ended");
    }
}

fn apply_and_deliver(
    pipeline: &Mutex<Pipeline>,
    delivery: &Mutex<()>,
    sink: &dyn DisplaySink,
    message: SessionMessage,
) {
    let _delivering = delivery.lock();
    // The pipeline lock is released before the sink runs, so snapshots
    // taken from a callback do not deadlock
    let updates = pipeline.lock().apply(message);
    deliver_all(&updates, sink);
}

fn deliver_all(updates: &[DisplayUpdate], sink: &dyn DisplaySink) {
    for update in updates {
        update.deliver(sink);
    }
}

impl<T: Transport> Drop for SessionController<T> {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.cancel.cancel();
        }
    }
}
