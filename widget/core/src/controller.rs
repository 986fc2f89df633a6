//! Session Controller - The Widget Core
//!
//! The controller owns one chat session and drives every exchange through
//! its states:
//!
//! ```text
//! idle -> validating -> rate-checking -> dispatching -> reconciling -> idle
//! ```
//!
//! # Design Philosophy
//!
//! The controller is surface-agnostic. Surfaces send [`WidgetEvent`]s (or
//! call the operations directly) and render the [`SessionSnapshot`]s the
//! controller publishes on a `watch` channel. The host page is told about
//! errors, sent messages and layout changes through [`HostCallbacks`].
//!
//! All state sits behind one lock that is never held across an `.await`;
//! the network exchange is the only suspension point. Snapshots are
//! published while the lock is held, so no reader ever sees a bot
//! placeholder without the user message that caused it.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::backend::{HttpTransport, Transport};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, WidgetConfig};
use crate::dispatcher::{DispatchError, ExchangeToken, Reply, RequestDispatcher};
use crate::events::WidgetEvent;
use crate::ids::{IdSource, UuidIds};
use crate::input::{classify_key, InputAction, InputBuffer};
use crate::messages::{
    ConnectionStatus, LayoutState, Message, MessageId, ReplyOrigin, SessionId, SessionSnapshot,
    CANCELLED_REPLY, ERROR_REPLY,
};
use crate::rate_limit::SlidingWindowLimiter;
use crate::security::{InputValidator, Rejection};
use crate::session::{Resolution, SessionStore};

// =============================================================================
// Host Interface
// =============================================================================

/// Hooks the embedding page can implement
///
/// Every method defaults to a no-op.
pub trait HostCallbacks: Send + Sync {
    /// A send failed (rejected, throttled, or surfaced exchange failure)
    fn on_error(&self, _error: &WidgetError) {}

    /// A message was accepted and is about to be dispatched
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    fn on_message_sent(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// The panel was maximized or restored
    fn on_maximize_change(&self, _maximized: bool) {}
}

/// Callbacks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallbacks;

impl HostCallbacks for NoopCallbacks {}

/// Errors reported to the host
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WidgetError {
    /// The message failed validation and was not sent
    #[error("Message rejected: {0}")]
    ValidationRejected(#[from] Rejection),

    /// Too many messages in the current window
    #[error("Too many messages, try again in {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until a send would be admitted
        retry_after_ms: u64,
    },

    /// The exchange failed (strict mode only)
    #[error("Reply service error: {0}")]
    Remote(#[from] DispatchError),
}

/// How a send request ended (when it did not fail)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, nothing happened
    Empty,
    /// An exchange was in flight; it was stopped instead of sending
    Stopped,
    /// The bot placeholder was filled
    Replied(ReplyOrigin),
    /// The exchange was stopped or replaced before its result arrived
    Superseded,
}

// =============================================================================
// Controller
// =============================================================================

/// Everything guarded by the controller lock
struct WidgetState {
    store: SessionStore,
    limiter: SlidingWindowLimiter,
    input: InputBuffer,
    layout: LayoutState,
}

/// What admission decided for a send
enum Admission {
    Stopped,
    Started {
        token: ExchangeToken,
        session_id: SessionId,
    },
}

/// The session controller
pub struct SessionController {
    config: Arc<WidgetConfig>,
    validator: InputValidator,
    dispatcher: RequestDispatcher,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
    callbacks: Arc<dyn HostCallbacks>,
    state: Mutex<WidgetState>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Create a controller talking to the configured endpoint over HTTP
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn connect(
        config: WidgetConfig,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        let controller = Self::new(
            Arc::new(config),
            transport,
            Arc::new(UuidIds),
            Arc::new(SystemClock),
            callbacks,
        )?;
        Ok(controller)
    }

    /// Create a controller with explicit collaborators
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn new(
        config: Arc<WidgetConfig>,
        transport: Arc<dyn Transport>,
        ids: Arc<dyn IdSource>,
        clock: Arc<dyn Clock>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<Self, ConfigError> {
        let dispatcher = RequestDispatcher::new(&config, transport, Arc::clone(&clock))?;
        Self::with_dispatcher(config, dispatcher, ids, clock, callbacks)
    }

    /// Create a controller around a prepared dispatcher
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn with_dispatcher(
        config: Arc<WidgetConfig>,
        dispatcher: RequestDispatcher,
        ids: Arc<dyn IdSource>,
        clock: Arc<dyn Clock>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let session_id = SessionId::generate(&*ids);
        let store = SessionStore::new(session_id, clock.now_ms());
        let layout = LayoutState {
            open: config.initially_open,
            maximized: config.initially_maximized,
        };
        let state = WidgetState {
            limiter: SlidingWindowLimiter::new(config.rate_limit, Arc::clone(&clock)),
            input: InputBuffer::new(config.max_message_length),
            store,
            layout,
        };
        let (snapshots, _) = watch::channel(Self::snapshot_of(&state));

        tracing::info!(
            session_id = %state.store.id(),
            endpoint = %dispatcher.endpoint().url,
            "Session started"
        );

        Ok(Self {
            validator: InputValidator::new(config.max_message_length),
            config,
            dispatcher,
            ids,
            clock,
            callbacks,
            state: Mutex::new(state),
            snapshots,
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    /// Receive a snapshot after every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        Self::snapshot_of(&self.state.lock())
    }

    /// Current session ID
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.state.lock().store.id().clone()
    }

    /// Whether an exchange is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.lock().store.is_busy()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send a message
    ///
    /// While an exchange is in flight this stops it instead of sending.
    ///
    /// # Errors
    ///
    /// [`WidgetError::ValidationRejected`] and [`WidgetError::RateLimited`]
    /// before anything is appended; [`WidgetError::Remote`] when a strict
    /// mode exchange fails. Every error is also passed to
    /// [`HostCallbacks::on_error`].
    pub async fn on_send(&self, raw_text: &str) -> Result<SendOutcome, WidgetError> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Empty);
        }

        let (token, session_id) = match self.admit(text) {
            Ok(Admission::Stopped) => return Ok(SendOutcome::Stopped),
            Ok(Admission::Started { token, session_id }) => (token, session_id),
            Err(e) => {
                tracing::warn!(error = %e, "Send refused");
                self.callbacks.on_error(&e);
                return Err(e);
            }
        };

        // Resolves the placeholder if this future is dropped before reconciling
        let guard = ExchangeGuard {
            controller: self,
            token: &token,
        };

        if let Err(e) = self.callbacks.on_message_sent(text) {
            tracing::warn!(error = %e, "on_message_sent callback failed");
        }

        let result = self.dispatcher.dispatch(&token, text, &session_id).await;
        let outcome = self.reconcile(&token, result);
        std::mem::forget(guard);
        outcome
    }

    /// Validating and rate-checking, then the start of dispatching
    fn admit(&self, text: &str) -> Result<Admission, WidgetError> {
        let mut state = self.state.lock();

        if state.store.is_busy() {
            self.stop_locked(&mut state);
            return Ok(Admission::Stopped);
        }

        if let Err(rejection) = self.validator.check(text) {
            return Err(self.refuse_locked(&mut state, rejection.into()));
        }

        if !state.limiter.can_send() {
            let error = WidgetError::RateLimited {
                retry_after_ms: state.limiter.retry_after_ms(),
            };
            return Err(self.refuse_locked(&mut state, error));
        }
        state.limiter.record_send();

        let now = self.clock.now_ms();
        let user = Message::user(MessageId::generate(&*self.ids), text, now);
        let placeholder = Message::bot_placeholder(MessageId::generate(&*self.ids), now);
        let token = self.dispatcher.begin();

        tracing::debug!(
            generation = token.generation(),
            placeholder = %placeholder.id,
            "Exchange started"
        );

        state.store.begin_exchange(user, placeholder, token.generation());
        state.input.clear();
        self.publish(&state);

        Ok(Admission::Started {
            token,
            session_id: state.store.id().clone(),
        })
    }

    /// A refused send is a handled failure: the log stays untouched but the
    /// connection status reports it
    fn refuse_locked(&self, state: &mut WidgetState, error: WidgetError) -> WidgetError {
        state.store.set_connection_status(ConnectionStatus::Error);
        self.publish(state);
        error
    }

    /// Fold an exchange result back into the session
    fn reconcile(
        &self,
        token: &ExchangeToken,
        result: Result<Reply, DispatchError>,
    ) -> Result<SendOutcome, WidgetError> {
        let generation = token.generation();
        let mut state = self.state.lock();

        let current = self.dispatcher.is_current(token)
            && state.store.pending().map(|p| p.generation) == Some(generation);

        match result {
            Ok(reply) if current => {
                state
                    .store
                    .resolve_pending(generation, Resolution::reply(reply.content, reply.origin));
                self.publish(&state);
                tracing::debug!(generation, origin = ?reply.origin, "Exchange completed");
                Ok(SendOutcome::Replied(reply.origin))
            }
            Err(DispatchError::Cancelled) | Ok(_) => {
                // Normally already resolved by whoever cancelled; never leave it pending
                if state.store.pending().map(|p| p.generation) == Some(generation) {
                    state.store.resolve_pending(
                        generation,
                        Resolution::reply(CANCELLED_REPLY, ReplyOrigin::Cancelled),
                    );
                    self.publish(&state);
                }
                tracing::debug!(generation, "Discarding superseded exchange result");
                Ok(SendOutcome::Superseded)
            }
            Err(e) if current => {
                state
                    .store
                    .resolve_pending(generation, Resolution::error(ERROR_REPLY));
                state.store.set_connection_status(ConnectionStatus::Error);
                self.publish(&state);
                drop(state);

                let error = WidgetError::Remote(e);
                tracing::warn!(generation, error = %error, "Exchange failed");
                self.callbacks.on_error(&error);
                Err(error)
            }
            Err(e) => {
                tracing::debug!(generation, error = %e, "Discarding superseded exchange failure");
                Ok(SendOutcome::Superseded)
            }
        }
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Stop the exchange in flight
    ///
    /// Returns `false` when there was nothing to stop.
    pub fn on_cancel(&self) -> bool {
        let mut state = self.state.lock();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut WidgetState) -> bool {
        self.dispatcher.cancel();

        let stopped = state
            .store
            .abandon_pending(Resolution::reply(CANCELLED_REPLY, ReplyOrigin::Cancelled));

        match stopped {
            Some(generation) => {
                tracing::info!(generation, "Exchange stopped");
                self.publish(state);
                true
            }
            None => false,
        }
    }

    /// Start a fresh conversation
    ///
    /// Any exchange in flight is cancelled and its result discarded. The
    /// connection status is kept.
    pub fn on_new_session(&self) -> SessionId {
        let mut state = self.state.lock();
        self.dispatcher.cancel();

        let previous = state.store.id().clone();
        let session_id = SessionId::generate(&*self.ids);
        state.store.reset(session_id.clone(), self.clock.now_ms());
        self.publish(&state);

        tracing::info!(previous = %previous, session_id = %session_id, "New session");
        session_id
    }

    /// Cancel everything before the widget goes away
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state);
        tracing::info!(session_id = %state.store.id(), "Widget torn down");
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Open or close the panel; returns the new state
    pub fn toggle_open(&self) -> bool {
        let mut state = self.state.lock();
        state.layout.open = !state.layout.open;
        self.publish(&state);
        state.layout.open
    }

    /// Maximize or restore the panel; returns the new state
    pub fn toggle_maximize(&self) -> bool {
        let maximized = {
            let mut state = self.state.lock();
            state.layout.maximized = !state.layout.maximized;
            self.publish(&state);
            state.layout.maximized
        };
        self.callbacks.on_maximize_change(maximized);
        maximized
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Handle an intent from a surface
    ///
    /// # Errors
    ///
    /// Returns the error of a send triggered by the event.
    pub async fn handle_event(&self, event: WidgetEvent) -> Result<(), WidgetError> {
        match event {
            WidgetEvent::Input(text) => {
                let mut state = self.state.lock();
                state.input.set(&text);
                self.publish(&state);
            }

            WidgetEvent::Key(key) => {
                let action = {
                    let mut state = self.state.lock();
                    let action = classify_key(key, state.store.is_busy());
                    if action == InputAction::Newline {
                        state.input.insert("\n");
                        self.publish(&state);
                    }
                    action
                };
                if action == InputAction::Submit {
                    self.send_draft().await?;
                }
            }

            WidgetEvent::Send => {
                self.send_draft().await?;
            }

            WidgetEvent::Stop => {
                self.on_cancel();
            }

            WidgetEvent::NewSession => {
                self.on_new_session();
            }

            WidgetEvent::ToggleOpen => {
                self.toggle_open();
            }

            WidgetEvent::ToggleMaximize => {
                self.toggle_maximize();
            }
        }

        Ok(())
    }

    async fn send_draft(&self) -> Result<SendOutcome, WidgetError> {
        let draft = self.state.lock().input.text().to_string();
        self.on_send(&draft).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    fn snapshot_of(state: &WidgetState) -> SessionSnapshot {
        state.store.snapshot(state.input.text(), state.layout)
    }

    fn publish(&self, state: &WidgetState) {
        self.snapshots.send_replace(Self::snapshot_of(state));
    }
}

/// Cleans up an exchange whose `on_send` future was dropped mid-flight
///
/// Dropping happens on timeouts, losing `select!` arms and aborted tasks.
/// The exchange is treated like a stop: the request is cancelled, the
/// placeholder resolves to the cancelled notice and busy is cleared.
struct ExchangeGuard<'a> {
    controller: &'a SessionController,
    token: &'a ExchangeToken,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        let generation = self.token.generation();
        let controller = self.controller;
        let mut state = controller.state.lock();

        if controller.dispatcher.is_current(self.token) {
            controller.dispatcher.cancel();
        }

        if state.store.pending().map(|p| p.generation) != Some(generation) {
            return;
        }

        state.store.resolve_pending(
            generation,
            Resolution::reply(CANCELLED_REPLY, ReplyOrigin::Cancelled),
        );
        controller.publish(&state);
        tracing::debug!(generation, "Send abandoned by caller, exchange cancelled");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.dispatcher.cancel();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{OutboundRequest, TransportError, TransportResponse};
    use crate::clock::ManualClock;
    use crate::dispatcher::DispatchMode;
    use crate::fallback::FallbackGenerator;
    use crate::ids::SequentialIds;
    use crate::input::KeyPress;
    use crate::messages::{MessageStatus, Sender};
    use crate::rate_limit::RateLimitConfig;

    /// Transport answering every request with the same canned outcome
    struct CannedTransport {
        outcome: Result<TransportResponse, TransportError>,
        calls: Mutex<usize>,
    }

    impl CannedTransport {
        fn reply(text: &str) -> Arc<Self> {
            Self::with(Ok(TransportResponse::json(
                serde_json::json!({ "reply": text }).to_string(),
            )))
        }

        fn with(outcome: Result<TransportResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        fn name(&self) -> &str {
            "canned"
        }

        async fn post(&self, _: &OutboundRequest) -> Result<TransportResponse, TransportError> {
            *self.calls.lock() += 1;
            self.outcome.clone()
        }
    }

    /// Transport that never answers
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn post(&self, _: &OutboundRequest) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingCallbacks {
        errors: Mutex<Vec<WidgetError>>,
        sent: Mutex<Vec<String>>,
        maximized: Mutex<Vec<bool>>,
        fail_on_sent: bool,
    }

    impl HostCallbacks for RecordingCallbacks {
        fn on_error(&self, error: &WidgetError) {
            self.errors.lock().push(error.clone());
        }

        fn on_message_sent(&self, text: &str) -> anyhow::Result<()> {
            self.sent.lock().push(text.to_string());
            if self.fail_on_sent {
                anyhow::bail!("host analytics unavailable");
            }
            Ok(())
        }

        fn on_maximize_change(&self, maximized: bool) {
            self.maximized.lock().push(maximized);
        }
    }

    struct Harness {
        controller: Arc<SessionController>,
        callbacks: Arc<RecordingCallbacks>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(
        config: WidgetConfig,
        transport: Arc<dyn Transport>,
        callbacks: RecordingCallbacks,
    ) -> Harness {
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::new(1_000));
        let callbacks = Arc::new(callbacks);
        let dispatcher = RequestDispatcher::new(&config, transport, clock.clone())
            .unwrap()
            .with_fingerprint("fp")
            .with_fallback(FallbackGenerator::with_seed(9));
        let controller = SessionController::with_dispatcher(
            config,
            dispatcher,
            Arc::new(SequentialIds::new("id")),
            clock.clone(),
            callbacks.clone(),
        )
        .unwrap();
        Harness {
            controller: Arc::new(controller),
            callbacks,
            clock,
        }
    }

    fn harness(transport: Arc<dyn Transport>) -> Harness {
        harness_with(WidgetConfig::default(), transport, RecordingCallbacks::default())
    }

    async fn wait_until_busy(controller: &SessionController) {
        for _ in 0..100 {
            if controller.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("controller never became busy");
    }

    // =========================================================================
    // Send Path
    // =========================================================================

    #[tokio::test]
    async fn test_send_healthy_reply() {
        let h = harness(CannedTransport::reply("Hi there"));

        let outcome = h.controller.on_send("  Hello  ").await.unwrap();
        assert_eq!(outcome, SendOutcome::Replied(ReplyOrigin::Live));

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].sender, Sender::User);
        assert_eq!(snapshot.messages[0].content, "Hello");
        assert_eq!(snapshot.messages[1].content, "Hi there");
        assert_eq!(snapshot.messages[1].status, MessageStatus::Sent);
        assert_eq!(snapshot.messages[1].origin, Some(ReplyOrigin::Live));
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert!(!snapshot.busy);
        assert_eq!(*h.callbacks.sent.lock(), vec!["Hello".to_string()]);
        assert!(h.callbacks.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_blank_send_is_noop() {
        let transport = CannedTransport::reply("x");
        let h = harness(transport.clone());

        assert_eq!(h.controller.on_send(" \n\t ").await, Ok(SendOutcome::Empty));
        assert!(h.controller.snapshot().messages.is_empty());
        assert_eq!(*transport.calls.lock(), 0);
        assert!(h.callbacks.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_message_never_sent() {
        let transport = CannedTransport::reply("x");
        let h = harness(transport.clone());

        let result = h.controller.on_send("<script>alert(1)</script>").await;

        assert!(matches!(result, Err(WidgetError::ValidationRejected(_))));
        let snapshot = h.controller.snapshot();
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.connection_status, ConnectionStatus::Error);
        assert_eq!(h.callbacks.errors.lock().len(), 1);
        assert_eq!(*transport.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_rejection_costs_no_rate_slot() {
        let mut config = WidgetConfig::default();
        config.rate_limit = RateLimitConfig::new().with_max_messages(1);
        let h = harness_with(config, CannedTransport::reply("ok"), RecordingCallbacks::default());

        assert!(h.controller.on_send("javascript:void(0)").await.is_err());
        assert!(h.controller.on_send("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limited_send() {
        let transport = CannedTransport::reply("ok");
        let mut config = WidgetConfig::default();
        config.rate_limit = RateLimitConfig::strict();
        let h = harness_with(config, transport.clone(), RecordingCallbacks::default());

        for i in 0..5 {
            h.controller.on_send(&format!("message {i}")).await.unwrap();
        }

        let result = h.controller.on_send("one too many").await;
        assert_eq!(
            result,
            Err(WidgetError::RateLimited {
                retry_after_ms: 30_000
            })
        );
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages.len(), 10);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Error);
        assert_eq!(*transport.calls.lock(), 5);
        assert_eq!(h.callbacks.errors.lock().len(), 1);

        h.clock.advance(30_001);
        assert!(h.controller.on_send("later").await.is_ok());
        assert_eq!(
            h.controller.snapshot().connection_status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_dropped_send_releases_busy() {
        let h = harness(Arc::new(HangingTransport));

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), h.controller.on_send("Hello")).await;
        assert!(timed_out.is_err());

        let snapshot = h.controller.snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].status, MessageStatus::Sent);
        assert_eq!(snapshot.messages[1].content, CANCELLED_REPLY);
        assert_eq!(snapshot.messages[1].origin, Some(ReplyOrigin::Cancelled));
        assert!(h.callbacks.errors.lock().is_empty());

        // Enter submits again instead of being swallowed as "busy"
        h.controller
            .handle_event(WidgetEvent::Input("next".to_string()))
            .await
            .unwrap();
        let next = tokio::time::timeout(
            Duration::from_millis(20),
            h.controller.handle_event(WidgetEvent::Key(KeyPress::enter())),
        )
        .await;
        assert!(next.is_err());

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.messages[2].content, "next");
        assert!(snapshot.input.is_empty());
        assert!(!snapshot.busy);
    }

    #[tokio::test]
    async fn test_aborted_send_task_releases_busy() {
        let h = harness(Arc::new(HangingTransport));

        let task = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.on_send("Hello").await })
        };
        wait_until_busy(&h.controller).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let snapshot = h.controller.snapshot();
        assert!(!snapshot.busy);
        assert!(snapshot.messages.iter().all(|m| !m.is_pending()));
    }

    #[tokio::test]
    async fn test_completed_send_keeps_reply_after_guard() {
        let h = harness(CannedTransport::reply("Hi there"));

        let outcome = tokio::time::timeout(Duration::from_secs(1), h.controller.on_send("Hello"))
            .await
            .unwrap();

        assert_eq!(outcome, Ok(SendOutcome::Replied(ReplyOrigin::Live)));
        assert_eq!(h.controller.snapshot().messages[1].content, "Hi there");
    }

    #[test]
    fn test_zero_rate_limit_refused_at_construction() {
        let mut config = WidgetConfig::default();
        config.rate_limit = RateLimitConfig::new().with_max_messages(0);
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::new(0));

        let dispatcher =
            RequestDispatcher::new(&config, CannedTransport::reply("ok"), clock.clone()).unwrap();
        let result = SessionController::with_dispatcher(
            config,
            dispatcher,
            Arc::new(SequentialIds::new("id")),
            clock,
            Arc::new(NoopCallbacks),
        );

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_resilient_failure_uses_fallback() {
        let h = harness(CannedTransport::with(Ok(TransportResponse {
            status: 500,
            content_type: Some("text/html".to_string()),
            body: "oops".to_string(),
        })));

        let outcome = h.controller.on_send("Hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::Replied(ReplyOrigin::Fallback));

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages[1].status, MessageStatus::Sent);
        assert_eq!(snapshot.messages[1].origin, Some(ReplyOrigin::Fallback));
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert!(h.callbacks.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_strict_failure_marks_error() {
        let mut config = WidgetConfig::default();
        config.dispatch_mode = DispatchMode::Strict;
        let h = harness_with(
            config,
            CannedTransport::with(Err(TransportError::Request("refused".to_string()))),
            RecordingCallbacks::default(),
        );

        let result = h.controller.on_send("Hello").await;
        assert!(matches!(
            result,
            Err(WidgetError::Remote(DispatchError::Network(_)))
        ));

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages[1].content, ERROR_REPLY);
        assert_eq!(snapshot.messages[1].status, MessageStatus::Error);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Error);
        assert!(!snapshot.busy);
        assert_eq!(h.callbacks.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_failure_is_ignored() {
        let callbacks = RecordingCallbacks {
            fail_on_sent: true,
            ..RecordingCallbacks::default()
        };
        let h = harness_with(WidgetConfig::default(), CannedTransport::reply("ok"), callbacks);

        assert_eq!(
            h.controller.on_send("Hello").await,
            Ok(SendOutcome::Replied(ReplyOrigin::Live))
        );
        assert!(h.callbacks.errors.lock().is_empty());
    }

    // =========================================================================
    // Stop / New Session
    // =========================================================================

    #[tokio::test]
    async fn test_send_while_busy_stops_exchange() {
        let h = harness(Arc::new(HangingTransport));

        let first = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.on_send("first").await })
        };
        wait_until_busy(&h.controller).await;

        let second = h.controller.on_send("second").await;
        assert_eq!(second, Ok(SendOutcome::Stopped));
        assert_eq!(first.await.unwrap(), Ok(SendOutcome::Superseded));

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content, "first");
        assert_eq!(snapshot.messages[1].content, CANCELLED_REPLY);
        assert_eq!(snapshot.messages[1].origin, Some(ReplyOrigin::Cancelled));
        assert!(!snapshot.busy);
        assert!(h.callbacks.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let h = harness(CannedTransport::reply("x"));
        assert!(!h.controller.on_cancel());
    }

    #[tokio::test]
    async fn test_new_session_clears_log() {
        let h = harness(CannedTransport::reply("Hi"));
        h.controller.on_send("Hello").await.unwrap();
        let before = h.controller.session_id();

        let after = h.controller.on_new_session();

        assert_ne!(before, after);
        let snapshot = h.controller.snapshot();
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.session_id, after);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_new_session_discards_in_flight_reply() {
        let h = harness(Arc::new(HangingTransport));

        let first = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.on_send("first").await })
        };
        wait_until_busy(&h.controller).await;

        h.controller.on_new_session();

        assert_eq!(first.await.unwrap(), Ok(SendOutcome::Superseded));
        let snapshot = h.controller.snapshot();
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.busy);
    }

    #[tokio::test]
    async fn test_teardown_resolves_placeholder() {
        let h = harness(Arc::new(HangingTransport));

        let first = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.on_send("first").await })
        };
        wait_until_busy(&h.controller).await;

        h.controller.teardown();

        assert_eq!(first.await.unwrap(), Ok(SendOutcome::Superseded));
        assert!(!h.controller.snapshot().messages[1].is_pending());
    }

    // =========================================================================
    // Events and Layout
    // =========================================================================

    #[tokio::test]
    async fn test_enter_submits_draft() {
        let h = harness(CannedTransport::reply("Hi"));

        h.controller
            .handle_event(WidgetEvent::Input("Hello".to_string()))
            .await
            .unwrap();
        h.controller
            .handle_event(WidgetEvent::Key(crate::input::KeyPress::enter()))
            .await
            .unwrap();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.input, "");
    }

    #[tokio::test]
    async fn test_shift_enter_adds_newline() {
        let h = harness(CannedTransport::reply("Hi"));

        h.controller
            .handle_event(WidgetEvent::Input("line one".to_string()))
            .await
            .unwrap();
        h.controller
            .handle_event(WidgetEvent::Key(crate::input::KeyPress::shift_enter()))
            .await
            .unwrap();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.input, "line one\n");
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test]
    async fn test_input_is_truncated() {
        let mut config = WidgetConfig::default();
        config.max_message_length = 4;
        let h = harness_with(config, CannedTransport::reply("Hi"), RecordingCallbacks::default());

        h.controller
            .handle_event(WidgetEvent::Input("abcdefgh".to_string()))
            .await
            .unwrap();

        assert_eq!(h.controller.snapshot().input, "abcd");
    }

    #[tokio::test]
    async fn test_rejected_draft_is_kept() {
        let h = harness(CannedTransport::reply("Hi"));

        h.controller
            .handle_event(WidgetEvent::Input("<iframe src=x>".to_string()))
            .await
            .unwrap();
        let result = h.controller.handle_event(WidgetEvent::Send).await;

        assert!(result.is_err());
        assert_eq!(h.controller.snapshot().input, "<iframe src=x>");
    }

    #[tokio::test]
    async fn test_toggle_layout() {
        let h = harness(CannedTransport::reply("Hi"));
        let mut rx = h.controller.subscribe();

        assert!(h.controller.toggle_open());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().layout.open);

        assert!(h.controller.toggle_maximize());
        assert!(!h.controller.toggle_maximize());
        assert_eq!(*h.callbacks.maximized.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_initial_layout_from_config() {
        let mut config = WidgetConfig::default();
        config.initially_open = true;
        config.initially_maximized = true;
        let h = harness_with(config, CannedTransport::reply("Hi"), RecordingCallbacks::default());

        let layout = h.controller.snapshot().layout;
        assert!(layout.open);
        assert!(layout.maximized);
    }

    #[tokio::test]
    async fn test_subscribers_see_pair_together() {
        let h = harness(Arc::new(HangingTransport));
        let rx = h.controller.subscribe();

        let task = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.on_send("Hello").await })
        };
        wait_until_busy(&h.controller).await;

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.messages.len(), 2);
        assert!(snapshot.messages[1].is_pending());
        assert!(snapshot.busy);

        h.controller.on_cancel();
        assert_eq!(task.await.unwrap(), Ok(SendOutcome::Superseded));
    }
}
