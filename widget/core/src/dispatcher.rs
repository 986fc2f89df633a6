//! Request Dispatcher
//!
//! Turns one user message into one request to the reply service and one
//! [`Reply`] (or [`DispatchError`]) back.
//!
//! # Design Philosophy
//!
//! At most one exchange is in flight. Every exchange is identified by an
//! [`ExchangeToken`] carrying a generation number and a cancellation token;
//! starting exchange N+1 cancels exchange N, and the controller compares
//! generations before reconciling so a late result can never overwrite a
//! newer one.
//!
//! # Modes
//!
//! - **Resilient** (default): anything short of a well-formed reply is
//!   replaced by a locally generated fallback tagged
//!   [`ReplyOrigin::Fallback`]. Note that this hides backend outages from
//!   the host's error callback; failures only show up in the logs.
//! - **Strict**: failures are returned to the caller as [`DispatchError`].
//!
//! Cancellation is reported as [`DispatchError::Cancelled`] in both modes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatRequest, OutboundRequest, Transport};
use crate::clock::Clock;
use crate::config::{ConfigError, Endpoint, WidgetConfig};
use crate::fallback::FallbackGenerator;
use crate::fingerprint::EnvironmentSignals;
use crate::messages::{ReplyOrigin, SessionId};
use crate::security::sanitize;

// =============================================================================
// Types
// =============================================================================

/// How exchange failures are reported
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Failures are masked by a fallback reply
    #[default]
    Resilient,
    /// Failures are returned as errors
    Strict,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resilient" => Ok(Self::Resilient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

/// Why an exchange produced no reply
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The exchange was cancelled or superseded
    #[error("Exchange cancelled")]
    Cancelled,

    /// The reply service answered with a non-success status
    #[error("Reply service returned HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// The response was not a JSON object with a string `reply`
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request never got a response
    #[error("Network error: {0}")]
    Network(String),
}

impl DispatchError {
    /// Whether this is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A reply ready to be placed in the log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Escaped reply text
    pub content: String,
    /// Where the text came from
    pub origin: ReplyOrigin,
}

/// Handle for one exchange
#[derive(Clone, Debug)]
pub struct ExchangeToken {
    generation: u64,
    cancel: CancellationToken,
}

impl ExchangeToken {
    /// Exchange generation (strictly increasing per dispatcher)
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the exchange has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Expected response body
#[derive(Deserialize)]
struct ReplyPayload {
    reply: String,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Sends user messages to the reply service
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    csrf_token: Option<String>,
    mode: DispatchMode,
    track_sessions: bool,
    fingerprint: String,
    clock: Arc<dyn Clock>,
    fallback: FallbackGenerator,

    /// Last generation handed out
    generation: AtomicU64,

    /// Token of the most recent exchange
    current: Mutex<Option<ExchangeToken>>,
}

impl RequestDispatcher {
    /// Create a dispatcher for the configured endpoint
    ///
    /// # Errors
    ///
    /// Fails if the configured endpoint does not resolve to an allowed URL.
    pub fn new(
        config: &WidgetConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let endpoint = config.endpoint()?;

        tracing::debug!(
            url = %endpoint.url,
            same_origin = endpoint.same_origin,
            transport = transport.name(),
            mode = ?config.dispatch_mode,
            "Dispatcher ready"
        );

        let fingerprint = EnvironmentSignals::detect(&*clock).fingerprint();

        Ok(Self {
            transport,
            endpoint,
            csrf_token: config.csrf_token.clone(),
            mode: config.dispatch_mode,
            track_sessions: config.track_sessions,
            fingerprint,
            clock,
            fallback: FallbackGenerator::new(),
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        })
    }

    /// Use a fixed fingerprint instead of the detected one
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Use a specific fallback generator
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackGenerator) -> Self {
        self.fallback = fallback;
        self
    }

    /// Dispatch mode
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Resolved endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start a new exchange, cancelling the previous one
    pub fn begin(&self) -> ExchangeToken {
        let token = ExchangeToken {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            cancel: CancellationToken::new(),
        };

        let previous = self.current.lock().replace(token.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                tracing::debug!(
                    superseded = previous.generation,
                    by = token.generation,
                    "Superseding exchange"
                );
            }
            previous.cancel.cancel();
        }

        token
    }

    /// Cancel the current exchange without starting a new one
    ///
    /// Returns the generation that was cancelled, if any.
    pub fn cancel(&self) -> Option<u64> {
        let previous = self.current.lock().take()?;
        previous.cancel.cancel();
        tracing::debug!(generation = previous.generation, "Exchange cancelled");
        Some(previous.generation)
    }

    /// Whether `token` is still the most recent exchange and not cancelled
    #[must_use]
    pub fn is_current(&self, token: &ExchangeToken) -> bool {
        !token.is_cancelled()
            && self
                .current
                .lock()
                .as_ref()
                .is_some_and(|current| current.generation == token.generation)
    }

    /// Build the request for `text`
    #[must_use]
    pub fn build_request(&self, text: &str, session_id: &SessionId) -> OutboundRequest {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ];

        // Credentials stay on the page origin
        if let Some(token) = self.csrf_token.as_ref().filter(|_| self.endpoint.same_origin) {
            headers.push(("X-CSRF-Token".to_string(), token.clone()));
        }

        OutboundRequest {
            url: self.endpoint.url.to_string(),
            headers,
            body: ChatRequest {
                message: sanitize(text),
                timestamp: self.clock.now_ms(),
                fingerprint: self.fingerprint.clone(),
                session_id: self
                    .track_sessions
                    .then(|| session_id.as_str().to_string()),
            },
        }
    }

    /// Run one exchange
    ///
    /// # Errors
    ///
    /// [`DispatchError::Cancelled`] if `token` is cancelled before the reply
    /// is handed back. Other variants only in strict mode.
    pub async fn dispatch(
        &self,
        token: &ExchangeToken,
        text: &str,
        session_id: &SessionId,
    ) -> Result<Reply, DispatchError> {
        if token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let request = self.build_request(text, session_id);
        tracing::debug!(generation = token.generation, "Dispatching exchange");

        let outcome = tokio::select! {
            biased;
            () = token.cancel.cancelled() => return Err(DispatchError::Cancelled),
            outcome = self.exchange(&request) => outcome,
        };

        // A cancel that raced the response still wins
        if token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        match outcome {
            Ok(reply) => Ok(Reply {
                content: sanitize(&reply),
                origin: ReplyOrigin::Live,
            }),
            Err(e) if self.mode == DispatchMode::Resilient => {
                tracing::warn!(
                    generation = token.generation,
                    error = %e,
                    "Reply service failed, using fallback reply"
                );
                let fallback = self.fallback.reply_for(text);
                Ok(Reply {
                    content: sanitize(&fallback.content),
                    origin: fallback.origin,
                })
            }
            Err(e) => {
                tracing::debug!(generation = token.generation, error = %e, "Exchange failed");
                Err(e)
            }
        }
    }

    async fn exchange(&self, request: &OutboundRequest) -> Result<String, DispatchError> {
        let response = self
            .transport
            .post(request)
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(DispatchError::Http {
                status: response.status,
            });
        }

        if !response.is_json() {
            return Err(DispatchError::MalformedResponse(format!(
                "unexpected content type: {}",
                response.content_type.as_deref().unwrap_or("none")
            )));
        }

        let payload: ReplyPayload = serde_json::from_str(&response.body)
            .map_err(|e| DispatchError::MalformedResponse(e.to_string()))?;

        Ok(payload.reply)
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("transport", &self.transport.name())
            .field("endpoint", &self.endpoint)
            .field("mode", &self.mode)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
