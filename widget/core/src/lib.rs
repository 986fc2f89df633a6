//! Widget Core - Headless Session Core for the Embeddable Chat Widget
//!
//! This crate holds everything the chat widget does between a keystroke and
//! a rendered reply, independent of how it is drawn. A DOM surface, a
//! terminal host or a test harness all drive the same controller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Surfaces                             │
//! │   ┌───────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │   │    DOM    │   │  widget-host   │   │   Test harness   │  │
//! │   └─────┬─────┘   └───────┬────────┘   └────────┬─────────┘  │
//! │         └─────────────────┼─────────────────────┘            │
//! │                WidgetEvent (up)   SessionSnapshot (down)      │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                      WIDGET CORE                              │
//! │  ┌────────────────────────┴───────────────────────────────┐  │
//! │  │                  SessionController                      │  │
//! │  │  ┌──────────┐  ┌────────────┐  ┌──────────┐  ┌───────┐  │  │
//! │  │  │ Security │  │ Rate Limit │  │ Session  │  │ Input │  │  │
//! │  │  └──────────┘  └────────────┘  └──────────┘  └───────┘  │  │
//! │  └────────────────────────┬───────────────────────────────┘  │
//! │                 RequestDispatcher (+ fallback)                │
//! │                           │                                   │
//! │                   Transport (HTTP)                            │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             ▼
//!                      Reply service
//! ```
//!
//! # Key Types
//!
//! - [`SessionController`]: Owns the session and runs every exchange
//! - [`WidgetEvent`]: Intents sent from a surface to the controller
//! - [`SessionSnapshot`]: Read-only state published to surfaces
//! - [`RequestDispatcher`]: One request per exchange, with cancellation
//! - [`SlidingWindowLimiter`]: Client-side send throttle
//! - [`WidgetConfig`]: Layered configuration (file, env, overrides)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use widget_core::{load_config, NoopCallbacks, SessionController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let controller = SessionController::connect(config, Arc::new(NoopCallbacks))?;
//!
//!     let mut snapshots = controller.subscribe();
//!     tokio::spawn(async move {
//!         while snapshots.changed().await.is_ok() {
//!             // Render snapshots.borrow_and_update()
//!         }
//!     });
//!
//!     controller.on_send("Hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`security`]: Escaping and validation of user text
//! - [`ids`]: Unpredictable message and session identifiers
//! - [`rate_limit`]: Sliding-window send limiter
//! - [`session`]: Message log and exchange bookkeeping
//! - [`dispatcher`]: Request building, cancellation and fallback policy
//! - [`backend`]: Transport abstraction and the HTTP implementation
//! - [`controller`]: The session state machine
//! - [`config`]: TOML/env/CLI configuration
//!
//! # No UI Dependencies
//!
//! This crate renders nothing. Surfaces subscribe to snapshots and send
//! events; that is the whole contract.

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod events;
pub mod fallback;
pub mod fingerprint;
pub mod ids;
pub mod input;
pub mod messages;
pub mod rate_limit;
pub mod security;
pub mod session;

// Re-exports for convenience
pub use backend::{HttpTransport, Transport, TransportError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{HostCallbacks, NoopCallbacks, SendOutcome, SessionController, WidgetError};
pub use dispatcher::{DispatchError, DispatchMode, ExchangeToken, Reply, RequestDispatcher};
pub use events::WidgetEvent;
pub use ids::{generate_id, IdSource, SequentialIds, UuidIds};
pub use input::{InputAction, InputBuffer, Key, KeyPress};
pub use messages::{
    ConnectionStatus, LayoutState, Message, MessageId, MessageStatus, ReplyOrigin, Sender,
    SessionId, SessionSnapshot,
};
pub use rate_limit::{RateLimitConfig, SlidingWindowLimiter};
pub use security::{sanitize, validate, InputValidator, Rejection};
pub use session::SessionStore;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with, ConfigError,
    ConfigOverrides, ConfigSource, WidgetConfig, WidgetToml,
};
