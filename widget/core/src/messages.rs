//! Message Model
//!
//! The data a surface renders: chat messages, the session snapshot and the
//! small enums describing connection and layout state.
//!
//! # Design Philosophy
//!
//! Surfaces are pure renderers. They receive a [`SessionSnapshot`] and never
//! mutate it; every change flows through the session controller. User text
//! is stored verbatim and must be rendered as text; bot text arrives already
//! HTML-escaped.

use serde::{Deserialize, Serialize};

use crate::ids::IdSource;

/// Content shown in a bot message whose exchange failed
pub const ERROR_REPLY: &str =
    "Sorry, something went wrong while contacting the assistant. Please try again.";

/// Content shown in a bot message whose exchange was stopped by the user
pub const CANCELLED_REPLY: &str = "Response cancelled.";

// ============================================================================
// Identifiers
// ============================================================================

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Draw a new message ID from the given source
    pub fn generate(ids: &dyn IdSource) -> Self {
        Self(ids.next_id())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Draw a new session ID from the given source
    pub fn generate(ids: &dyn IdSource) -> Self {
        Self(ids.next_id())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The end user
    User,
    /// The reply service (or its local stand-in)
    Bot,
}

/// Delivery status of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Bot placeholder awaiting its exchange
    Sending,
    /// Delivered (user) or resolved with content (bot)
    Sent,
    /// The exchange failed and the failure was surfaced
    Error,
}

/// Where a resolved bot reply came from
///
/// A fallback reply looks like any other `sent` message, so the origin is
/// what lets integrators tell a degraded backend apart from a real answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOrigin {
    /// Returned by the remote reply service
    Live,
    /// Synthesized locally because the service was unusable
    Fallback,
    /// The exchange was stopped before a reply arrived
    Cancelled,
}

/// A chat message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID, never reused within a session
    pub id: MessageId,
    /// Message text (verbatim for user messages, HTML-escaped for bot replies)
    pub content: String,
    /// Author
    pub sender: Sender,
    /// When the message was created (Unix timestamp ms)
    pub created_at: u64,
    /// Delivery status
    pub status: MessageStatus,
    /// Origin of a resolved bot reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ReplyOrigin>,
}

impl Message {
    /// A user message, delivered as soon as it exists
    pub fn user(id: MessageId, content: impl Into<String>, created_at: u64) -> Self {
        Self {
            id,
            content: content.into(),
            sender: Sender::User,
            created_at,
            status: MessageStatus::Sent,
            origin: None,
        }
    }

    /// An empty bot placeholder awaiting its exchange
    #[must_use]
    pub fn bot_placeholder(id: MessageId, created_at: u64) -> Self {
        Self {
            id,
            content: String::new(),
            sender: Sender::Bot,
            created_at,
            status: MessageStatus::Sending,
            origin: None,
        }
    }

    /// Whether the message is still waiting on an exchange
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Sending
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Connection status reported to the surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No exchange attempted yet
    #[default]
    Disconnected,
    /// An exchange has started (set optimistically)
    Connected,
    /// The last surfaced exchange failed
    Error,
}

/// Open/maximized state of the widget frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutState {
    /// Whether the chat panel is open
    pub open: bool,
    /// Whether the chat panel is maximized
    pub maximized: bool,
}

/// Read-only view of the session for surfaces
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current session ID
    pub session_id: SessionId,
    /// Messages in display order
    pub messages: Vec<Message>,
    /// Connection status
    pub connection_status: ConnectionStatus,
    /// Whether an exchange is in flight
    pub busy: bool,
    /// Current composer text
    pub input: String,
    /// Frame layout
    pub layout: LayoutState,
}
