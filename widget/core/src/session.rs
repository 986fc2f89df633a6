//! Session Store
//!
//! Holds the state of one chat session: its identifier, the message log,
//! the connection status and the record of the exchange currently in
//! flight.
//!
//! # Design Philosophy
//!
//! The log is append-only. The single exception is the pending bot
//! placeholder, which is filled in place exactly once when its exchange
//! resolves. Only the session controller mutates the store; the dispatcher
//! hands results back instead of writing here.

use serde::{Deserialize, Serialize};

use crate::messages::{
    ConnectionStatus, LayoutState, Message, MessageId, MessageStatus, ReplyOrigin, SessionId,
    SessionSnapshot,
};

/// The exchange currently awaited by the session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingExchange {
    /// Generation of the exchange token
    pub generation: u64,
    /// Bot placeholder the exchange will fill
    pub placeholder: MessageId,
}

/// How a pending placeholder is resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Final content
    pub content: String,
    /// Final status (`Sent` or `Error`)
    pub status: MessageStatus,
    /// Reply origin, if the status is `Sent`
    pub origin: Option<ReplyOrigin>,
}

impl Resolution {
    /// Resolve with a reply
    pub fn reply(content: impl Into<String>, origin: ReplyOrigin) -> Self {
        Self {
            content: content.into(),
            status: MessageStatus::Sent,
            origin: Some(origin),
        }
    }

    /// Resolve with an error notice
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: MessageStatus::Error,
            origin: None,
        }
    }
}

/// State of one chat session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStore {
    /// Unique session ID
    id: SessionId,
    /// When the session started (Unix timestamp ms)
    started_at: u64,
    /// Conversation history, in display order
    messages: Vec<Message>,
    /// Connection status shown to the surface
    connection_status: ConnectionStatus,
    /// Whether an exchange is in flight
    busy: bool,
    /// The exchange in flight (if any)
    pending: Option<PendingExchange>,
}

impl SessionStore {
    /// Create an empty session
    #[must_use]
    pub fn new(id: SessionId, started_at: u64) -> Self {
        Self {
            id,
            started_at,
            messages: Vec::new(),
            connection_status: ConnectionStatus::Disconnected,
            busy: false,
            pending: None,
        }
    }

    /// Get the session ID
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// When the session started (Unix timestamp ms)
    #[must_use]
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Get all messages
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get message by ID
    #[must_use]
    pub fn get_message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Connection status
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Set the connection status
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    /// Whether an exchange is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// The exchange in flight
    #[must_use]
    pub fn pending(&self) -> Option<&PendingExchange> {
        self.pending.as_ref()
    }

    /// Start an exchange
    ///
    /// Appends the user message and its bot placeholder together, marks the
    /// session busy and optimistically connected.
    pub fn begin_exchange(&mut self, user: Message, placeholder: Message, generation: u64) {
        debug_assert!(placeholder.is_pending());

        self.pending = Some(PendingExchange {
            generation,
            placeholder: placeholder.id.clone(),
        });
        self.messages.push(user);
        self.messages.push(placeholder);
        self.connection_status = ConnectionStatus::Connected;
        self.busy = true;
    }

    /// Resolve the pending exchange, if `generation` is still the one awaited
    ///
    /// Returns `None` (and changes nothing) for a superseded generation.
    pub fn resolve_pending(
        &mut self,
        generation: u64,
        resolution: Resolution,
    ) -> Option<&Message> {
        if self.pending.as_ref().map(|p| p.generation) != Some(generation) {
            return None;
        }
        let pending = self.pending.take()?;
        self.busy = false;

        let msg = self
            .messages
            .iter_mut()
            .find(|m| m.id == pending.placeholder && m.is_pending())?;
        msg.content = resolution.content;
        msg.status = resolution.status;
        msg.origin = resolution.origin;
        Some(&*msg)
    }

    /// Resolve whatever exchange is pending, regardless of generation
    ///
    /// Used when the user stops the exchange. Returns the generation that
    /// was abandoned.
    pub fn abandon_pending(&mut self, resolution: Resolution) -> Option<u64> {
        let generation = self.pending.as_ref()?.generation;
        self.resolve_pending(generation, resolution);
        Some(generation)
    }

    /// Start over with a fresh session ID and an empty log
    ///
    /// Connection status is left as is.
    pub fn reset(&mut self, id: SessionId, started_at: u64) {
        self.id = id;
        self.started_at = started_at;
        self.messages.clear();
        self.pending = None;
        self.busy = false;
    }

    /// Read-only view for surfaces
    #[must_use]
    pub fn snapshot(&self, input: &str, layout: LayoutState) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            messages: self.messages.clone(),
            connection_status: self.connection_status,
            busy: self.busy,
            input: input.to_string(),
            layout,
        }
    }
}
