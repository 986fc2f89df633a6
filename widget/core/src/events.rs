//! Widget Events
//!
//! Intents sent from a surface to the session controller.
//!
//! # Design Philosophy
//!
//! Surfaces are "dumb" renderers. They report what the user did and the
//! controller decides what it means; a surface never edits the session
//! directly.

use serde::{Deserialize, Serialize};

use crate::input::KeyPress;

/// Events from a surface to the session controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetEvent {
    // ============================================
    // Input Events
    // ============================================
    /// The draft text changed
    Input(String),

    /// A key was pressed in the input box
    Key(KeyPress),

    /// The send button was pressed
    Send,

    // ============================================
    // Session Events
    // ============================================
    /// The stop button was pressed
    Stop,

    /// The user asked for a fresh conversation
    NewSession,

    // ============================================
    // Layout Events
    // ============================================
    /// Open or close the panel
    ToggleOpen,

    /// Maximize or restore the panel
    ToggleMaximize,
}
