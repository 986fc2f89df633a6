//! Input Buffer
//!
//! The draft the user is typing. Text beyond the configured maximum is
//! never accepted into the buffer (lengths are counted in chars), and key
//! presses are mapped to intents here so every surface submits the same
//! way.

use serde::{Deserialize, Serialize};

/// A key press relevant to the input box
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    /// The key
    pub key: Key,
    /// Whether Shift was held
    pub shift: bool,
}

impl KeyPress {
    /// Enter without modifiers
    #[must_use]
    pub fn enter() -> Self {
        Self {
            key: Key::Enter,
            shift: false,
        }
    }

    /// Shift+Enter
    #[must_use]
    pub fn shift_enter() -> Self {
        Self {
            key: Key::Enter,
            shift: true,
        }
    }
}

/// Keys the input box reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    /// Enter / Return
    Enter,
    /// Any other key
    Other,
}

/// What a key press asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputAction {
    /// Submit the draft
    Submit,
    /// Insert a line break
    Newline,
    /// Nothing
    None,
}

/// Map a key press to an action
///
/// Enter submits only when no exchange is in flight; Shift+Enter always
/// inserts a line break.
#[must_use]
pub fn classify_key(key: KeyPress, busy: bool) -> InputAction {
    match key {
        KeyPress {
            key: Key::Enter,
            shift: true,
        } => InputAction::Newline,
        KeyPress {
            key: Key::Enter,
            shift: false,
        } if !busy => InputAction::Submit,
        _ => InputAction::None,
    }
}

/// Draft text with a hard length cap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputBuffer {
    text: String,
    max_chars: usize,
}

impl InputBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
        }
    }

    /// Current draft
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the draft is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Replace the draft, keeping at most `max_chars` characters
    pub fn set(&mut self, text: &str) {
        self.text = text.chars().take(self.max_chars).collect();
    }

    /// Append text, dropping whatever does not fit
    ///
    /// Returns the number of characters accepted.
    pub fn insert(&mut self, text: &str) -> usize {
        let room = self.max_chars.saturating_sub(self.text.chars().count());
        let before = self.text.len();
        self.text.extend(text.chars().take(room));
        self.text[before..].chars().count()
    }

    /// Take the draft, leaving the buffer empty
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Empty the buffer
    pub fn clear(&mut self) {
        self.text.clear();
    }
}
