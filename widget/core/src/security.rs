//! Security Module
//!
//! Client-side safety controls applied before anything reaches the reply
//! service or the surface:
//! - HTML escaping of text that ends up in a rendered page
//! - Validation of outgoing user messages (length, control characters,
//!   script-injection patterns)
//!
//! # Design Philosophy
//!
//! Validation is fail-safe: when in doubt, reject the input. The deny-list
//! is deliberately blunt; a rejected message costs the user a retype, an
//! accepted payload could cost much more.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Default maximum message length in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1000;

/// Upper bound on tag-stripping passes when looking for nested obfuscation
const MAX_STRIP_PASSES: usize = 16;

// =============================================================================
// Escaping
// =============================================================================

/// Escape a string for insertion into HTML text content
///
/// All markup-significant characters are replaced by entity references.
/// An `&` that already begins a well-formed character reference is kept as
/// is, so escaping twice yields the same output as escaping once.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);

    for (idx, c) in text.char_indices() {
        match c {
            '&' if starts_with_char_ref(&text[idx + 1..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '`' => out.push_str("&#x60;"),
            _ => out.push(c),
        }
    }

    out
}

/// Whether `rest` (the text right after an `&`) is a character reference body
fn starts_with_char_ref(rest: &str) -> bool {
    let Some(end) = rest.find(';') else {
        return false;
    };
    let body = &rest[..end];

    if let Some(num) = body.strip_prefix('#') {
        if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            return (1..=6).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit());
        }
        return (1..=7).contains(&num.len()) && num.chars().all(|c| c.is_ascii_digit());
    }

    (2..=32).contains(&body.len())
        && body.starts_with(|c: char| c.is_ascii_alphabetic())
        && body.chars().all(|c| c.is_ascii_alphanumeric())
}

// =============================================================================
// Validation
// =============================================================================

/// Why a message was rejected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Empty or whitespace-only input
    #[error("Message is empty")]
    Empty,

    /// Longer than the configured maximum
    #[error("Message too long: {length} characters (max: {max})")]
    TooLong {
        /// Length of the message in characters
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// Contains control characters other than newline, carriage return, tab
    #[error("Message contains invalid control characters")]
    ControlCharacters,

    /// Matches an entry of the deny-list
    #[error("Message matches a suspicious pattern ({0})")]
    SuspiciousPattern(&'static str),
}

/// A named deny-list entry
struct DenyPattern {
    name: &'static str,
    regex: Regex,
}

fn deny(name: &'static str, pattern: &str) -> DenyPattern {
    DenyPattern {
        name,
        regex: Regex::new(pattern).expect("deny-list pattern must compile"),
    }
}

static DENY_LIST: Lazy<Vec<DenyPattern>> = Lazy::new(|| {
    vec![
        deny("script tag", r"(?i)<\s*/?\s*script\b"),
        deny(
            "javascript uri",
            r"(?i)j\s*a\s*v\s*a\s*s\s*c\s*r\s*i\s*p\s*t\s*:",
        ),
        deny("vbscript uri", r"(?i)v\s*b\s*s\s*c\s*r\s*i\s*p\s*t\s*:"),
        deny("event handler attribute", r"(?i)\bon[a-z]+\s*="),
        deny("html data uri", r"(?i)data\s*:\s*text/html"),
        deny("embedded frame", r"(?i)<\s*(?:iframe|object|embed)\b"),
    ]
});

/// Innermost tag (no nested angle brackets)
static INNER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<>]*>").expect("tag pattern must compile"));

/// Return the name of the first deny-list entry matching `text`
///
/// Besides the raw text, the check is repeated after peeling off the
/// innermost tags, which exposes keywords split by nested markup such as
/// `<scr<b>ipt>`.
#[must_use]
pub fn suspicious_pattern(text: &str) -> Option<&'static str> {
    let mut current = text.to_string();

    for _ in 0..MAX_STRIP_PASSES {
        if let Some(hit) = DENY_LIST.iter().find(|p| p.regex.is_match(&current)) {
            return Some(hit.name);
        }

        let stripped = INNER_TAG.replace_all(&current, "");
        if stripped == current {
            break;
        }
        current = stripped.into_owned();
    }

    None
}

/// Validator for outgoing user messages
#[derive(Clone, Debug)]
pub struct InputValidator {
    max_length: usize,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl InputValidator {
    /// Create a validator with the given maximum length (in characters)
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Maximum accepted length in characters
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Check a candidate message
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] that applies.
    pub fn check(&self, content: &str) -> Result<(), Rejection> {
        if content.is_empty() {
            return Err(Rejection::Empty);
        }

        let length = content.chars().count();
        if length > self.max_length {
            return Err(Rejection::TooLong {
                length,
                max: self.max_length,
            });
        }

        if content.trim().is_empty() {
            return Err(Rejection::Empty);
        }

        // Check for control characters (except newline, tab)
        if content
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return Err(Rejection::ControlCharacters);
        }

        if let Some(name) = suspicious_pattern(content) {
            tracing::debug!(pattern = name, "Rejected message matching deny-list");
            return Err(Rejection::SuspiciousPattern(name));
        }

        Ok(())
    }
}

/// Accept or reject a candidate message
#[must_use]
pub fn validate(text: &str, max_length: usize) -> bool {
    InputValidator::new(max_length).check(text).is_ok()
}
