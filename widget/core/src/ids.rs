//! Identifier Generation
//!
//! Message and session identifiers must be unpredictable to anyone watching
//! the wire, so the production source draws 128 random bits from the OS
//! CSPRNG (UUID v4) instead of a counter.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Produces unique identifiers for messages and sessions
pub trait IdSource: Send + Sync {
    /// Produce the next identifier
    fn next_id(&self) -> String;
}

/// Random UUID v4 identifiers in canonical hyphenated form
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self) -> String {
        generate_id()
    }
}

/// Generate a fresh random identifier
///
/// 122 bits of entropy from the operating system RNG, formatted as
/// `xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx`.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

/// Predictable identifiers (`{prefix}-1`, `{prefix}-2`, ...)
///
/// For deterministic tests and replay tooling only.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    /// Create a sequence with the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", self.prefix)
    }
}
