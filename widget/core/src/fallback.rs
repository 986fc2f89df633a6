//! Fallback Replies
//!
//! Locally synthesized replies used in resilient mode when the reply
//! service cannot produce a usable answer. Each reply is a filler line
//! picked at random from a fixed catalogue plus an echo of what the user
//! said, and is tagged [`ReplyOrigin::Fallback`] so nobody mistakes it for
//! a live answer.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dispatcher::Reply;
use crate::messages::ReplyOrigin;

/// Filler lines used for fallback replies
pub const FALLBACK_REPLIES: &[&str] = &[
    "Thanks for your message! I'm having trouble reaching the assistant right now.",
    "I'm temporarily unable to answer. Please try again in a moment.",
    "Sorry, something went wrong on our side. Your message was received.",
    "The assistant is offline at the moment. We'll be back shortly.",
    "I couldn't get an answer just now. Could you try again later?",
];

/// Produces fallback replies
pub struct FallbackGenerator {
    rng: Mutex<StdRng>,
}

impl FallbackGenerator {
    /// Create a generator seeded from OS entropy
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a deterministic generator (for tests)
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Build a fallback reply for the given user text
    ///
    /// The user text is echoed verbatim; the dispatcher escapes the whole
    /// reply afterwards like any other reply text.
    pub fn reply_for(&self, user_text: &str) -> Reply {
        let idx = self.rng.lock().gen_range(0..FALLBACK_REPLIES.len());
        let filler = FALLBACK_REPLIES[idx];

        Reply {
            content: format!("{filler} (You said: \"{user_text}\")"),
            origin: ReplyOrigin::Fallback,
        }
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FallbackGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackGenerator").finish_non_exhaustive()
    }
}
