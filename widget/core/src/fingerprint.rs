//! Client Fingerprint
//!
//! A low-entropy, non-identifying description of the client environment,
//! sent with every request so the reply service can run anomaly
//! heuristics. It is never used for authentication.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::clock::Clock;

/// Environment signals folded into the fingerprint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentSignals {
    /// BCP 47-ish language tag (e.g. `en-US`), `und` when unknown
    pub language: String,
    /// Local offset from UTC in minutes
    pub utc_offset_minutes: i32,
    /// Operating system and architecture (e.g. `linux|x86_64`)
    pub platform: String,
}

impl EnvironmentSignals {
    /// Read signals from the running process environment
    #[must_use]
    pub fn detect(clock: &dyn Clock) -> Self {
        Self::detect_with(|key| std::env::var(key).ok(), clock)
    }

    /// Read signals through a custom variable lookup
    pub fn detect_with(lookup: impl Fn(&str) -> Option<String>, clock: &dyn Clock) -> Self {
        let language = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find_map(|value| language_tag(&value))
            .unwrap_or_else(|| "und".to_string());

        Self {
            language,
            utc_offset_minutes: clock.utc_offset_minutes(),
            platform: format!("{}|{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// Encode the signals as an opaque fingerprint string
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let raw = format!(
            "{}|{}|{}",
            self.language, self.utc_offset_minutes, self.platform
        );
        STANDARD.encode(raw)
    }
}

/// Turn a POSIX locale (`en_US.UTF-8@euro`) into a language tag (`en-US`)
fn language_tag(locale: &str) -> Option<String> {
    let base = locale
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }

    Some(base.replace('_', "-"))
}
