//! Widget Configuration
//!
//! Centralized configuration loading for the chat widget, with an optional
//! TOML file at `~/.config/chat-widget/widget.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Explicit overrides ([`ConfigOverrides`], typically from the CLI)
//! 2. Environment variables (`CHAT_WIDGET_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! The result is validated once. After that the configuration is shared
//! read-only (`Arc<WidgetConfig>`) by every component.
//!
//! # Example Configuration
//!
//! ```toml
//! [endpoint]
//! base_url = "https://shop.example.com"
//! api_endpoint = "/api/chat"
//! allowed_origins = ["https://chat.example.com"]
//! csrf_token = "3f2a..."
//! dispatch_mode = "strict"
//! track_sessions = true
//! request_timeout_ms = 30000
//!
//! [limits]
//! max_message_length = 1000
//! max_messages = 10
//! window_ms = 60000
//!
//! [display]
//! title = "Support"
//! initially_open = true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatcher::DispatchMode;
use crate::rate_limit::RateLimitConfig;
use crate::security::DEFAULT_MAX_MESSAGE_LENGTH;

/// Prefix of every environment variable read by [`apply_env_config`]
pub const ENV_PREFIX: &str = "CHAT_WIDGET_";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Endpoint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointToml {
    /// Origin of the embedding page
    pub base_url: Option<String>,

    /// Reply service endpoint (path, or absolute URL)
    pub api_endpoint: Option<String>,

    /// Extra origins an absolute endpoint may point at
    pub allowed_origins: Option<Vec<String>>,

    /// Anti-forgery token for same-origin requests
    pub csrf_token: Option<String>,

    /// `resilient` or `strict`
    pub dispatch_mode: Option<DispatchMode>,

    /// Whether to send the session ID with each request
    pub track_sessions: Option<bool>,

    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum message length in characters
    pub max_message_length: Option<usize>,

    /// Maximum sends per window
    pub max_messages: Option<u32>,

    /// Window length in milliseconds
    pub window_ms: Option<u64>,
}

/// Display section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Header title
    pub title: Option<String>,

    /// Notice shown under the header
    pub disclaimer: Option<String>,

    /// Bot avatar URL
    pub bot_avatar: Option<String>,

    /// Start with the panel open
    pub initially_open: Option<bool>,

    /// Start with the panel maximized
    pub initially_maximized: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetToml {
    /// Endpoint configuration section
    pub endpoint: EndpointToml,

    /// Limits configuration section
    pub limits: LimitsToml,

    /// Display configuration section
    pub display: DisplayToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// The reply service endpoint after resolution against the page origin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Absolute endpoint URL
    pub url: Url,
    /// Whether the endpoint shares the page origin
    pub same_origin: bool,
}

/// Configuration for one widget instance
#[derive(Clone, Debug)]
pub struct WidgetConfig {
    /// Origin of the embedding page
    pub base_url: String,

    /// Reply service endpoint, relative to `base_url` or absolute
    pub api_endpoint: String,

    /// Maximum message length in characters
    pub max_message_length: usize,

    /// Send rate limit
    pub rate_limit: RateLimitConfig,

    /// Extra origins an absolute endpoint may point at
    pub allowed_origins: Vec<String>,

    /// Anti-forgery token (sent to same-origin endpoints only)
    pub csrf_token: Option<String>,

    /// How exchange failures are reported
    pub dispatch_mode: DispatchMode,

    /// Whether to send the session ID with each request
    pub track_sessions: bool,

    /// Request timeout
    pub request_timeout: Duration,

    /// Start with the panel open
    pub initially_open: bool,

    /// Start with the panel maximized
    pub initially_maximized: bool,

    /// Header title
    pub title: String,

    /// Notice shown under the header
    pub disclaimer: Option<String>,

    /// Bot avatar URL
    pub bot_avatar: Option<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            api_endpoint: "/api/chat".to_string(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            rate_limit: RateLimitConfig::default(),
            allowed_origins: Vec::new(),
            csrf_token: None,
            dispatch_mode: DispatchMode::default(),
            track_sessions: true,
            request_timeout: Duration::from_secs(30),
            initially_open: false,
            initially_maximized: false,
            title: "Chat".to_string(),
            disclaimer: None,
            bot_avatar: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl WidgetConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Resolve the endpoint against the page origin
    ///
    /// # Errors
    ///
    /// Fails if either URL is invalid, or if the endpoint leaves the page
    /// origin for an origin not listed in `allowed_origins`.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let base = parse_http_url(&self.base_url, "base_url")?;
        let url = base.join(&self.api_endpoint).map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid api_endpoint {:?}: {e}",
                self.api_endpoint
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "api_endpoint must use http or https, got {}",
                url.scheme()
            )));
        }

        let same_origin = url.origin() == base.origin();
        if !same_origin && !self.origin_allowed(&url)? {
            return Err(ConfigError::ValidationError(format!(
                "api_endpoint origin {} is neither the page origin nor in allowed_origins",
                url.origin().ascii_serialization()
            )));
        }

        Ok(Endpoint { url, same_origin })
    }

    fn origin_allowed(&self, url: &Url) -> Result<bool, ConfigError> {
        for entry in &self.allowed_origins {
            if parse_http_url(entry, "allowed_origins")?.origin() == url.origin() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check every value once
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first
    /// offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_length == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_length must be positive".to_string(),
            ));
        }
        if self.rate_limit.max_messages == 0 || self.rate_limit.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit max_messages and window_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        self.endpoint().map(|_| ())
    }
}

fn parse_http_url(value: &str, field: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("invalid {field} {value:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "{field} must use http or https, got {value:?}"
        )));
    }
    Ok(url)
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-widget/widget.toml` or
/// `~/.config/chat-widget/widget.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-widget").join("widget.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<WidgetConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<WidgetConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok(), &ConfigOverrides::default())
}

/// Load configuration from all sources with proper priority
///
/// `env` looks up environment variables; pass a closure over a map in
/// tests instead of touching the process environment.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged configuration is invalid.
pub fn load_config_with(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
    overrides: &ConfigOverrides,
) -> Result<WidgetConfig, ConfigError> {
    let mut config = WidgetConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: WidgetToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    overrides.apply(&mut config);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
pub fn apply_toml_config(config: &mut WidgetConfig, toml: &WidgetToml) {
    // Endpoint settings
    if let Some(ref base_url) = toml.endpoint.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(ref endpoint) = toml.endpoint.api_endpoint {
        config.api_endpoint = endpoint.clone();
    }
    if let Some(ref origins) = toml.endpoint.allowed_origins {
        config.allowed_origins = origins.clone();
    }
    if toml.endpoint.csrf_token.is_some() {
        config.csrf_token = toml.endpoint.csrf_token.clone();
    }
    if let Some(mode) = toml.endpoint.dispatch_mode {
        config.dispatch_mode = mode;
    }
    if let Some(track) = toml.endpoint.track_sessions {
        config.track_sessions = track;
    }
    if let Some(timeout) = toml.endpoint.request_timeout_ms {
        config.request_timeout = Duration::from_millis(timeout);
    }

    // Limits
    if let Some(length) = toml.limits.max_message_length {
        config.max_message_length = length;
    }
    if let Some(max) = toml.limits.max_messages {
        config.rate_limit.max_messages = max;
    }
    if let Some(window) = toml.limits.window_ms {
        config.rate_limit.window_ms = window;
    }

    // Display
    if let Some(ref title) = toml.display.title {
        config.title = title.clone();
    }
    if toml.display.disclaimer.is_some() {
        config.disclaimer = toml.display.disclaimer.clone();
    }
    if toml.display.bot_avatar.is_some() {
        config.bot_avatar = toml.display.bot_avatar.clone();
    }
    if let Some(open) = toml.display.initially_open {
        config.initially_open = open;
    }
    if let Some(maximized) = toml.display.initially_maximized {
        config.initially_maximized = maximized;
    }
}

/// Apply environment variable overrides to the config
///
/// Unparseable values are logged and ignored.
pub fn apply_env_config(config: &mut WidgetConfig, env: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| env(&format!("{ENV_PREFIX}{name}"));

    if let Some(base_url) = var("BASE_URL") {
        config.base_url = base_url;
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = var("API_ENDPOINT") {
        config.api_endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(origins) = var("ALLOWED_ORIGINS") {
        config.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(token) = var("CSRF_TOKEN") {
        config.csrf_token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(mode) = var("DISPATCH_MODE") {
        match mode.parse::<DispatchMode>() {
            Ok(mode) => {
                config.dispatch_mode = mode;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring CHAT_WIDGET_DISPATCH_MODE"),
        }
    }
    if let Some(track) = var("TRACK_SESSIONS") {
        config.track_sessions = track != "0" && !track.eq_ignore_ascii_case("false");
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = var("REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(length) = var("MAX_MESSAGE_LENGTH") {
        if let Ok(l) = length.parse::<usize>() {
            config.max_message_length = l;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(max) = var("RATE_LIMIT_MAX") {
        if let Ok(n) = max.parse::<u32>() {
            config.rate_limit.max_messages = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(window) = var("RATE_LIMIT_WINDOW_MS") {
        if let Ok(ms) = window.parse::<u64>() {
            config.rate_limit.window_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub api_endpoint: Option<String>,

    /// Page origin override
    pub base_url: Option<String>,

    /// CSRF token override
    pub csrf_token: Option<String>,

    /// Dispatch mode override
    pub dispatch_mode: Option<DispatchMode>,

    /// Request timeout override (milliseconds)
    pub request_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    /// Set page origin override
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set CSRF token override
    #[must_use]
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Set dispatch mode override
    #[must_use]
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = Some(mode);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.api_endpoint.is_none()
            && self.base_url.is_none()
            && self.csrf_token.is_none()
            && self.dispatch_mode.is_none()
            && self.request_timeout_ms.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut WidgetConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref endpoint) = self.api_endpoint {
            config.api_endpoint = endpoint.clone();
        }
        if let Some(ref base_url) = self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(ref token) = self.csrf_token {
            config.csrf_token = Some(token.clone());
        }
        if let Some(mode) = self.dispatch_mode {
            config.dispatch_mode = mode;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
