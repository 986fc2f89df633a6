//! Transport Traits
//!
//! Trait and wire types for talking to the reply service. The transport
//! only moves bytes: status codes, content types and payload shapes are
//! judged by the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body of an outgoing chat request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Sanitized user text
    pub message: String,
    /// Client timestamp (Unix timestamp ms)
    pub timestamp: u64,
    /// Opaque environment fingerprint
    pub fingerprint: String,
    /// Session identifier, when session tracking is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A fully built request, ready for the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Absolute endpoint URL
    pub url: String,
    /// Header name/value pairs, in order
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: ChatRequest,
}

impl OutboundRequest {
    /// Look up a header value (case-insensitive name)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from the reply service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// Raw body text
    pub body: String,
}

impl TransportResponse {
    /// A `200 OK` JSON response
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the content type announces JSON (`application/json` or `+json`)
    #[must_use]
    pub fn is_json(&self) -> bool {
        let Some(content_type) = self.content_type.as_deref() else {
            return false;
        };
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        media_type == "application/json" || media_type.ends_with("+json")
    }
}

/// Failures below the HTTP layer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built or sent
    #[error("Request failed: {0}")]
    Request(String),

    /// The response body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Transport trait
///
/// Implement this trait to reach the reply service over a different channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "http")
    fn name(&self) -> &str;

    /// Send one request and wait for the complete response
    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_json_content_types() {
        let mut response = TransportResponse::json("{}");
        assert!(response.is_json());

        response.content_type = Some("application/json; charset=utf-8".to_string());
        assert!(response.is_json());

        response.content_type = Some("Application/Problem+JSON".to_string());
        assert!(response.is_json());

        response.content_type = Some("text/html".to_string());
        assert!(!response.is_json());

        response.content_type = None;
        assert!(!response.is_json());
    }

    #[test]
    fn test_is_success() {
        let mut response = TransportResponse::json("{}");
        assert!(response.is_success());
        response.status = 204;
        assert!(response.is_success());
        response.status = 304;
        assert!(!response.is_success());
        response.status = 500;
        assert!(!response.is_success());
    }

    #[test]
    fn test_chat_request_omits_missing_session() {
        let body = ChatRequest {
            message: "hi".to_string(),
            timestamp: 1,
            fingerprint: "fp".to_string(),
            session_id: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("session_id").is_none());
        assert_eq!(json["timestamp"], 1);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = OutboundRequest {
            url: "http://localhost/api/chat".to_string(),
            headers: vec![("X-CSRF-Token".to_string(), "abc".to_string())],
            body: ChatRequest {
                message: String::new(),
                timestamp: 0,
                fingerprint: String::new(),
                session_id: None,
            },
        };
        assert_eq!(request.header("x-csrf-token"), Some("abc"));
        assert_eq!(request.header("x-requested-with"), None);
    }
}
