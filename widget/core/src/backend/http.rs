//! HTTP Transport Implementation
//!
//! Production transport: one JSON POST per exchange via `reqwest`.
//!
//! Redirects are followed only while they stay on the origin of the first
//! request, so headers carrying the CSRF token never leave the page origin.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;

use super::traits::{OutboundRequest, Transport, TransportError, TransportResponse};

/// Maximum same-origin redirects followed per request
const MAX_REDIRECTS: usize = 5;

/// Reply service client over HTTP
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given request timeout
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(same_origin_redirects())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { http_client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

fn same_origin_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }

        let same_origin = attempt
            .previous()
            .first()
            .is_some_and(|first| first.origin() == attempt.url().origin());

        if same_origin {
            attempt.follow()
        } else {
            tracing::warn!(to = %attempt.url(), "Refusing cross-origin redirect");
            attempt.stop()
        }
    })
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.http_client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(&request.body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        tracing::debug!(status, bytes = body.len(), "Reply service responded");

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}
