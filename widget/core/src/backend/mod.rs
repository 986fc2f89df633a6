//! Reply Service Transport
//!
//! This module provides abstracted access to the remote reply service
//! through a common trait interface, so the dispatcher can be exercised
//! against fakes and the production HTTP client alike.
//!
//! # Available Transports
//!
//! - **HTTP**: `reqwest`-based POST to the configured endpoint (default)
//!
//! # Usage
//!
//! ```ignore
//! use widget_core::backend::{HttpTransport, Transport};
//!
//! let transport = HttpTransport::new(Duration::from_secs(30))?;
//! let response = transport.post(&request).await?;
//! ```

mod http;
mod traits;

pub use http::HttpTransport;
pub use traits::{ChatRequest, OutboundRequest, Transport, TransportError, TransportResponse};
