//! Model provider module.
//!
//! Defines the [`ModelProvider`] trait (the converse / converse-stream
//! primitives the gateway consumes), the provider error type, the router that
//! resolves a catalog model to its provider, and the OpenAI-compatible
//! adapter.

pub mod openai;
pub mod router;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::providers::types::{ConverseRequest, ConverseResponse};
use crate::stream::StreamEvent;

// Re-exports for convenience.
pub use self::openai::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use self::router::ProviderRouter;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No provider registered with id: {0}")]
    NoProvider(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Rate limited by provider: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// The upstream HTTP status, when the provider reported one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Status code to surface to callers; 500 when none is known.
    pub fn status_code(&self) -> u16 {
        self.status().unwrap_or(500)
    }
}

/// Event stream produced by a provider's converse-stream call.
pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

// ---------------------------------------------------------------------------
// ModelProvider trait
// ---------------------------------------------------------------------------

/// Trait that all model providers implement.
///
/// Requests are keyed by the catalog model's internal name
/// ([`ConverseRequest::model_id`]). Async methods return boxed futures so the
/// trait stays dyn-compatible (`Arc<dyn ModelProvider>`).
pub trait ModelProvider: Send + Sync {
    /// Identifier matching `Model.provider_id` in the registry.
    fn id(&self) -> &str;

    /// Non-streaming converse call.
    fn converse(
        &self,
        request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConverseResponse, ProviderError>> + Send + '_>>;

    /// Streaming converse call.
    ///
    /// Implementations must yield events in the order message-start,
    /// content deltas, message-stop, and finish with exactly one metadata
    /// event carrying token usage.
    fn converse_stream(
        &self,
        request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEventStream, ProviderError>> + Send + '_>>;
}
