//! The [`VisionProvider`] trait and its error taxonomy.

use async_trait::async_trait;
use scout_core::EnrichmentPayload;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a provider call can surface.
///
/// The request processor's retry policy only retries
/// [`ProviderError::ContentFormat`]; every other variant is a hard
/// per-request failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failed (connect, TLS, mid-body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The bounded per-call timeout elapsed.
    #[error("provider call timed out")]
    Timeout,

    /// Authentication rejected (invalid or expired credential).
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// The provider returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// The provider answered, but its text did not parse into the
    /// expected identification + enrichment shape.
    #[error("content format error: {message}")]
    ContentFormat {
        /// What failed to parse or which key was absent.
        message: String,
    },
}

impl ProviderError {
    /// Whether this is the retried class: provider text that failed to
    /// parse as the expected structured shape (including absent keys).
    pub fn is_content_format(&self) -> bool {
        matches!(self, Self::ContentFormat { .. })
    }

    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Timeout => "timeout",
            Self::Auth { .. } => "auth",
            Self::Api { .. } => "api",
            Self::ContentFormat { .. } => "content_format",
        }
    }
}

/// Async enrichment call the gateway core consumes.
///
/// Implementors must be `Send + Sync`; one call is made per request
/// processor attempt, with no state carried between attempts.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Identify and enrich the object in `crop_base64`, using `label` as a
    /// classifier hint. The returned payload has already been validated to
    /// contain the expected shape.
    async fn enrich(&self, crop_base64: &str, label: &str) -> ProviderResult<EnrichmentPayload>;
}
