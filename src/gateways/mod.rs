//! Wrappers around the hosted completion, image and translation APIs

pub mod circuit_breaker;
pub mod completion;
pub mod images;
pub mod replicate;
pub mod translation;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use completion::{CompletionGateway, DialogueReply, OpenAiChatClient, ResponseFormat};
pub use images::{ImageGateway, OpenAiImageClient, SplitImageGateway};
pub use replicate::ReplicateImageClient;
pub use translation::{GoogleTranslateClient, RetryPolicy, TranslationGateway, Translator};

use reqwest::StatusCode;

/// Gateway error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Upstream error: status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Operation not supported by this provider: {0}")]
    Unsupported(&'static str),

    #[error("Gateway is disabled")]
    Disabled,
}

impl GatewayError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::RequestFailed(e.to_string())
        }
    }
}

/// Turn a non-success response into an error, keeping 429 distinguishable
pub(crate) async fn upstream_error(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::RateLimited(error_text)
    } else {
        GatewayError::Upstream {
            status: status.as_u16(),
            message: error_text,
        }
    }
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
