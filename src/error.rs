//! Crate-wide error type

use crate::gateways::GatewayError;
use thiserror::Error;

/// Result alias used across the bot
pub type Result<T> = std::result::Result<T, BotError>;

/// Errors surfaced by the conversation core and its collaborators
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Request too large: {tokens} tokens with an empty history, budget is {budget}")]
    RequestTooLarge { tokens: usize, budget: usize },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<::config::ConfigError> for BotError {
    fn from(err: ::config::ConfigError) -> Self {
        BotError::Configuration(err.to_string())
    }
}

impl BotError {
    /// True when the user can simply send the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(self, BotError::Gateway(GatewayError::RateLimited(_)))
    }
}
