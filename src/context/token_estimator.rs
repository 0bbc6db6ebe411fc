//! Token estimation using tiktoken

use super::models::Message;
use crate::error::{BotError, Result};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::warn;

/// Fixed overhead per message in the chat wire format
const TOKENS_PER_MESSAGE: usize = 4;
/// Every reply is primed with `<|start|>assistant<|message|>`
const REPLY_PRIMING_TOKENS: usize = 3;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate the serialized cost of a chat request
    ///
    /// Every message adds at least [`TOKENS_PER_MESSAGE`], so appending a
    /// message never lowers the result.
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        let body: usize = messages
            .iter()
            .map(|m| TOKENS_PER_MESSAGE + self.estimate(m.role.as_str()) + self.estimate(&m.content))
            .sum();
        body + REPLY_PRIMING_TOKENS
    }
}

/// Tiktoken-based token estimator
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
    profile: String,
}

impl TiktokenEstimator {
    /// Create an estimator with the cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| BotError::Tokenizer(e.to_string()))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            profile: "cl100k_base".to_string(),
        })
    }

    /// Create an estimator for a model, falling back to cl100k_base
    pub fn for_model(model: &str) -> Result<Self> {
        match get_bpe_from_model(model) {
            Ok(bpe) => Ok(Self {
                bpe: Arc::new(bpe),
                profile: model.to_string(),
            }),
            Err(e) => {
                warn!("Tokenizer for model {} not found ({}), using cl100k_base", model, e);
                Self::new()
            }
        }
    }

    /// Name of the tokenizer profile in use
    pub fn profile(&self) -> &str {
        &self.profile
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based token estimator (fallback, ~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let estimator = TiktokenEstimator::for_model("definitely-not-a-model").unwrap();
        assert_eq!(estimator.profile(), "cl100k_base");
        assert!(estimator.estimate("hello") > 0);
    }

    #[test]
    fn test_known_model_profile() {
        let estimator = TiktokenEstimator::for_model("gpt-3.5-turbo-0301").unwrap();
        assert_eq!(estimator.profile(), "gpt-3.5-turbo-0301");
    }

    #[test]
    fn test_word_based_estimator() {
        let estimator = WordBasedEstimator::default();
        let tokens = estimator.estimate("Hello world test");
        assert_eq!(tokens, 4); // 3 words * 1.3 = 3.9 -> 4
    }

    #[test]
    fn test_message_overhead() {
        let estimator = WordBasedEstimator::default();
        assert_eq!(estimator.estimate_messages(&[]), 3);

        // "user" = 1 word -> 2 tokens, "hi" -> 2 tokens, plus 4 per message
        let one = estimator.estimate_messages(&[Message::user("hi")]);
        assert_eq!(one, 3 + 4 + 2 + 2);
    }

    #[test]
    fn test_adding_messages_never_decreases_estimate() {
        let estimator = TiktokenEstimator::new().unwrap();
        let mut messages = vec![Message::system("You are helpful.")];
        let mut previous = estimator.estimate_messages(&messages);
        for content in ["", "a", "a much longer message about rust lifetimes"] {
            messages.push(Message::user(content));
            let current = estimator.estimate_messages(&messages);
            assert!(current > previous);
            previous = current;
        }
    }
}
