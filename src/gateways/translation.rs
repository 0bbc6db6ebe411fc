//! Translation gateway and the retrying translator built on it
//!
//! [`Translator::translate`] never fails: after a bounded number of attempts
//! (or while the circuit for the target language is open) it hands back the
//! text it was given.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::{endpoint, upstream_error, GatewayError};
use crate::config::TranslationConfig;
use crate::metrics::METRICS;
use async_trait::async_trait;
use moka::future::Cache;
use rand::Rng;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Target language used for image prompts
pub const ENGLISH: &str = "en";

/// Translation gateway
#[async_trait]
pub trait TranslationGateway: Send + Sync {
    /// Translate `text` (source language auto-detected) into `target`
    async fn translate(&self, text: &str, target: &str) -> Result<String, GatewayError>;
}

/// Client for the public Google translate endpoint
pub struct GoogleTranslateClient {
    http: Client,
    url: String,
}

impl GoogleTranslateClient {
    pub fn new(config: &TranslationConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            url: endpoint(&config.base_url, "translate_a/single"),
        })
    }
}

#[async_trait]
impl TranslationGateway for GoogleTranslateClient {
    async fn translate(&self, text: &str, target: &str) -> Result<String, GatewayError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        parse_segments(&body)
    }
}

/// The answer is `[[["translated", "source", ...], ...], null, "detected", ...]`
fn parse_segments(body: &serde_json::Value) -> Result<String, GatewayError> {
    let segments = body
        .get(0)
        .and_then(|s| s.as_array())
        .ok_or_else(|| GatewayError::InvalidResponse("missing translation segments".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(|t| t.as_str()))
        .collect();

    if translated.is_empty() {
        return Err(GatewayError::InvalidResponse("empty translation".to_string()));
    }
    Ok(translated)
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_backoff
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_backoff)
    }

    /// Backoff plus up to 10% random jitter
    fn jittered(&self, attempt: usize) -> Duration {
        let delay = self.backoff(attempt);
        let jitter_ms = (delay.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }
}

impl From<&TranslationConfig> for RetryPolicy {
    fn from(config: &TranslationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: config.backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Retrying, caching translator with a fallback to the source text
pub struct Translator {
    gateway: Option<Arc<dyn TranslationGateway>>,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    cache: Cache<(String, String), String>,
}

impl Translator {
    pub fn new(gateway: Arc<dyn TranslationGateway>, config: &TranslationConfig) -> Self {
        Self {
            gateway: config.enabled.then_some(gateway),
            policy: RetryPolicy::from(config),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failures,
                reset_timeout: config.breaker_reset_timeout(),
            }),
            cache: Cache::builder()
                .max_capacity(config.cache_max_entries)
                .time_to_live(config.cache_ttl())
                .build(),
        }
    }

    /// A translator that returns every text unchanged
    pub fn passthrough() -> Self {
        let config = TranslationConfig::default();
        Self {
            gateway: None,
            policy: RetryPolicy::from(&config),
            breaker: CircuitBreaker::default(),
            cache: Cache::new(1),
        }
    }

    /// Translate `text` into `target`, or return it unchanged on failure
    pub async fn translate(&self, text: &str, target: &str) -> String {
        let Some(gateway) = &self.gateway else {
            return text.to_string();
        };
        if text.trim().is_empty() || target.trim().is_empty() {
            return text.to_string();
        }

        let key = (target.to_string(), text.to_string());
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }

        for attempt in 1..=self.policy.max_attempts {
            if !self.breaker.allow(target) {
                debug!("Translation circuit open for {}, skipping", target);
                METRICS.record_translation("circuit_open");
                break;
            }

            match gateway.translate(text, target).await {
                Ok(translated) => {
                    self.breaker.mark_success(target);
                    METRICS.record_translation("success");
                    self.cache.insert(key, translated.clone()).await;
                    return translated;
                }
                Err(e) => {
                    self.breaker.mark_failure(target);
                    METRICS.record_translation("error");

                    if attempt == self.policy.max_attempts {
                        warn!("Translation to {} failed after {} attempts: {}", target, attempt, e);
                        break;
                    }

                    let delay = self.policy.jittered(attempt);
                    warn!(
                        "Translation attempt {} to {} failed: {}, retrying in {:?}",
                        attempt, target, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        METRICS.record_translation_fallback();
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TranslationGateway for Flaky {
        async fn translate(&self, text: &str, target: &str) -> Result<String, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(GatewayError::Timeout("slow".to_string()))
            } else {
                Ok(format!("[{}] {}", target, text))
            }
        }
    }

    fn fast_config(max_attempts: usize) -> TranslationConfig {
        TranslationConfig {
            max_attempts,
            backoff_ms: 1,
            max_backoff_ms: 2,
            ..TranslationConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_parse_segments_joins_sentences() {
        let body = serde_json::json!([[["Hola. ", "Hello. ", null], ["Adiós", "Bye", null]], null, "en"]);
        assert_eq!(parse_segments(&body).unwrap(), "Hola. Adiós");
        assert!(parse_segments(&serde_json::json!({"error": 1})).is_err());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let gateway = Arc::new(Flaky {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        });
        let translator = Translator::new(gateway.clone(), &fast_config(3));

        assert_eq!(translator.translate("Hello", "es").await, "[es] Hello");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_falls_back_after_bounded_attempts() {
        let gateway = Arc::new(Flaky {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let translator = Translator::new(gateway.clone(), &fast_config(3));

        assert_eq!(translator.translate("Hello", "es").await, "Hello");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_avoids_second_call() {
        let gateway = Arc::new(Flaky {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        });
        let translator = Translator::new(gateway.clone(), &fast_config(3));

        translator.translate("Cancel", "de").await;
        translator.translate("Cancel", "de").await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_passthrough_and_disabled() {
        let translator = Translator::passthrough();
        assert_eq!(tokio_test::block_on(translator.translate("Hi", "fr")), "Hi");

        let gateway = Arc::new(Flaky {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        });
        let config = TranslationConfig {
            enabled: false,
            ..TranslationConfig::default()
        };
        let translator = Translator::new(gateway.clone(), &config);
        assert_eq!(tokio_test::block_on(translator.translate("Hi", "fr")), "Hi");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }
}
