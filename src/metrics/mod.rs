//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_gauge_with_registry, Counter, CounterVec, Encoder, Histogram, HistogramOpts,
    HistogramVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Completion gateway
    pub completion_requests: CounterVec,
    pub completion_duration: Histogram,

    // Dialogue window
    pub prompt_tokens: Histogram,
    pub history_trims: Counter,
    pub oversized_requests: Counter,

    // Image gateway
    pub image_requests: CounterVec,
    pub image_duration: HistogramVec,

    // Translation
    pub translation_attempts: CounterVec,
    pub translation_fallbacks: Counter,

    // Conversation
    pub state_transitions: CounterVec,
    pub active_sessions: IntGauge,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let completion_requests = register_counter_vec_with_registry!(
            Opts::new("completion_requests_total", "Total completion requests"),
            &["status"],
            registry
        )?;

        let completion_duration = register_histogram_with_registry!(
            "completion_request_duration_seconds",
            "Completion request duration in seconds",
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            HistogramOpts::new("prompt_tokens", "Estimated prompt tokens per completion request")
                .buckets(vec![100.0, 250.0, 500.0, 1000.0, 1500.0, 2000.0, 2500.0, 3000.0]),
            registry
        )?;

        let history_trims = register_counter_with_registry!(
            Opts::new("history_trimmed_messages_total", "Messages trimmed from dialogue history"),
            registry
        )?;

        let oversized_requests = register_counter_with_registry!(
            Opts::new("oversized_requests_total", "Requests too large even with empty history"),
            registry
        )?;

        let image_requests = register_counter_vec_with_registry!(
            Opts::new("image_requests_total", "Total image gateway requests"),
            &["operation", "status"],
            registry
        )?;

        let image_duration = register_histogram_vec_with_registry!(
            "image_request_duration_seconds",
            "Image gateway request duration in seconds",
            &["operation"],
            registry
        )?;

        let translation_attempts = register_counter_vec_with_registry!(
            Opts::new("translation_attempts_total", "Translation attempts"),
            &["status"],
            registry
        )?;

        let translation_fallbacks = register_counter_with_registry!(
            Opts::new("translation_fallbacks_total", "Translations that fell back to the source text"),
            registry
        )?;

        let state_transitions = register_counter_vec_with_registry!(
            Opts::new("state_transitions_total", "Conversation state transitions"),
            &["from", "to"],
            registry
        )?;

        let active_sessions = register_int_gauge_with_registry!(
            Opts::new("active_sessions", "Sessions currently held in memory"),
            registry
        )?;

        Ok(Self {
            registry,
            completion_requests,
            completion_duration,
            prompt_tokens,
            history_trims,
            oversized_requests,
            image_requests,
            image_duration,
            translation_attempts,
            translation_fallbacks,
            state_transitions,
            active_sessions,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completion request outcome
    pub fn record_completion(&self, status: &str, seconds: f64) {
        self.completion_requests.with_label_values(&[status]).inc();
        self.completion_duration.observe(seconds);
    }

    /// Record a prepared dialogue window
    pub fn record_window(&self, prompt_tokens: usize, trimmed: usize) {
        self.prompt_tokens.observe(prompt_tokens as f64);
        if trimmed > 0 {
            self.history_trims.inc_by(trimmed as f64);
        }
    }

    pub fn record_oversized_request(&self) {
        self.oversized_requests.inc();
    }

    /// Record an image gateway call
    pub fn record_image(&self, operation: &str, success: bool, seconds: f64) {
        let status = if success { "success" } else { "error" };
        self.image_requests.with_label_values(&[operation, status]).inc();
        self.image_duration
            .with_label_values(&[operation])
            .observe(seconds);
    }

    /// Record a single translation attempt
    pub fn record_translation(&self, status: &str) {
        self.translation_attempts.with_label_values(&[status]).inc();
    }

    pub fn record_translation_fallback(&self) {
        self.translation_fallbacks.inc();
    }

    /// Record a state change
    pub fn record_transition(&self, from: &str, to: &str) {
        self.state_transitions.with_label_values(&[from, to]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_window() {
        let metrics = Metrics::new().unwrap();
        metrics.record_window(1200, 0);
        metrics.record_window(2900, 4);
        assert_eq!(metrics.history_trims.get(), 4.0);
        assert_eq!(metrics.prompt_tokens.get_sample_count(), 2);
    }

    #[test]
    fn test_export_contains_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_completion("success", 0.4);
        metrics.record_transition("dialogue", "choosing_image_mode");

        let text = metrics.export_prometheus();
        assert!(text.contains("completion_requests_total"));
        assert!(text.contains("state_transitions_total"));
    }
}
