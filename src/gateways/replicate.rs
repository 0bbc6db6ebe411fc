//! Stable Diffusion on Replicate, an alternate generation provider
//!
//! Only text-to-image is offered; edit and variation stay with OpenAI.

use super::images::ImageGateway;
use super::{endpoint, upstream_error, GatewayError};
use crate::config::ReplicateConfig;
use crate::metrics::METRICS;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub struct ReplicateImageClient {
    http: Client,
    base_url: String,
    api_token: SecretString,
    model_version: String,
    num_inference_steps: u32,
    negative_prompt: String,
    poll_interval: Duration,
    max_polls: usize,
}

impl ReplicateImageClient {
    pub fn new(config: &ReplicateConfig) -> Result<Self, GatewayError> {
        let api_token = config
            .api_token
            .as_ref()
            .map(|t| SecretString::new(t.expose_secret().clone()))
            .ok_or(GatewayError::Disabled)?;

        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_token,
            model_version: config.model_version.clone(),
            num_inference_steps: config.num_inference_steps,
            negative_prompt: config.negative_prompt.clone(),
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(
            "Authorization",
            format!("Token {}", self.api_token.expose_secret()),
        )
    }

    async fn read(response: reqwest::Response) -> Result<Prediction, GatewayError> {
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn predict(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        let body = serde_json::json!({
            "version": self.model_version,
            "input": {
                "prompt": prompt,
                "num_inference_steps": self.num_inference_steps,
                "negative_prompt": self.negative_prompt,
            }
        });

        let req = self
            .authorized(self.http.post(endpoint(&self.base_url, "predictions")))
            .header("Prefer", "wait")
            .json(&body);
        let mut prediction = Self::read(req.send().await?).await?;

        let mut polls = 0;
        while !prediction.is_finished() {
            if polls >= self.max_polls {
                return Err(GatewayError::Timeout(format!(
                    "prediction {} still {} after {} polls",
                    prediction.id, prediction.status, polls
                )));
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;

            debug!("Polling prediction {} ({})", prediction.id, prediction.status);
            let url = endpoint(&self.base_url, &format!("predictions/{}", prediction.id));
            let req = self.authorized(self.http.get(url));
            prediction = Self::read(req.send().await?).await?;
        }

        prediction.into_urls()
    }
}

#[async_trait]
impl ImageGateway for ReplicateImageClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        let start = Instant::now();
        let result = self.predict(prompt).await;
        METRICS.record_image("generate", result.is_ok(), start.elapsed().as_secs_f64());

        match &result {
            Ok(urls) => info!("Replicate returned {} image(s)", urls.len()),
            Err(e) => error!("Replicate generation failed: {}", e),
        }
        result
    }

    async fn edit(
        &self,
        _image: &Path,
        _mask: &Path,
        _prompt: &str,
    ) -> Result<Vec<String>, GatewayError> {
        Err(GatewayError::Unsupported("image edit"))
    }

    async fn vary(&self, _image: &Path) -> Result<Vec<String>, GatewayError> {
        Err(GatewayError::Unsupported("image variation"))
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl Prediction {
    fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// Output is a list of URLs for this model, a bare string for some others
    fn into_urls(self) -> Result<Vec<String>, GatewayError> {
        if self.status != "succeeded" {
            let reason = self
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| self.status.clone());
            return Err(GatewayError::Upstream {
                status: 200,
                message: format!("prediction {} {}", self.id, reason),
            });
        }

        let urls = match self.output {
            Some(serde_json::Value::String(url)) => vec![url],
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        if urls.is_empty() {
            return Err(GatewayError::InvalidResponse(format!(
                "prediction {} has no output",
                self.id
            )));
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(json: &str) -> Prediction {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_succeeded_prediction_urls() {
        let p = prediction(r#"{"id": "p1", "status": "succeeded", "output": ["https://r/1.png"]}"#);
        assert!(p.is_finished());
        assert_eq!(p.into_urls().unwrap(), vec!["https://r/1.png".to_string()]);
    }

    #[test]
    fn test_failed_prediction_is_error() {
        let p = prediction(r#"{"id": "p2", "status": "failed", "error": "NSFW content"}"#);
        assert!(p.is_finished());
        assert!(matches!(p.into_urls(), Err(GatewayError::Upstream { .. })));
    }

    #[test]
    fn test_processing_is_not_finished() {
        let p = prediction(r#"{"id": "p3", "status": "processing", "output": null}"#);
        assert!(!p.is_finished());
    }

    #[test]
    fn test_client_requires_token() {
        let config = ReplicateConfig::default();
        assert!(matches!(
            ReplicateImageClient::new(&config),
            Err(GatewayError::Disabled)
        ));
    }
}
