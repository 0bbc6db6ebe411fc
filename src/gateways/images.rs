//! Image generation, edit and variation gateway (OpenAI images API)

use super::{endpoint, upstream_error, GatewayError};
use crate::config::{ImagesConfig, OpenAiConfig};
use crate::metrics::METRICS;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Image gateway; every operation returns image URLs
#[async_trait]
pub trait ImageGateway: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GatewayError>;

    /// Repaint the transparent area of `mask` over `image`
    async fn edit(
        &self,
        image: &Path,
        mask: &Path,
        prompt: &str,
    ) -> Result<Vec<String>, GatewayError>;

    async fn vary(&self, image: &Path) -> Result<Vec<String>, GatewayError>;
}

/// OpenAI images client
pub struct OpenAiImageClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    count: u8,
    size: String,
}

impl OpenAiImageClient {
    pub fn new(openai: &OpenAiConfig, images: &ImagesConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(openai.timeout())
            .build()
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            base_url: openai.base_url.clone(),
            api_key: openai
                .api_key
                .as_ref()
                .map(|k| SecretString::new(k.expose_secret().clone())),
            count: images.count,
            size: images.size.clone(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(endpoint(&self.base_url, path));
        match &self.api_key {
            Some(api_key) => req.bearer_auth(api_key.expose_secret()),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Vec<String>, GatewayError> {
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body: ImagesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let urls: Vec<String> = body.data.into_iter().filter_map(|d| d.url).collect();
        if urls.is_empty() {
            return Err(GatewayError::InvalidResponse("No image URLs in response".to_string()));
        }
        Ok(urls)
    }

    /// Time and count one operation
    async fn observed(
        &self,
        operation: &'static str,
        req: reqwest::RequestBuilder,
    ) -> Result<Vec<String>, GatewayError> {
        let start = Instant::now();
        let result = self.send(req).await;
        METRICS.record_image(operation, result.is_ok(), start.elapsed().as_secs_f64());

        match &result {
            Ok(urls) => info!("Image {} returned {} image(s)", operation, urls.len()),
            Err(e) => error!("Image {} failed: {}", operation, e),
        }
        result
    }

    fn form(&self) -> Form {
        Form::new()
            .text("n", self.count.to_string())
            .text("size", self.size.clone())
    }
}

async fn png_part(path: &Path) -> Result<Part, GatewayError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        GatewayError::RequestFailed(format!("cannot read {}: {}", path.display(), e))
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());

    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("image/png")
        .map_err(|e| GatewayError::RequestFailed(e.to_string()))
}

#[async_trait]
impl ImageGateway for OpenAiImageClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        debug!("Generating {} image(s) at {}", self.count, self.size);
        let body = serde_json::json!({
            "prompt": prompt,
            "n": self.count,
            "size": self.size,
        });
        self.observed("generate", self.post("images/generations").json(&body))
            .await
    }

    async fn edit(
        &self,
        image: &Path,
        mask: &Path,
        prompt: &str,
    ) -> Result<Vec<String>, GatewayError> {
        let form = self
            .form()
            .text("prompt", prompt.to_string())
            .part("image", png_part(image).await?)
            .part("mask", png_part(mask).await?);
        self.observed("edit", self.post("images/edits").multipart(form))
            .await
    }

    async fn vary(&self, image: &Path) -> Result<Vec<String>, GatewayError> {
        let form = self.form().part("image", png_part(image).await?);
        self.observed("variation", self.post("images/variations").multipart(form))
            .await
    }
}

/// Generation from one provider, edit and variation from another
pub struct SplitImageGateway {
    generation: Arc<dyn ImageGateway>,
    editing: Arc<dyn ImageGateway>,
}

impl SplitImageGateway {
    pub fn new(generation: Arc<dyn ImageGateway>, editing: Arc<dyn ImageGateway>) -> Self {
        Self {
            generation,
            editing,
        }
    }
}

#[async_trait]
impl ImageGateway for SplitImageGateway {
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        self.generation.generate(prompt).await
    }

    async fn edit(
        &self,
        image: &Path,
        mask: &Path,
        prompt: &str,
    ) -> Result<Vec<String>, GatewayError> {
        self.editing.edit(image, mask, prompt).await
    }

    async fn vary(&self, image: &Path) -> Result<Vec<String>, GatewayError> {
        self.editing.vary(image).await
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}
