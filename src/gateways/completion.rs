//! Chat completion gateway (OpenAI-compatible API)

use super::{endpoint, upstream_error, GatewayError};
use crate::config::OpenAiConfig;
use crate::context::Message;
use crate::metrics::METRICS;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Shape the model is asked to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    /// A JSON object, see [`DialogueReply`]
    Json,
}

/// Completion gateway
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Send the messages and return the assistant's content
    async fn complete(
        &self,
        messages: &[Message],
        format: ResponseFormat,
    ) -> Result<String, GatewayError>;
}

/// Structured dialogue answer: the reply text and the language it is in
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DialogueReply {
    pub reply: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl DialogueReply {
    /// Parse the model's JSON answer
    ///
    /// Tolerates surrounding prose or code fences by reading the outermost
    /// `{...}`. An unusable language tag is dropped rather than rejected.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let start = raw.find('{');
        let end = raw.rfind('}');
        let body = match (start, end) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => {
                return Err(GatewayError::InvalidResponse(
                    "completion is not a JSON object".to_string(),
                ))
            }
        };

        let mut reply: DialogueReply = serde_json::from_str(body)
            .map_err(|e| GatewayError::InvalidResponse(format!("malformed dialogue reply: {}", e)))?;

        if reply.reply.trim().is_empty() {
            return Err(GatewayError::InvalidResponse("empty reply".to_string()));
        }

        reply.language = reply.language.and_then(|tag| normalize_language(&tag));
        Ok(reply)
    }
}

/// Lowercased language tag such as `en`, `pt` or `zh-cn`
fn normalize_language(tag: &str) -> Option<String> {
    let tag = tag.trim().to_ascii_lowercase();
    let valid = (2..=8).contains(&tag.len())
        && tag.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
        && tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    valid.then_some(tag)
}

/// OpenAI chat completions client
pub struct OpenAiChatClient {
    http: Client,
    url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            url: endpoint(&config.base_url, "chat/completions"),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| SecretString::new(k.expose_secret().clone())),
            model: config.chat_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn call(
        &self,
        messages: &[Message],
        format: ResponseFormat,
    ) -> Result<String, GatewayError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: match format {
                ResponseFormat::Json => Some(JsonObjectFormat { kind: "json_object" }),
                ResponseFormat::Text => None,
            },
        };

        let mut req = self.http.post(&self.url).json(&request);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::InvalidResponse("No choices in response".to_string()))
    }
}

#[async_trait]
impl CompletionGateway for OpenAiChatClient {
    async fn complete(
        &self,
        messages: &[Message],
        format: ResponseFormat,
    ) -> Result<String, GatewayError> {
        let start = Instant::now();
        debug!("Sending {} messages to {}", messages.len(), self.model);

        let result = self.call(messages, format).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(_) => METRICS.record_completion("success", elapsed),
            Err(GatewayError::RateLimited(msg)) => {
                warn!("Completion rate limited: {}", msg);
                METRICS.record_completion("rate_limited", elapsed);
            }
            Err(e) => {
                error!("Completion failed: {}", e);
                METRICS.record_completion("error", elapsed);
            }
        }

        result
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonObjectFormat>,
}

#[derive(Debug, Serialize)]
struct JsonObjectFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
