//! Layered bot configuration
//!
//! Sources, lowest priority first:
//! - serde defaults below
//! - optional TOML file (`XEN_CONFIG`, default `xen-bot.toml`)
//! - `XEN_` environment variables, `__` between section and key
//!   (e.g. `XEN_DIALOGUE__TOKEN_BUDGET=2500`)
//! - legacy variables `OPEN_AI_KEY`, `TG_TOKEN_GPT`, `REPLICATE_API_TOKEN`

use crate::context::TrimPolicy;
use crate::error::{BotError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file looked up when `XEN_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "xen-bot.toml";

/// Root configuration
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
}

impl Config {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("XEN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(path)
    }

    /// Load from an explicit (optional) file plus the environment
    pub fn from_file(path: impl AsRef<str>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::File::with_name(path.as_ref()).required(false))
            .add_source(
                ::config::Environment::with_prefix("XEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bot cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dialogue.token_budget == 0 {
            return Err(BotError::Configuration(
                "dialogue.token_budget must be positive".to_string(),
            ));
        }
        if self.images.count == 0 || self.images.count > 10 {
            return Err(BotError::Configuration(format!(
                "images.count must be between 1 and 10, got {}",
                self.images.count
            )));
        }
        if self.sessions.idle_timeout_secs == 0 || self.sessions.max_sessions == 0 {
            return Err(BotError::Configuration(
                "sessions.idle_timeout_secs and sessions.max_sessions must be positive".to_string(),
            ));
        }
        if self.translation.max_attempts == 0 {
            return Err(BotError::Configuration(
                "translation.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.images.provider == ImageProvider::Replicate && self.replicate.api_token.is_none() {
            return Err(BotError::Configuration(
                "images.provider = \"replicate\" requires replicate.api_token".to_string(),
            ));
        }
        Ok(())
    }
}

const LEGACY_ENV: &[(&str, &str)] = &[
    ("OPEN_AI_KEY", "openai.api_key"),
    ("TG_TOKEN_GPT", "transport.token"),
    ("REPLICATE_API_TOKEN", "replicate.api_token"),
];

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on inbound request bodies (base64 uploads included)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8081 }
fn default_max_body_bytes() -> usize { 8 * 1024 * 1024 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Bot transport bridge
#[derive(Debug, Deserialize, Default)]
pub struct TransportConfig {
    /// Shared token the bridge must send in `X-Bot-Token`; unchecked when unset
    #[serde(default)]
    pub token: Option<SecretString>,
}

/// Persona
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_image_prompt_instruction")]
    pub image_prompt_instruction: String,
}

fn default_bot_name() -> String { "Xen".to_string() }

fn default_system_prompt() -> String {
    "You are a precise and helpful teaching assistant. You explain concepts in great depth \
     using simple terms. You analyze the entire dialogue and communicate with the user in \
     their language. Always answer with a JSON object with two fields: \"reply\" holding \
     your answer and \"language\" holding the ISO 639-1 code of the language you answered in."
        .to_string()
}

fn default_image_prompt_instruction() -> String {
    "Write one vivid, detailed prompt for an image generation model. Describe the subject, \
     style, lighting and composition in a single English paragraph. Answer with the prompt only."
        .to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            system_prompt: default_system_prompt(),
            image_prompt_instruction: default_image_prompt_instruction(),
        }
    }
}

/// Dialogue window
#[derive(Debug, Clone, Deserialize)]
pub struct DialogueConfig {
    /// Estimated prompt tokens must stay strictly below this
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Model name used to pick the tokenizer profile
    #[serde(default = "default_tokenizer_model")]
    pub tokenizer_model: String,
    #[serde(default)]
    pub trim_policy: TrimPolicy,
}

fn default_token_budget() -> usize { 3000 }
fn default_tokenizer_model() -> String { "gpt-3.5-turbo-0301".to_string() }

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            tokenizer_model: default_tokenizer_model(),
            trim_policy: TrimPolicy::default(),
        }
    }
}

/// In-memory session retention
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// A session untouched this long is dropped with its dialogue and uploads
    #[serde(default = "default_session_idle_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
}

fn default_session_idle_secs() -> u64 { 24 * 60 * 60 }
fn default_max_sessions() -> u64 { 100_000 }

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// OpenAI chat and images
#[derive(Debug, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_openai_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_chat_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_max_tokens() -> u32 { 600 }
fn default_temperature() -> f32 { 0.6 }
fn default_timeout_ms() -> u64 { 60_000 }

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            chat_model: default_chat_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl OpenAiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which backend produces generated images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    OpenAi,
    Replicate,
}

/// Image wizard
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    #[serde(default)]
    pub provider: ImageProvider,
    /// Images returned per generation request
    #[serde(default = "default_image_count")]
    pub count: u8,
    #[serde(default = "default_image_size")]
    pub size: String,
    /// Where uploaded images and masks live until the gateway call returns
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_image_count() -> u8 { 1 }
fn default_image_size() -> String { "512x512".to_string() }
fn default_upload_dir() -> PathBuf { std::env::temp_dir().join("xen-bot-uploads") }
fn default_max_upload_bytes() -> usize { 4 * 1024 * 1024 }

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            provider: ImageProvider::default(),
            count: default_image_count(),
            size: default_image_size(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Replicate Stable Diffusion
#[derive(Debug, Deserialize)]
pub struct ReplicateConfig {
    #[serde(default = "default_replicate_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<SecretString>,
    #[serde(default = "default_replicate_version")]
    pub model_version: String,
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_replicate_base_url() -> String { "https://api.replicate.com/v1".to_string() }
fn default_replicate_version() -> String {
    "27b93a2413e7f36cd83da926f3656280b2931564ff050bf9575f1fdf9bcd7478".to_string()
}
fn default_inference_steps() -> u32 { 125 }
fn default_negative_prompt() -> String {
    "boring background, simple background, out of frame, ugly, extra limbs, bad anatomy, \
     gross proportions, blurry, jpeg artifacts, normal quality"
        .to_string()
}
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_max_polls() -> usize { 60 }

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            base_url: default_replicate_base_url(),
            api_token: None,
            model_version: default_replicate_version(),
            num_inference_steps: default_inference_steps(),
            negative_prompt: default_negative_prompt(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ReplicateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Translation gateway and its retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_translation_url")]
    pub base_url: String,
    #[serde(default = "default_translation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,
    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_max_entries: u64,
}

fn default_translation_enabled() -> bool { true }
fn default_translation_url() -> String { "https://translate.googleapis.com".to_string() }
fn default_translation_timeout_ms() -> u64 { 5000 }
fn default_max_attempts() -> usize { 4 }
fn default_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 4000 }
fn default_breaker_failures() -> usize { 5 }
fn default_breaker_reset() -> u64 { 30 }
fn default_cache_ttl() -> u64 { 3600 }
fn default_cache_size() -> u64 { 10_000 }

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: default_translation_enabled(),
            base_url: default_translation_url(),
            timeout_ms: default_translation_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_size(),
        }
    }
}

impl TranslationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
