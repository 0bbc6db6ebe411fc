//! Request and response bodies of the HTTP event surface

use crate::conversation::{Command, Event, MenuAction, Outbound, Upload};
use crate::error::{BotError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An inbound event as delivered by the transport bridge
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Text { text: String },
    Command { command: Command },
    Callback { action: MenuAction },
    /// A document with its bytes base64-encoded
    Upload { file_name: String, data: String },
}

impl EventPayload {
    pub fn into_event(self) -> Result<Event> {
        Ok(match self {
            EventPayload::Text { text } => Event::Text(text),
            EventPayload::Command { command } => Event::Command(command),
            EventPayload::Callback { action } => Event::Callback(action),
            EventPayload::Upload { file_name, data } => {
                let bytes = STANDARD
                    .decode(data.trim())
                    .map_err(|e| BotError::InvalidUpload(format!("bad base64 data: {}", e)))?;
                Event::Upload(Upload {
                    file_name,
                    bytes: Bytes::from(bytes),
                })
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub session_id: String,
    pub replies: Vec<Outbound>,
}

/// API error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}
