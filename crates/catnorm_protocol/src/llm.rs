//! External LLM chat-completion wire schema (§6).
//!
//! `catnorm_llm` speaks this schema over HTTP; `catnorm_protocol` only
//! owns the shapes so both the gateway and its tests can share them
//! without a dependency on the HTTP client crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body sent to the provider's chat-completion endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Minimal shape of the provider's response envelope: only what the
/// gateway reads (§6). Extra fields on the wire are ignored by serde.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    pub content: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// The structured JSON the AI stage (§4.5 step 3) asks the model to
/// produce inside `choices[0].message.content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationReply {
    pub normalized_name: String,
    pub category: String,
    #[serde(default)]
    pub classification_code: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl NormalizationReply {
    /// Parse and clamp confidence into `[0, 1]` as required by §4.5/§8.
    pub fn parse(raw_json: &str) -> Result<Self, serde_json::Error> {
        let mut reply: NormalizationReply = serde_json::from_str(raw_json)?;
        reply.confidence = reply.confidence.clamp(0.0, 1.0);
        Ok(reply)
    }
}

/// Error taxonomy for the LLM gateway (§4.4, §7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmErrorKind {
    #[error("authentication failed")]
    AuthFailed,
    #[error("rate limited")]
    RateLimited,
    #[error("circuit open")]
    CircuitOpen,
    #[error("provider unavailable")]
    ProviderUnavailable,
    #[error("malformed response: {0}")]
    BadResponse(String),
    #[error("request timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_clamps_confidence() {
        let raw = r#"{"normalized_name":"молоток","category":"инструменты","confidence":1.4}"#;
        let reply = NormalizationReply::parse(raw).unwrap();
        assert_eq!(reply.confidence, 1.0);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(NormalizationReply::parse("not json").is_err());
    }

    #[test]
    fn serializes_chat_request_without_temperature_when_absent() {
        let req = ChatRequest {
            model: "generic-chat-v1".to_string(),
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 256,
            temperature: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("temperature"));
    }
}
