//! Provider capability trait (§4.4a): one `complete`/`validate_credentials`
//! seam, several concrete transports, so the gateway's reliability
//! machinery can be exercised against [`MockProvider`] without a network.

use async_trait::async_trait;
use catnorm_protocol::llm::{ChatMessage, ChatRequest, ChatResponse};
use catnorm_protocol::{CancellationToken, LlmErrorKind};
use std::time::{Duration, Instant};

/// What the gateway asks a provider to do, independent of wire shape.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency: Duration,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider is configured well enough to be tried at
    /// all (e.g. has an API key where one is required).
    fn is_available(&self) -> bool;

    async fn validate_credentials(&self) -> Result<(), LlmErrorKind>;

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind>;
}

/// Chat-completion endpoint speaking the OpenAI-compatible wire shape
/// (§6): covers hosted providers and most self-hosted gateways alike.
pub struct GenericOpenAiCompatible {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GenericOpenAiCompatible {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatProvider for GenericOpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn validate_credentials(&self) -> Result<(), LlmErrorKind> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LlmErrorKind::AuthFailed)
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind> {
        if cancel.is_cancelled() {
            return Err(LlmErrorKind::Cancelled);
        }

        let body = ChatRequest {
            model: request.model,
            messages: request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmErrorKind::Timeout
            } else {
                LlmErrorKind::ProviderUnavailable
            }
        })?;

        if cancel.is_cancelled() {
            return Err(LlmErrorKind::Cancelled);
        }

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmErrorKind::AuthFailed);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmErrorKind::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmErrorKind::ProviderUnavailable);
        }
        if !status.is_success() {
            return Err(LlmErrorKind::BadResponse(format!("http {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmErrorKind::BadResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmErrorKind::BadResponse("empty choices array".to_string()))?;

        Ok(CompletionResult {
            text: choice.message.content,
            prompt_tokens: parsed.usage.map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: parsed.usage.map(|u| u.completion_tokens).unwrap_or(0),
            latency: started.elapsed(),
        })
    }
}

/// A local Ollama-style endpoint: same wire shape as
/// [`GenericOpenAiCompatible`] but never requires an API key.
pub struct Ollama {
    inner: GenericOpenAiCompatible,
}

impl Ollama {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: GenericOpenAiCompatible::new("ollama", endpoint, None),
        }
    }
}

#[async_trait]
impl ChatProvider for Ollama {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn validate_credentials(&self) -> Result<(), LlmErrorKind> {
        Ok(())
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind> {
        self.inner.complete(request, cancel).await
    }
}

/// Scripted provider for tests: returns queued responses in order, with
/// no network dependency, so the gateway's rate limiter, breaker, router
/// and retry logic can all be exercised deterministically.
pub struct MockProvider {
    name: String,
    responses: std::sync::Mutex<std::collections::VecDeque<Result<CompletionResult, LlmErrorKind>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, responses: Vec<Result<CompletionResult, LlmErrorKind>>) -> Self {
        Self {
            name: name.into(),
            responses: std::sync::Mutex::new(responses.into()),
        }
    }

    pub fn success(text: impl Into<String>) -> CompletionResult {
        CompletionResult {
            text: text.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency: Duration::from_millis(0),
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn validate_credentials(&self) -> Result<(), LlmErrorKind> {
        Ok(())
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind> {
        if cancel.is_cancelled() {
            return Err(LlmErrorKind::Cancelled);
        }
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses
            .pop_front()
            .unwrap_or(Err(LlmErrorKind::ProviderUnavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "generic-chat-v1".to_string(),
            messages: vec![ChatMessage::user("test")],
            max_tokens: 16,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let provider = MockProvider::new(
            "mock",
            vec![Ok(MockProvider::success("first")), Ok(MockProvider::success("second"))],
        );
        let cancel = CancellationToken::new();
        let first = provider.complete(request(), &cancel).await.unwrap();
        assert_eq!(first.text, "first");
        let second = provider.complete(request(), &cancel).await.unwrap();
        assert_eq!(second.text, "second");
    }

    #[tokio::test]
    async fn mock_honors_cancellation() {
        let provider = MockProvider::new("mock", vec![Ok(MockProvider::success("unused"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider.complete(request(), &cancel).await;
        assert_eq!(result.unwrap_err(), LlmErrorKind::Cancelled);
    }
}
