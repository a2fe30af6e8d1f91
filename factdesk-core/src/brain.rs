//! Brain module — LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic text completion, plus a
//! scriptable `MockLlmProvider` used throughout the test suite.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize {
        128_000
    }
}

/// Handler closure that computes a mock reply from the incoming request.
pub type MockHandler =
    Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static>;

/// A mock LLM provider for testing.
///
/// Queued responses are served first, in order. Once the queue is empty the
/// handler (if any) computes the reply; otherwise a fixed text is returned.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    handler: Option<MockHandler>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    /// Create a MockLlmProvider whose reply is computed per request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Create a MockLlmProvider that fails every call with the given error.
    pub fn failing(error: LlmError) -> Self {
        Self::with_handler(move |_| Err(error.clone()))
    }

    /// Delay every call by `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Number of `complete` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.responses.lock().unwrap().pop_front();
        if let Some(response) = queued {
            return response;
        }

        match &self.handler {
            Some(handler) => handler(&request).map(|text| Self::text_response(&text)),
            None => Ok(Self::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_queue_before_handler() {
        let provider = MockLlmProvider::with_response("from handler");
        provider.queue_response(MockLlmProvider::text_response("queued"));

        let first = provider.complete(request("a")).await.unwrap();
        assert_eq!(first.text(), "queued");
        let second = provider.complete(request("b")).await.unwrap();
        assert_eq!(second.text(), "from handler");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_handler_sees_request() {
        let provider = MockLlmProvider::with_handler(|req| Ok(req.user_text().to_uppercase()));
        let resp = provider.complete(request("shout")).await.unwrap();
        assert_eq!(resp.text(), "SHOUT");
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let provider = MockLlmProvider::failing(LlmError::Connection {
            message: "down".into(),
        });
        assert!(provider.complete(request("x")).await.is_err());

        let provider = MockLlmProvider::new();
        provider.queue_error(LlmError::Timeout { timeout_secs: 1 });
        assert!(matches!(
            provider.complete(request("x")).await,
            Err(LlmError::Timeout { .. })
        ));
        let fallback = provider.complete(request("x")).await.unwrap();
        assert!(fallback.text().contains("mock LLM"));
    }
}
