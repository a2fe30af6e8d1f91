//! Google Gemini API provider implementation.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - System instruction is a top-level `system_instruction` field
//! - Roles are `"user"` / `"model"` (not `"assistant"`)

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// Uses `config.api_key` when set, otherwise reads `config.api_key_env`.
    /// Returns `LlmError::AuthFailed` if neither yields a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new Gemini provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Build the JSON request body for `generateContent`.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);

        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.text),
                Role::User | Role::Assistant => push_turn(&mut contents, msg),
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": request.temperature,
            },
        });

        if !system_parts.is_empty() {
            body["system_instruction"] = json!({
                "parts": [{"text": system_parts.join("\n\n")}]
            });
        }

        body
    }

    /// Parse a Gemini API response JSON into a `CompletionResponse`.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidates = body["candidates"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'candidates' array in response".to_string(),
            })?;

        let candidate = candidates.first().ok_or_else(|| LlmError::ResponseParse {
            message: "Empty 'candidates' array in response".to_string(),
        })?;

        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            })?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();

        let usage_metadata = &body["usageMetadata"];
        let usage = TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        };

        Ok(CompletionResponse {
            message: Message::assistant(text),
            usage,
            model: body["modelVersion"]
                .as_str()
                .unwrap_or("gemini")
                .to_string(),
            finish_reason: candidate["finishReason"].as_str().map(str::to_string),
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }
}

/// Append a message as a Gemini turn, merging consecutive same-role turns.
fn push_turn(contents: &mut Vec<Value>, msg: &Message) {
    let role = match msg.role {
        Role::Assistant => "model",
        _ => "user",
    };
    if let Some(last) = contents.last_mut()
        && last["role"] == role
        && let Some(parts) = last["parts"].as_array_mut()
    {
        parts.push(json!({"text": msg.text}));
        return;
    }
    contents.push(json!({"role": role, "parts": [{"text": msg.text}]}));
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(model);

        debug!(model, "Sending Gemini completion request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { timeout_secs: 120 }
                } else {
                    LlmError::Connection {
                        message: format!("Request to Gemini API failed: {}", e.without_url()),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};

    fn test_config() -> LlmConfig {
        LlmConfig {
            model: "gemini-2.5-pro".to_string(),
            api_key_env: "FACTDESK_GEMINI_TEST_UNUSED".to_string(),
            ..Default::default()
        }
    }

    fn make_provider() -> GeminiProvider {
        GeminiProvider::new_with_key(&test_config(), "test-key".to_string()).unwrap()
    }

    #[test]
    fn test_new_prefers_explicit_key() {
        let mut config = test_config();
        config.api_key = Some("explicit".to_string());
        let provider = GeminiProvider::new(&config).unwrap();
        assert_eq!(provider.api_key, "explicit");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_new_missing_env_returns_auth_failed() {
        let mut config = test_config();
        config.api_key_env = "FACTDESK_GEMINI_MISSING_KEY_XYZ".to_string();
        match GeminiProvider::new(&config) {
            Err(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("FACTDESK_GEMINI_MISSING_KEY_XYZ"));
            }
            other => panic!("Expected AuthFailed, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_build_request_body_system_and_turns() {
        let provider = make_provider();
        let request = CompletionRequest {
            messages: vec![
                Message::system("You are a verifier."),
                Message::user("Claim: X"),
                Message::user("Evidence: Y"),
            ],
            temperature: 0.2,
            ..Default::default()
        };
        let body = provider.build_request_body(&request);
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "You are a verifier."
        );
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn test_parse_text_response() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"verdict\":"}, {"text": "\"supports\"}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7},
            "modelVersion": "gemini-2.5-pro"
        });
        let resp = GeminiProvider::parse_response(&body).unwrap();
        assert_eq!(resp.text(), "{\"verdict\":\"supports\"}");
        assert_eq!(resp.usage.total(), 19);
        assert_eq!(resp.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_parse_missing_or_empty_candidates() {
        assert!(GeminiProvider::parse_response(&json!({})).is_err());
        assert!(GeminiProvider::parse_response(&json!({"candidates": []})).is_err());
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::FORBIDDEN, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimited {
                retry_after_secs: 30
            }
        ));
        match GeminiProvider::map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom") {
            LlmError::ApiRequest { message } => assert!(message.contains("500")),
            other => panic!("Expected ApiRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let app = Router::new().route(
            "/models/{call}",
            post(|Json(body): Json<Value>| async move {
                let echoed = body["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_uppercase();
                Json(json!({
                    "candidates": [{"content": {"parts": [{"text": echoed}]}}]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let mut config = test_config();
        config.base_url = Some(format!("http://{addr}"));
        let provider = GeminiProvider::new_with_key(&config, "k".into()).unwrap();
        let request = CompletionRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        let resp = provider.complete(request).await.unwrap();
        assert_eq!(resp.text(), "HELLO");
    }
}
