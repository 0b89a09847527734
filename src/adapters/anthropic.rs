//! Anthropic Messages API adapter — the premium tier.
//!
//! Protocol differences from the OpenAI-style tiers handled here:
//!
//! | Concern | OpenAI-style | Anthropic |
//! |---|---|---|
//! | System prompt | `role: "system"` message | top-level `system` field |
//! | Max tokens | optional | **required** (`max_tokens`) |
//! | Response shape | `choices[].message.content` | `content[].text` blocks |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |

use std::time::{Duration, Instant};

use reqwest::{header, Client};
use serde_json::{json, Value};

use super::{elapsed_ms, parse_output, user_content, AdapterError, AttemptResult, TEMPERATURE};
use crate::types::Output;

const PROVIDER: &str = "Claude";

pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Required by the Messages API; sensible ceiling for JSON task output.
const MAX_TOKENS: u64 = 4_096;

const TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    configured: bool,
}

impl AnthropicAdapter {
    pub fn new(base_url: String, api_key: String) -> Self {
        let configured = !api_key.is_empty();

        let mut headers = header::HeaderMap::new();
        if configured {
            headers.insert(
                "x-api-key",
                header::HeaderValue::from_str(&api_key)
                    .expect("Anthropic API key contains invalid header characters"),
            );
        }
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            configured,
        }
    }

    /// Credential presence check; no network call.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub async fn generate(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        system_prompt: Option<&str>,
    ) -> AttemptResult {
        if !self.is_configured() {
            return AttemptResult::failure(0, "ANTHROPIC_API_KEY not configured");
        }

        let start = Instant::now();
        match self.call(prompt, model, context, system_prompt).await {
            Ok((output, token_count)) => {
                AttemptResult::success(output, elapsed_ms(&start), token_count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Claude generate failed");
                AttemptResult::failure(elapsed_ms(&start), e.to_string())
            }
        }
    }

    async fn call(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<(Output, u64), AdapterError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": user_content(prompt, context) }],
            "temperature": TEMPERATURE,
        });
        if let Some(system) = system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::from_reqwest(PROVIDER, e))?;

        if status.as_u16() != 200 {
            return Err(AdapterError::status(PROVIDER, status.as_u16(), &text));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Transport(format!("parsing Claude response: {e}")))?;

        // Concatenate all text blocks; tool-use or thinking blocks are skipped.
        let content: String = data
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        let token_count = data
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + data
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);

        Ok((parse_output(&content), token_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn unconfigured_adapter_fails_without_a_network_call() {
        let adapter = AnthropicAdapter::new("http://127.0.0.1:1".into(), String::new());
        assert!(!adapter.is_configured());

        let result = adapter.generate("hi", "claude-sonnet-4-20250514", None, None).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("ANTHROPIC_API_KEY not configured")
        );
    }

    #[tokio::test]
    async fn generate_sends_system_as_top_level_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "max_tokens": 4096,
                "system": "sys",
                "temperature": 0.3,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": r#"{"ok":true}"# }],
                "usage": { "input_tokens": 10, "output_tokens": 5 },
            })))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(server.uri(), "sk-ant-test".into());
        let result = adapter
            .generate("hi", "claude-sonnet-4-20250514", None, Some("sys"))
            .await;

        assert!(result.success);
        assert_eq!(result.token_count, 15);
        assert_eq!(result.output, Some(Output::Json(json!({"ok": true}))));
    }

    #[tokio::test]
    async fn generate_concatenates_text_blocks_and_skips_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "text", "text": r#"{"a":"#  },
                    { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                    { "type": "text", "text": "1}" },
                ],
                "usage": { "input_tokens": 1, "output_tokens": 1 },
            })))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(server.uri(), "sk-ant-test".into());
        let result = adapter.generate("hi", "m", None, None).await;

        assert!(result.success);
        assert_eq!(result.output, Some(Output::Json(json!({"a": 1}))));
    }

    #[tokio::test]
    async fn generate_maps_overloaded_status_to_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(server.uri(), "sk-ant-test".into());
        let result = adapter.generate("hi", "m", None, None).await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Claude returned 529: overloaded")
        );
    }
}
