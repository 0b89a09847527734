//! OpenRouter adapter — the market tier.
//!
//! Standard OpenAI-style `/chat/completions` wire format with the
//! `HTTP-Referer` and `X-Title` headers OpenRouter recommends, and
//! `response_format: json_object` to request structured output.

use std::time::{Duration, Instant};

use reqwest::{header, Client};
use serde_json::{json, Value};

use super::{
    chat_messages, elapsed_ms, parse_output, AdapterError, AttemptResult, TEMPERATURE,
};
use crate::types::Output;

const PROVIDER: &str = "OpenRouter";

const TIMEOUT: Duration = Duration::from_secs(60);

const REFERER: &str = "https://maxsam.app";
const TITLE: &str = "Tier Router";

/// Adapter for the OpenRouter aggregator.
pub struct OpenRouterAdapter {
    client: Client,
    base_url: String,
    configured: bool,
}

impl OpenRouterAdapter {
    pub fn new(base_url: String, api_key: String) -> Self {
        let configured = !api_key.is_empty();

        let mut headers = header::HeaderMap::new();
        if configured {
            let value = format!("Bearer {api_key}");
            // Panics on invalid header bytes — surfaces misconfiguration at
            // startup, not at request time.
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value)
                    .expect("OpenRouter API key contains invalid header characters"),
            );
        }
        headers.insert("HTTP-Referer", header::HeaderValue::from_static(REFERER));
        headers.insert("X-Title", header::HeaderValue::from_static(TITLE));

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
            return AttemptResult::failure(0, "OPENROUTER_API_KEY not configured");
        }

        let start = Instant::now();
        match self.call(prompt, model, context, system_prompt).await {
            Ok((output, token_count)) => {
                AttemptResult::success(output, elapsed_ms(&start), token_count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "OpenRouter generate failed");
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": chat_messages(prompt, context, system_prompt),
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" },
        });

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
            .map_err(|e| AdapterError::Transport(format!("parsing OpenRouter response: {e}")))?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("");
        let token_count = data
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok((parse_output(content), token_count))
    }
}
