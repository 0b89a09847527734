//! Ollama adapter — the local tier.
//!
//! Talks to Ollama's native `/api/chat` endpoint with `format: "json"` so the
//! model is steered toward JSON output server-side. No API key: local
//! deployments are keyless, which is also why this is the only adapter with a
//! reachability probe instead of a credential check.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::{json, Value};

use super::{
    chat_messages, elapsed_ms, parse_output, AdapterError, AttemptResult, TEMPERATURE,
};
use crate::types::Output;

const PROVIDER: &str = "Ollama";

/// Inference can be slow on cold models; generous request timeout.
const TIMEOUT: Duration = Duration::from_secs(120);

/// The reachability probe must answer fast or not at all.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter for a locally-running Ollama instance.
pub struct OllamaAdapter {
    client: Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Short-timeout probe against `GET /api/tags`.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    /// Execute a prompt; all failures come back as a structured result.
    pub async fn generate(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        system_prompt: Option<&str>,
    ) -> AttemptResult {
        let start = Instant::now();
        match self.call(prompt, model, context, system_prompt).await {
            Ok((output, token_count)) => {
                AttemptResult::success(output, elapsed_ms(&start), token_count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ollama generate failed");
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
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": model,
            "messages": chat_messages(prompt, context, system_prompt),
            "stream": false,
            "format": "json",
            "options": { "temperature": TEMPERATURE },
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
            .map_err(|e| AdapterError::Transport(format!("parsing Ollama response: {e}")))?;

        let content = data
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or("");
        let token_count = data.get("eval_count").and_then(Value::as_u64).unwrap_or(0)
            + data
                .get("prompt_eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);

        Ok((parse_output(content), token_count))
    }
}
