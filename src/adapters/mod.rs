//! Tier adapters and the unified dispatch surface.
//!
//! Each backend (Ollama, OpenRouter, Anthropic) gets one adapter exposing the
//! same `generate` contract; [`Adapters`] composes the three and dispatches by
//! [`Tier`], so the executor never sees provider-specific protocol detail.
//!
//! Adapters never return `Err`: every failure — non-200, timeout, transport —
//! becomes a structured [`AttemptResult`] with `success = false` and a
//! human-readable `error`, because the fallback executor treats failures as
//! routing input, not exceptions.

mod anthropic;
mod ollama;
mod openrouter;

pub use anthropic::{AnthropicAdapter, ANTHROPIC_API_BASE_URL};
pub use ollama::OllamaAdapter;
pub use openrouter::OpenRouterAdapter;

use std::time::Instant;

use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    config::Settings,
    types::{truncate_chars, Output, Tier},
};

/// Fixed instruction sent as the system message on every tier.
pub const SYSTEM_PROMPT: &str = "You are an automated AI worker. Respond ONLY with valid JSON. \
     No markdown, no explanation, no preamble. Just a JSON object.";

/// Sampling temperature used on every tier.
pub(crate) const TEMPERATURE: f64 = 0.3;

/// Maximum characters of a backend error body kept in an error string.
pub(crate) const ERROR_BODY_LIMIT: usize = 200;

/// Outcome of one adapter call.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub success: bool,
    pub output: Option<Output>,
    pub latency_ms: u64,
    pub token_count: u64,
    pub error: Option<String>,
}

impl AttemptResult {
    pub fn success(output: Output, latency_ms: u64, token_count: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            latency_ms,
            token_count,
            error: None,
        }
    }

    pub fn failure(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            latency_ms,
            token_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Adapter failure taxonomy; `Display` renders the canonical error strings
/// surfaced in audit events and results.
#[derive(Debug, Error)]
pub(crate) enum AdapterError {
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },
    #[error("{0}")]
    Transport(String),
}

impl AdapterError {
    /// Map a reqwest failure onto the taxonomy.
    pub(crate) fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// Build a status error, keeping at most [`ERROR_BODY_LIMIT`] chars of body.
    pub(crate) fn status(provider: &'static str, status: u16, body: &str) -> Self {
        Self::Status {
            provider,
            status,
            body: truncate_chars(body, ERROR_BODY_LIMIT).to_string(),
        }
    }
}

/// Single-turn message list: optional system message, then one user message
/// with the context prepended when present.
pub(crate) fn chat_messages(
    prompt: &str,
    context: Option<&str>,
    system_prompt: Option<&str>,
) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": user_content(prompt, context) }));
    messages
}

/// `"Context:\n<ctx>\n\nTask:\n<prompt>"` when context is non-empty,
/// otherwise the bare prompt.
pub(crate) fn user_content(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("Context:\n{ctx}\n\nTask:\n{prompt}"),
        _ => prompt.to_string(),
    }
}

/// Parse model text into [`Output`]: a JSON document when it parses, the raw
/// text otherwise.
pub(crate) fn parse_output(content: &str) -> Output {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => Output::Json(value),
        Err(_) => Output::Text(content.to_string()),
    }
}

pub(crate) fn elapsed_ms(start: &Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// The three tier adapters behind one dispatch surface.
///
/// Constructed once at startup and injected; tests build their own against
/// mock servers.
pub struct Adapters {
    pub local: OllamaAdapter,
    pub market: OpenRouterAdapter,
    pub premium: AnthropicAdapter,
}

impl Adapters {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            local: OllamaAdapter::new(settings.ollama_base_url.clone()),
            market: OpenRouterAdapter::new(
                settings.openrouter_base_url.clone(),
                settings.openrouter_api_key.clone(),
            ),
            premium: AnthropicAdapter::new(
                ANTHROPIC_API_BASE_URL.to_string(),
                settings.anthropic_api_key.clone(),
            ),
        }
    }

    /// Execute a prompt on the given tier with the fixed JSON-only system
    /// prompt.
    pub async fn generate(
        &self,
        tier: Tier,
        prompt: &str,
        model: &str,
        context: Option<&str>,
    ) -> AttemptResult {
        match tier {
            Tier::Local => {
                self.local
                    .generate(prompt, model, context, Some(SYSTEM_PROMPT))
                    .await
            }
            Tier::Market => {
                self.market
                    .generate(prompt, model, context, Some(SYSTEM_PROMPT))
                    .await
            }
            Tier::Premium => {
                self.premium
                    .generate(prompt, model, context, Some(SYSTEM_PROMPT))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Message construction
    // -----------------------------------------------------------------------

    #[test]
    fn user_content_prepends_context_when_present() {
        assert_eq!(
            user_content("summarize", Some("the document")),
            "Context:\nthe document\n\nTask:\nsummarize"
        );
    }

    #[test]
    fn user_content_ignores_empty_or_missing_context() {
        assert_eq!(user_content("summarize", None), "summarize");
        assert_eq!(user_content("summarize", Some("")), "summarize");
    }

    #[test]
    fn chat_messages_puts_system_first() {
        let messages = chat_messages("hi", None, Some(SYSTEM_PROMPT));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn chat_messages_without_system_prompt() {
        let messages = chat_messages("hi", None, None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    // -----------------------------------------------------------------------
    // Output parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_output_prefers_json() {
        assert_eq!(
            parse_output(r#"{"label": "greeting"}"#),
            Output::Json(serde_json::json!({"label": "greeting"}))
        );
        assert_eq!(parse_output("not json"), Output::Text("not json".into()));
    }

    // -----------------------------------------------------------------------
    // Error strings
    // -----------------------------------------------------------------------

    #[test]
    fn status_error_renders_provider_status_and_body() {
        let err = AdapterError::status("Ollama", 500, "model not found");
        assert_eq!(err.to_string(), "Ollama returned 500: model not found");
    }

    #[test]
    fn status_error_truncates_long_bodies() {
        let body = "e".repeat(500);
        let err = AdapterError::status("OpenRouter", 502, &body);
        let rendered = err.to_string();
        assert!(rendered.starts_with("OpenRouter returned 502: "));
        assert_eq!(rendered.len(), "OpenRouter returned 502: ".len() + 200);
    }

    #[test]
    fn timeout_error_names_the_provider() {
        let err = AdapterError::Timeout { provider: "Claude" };
        assert_eq!(err.to_string(), "Claude request timed out");
    }
}
