//! Domain types shared across the routing pipeline.
//!
//! Every decision stored in the registry must be explainable, so [`Decision`]
//! carries a human-readable `reason` alongside the machine-readable route.
//! Model output is dynamic JSON-or-text — [`Output`] models that as a tagged
//! union so the executor's validity gate is a tag check plus, for raw text,
//! a trial parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the three operational backend categories.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// On-prem inference (Ollama).
    #[default]
    Local,
    /// Commodity aggregator (OpenRouter).
    Market,
    /// High-quality hosted model (Anthropic).
    Premium,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Market => "market",
            Self::Premium => "premium",
        })
    }
}

/// Request sensitivity classification; `high` can force the premium tier.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        })
    }
}

/// Task lifecycle — transitions only move forward; `completed` and `failed`
/// are terminal.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    Routing,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Received => "received",
            Self::Routing => "routing",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// `POST /run` — inbound from n8n or any caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunRequest {
    /// Type of task: generate, classify, summarize, extract, etc.
    pub task_type: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

fn default_source() -> String {
    "n8n".to_string()
}

impl RunRequest {
    /// Boundary validation — rejected requests never reach the executor.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.task_type.is_empty() {
            return Err("task_type must be non-empty");
        }
        if self.prompt.is_empty() {
            return Err("prompt must be non-empty");
        }
        Ok(())
    }
}

/// `POST /route` — routing decision only, no execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRequest {
    pub task_type: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl RouteRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.task_type.is_empty() {
            return Err("task_type must be non-empty");
        }
        if self.prompt.is_empty() {
            return Err("prompt must be non-empty");
        }
        Ok(())
    }
}

/// `POST /execute` — direct execution on a specific tier, bypassing routing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecuteRequest {
    pub tier: Tier,
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl ExecuteRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.prompt.is_empty() {
            return Err("prompt must be non-empty");
        }
        Ok(())
    }
}

/// The immutable record of a chosen route and its rationale.
///
/// Every decision row stored in the registry contains these fields.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Decision {
    pub route: Tier,
    pub model: String,
    /// Human-readable explanation of the route. Never empty.
    pub reason: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    /// Number of tiers advanced past the initially decided tier.
    pub escalation_level: u32,
    /// Estimated cost in dollars, rounded to 6 decimal places.
    pub cost_estimate: f64,
}

/// Model output — either a parsed JSON document or the raw text the model
/// produced when it did not emit valid JSON.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Output {
    Json(Value),
    Text(String),
}

impl Output {
    /// The executor's validity gate: a JSON object or array is valid, any
    /// other parsed value is not, and raw text is valid only if it parses
    /// as JSON after all.
    pub fn is_valid_json(&self) -> bool {
        match self {
            Self::Json(Value::Object(_)) | Self::Json(Value::Array(_)) => true,
            Self::Json(_) => false,
            Self::Text(s) => serde_json::from_str::<Value>(s).is_ok(),
        }
    }

    /// Render for audit previews — raw strings stay raw, documents are
    /// compact JSON.
    pub fn preview(&self) -> String {
        match self {
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(v) => v.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Structured result returned to the caller from `POST /run`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterResult {
    pub task_id: String,
    pub decision: Decision,
    pub output: Option<Output>,
    pub success: bool,
    pub tier_used: Tier,
    pub model_used: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
