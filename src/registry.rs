//! Supabase registry client — policy reads and audit writes.
//!
//! The registry is the source of truth for routing policy and the sink for
//! the audit trail (tasks, decisions, events). Two non-negotiable behaviors:
//!
//! - **Reads fall back.** A failed or empty read of `router_policy` /
//!   `governance` logs and returns the in-memory default record; the request
//!   proceeds.
//! - **Writes never abort the pipeline.** Every insert is independent and
//!   best-effort; a lost task row may produce orphan events, which the
//!   design accepts.

use std::time::Duration;

use reqwest::{header, Client};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::{
    config::Settings,
    policy::{Governance, Policy},
    types::{truncate_chars, Decision, Sensitivity, TaskStatus, Tier},
};

/// Registry calls are metadata-sized; keep them snappy.
const TIMEOUT: Duration = Duration::from_secs(10);

/// Characters of model output kept in `response_preview` columns.
const PREVIEW_LIMIT: usize = 500;

/// Ceiling of the `escalation_level` column in `router_decisions`.
const ESCALATION_LEVEL_CAP: u32 = 3;

/// Audit event vocabulary — one variant per row kind in `router_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Execution,
    InvalidJsonEscalation,
    Escalation,
    DirectExecution,
    FinalResult,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Execution => "execution",
            Self::InvalidJsonEscalation => "invalid_json_escalation",
            Self::Escalation => "escalation",
            Self::DirectExecution => "direct_execution",
            Self::FinalResult => "final_result",
        })
    }
}

/// One audit record destined for `router_events`.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: EventType,
    pub tier: Tier,
    pub model: String,
    pub success: bool,
    pub latency_ms: u64,
    pub token_count: u64,
    pub error_message: Option<String>,
    pub response_preview: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: EventType, tier: Tier, model: &str, success: bool) -> Self {
        Self {
            event_type,
            tier,
            model: model.to_string(),
            success,
            latency_ms: 0,
            token_count: 0,
            error_message: None,
            response_preview: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_tokens(mut self, token_count: u64) -> Self {
        self.token_count = token_count;
        self
    }

    pub fn with_error(mut self, error: Option<&str>) -> Self {
        self.error_message = error.map(str::to_string);
        self
    }

    pub fn with_preview(mut self, preview: Option<&str>) -> Self {
        self.response_preview = preview.map(str::to_string);
        self
    }
}

/// Thin REST client for the Supabase PostgREST API.
///
/// `Clone` is cheap (the inner [`Client`] is reference-counted), which lets
/// the cancellation guard own its own handle.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: String, service_key: String) -> Self {
        let mut headers = header::HeaderMap::new();
        if !service_key.is_empty() {
            let bearer = format!("Bearer {service_key}");
            headers.insert(
                "apikey",
                header::HeaderValue::from_str(&service_key)
                    .expect("Supabase service key contains invalid header characters"),
            );
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&bearer)
                    .expect("Supabase service key contains invalid header characters"),
            );
        }
        headers.insert(
            "Prefer",
            header::HeaderValue::from_static("return=representation"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.supabase_url.clone(),
            settings.supabase_service_key.clone(),
        )
    }

    /// Cheap registry probe — true iff the `governance` key is readable.
    pub async fn is_connected(&self) -> bool {
        let url = format!(
            "{}/rest/v1/system_registry?key=eq.governance&select=key",
            self.base_url
        );
        match self.client.get(&url).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    // ── Policy & governance reads ──

    /// Read `router_policy`, falling back to the default [`Policy`] on any
    /// failure or absence.
    pub async fn get_policy(&self) -> Policy {
        match self.registry_value("router_policy").await {
            Some(value) => match serde_json::from_value(value) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(error = %e, "router_policy value is malformed, using fallback");
                    Policy::default()
                }
            },
            None => Policy::default(),
        }
    }

    /// Read `governance`, falling back to the default [`Governance`].
    pub async fn get_governance(&self) -> Governance {
        match self.registry_value("governance").await {
            Some(value) => match serde_json::from_value(value) {
                Ok(governance) => governance,
                Err(e) => {
                    warn!(error = %e, "governance value is malformed, using fallback");
                    Governance::default()
                }
            },
            None => Governance::default(),
        }
    }

    /// Fetch `value` for one `system_registry` key; `None` covers transport
    /// failure, non-200, and an absent row alike.
    async fn registry_value(&self, key: &str) -> Option<Value> {
        let url = format!(
            "{}/rest/v1/system_registry?key=eq.{key}&select=value",
            self.base_url
        );
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(key, error = %e, "failed to read system_registry");
                return None;
            }
        };

        if response.status().as_u16() != 200 {
            warn!(key, status = %response.status(), "system_registry read not OK, using fallback");
            return None;
        }

        let rows: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                error!(key, error = %e, "failed to decode system_registry rows");
                return None;
            }
        };

        match rows.get(0).and_then(|row| row.get("value")) {
            Some(value) => Some(value.clone()),
            None => {
                warn!(key, "key not found in system_registry, using fallback");
                None
            }
        }
    }

    // ── Audit writes ──

    /// Insert a task row with `status = received`. Returns the registry-owned
    /// id, or `None` when the insert failed (the caller mints one locally).
    pub async fn log_task(
        &self,
        task_type: &str,
        payload: Value,
        source: &str,
        sensitivity: Sensitivity,
    ) -> Option<String> {
        let url = format!("{}/rest/v1/router_tasks", self.base_url);
        let body = json!({
            "task_type": task_type,
            "payload": payload,
            "source": source,
            "sensitivity": sensitivity.to_string(),
            "status": TaskStatus::Received.to_string(),
        });

        match self.insert_returning_id(&url, &body).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "log_task failed");
                None
            }
        }
    }

    /// Best-effort status transition; errors are logged, never surfaced.
    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) {
        let url = format!("{}/rest/v1/router_tasks?id=eq.{task_id}", self.base_url);
        if let Err(e) = self
            .client
            .patch(&url)
            .json(&json!({ "status": status.to_string() }))
            .send()
            .await
        {
            error!(task_id, error = %e, "update_task_status failed");
        }
    }

    /// Persist a decision together with the exact policy snapshot that
    /// produced it. Returns the decision id, or `None` on failure.
    pub async fn log_decision(
        &self,
        task_id: &str,
        decision: &Decision,
        policy_snapshot: &Policy,
        governance_level: &str,
    ) -> Option<String> {
        // The schema caps escalation_level; longer chains are clamped on
        // write while the in-memory decision stays exact.
        let escalation_level = decision.escalation_level.min(ESCALATION_LEVEL_CAP);
        if decision.escalation_level > ESCALATION_LEVEL_CAP {
            warn!(
                escalation_level = decision.escalation_level,
                "escalation_level exceeds schema cap, clamping to 3"
            );
        }

        let url = format!("{}/rest/v1/router_decisions", self.base_url);
        let body = json!({
            "task_id": task_id,
            "route": decision.route.to_string(),
            "model": decision.model,
            "reason": decision.reason,
            "confidence": decision.confidence,
            "escalation_level": escalation_level,
            "cost_estimate": decision.cost_estimate,
            "policy_snapshot": serde_json::to_value(policy_snapshot).unwrap_or(Value::Null),
            "governance_level": governance_level,
        });

        match self.insert_returning_id(&url, &body).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "log_decision failed");
                None
            }
        }
    }

    /// Append one audit event. Best-effort; the preview is truncated to 500
    /// chars.
    pub async fn log_event(&self, task_id: &str, decision_id: Option<&str>, event: AuditEvent) {
        let url = format!("{}/rest/v1/router_events", self.base_url);
        let body = json!({
            "task_id": task_id,
            "decision_id": decision_id,
            "event_type": event.event_type.to_string(),
            "tier": event.tier.to_string(),
            "model": event.model,
            "success": event.success,
            "latency_ms": event.latency_ms,
            "token_count": event.token_count,
            "error_message": event.error_message,
            "response_preview": truncate_chars(
                event.response_preview.as_deref().unwrap_or(""),
                PREVIEW_LIMIT
            ),
        });

        if let Err(e) = self.client.post(&url).json(&body).send().await {
            error!(task_id, error = %e, "log_event failed");
        }
    }

    /// POST an insert and pull `id` out of the representation row.
    async fn insert_returning_id(&self, url: &str, body: &Value) -> anyhow::Result<Option<String>> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(status == 200 || status == 201) {
            anyhow::bail!("registry insert returned {status}: {text}");
        }

        let rows: Value = serde_json::from_str(&text)?;
        Ok(extract_id(&rows))
    }
}

/// Pull `id` from the first representation row; numeric ids are stringified.
fn extract_id(rows: &Value) -> Option<String> {
    match rows.get(0)?.get("id")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RegistryClient {
        RegistryClient::new(server.uri(), "service-key".into())
    }

    fn unreachable_client() -> RegistryClient {
        RegistryClient::new("http://127.0.0.1:1".into(), "service-key".into())
    }

    // -----------------------------------------------------------------------
    // Policy / governance reads
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn get_policy_parses_registry_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .and(query_param("key", "eq.router_policy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "value": { "max_local_retries": 7 } }
            ])))
            .mount(&server)
            .await;

        let policy = client_for(&server).get_policy().await;
        assert_eq!(policy.max_local_retries, 7);
        // unspecified fields keep their defaults
        assert_eq!(policy.context_threshold_tokens, 4_000);
    }

    #[tokio::test]
    async fn get_policy_falls_back_when_registry_is_unreachable() {
        let policy = unreachable_client().get_policy().await;
        assert_eq!(policy, Policy::default());
    }

    #[tokio::test]
    async fn get_policy_falls_back_on_missing_row_or_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        assert_eq!(client_for(&server).get_policy().await, Policy::default());

        let erroring = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&erroring)
            .await;
        assert_eq!(client_for(&erroring).get_policy().await, Policy::default());
    }

    #[tokio::test]
    async fn get_policy_falls_back_on_malformed_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "value": { "max_local_retries": "not-a-number" } }
            ])))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).get_policy().await, Policy::default());
    }

    #[tokio::test]
    async fn get_governance_parses_and_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .and(query_param("key", "eq.governance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "value": { "level": "strict" } }
            ])))
            .mount(&server)
            .await;

        let governance = client_for(&server).get_governance().await;
        assert_eq!(governance.level, "strict");
        assert!(governance.require_audit);

        assert_eq!(
            unreachable_client().get_governance().await,
            Governance::default()
        );
    }

    #[tokio::test]
    async fn is_connected_reflects_probe_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/system_registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "key": "governance" }])))
            .mount(&server)
            .await;

        assert!(client_for(&server).is_connected().await);
        assert!(!unreachable_client().is_connected().await);
    }

    // -----------------------------------------------------------------------
    // Task / decision inserts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn log_task_returns_registry_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/router_tasks"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!([{ "id": "task-abc" }])),
            )
            .mount(&server)
            .await;

        let id = client_for(&server)
            .log_task("classify", json!({ "prompt": "hi" }), "n8n", Sensitivity::Normal)
            .await;
        assert_eq!(id.as_deref(), Some("task-abc"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["status"], "received");
        assert_eq!(body["sensitivity"], "normal");
    }

    #[tokio::test]
    async fn log_task_stringifies_numeric_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/router_tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": 42 }])))
            .mount(&server)
            .await;

        let id = client_for(&server)
            .log_task("classify", json!({}), "n8n", Sensitivity::Normal)
            .await;
        assert_eq!(id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn log_task_returns_none_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/router_tasks"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let id = client_for(&server)
            .log_task("classify", json!({}), "n8n", Sensitivity::Normal)
            .await;
        assert!(id.is_none());

        // unreachable registry behaves the same
        let id = unreachable_client()
            .log_task("classify", json!({}), "n8n", Sensitivity::Normal)
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn log_decision_persists_snapshot_and_clamps_escalation_level() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/router_decisions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "dec-1" }])))
            .mount(&server)
            .await;

        let decision = Decision {
            route: Tier::Premium,
            model: "m".into(),
            reason: "because".into(),
            confidence: 0.5,
            escalation_level: 5,
            cost_estimate: 0.1,
        };

        let id = client_for(&server)
            .log_decision("task-1", &decision, &Policy::default(), "standard")
            .await;
        assert_eq!(id.as_deref(), Some("dec-1"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["escalation_level"], 3, "clamped at the schema cap");
        assert_eq!(body["route"], "premium");
        assert_eq!(body["governance_level"], "standard");
        assert_eq!(body["policy_snapshot"]["max_local_retries"], 2);
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn log_event_truncates_preview_to_500_chars() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/router_events"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .mount(&server)
            .await;

        let preview = "p".repeat(600);
        let event = AuditEvent::new(EventType::Execution, Tier::Local, "llama3.1:8b", true)
            .with_latency(12)
            .with_tokens(9)
            .with_preview(Some(&preview));

        client_for(&server)
            .log_event("task-1", Some("dec-1"), event)
            .await;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event_type"], "execution");
        assert_eq!(body["tier"], "local");
        assert_eq!(body["decision_id"], "dec-1");
        assert_eq!(body["response_preview"].as_str().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let registry = unreachable_client();
        // must not panic or error — fire-and-forget semantics
        registry
            .log_event(
                "task-1",
                None,
                AuditEvent::new(EventType::FinalResult, Tier::Local, "m", false),
            )
            .await;
        registry.update_task_status("task-1", TaskStatus::Failed).await;
    }

    #[test]
    fn event_type_vocabulary_is_stable() {
        assert_eq!(EventType::Execution.to_string(), "execution");
        assert_eq!(
            EventType::InvalidJsonEscalation.to_string(),
            "invalid_json_escalation"
        );
        assert_eq!(EventType::Escalation.to_string(), "escalation");
        assert_eq!(EventType::DirectExecution.to_string(), "direct_execution");
        assert_eq!(EventType::FinalResult.to_string(), "final_result");
    }
}
