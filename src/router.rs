//! Pipeline orchestration — the brain of tier-router.
//!
//! Three entry points, all fed by per-request registry snapshots:
//!
//! - [`handle_run`]: the full pipeline — policy snapshot → task insert →
//!   decision → decision insert → fallback execution → final audit event.
//! - [`handle_route`]: decision only, no execution. Lets callers preview
//!   where a task would go and under which policy.
//! - [`handle_execute`]: direct execution on a caller-chosen tier, bypassing
//!   the decision engine entirely.
//!
//! Nothing here returns an error for registry trouble: reads fall back to
//! defaults and writes are best-effort, so the answer pipeline keeps moving
//! even with the audit store down.

use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::{
    adapters::Adapters,
    config::Settings,
    decision::decide,
    executor::run_with_fallback,
    policy::DEFAULT_LOCAL_MODEL,
    registry::{AuditEvent, EventType, RegistryClient},
    types::{
        truncate_chars, ExecuteRequest, Output, RouteRequest, RouterResult, RunRequest,
        Sensitivity, TaskStatus,
    },
};

/// Characters of prompt kept in task payload rows.
const PROMPT_PREFIX_LIMIT: usize = 500;

/// Shared application state injected into every request handler via
/// [`axum::extract::State`].
///
/// All dependencies are constructed and injected — tests build their own
/// state against mock servers; nothing is process-global.
pub struct RouterState {
    pub settings: Settings,
    pub registry: RegistryClient,
    pub adapters: Adapters,
}

impl RouterState {
    pub fn new(settings: Settings, registry: RegistryClient, adapters: Adapters) -> Self {
        Self {
            settings,
            registry,
            adapters,
        }
    }

    /// Production wiring: registry and adapters built from the environment
    /// settings.
    pub fn from_settings(settings: Settings) -> Self {
        let registry = RegistryClient::from_settings(&settings);
        let adapters = Adapters::from_settings(&settings);
        Self::new(settings, registry, adapters)
    }
}

/// Best-effort terminal-status insurance for abandoned requests.
///
/// Armed right after the task row exists; if the request future is dropped
/// before the pipeline completes (caller went away), `Drop` spawns a
/// fire-and-forget status update to `failed`. Disarmed on normal completion
/// so the executor's own terminal status stands.
struct StatusGuard {
    registry: RegistryClient,
    task_id: String,
    armed: bool,
}

impl StatusGuard {
    fn arm(registry: RegistryClient, task_id: String) -> Self {
        Self {
            registry,
            task_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = self.registry.clone();
        let task_id = std::mem::take(&mut self.task_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.update_task_status(&task_id, TaskStatus::Failed).await;
            });
        }
    }
}

/// Full `/run` pipeline. Always returns a structured result; failures are
/// carried inside it, never thrown past this point.
#[tracing::instrument(
    skip(state, request),
    fields(task_type = %request.task_type, sensitivity = %request.sensitivity)
)]
pub async fn handle_run(state: &RouterState, request: RunRequest) -> RouterResult {
    // 1. Snapshot policy + governance (registry is the source of truth).
    let policy = state.registry.get_policy().await;
    let governance = state.registry.get_governance().await;

    // 2. Log the incoming task.
    let payload = json!({
        "prompt": truncate_chars(&request.prompt, PROMPT_PREFIX_LIMIT),
        "context_length": request.context.as_deref().map_or(0, |c| c.chars().count()),
        "sensitivity": request.sensitivity.to_string(),
        "source": request.source,
        "metadata": request.metadata,
    });
    let task_id = match state
        .registry
        .log_task(&request.task_type, payload, &request.source, request.sensitivity)
        .await
    {
        Some(id) => id,
        None => {
            // Registry insert failed — mint a local id and continue.
            error!("failed to log task to registry, using local UUID");
            Uuid::new_v4().to_string()
        }
    };

    let guard = StatusGuard::arm(state.registry.clone(), task_id.clone());

    // 3. Compute the routing decision.
    state
        .registry
        .update_task_status(&task_id, TaskStatus::Routing)
        .await;
    let decision = decide(&request, &policy, &governance);

    // 4. Persist decision + policy snapshot.
    let decision_id = state
        .registry
        .log_decision(&task_id, &decision, &policy, &governance.level)
        .await;

    // 5. Execute with the fallback chain.
    state
        .registry
        .update_task_status(&task_id, TaskStatus::Executing)
        .await;
    let result = run_with_fallback(
        &state.adapters,
        &state.registry,
        &request,
        &policy,
        &decision,
        &task_id,
        decision_id.as_deref(),
    )
    .await;

    // 6. One final_result event per terminal result.
    let preview = result
        .output
        .as_ref()
        .map(Output::preview)
        .filter(|p| !p.is_empty());
    state
        .registry
        .log_event(
            &task_id,
            decision_id.as_deref(),
            AuditEvent::new(
                EventType::FinalResult,
                result.tier_used,
                &result.model_used,
                result.success,
            )
            .with_latency(result.latency_ms)
            .with_error(result.error.as_deref())
            .with_preview(preview.as_deref()),
        )
        .await;

    guard.disarm();
    result
}

/// `/route` — compute the decision without executing. Returns the decision
/// plus the policy and governance snapshots it was derived from.
pub async fn handle_route(state: &RouterState, request: RouteRequest) -> Value {
    let policy = state.registry.get_policy().await;
    let governance = state.registry.get_governance().await;

    let run_req = RunRequest {
        task_type: request.task_type,
        prompt: request.prompt,
        context: request.context,
        sensitivity: request.sensitivity,
        source: "n8n".to_string(),
        metadata: serde_json::Map::new(),
    };
    let decision = decide(&run_req, &policy, &governance);

    json!({
        "decision": decision,
        "policy_used": policy,
        "governance": governance,
    })
}

/// `/execute` — run directly on a caller-chosen tier, bypassing the decision
/// engine. Still fully audited: task row, `direct_execution` event, terminal
/// status.
pub async fn handle_execute(state: &RouterState, request: ExecuteRequest) -> Value {
    let model = match request.model.as_deref() {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            let policy = state.registry.get_policy().await;
            policy
                .model_for(request.tier)
                .unwrap_or(DEFAULT_LOCAL_MODEL)
                .to_string()
        }
    };

    let payload = json!({
        "tier": request.tier.to_string(),
        "model": model,
        "prompt": truncate_chars(&request.prompt, PROMPT_PREFIX_LIMIT),
    });
    let task_id = state
        .registry
        .log_task("direct_execute", payload, "api", Sensitivity::Normal)
        .await
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = state
        .adapters
        .generate(
            request.tier,
            &request.prompt,
            &model,
            request.context.as_deref(),
        )
        .await;

    let preview = result
        .output
        .as_ref()
        .map(Output::preview)
        .filter(|p| !p.is_empty());
    state
        .registry
        .log_event(
            &task_id,
            None,
            AuditEvent::new(EventType::DirectExecution, request.tier, &model, result.success)
                .with_latency(result.latency_ms)
                .with_tokens(result.token_count)
                .with_error(result.error.as_deref())
                .with_preview(preview.as_deref()),
        )
        .await;

    let status = if result.success {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };
    state.registry.update_task_status(&task_id, status).await;

    json!({
        "task_id": task_id,
        "tier": request.tier,
        "model": model,
        "success": result.success,
        "output": result.output,
        "latency_ms": result.latency_ms,
        "token_count": result.token_count,
        "error": result.error,
    })
}
