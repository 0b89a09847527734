//! The fallback executor — drives attempts across the policy's fallback
//! chain, starting at the decided tier.
//!
//! Per-tier attempt budgets: the local tier gets `max_local_retries`
//! immediate retries (no backoff — local failures are usually transient
//! inference slots); every other tier gets exactly one attempt. A successful
//! attempt still has to pass the JSON-validity gate before it is accepted;
//! invalid output escalates to the next tier without consuming the local
//! retry budget.
//!
//! Every attempt and state transition is written to the registry as an audit
//! event, in attempt order. Registry failures never stop execution.

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    adapters::Adapters,
    decision::estimate_cost,
    policy::Policy,
    registry::{AuditEvent, EventType, RegistryClient},
    types::{Decision, Output, RouterResult, RunRequest, TaskStatus, Tier},
};

/// Confidence lost per tier escalated, floored at 0.5.
const CONFIDENCE_PENALTY: f64 = 0.15;
const CONFIDENCE_FLOOR: f64 = 0.5;

/// Execute `request` along `policy.fallback_chain`, starting at
/// `decision.route` (or the chain head when the route is not in the chain).
///
/// Returns a success result as soon as one tier produces accepted output;
/// otherwise a failure result after the chain is exhausted. The task status
/// is driven to its terminal value here.
pub async fn run_with_fallback(
    adapters: &Adapters,
    registry: &RegistryClient,
    request: &RunRequest,
    policy: &Policy,
    decision: &Decision,
    task_id: &str,
    decision_id: Option<&str>,
) -> RouterResult {
    let chain = &policy.fallback_chain;
    let start_idx = chain
        .iter()
        .position(|t| *t == decision.route)
        .unwrap_or(0);

    let mut local_fail_count: u32 = 0;
    let mut last_error: Option<String> = None;
    let mut total_latency: u64 = 0;

    for tier_idx in start_idx..chain.len() {
        let tier = chain[tier_idx];
        let model = policy
            .model_for(tier)
            .unwrap_or(&decision.model)
            .to_string();
        let escalation = (tier_idx - start_idx) as u32;

        let max_attempts = if tier == Tier::Local {
            policy.max_local_retries
        } else {
            1
        };

        'attempts: for attempt in 0..max_attempts {
            info!(%tier, %model, attempt = attempt + 1, "executing");

            let result = adapters
                .generate(tier, &request.prompt, &model, request.context.as_deref())
                .await;
            total_latency += result.latency_ms;

            let preview = result
                .output
                .as_ref()
                .map(Output::preview)
                .filter(|p| !p.is_empty());
            registry
                .log_event(
                    task_id,
                    decision_id,
                    AuditEvent::new(EventType::Execution, tier, &model, result.success)
                        .with_latency(result.latency_ms)
                        .with_tokens(result.token_count)
                        .with_error(result.error.as_deref())
                        .with_preview(preview.as_deref()),
                )
                .await;

            if result.success {
                let output = result
                    .output
                    .unwrap_or_else(|| Output::Text(String::new()));

                if !output.is_valid_json() {
                    if policy.escalation_rules.invalid_json_escalate {
                        warn!(%tier, "non-JSON output, escalating");
                        registry
                            .log_event(
                                task_id,
                                decision_id,
                                AuditEvent::new(
                                    EventType::InvalidJsonEscalation,
                                    tier,
                                    &model,
                                    false,
                                )
                                .with_error(Some("Output is not valid JSON")),
                            )
                            .await;
                        last_error = Some("Invalid JSON output".to_string());
                        // Advance to the next tier; no retry on this one.
                        break 'attempts;
                    }
                    // Not escalating on invalid JSON — accept the raw output.
                }

                let final_decision = Decision {
                    route: tier,
                    model: model.clone(),
                    reason: if escalation > 0 {
                        format!("{}; escalated {escalation}x", decision.reason)
                    } else {
                        decision.reason.clone()
                    },
                    confidence: (decision.confidence - f64::from(escalation) * CONFIDENCE_PENALTY)
                        .max(CONFIDENCE_FLOOR),
                    escalation_level: escalation,
                    cost_estimate: estimate_cost(tier, result.token_count as usize),
                };

                registry
                    .update_task_status(task_id, TaskStatus::Completed)
                    .await;

                return RouterResult {
                    task_id: task_id.to_string(),
                    decision: final_decision,
                    output: Some(output),
                    success: true,
                    tier_used: tier,
                    model_used: model,
                    latency_ms: total_latency,
                    error: None,
                    timestamp: Utc::now(),
                };
            }

            // Failed attempt
            last_error = Some(
                result
                    .error
                    .unwrap_or_else(|| "Unknown error".to_string()),
            );
            if tier == Tier::Local {
                local_fail_count += 1;
                warn!(
                    attempt = attempt + 1,
                    error = last_error.as_deref().unwrap_or(""),
                    "local attempt failed"
                );
            }
        }

        // Informational escalation marker once local has burned its budget.
        if tier == Tier::Local && local_fail_count >= policy.escalation_rules.local_fail_count {
            warn!(count = local_fail_count, "local failures reached threshold, escalating");
            let message = format!("Local failed {local_fail_count} times");
            registry
                .log_event(
                    task_id,
                    decision_id,
                    AuditEvent::new(EventType::Escalation, tier, &model, false)
                        .with_error(Some(message.as_str())),
                )
                .await;
        }
    }

    // All tiers exhausted
    registry.update_task_status(task_id, TaskStatus::Failed).await;

    RouterResult {
        task_id: task_id.to_string(),
        decision: decision.clone(),
        output: None,
        success: false,
        tier_used: decision.route,
        model_used: decision.model.clone(),
        latency_ms: total_latency,
        error: Some(format!(
            "All tiers exhausted. Last error: {}",
            last_error.as_deref().unwrap_or("none")
        )),
        timestamp: Utc::now(),
    }
}
