//! The routing decision engine.
//!
//! [`decide`] is a pure, synchronous function — no HTTP, no async, no clock.
//! Given the same request, policy, and governance it always produces the same
//! [`Decision`], which is what makes every routed answer explainable after
//! the fact: the registry stores the decision next to the exact policy
//! snapshot that produced it.

use crate::{
    policy::{Governance, Policy, DEFAULT_LOCAL_MODEL, DEFAULT_MARKET_MODEL, DEFAULT_PREMIUM_MODEL},
    types::{Decision, RunRequest, Sensitivity, Tier},
};

/// Cost estimates per 1K tokens (rough).
pub fn rate_per_1k(tier: Tier) -> f64 {
    match tier {
        Tier::Local => 0.0,
        Tier::Market => 0.0008,
        Tier::Premium => 0.003,
    }
}

/// Rough token estimate: ~4 chars per token, floored at 1.
///
/// Deliberately coarse — this must never call out to a tokenizer; the
/// threshold it feeds is itself a heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Dollar estimate for `token_count` tokens on `tier`, rounded to 6 decimals.
pub fn estimate_cost(tier: Tier, token_count: usize) -> f64 {
    let raw = rate_per_1k(tier) * (token_count as f64 / 1000.0);
    (raw * 1e6).round() / 1e6
}

/// Compute the routing decision for a request.
///
/// Rules are evaluated in order; the first match wins:
///
/// 1. `sensitivity = high` with the `sensitivity_high_only` trigger routes to
///    premium.
/// 2. Estimated tokens above the policy threshold route to market (when the
///    overflow rule is enabled).
/// 3. Everything else runs locally.
///
/// Governance is recorded with the decision but does not alter the rules yet.
pub fn decide(request: &RunRequest, policy: &Policy, _governance: &Governance) -> Decision {
    let prompt_tokens = estimate_tokens(&request.prompt);
    let context_tokens = estimate_tokens(request.context.as_deref().unwrap_or(""));
    let total_tokens = prompt_tokens + context_tokens;

    // Rule 1: premium only if sensitivity = high
    if request.sensitivity == Sensitivity::High && policy.premium_trigger == "sensitivity_high_only"
    {
        let model = policy
            .model_for(Tier::Premium)
            .unwrap_or(DEFAULT_PREMIUM_MODEL);
        return Decision {
            route: Tier::Premium,
            model: model.to_string(),
            reason: "Sensitivity=high triggers premium tier per policy".to_string(),
            confidence: 0.95,
            escalation_level: 2,
            // Doubled to account for output tokens.
            cost_estimate: estimate_cost(Tier::Premium, total_tokens * 2),
        };
    }

    // Rule 2: context overflow → escalate to market
    if total_tokens > policy.context_threshold_tokens
        && policy.escalation_rules.context_overflow_escalate
    {
        let model = policy
            .model_for(Tier::Market)
            .unwrap_or(DEFAULT_MARKET_MODEL);
        return Decision {
            route: Tier::Market,
            model: model.to_string(),
            reason: format!(
                "Context size ({total_tokens} tokens) exceeds threshold ({}), \
                 escalating to market tier",
                policy.context_threshold_tokens
            ),
            confidence: 0.85,
            escalation_level: 1,
            cost_estimate: estimate_cost(Tier::Market, total_tokens * 2),
        };
    }

    // Rule 3: default to local
    let model = policy.model_for(Tier::Local).unwrap_or(DEFAULT_LOCAL_MODEL);
    Decision {
        route: Tier::Local,
        model: model.to_string(),
        reason: format!(
            "Default routing to local tier ({}% local policy)",
            (policy.local_ratio * 100.0) as i64
        ),
        confidence: 0.90,
        escalation_level: 0,
        cost_estimate: 0.0,
    }
}
