//! Registry-owned configuration records: routing policy and governance.
//!
//! Both records live in the `system_registry` table and are re-read on every
//! request — there is no process-global policy cache, so operators can change
//! routing behavior without a restart. Serde field defaults mean a partial
//! registry value still deserializes into a complete record, and
//! [`Default`] doubles as the in-memory fallback when the registry is
//! unreachable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Tier;

/// Fixed model fallbacks when `Policy.models` has no entry for a tier.
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_MARKET_MODEL: &str = "meta-llama/llama-3.1-70b-instruct";
pub const DEFAULT_PREMIUM_MODEL: &str = "claude-sonnet-4-20250514";

/// Escalation thresholds embedded in [`Policy`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EscalationRules {
    /// Local failures required before the informational escalation event.
    #[serde(default = "defaults::local_fail_count")]
    pub local_fail_count: u32,

    /// Advance to the next tier when a successful attempt returns output
    /// that is not valid JSON.
    #[serde(default = "defaults::invalid_json_escalate")]
    pub invalid_json_escalate: bool,

    /// Route oversized contexts to the market tier at decision time.
    #[serde(default = "defaults::context_overflow_escalate")]
    pub context_overflow_escalate: bool,
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self {
            local_fail_count: defaults::local_fail_count(),
            invalid_json_escalate: defaults::invalid_json_escalate(),
            context_overflow_escalate: defaults::context_overflow_escalate(),
        }
    }
}

/// Operational routing policy, key `router_policy` in `system_registry`.
///
/// Snapshotted once per request; the snapshot is persisted alongside every
/// decision it produces so decisions stay reproducible after policy edits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Policy {
    #[serde(default)]
    pub default_tier: Tier,

    /// Target share of traffic handled locally, cited in decision reasons.
    #[serde(default = "defaults::local_ratio")]
    pub local_ratio: f64,

    /// Attempt budget for the local tier. Every other tier gets one attempt.
    #[serde(default = "defaults::max_local_retries")]
    pub max_local_retries: u32,

    /// Estimated-token ceiling before context overflow escalation.
    #[serde(default = "defaults::context_threshold_tokens")]
    pub context_threshold_tokens: usize,

    #[serde(default)]
    pub escalation_rules: EscalationRules,

    /// Tag controlling rule 1 of the decision engine; only
    /// `"sensitivity_high_only"` is recognized today.
    #[serde(default = "defaults::premium_trigger")]
    pub premium_trigger: String,

    /// Ordered tiers attempted from the decided tier until one succeeds.
    #[serde(default = "defaults::fallback_chain")]
    pub fallback_chain: Vec<Tier>,

    /// Model id per tier; absent tiers use the fixed defaults above.
    #[serde(default = "defaults::models")]
    pub models: HashMap<Tier, String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            default_tier: Tier::Local,
            local_ratio: defaults::local_ratio(),
            max_local_retries: defaults::max_local_retries(),
            context_threshold_tokens: defaults::context_threshold_tokens(),
            escalation_rules: EscalationRules::default(),
            premium_trigger: defaults::premium_trigger(),
            fallback_chain: defaults::fallback_chain(),
            models: defaults::models(),
        }
    }
}

impl Policy {
    /// The configured model for a tier, if any.
    pub fn model_for(&self, tier: Tier) -> Option<&str> {
        self.models.get(&tier).map(String::as_str)
    }
}

/// Governance record, key `governance` in `system_registry`.
///
/// Recorded with every decision for forward compatibility; the decision rules
/// do not consult it yet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Governance {
    #[serde(default = "defaults::governance_level")]
    pub level: String,

    #[serde(default = "defaults::yes")]
    pub require_audit: bool,

    #[serde(default = "defaults::yes")]
    pub require_explanation: bool,

    #[serde(default = "defaults::max_cost_per_request")]
    pub max_cost_per_request: f64,

    #[serde(default)]
    pub premium_approval_required: bool,
}

impl Default for Governance {
    fn default() -> Self {
        Self {
            level: defaults::governance_level(),
            require_audit: true,
            require_explanation: true,
            max_cost_per_request: defaults::max_cost_per_request(),
            premium_approval_required: false,
        }
    }
}

mod defaults {
    use std::collections::HashMap;

    use crate::types::Tier;

    pub fn local_fail_count() -> u32 { 2 }
    pub fn invalid_json_escalate() -> bool { true }
    pub fn context_overflow_escalate() -> bool { true }

    pub fn local_ratio() -> f64 { 0.80 }
    pub fn max_local_retries() -> u32 { 2 }
    pub fn context_threshold_tokens() -> usize { 4_000 }
    pub fn premium_trigger() -> String { "sensitivity_high_only".to_string() }

    pub fn fallback_chain() -> Vec<Tier> {
        vec![Tier::Local, Tier::Market, Tier::Premium]
    }

    pub fn models() -> HashMap<Tier, String> {
        HashMap::from([
            (Tier::Local, super::DEFAULT_LOCAL_MODEL.to_string()),
            (Tier::Market, super::DEFAULT_MARKET_MODEL.to_string()),
            (Tier::Premium, super::DEFAULT_PREMIUM_MODEL.to_string()),
        ])
    }

    pub fn governance_level() -> String { "standard".to_string() }
    pub fn yes() -> bool { true }
    pub fn max_cost_per_request() -> f64 { 0.50 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_deserializes_to_defaults() {
        let policy: Policy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy, Policy::default());
        assert_eq!(policy.max_local_retries, 2);
        assert_eq!(policy.context_threshold_tokens, 4_000);
        assert_eq!(
            policy.fallback_chain,
            vec![Tier::Local, Tier::Market, Tier::Premium]
        );
        assert_eq!(policy.model_for(Tier::Local), Some(DEFAULT_LOCAL_MODEL));
    }

    #[test]
    fn partial_document_keeps_remaining_defaults() {
        let policy: Policy = serde_json::from_value(json!({
            "max_local_retries": 5,
            "escalation_rules": { "invalid_json_escalate": false }
        }))
        .unwrap();
        assert_eq!(policy.max_local_retries, 5);
        assert!(!policy.escalation_rules.invalid_json_escalate);
        // untouched fields stay at their defaults
        assert!(policy.escalation_rules.context_overflow_escalate);
        assert_eq!(policy.escalation_rules.local_fail_count, 2);
        assert_eq!(policy.premium_trigger, "sensitivity_high_only");
    }

    #[test]
    fn models_map_round_trips_with_tier_keys() {
        let policy: Policy = serde_json::from_value(json!({
            "models": { "local": "qwen2.5:7b", "premium": "claude-opus-4" }
        }))
        .unwrap();
        assert_eq!(policy.model_for(Tier::Local), Some("qwen2.5:7b"));
        assert_eq!(policy.model_for(Tier::Premium), Some("claude-opus-4"));
        assert_eq!(policy.model_for(Tier::Market), None);

        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["models"]["local"], "qwen2.5:7b");
    }

    #[test]
    fn governance_defaults_match_fallback_record() {
        let governance: Governance = serde_json::from_value(json!({})).unwrap();
        assert_eq!(governance, Governance::default());
        assert_eq!(governance.level, "standard");
        assert!(governance.require_audit);
        assert!((governance.max_cost_per_request - 0.50).abs() < f64::EPSILON);
        assert!(!governance.premium_approval_required);
    }

    #[test]
    fn policy_snapshot_serializes_every_field() {
        let snapshot = serde_json::to_value(Policy::default()).unwrap();
        for key in [
            "default_tier",
            "local_ratio",
            "max_local_retries",
            "context_threshold_tokens",
            "escalation_rules",
            "premium_trigger",
            "fallback_chain",
            "models",
        ] {
            assert!(snapshot.get(key).is_some(), "missing {key} in snapshot");
        }
    }
}
