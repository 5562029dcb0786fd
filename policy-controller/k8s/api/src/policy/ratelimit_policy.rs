use super::{LocalPolicyTargetReference, MergeableSpec, PolicyStatus, RuleSet};
use gateway_policy_controller_core::Rule;
use std::collections::BTreeMap;

/// Limits the rate of requests to the targeted gateway, listener or route.
#[derive(
    Clone, Debug, PartialEq, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "RateLimitPolicy",
    status = "PolicyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicySpec {
    pub target_ref: LocalPolicyTargetReference,

    /// Rules that yield to those of policies attached to narrower scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<MergeableSpec<RateLimits>>,

    /// Rules that replace those of policies attached to narrower scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<MergeableSpec<RateLimits>>,

    /// Implicit defaults.
    #[serde(flatten)]
    pub proper: RateLimits,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Limit>>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct Limit {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rates: Vec<Rate>,

    /// Expressions whose values qualify the counters of this limit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<String>,

    /// Predicates that must all hold for the limit to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<WhenPredicate>,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct Rate {
    pub limit: i64,

    /// A duration such as `10s` or `1m`.
    pub window: String,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct WhenPredicate {
    pub predicate: String,
}

impl RuleSet for RateLimits {
    fn is_empty(&self) -> bool {
        self.limits.as_ref().map_or(true, BTreeMap::is_empty)
    }

    fn rules(&self) -> BTreeMap<String, Rule> {
        self.limits
            .iter()
            .flatten()
            .filter_map(|(name, limit)| {
                let value = serde_json::to_value(limit).ok()?;
                Some((name.clone(), Rule(value)))
            })
            .collect()
    }
}
