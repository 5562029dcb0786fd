use super::{LocalPolicyTargetReference, MergeableSpec, PolicyStatus, RuleSet};
use gateway_policy_controller_core::Rule;
use std::collections::BTreeMap;

/// Configures authentication and authorization of requests to the targeted
/// gateway, listener or route.
#[derive(
    Clone, Debug, PartialEq, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "AuthPolicy",
    status = "PolicyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    pub target_ref: LocalPolicyTargetReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<MergeableSpec<AuthRules>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<MergeableSpec<AuthRules>>,

    #[serde(flatten)]
    pub proper: AuthRules,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct AuthRules {
    /// Named patterns that may be referred to from `when` predicates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patterns: BTreeMap<String, serde_json::Value>,

    /// Predicates that must all hold for the policy to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<AuthScheme>,
}

/// The phases of an auth pipeline. Each entry is keyed by its name and left
/// opaque; the auth server owns its schema.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct AuthScheme {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentication: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authorization: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callbacks: BTreeMap<String, serde_json::Value>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct ResponseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized: Option<serde_json::Value>,

    #[serde(default)]
    pub success: SuccessResponse,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, serde_json::Value>,
}

impl RuleSet for AuthRules {
    fn is_empty(&self) -> bool {
        self.rules().is_empty()
    }

    /// Keys rules by phase and name, e.g. `authentication#api-key`.
    fn rules(&self) -> BTreeMap<String, Rule> {
        let mut rules = BTreeMap::new();
        let mut insert_all = |phase: &str, entries: &BTreeMap<String, serde_json::Value>| {
            for (name, value) in entries {
                rules.insert(format!("{phase}#{name}"), Rule(value.clone()));
            }
        };

        insert_all("patterns", &self.patterns);
        if let Some(scheme) = self.rules.as_ref() {
            insert_all("authentication", &scheme.authentication);
            insert_all("metadata", &scheme.metadata);
            insert_all("authorization", &scheme.authorization);
            insert_all("callbacks", &scheme.callbacks);
            if let Some(response) = scheme.response.as_ref() {
                insert_all("response.success.headers", &response.success.headers);
                insert_all("response.success.filters", &response.success.filters);
            }
        }

        if let Some(response) = self.rules.as_ref().and_then(|s| s.response.as_ref()) {
            if let Some(value) = response.unauthenticated.as_ref() {
                rules.insert("response.unauthenticated".to_string(), Rule(value.clone()));
            }
            if let Some(value) = response.unauthorized.as_ref() {
                rules.insert("response.unauthorized".to_string(), Rule(value.clone()));
            }
        }
        if !self.when.is_empty() {
            rules.insert(
                "when".to_string(),
                Rule(serde_json::Value::Array(self.when.clone())),
            );
        }
        rules
    }
}
