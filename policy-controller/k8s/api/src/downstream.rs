//! Gateway-provider resources through which policies are realized.
//!
//! The controller only observes these; their specs are left opaque.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

// === Istio ===

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "EnvoyFilter",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_refs: Option<Vec<PolicyTargetReference>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_patches: Vec<serde_json::Value>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "extensions.istio.io",
    version = "v1alpha1",
    kind = "WasmPlugin",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WasmPluginSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_refs: Option<Vec<PolicyTargetReference>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_config: Option<serde_json::Value>,
}

// === Envoy Gateway ===

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.envoyproxy.io",
    version = "v1alpha1",
    kind = "EnvoyPatchPolicy",
    status = "AncestorPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyPatchPolicySpec {
    pub target_ref: PolicyTargetReference,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_patches: Vec<serde_json::Value>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.envoyproxy.io",
    version = "v1alpha1",
    kind = "EnvoyExtensionPolicy",
    status = "AncestorPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyExtensionPolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_refs: Vec<PolicyTargetReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wasm: Vec<serde_json::Value>,
}

// === Shared ===

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub name: String,
}

/// Status reported by the controllers of each gateway a policy applies to.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct AncestorPolicyStatus {
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[derive(
    Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    pub ancestor_ref: AncestorRef,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct AncestorRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

/// Returns the conditions reported by `controller_name` for the given
/// gateway ancestor. Ancestor references without a namespace refer to the
/// policy's namespace.
pub fn ancestor_conditions<'s>(
    status: Option<&'s AncestorPolicyStatus>,
    controller_name: &str,
    gateway_namespace: &str,
    gateway_name: &str,
    policy_namespace: &str,
) -> &'s [Condition] {
    status
        .into_iter()
        .flat_map(|s| s.ancestors.iter())
        .find(|a| {
            a.controller_name == controller_name
                && a.ancestor_ref.name == gateway_name
                && a.ancestor_ref.namespace.as_deref().unwrap_or(policy_namespace)
                    == gateway_namespace
        })
        .map(|a| &*a.conditions)
        .unwrap_or(&[])
}
