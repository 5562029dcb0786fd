//! System resources that must be installed for policies to take effect.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

pub const CONDITION_READY: &str = "Ready";

/// The umbrella resource of an installation.
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
    group = "kuadrant.io",
    version = "v1beta1",
    kind = "Kuadrant",
    status = "SystemStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KuadrantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<serde_json::Value>,
}

/// The rate limiter deployment.
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
    group = "limitador.kuadrant.io",
    version = "v1alpha1",
    kind = "Limitador",
    status = "SystemStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LimitadorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limits: Vec<serde_json::Value>,
}

/// The auth server deployment.
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
    group = "operator.authorino.kuadrant.io",
    version = "v1beta1",
    kind = "Authorino",
    status = "SystemStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorinoSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Checks whether a system resource reports a `Ready` condition.
pub fn is_ready(status: Option<&SystemStatus>) -> bool {
    status.is_some_and(|status| crate::is_condition_true(&status.conditions, CONDITION_READY))
}
