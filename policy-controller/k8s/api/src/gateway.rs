//! Gateway API resources.
//!
//! The gateway API crate does not provide GRPCRoute, so it is defined here
//! with only the fields the index reads.

pub use k8s_gateway_api::*;

/// GRPCRoute provides a way to route gRPC requests. Backends specify where
/// matching requests should be routed.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "GRPCRoute",
    root = "GrpcRoute",
    status = "GrpcRouteStatus",
    namespaced
)]
pub struct GrpcRouteSpec {
    /// Common route information.
    #[serde(flatten)]
    pub inner: CommonRouteSpec,

    pub hostnames: Option<Vec<Hostname>>,

    pub rules: Option<Vec<GrpcRouteRule>>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRouteRule {
    /// Matches and filters are not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<serde_json::Value>>,

    pub backend_refs: Option<Vec<BackendRef>>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct GrpcRouteStatus {
    /// Common route status information.
    #[serde(flatten)]
    pub inner: RouteStatus,
}
