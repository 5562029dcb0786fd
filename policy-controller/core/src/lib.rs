#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cell;
pub mod effective;
pub mod extension;
mod id;
pub mod policy;
mod readiness;
pub mod topology;

pub use self::{
    cell::Cell,
    id::{GroupKind, ObjectId, TargetRef, CORE_GROUP},
    policy::{MergeStrategy, Policy, Precedence, Rule},
    readiness::{Readiness, ReadinessSignals},
    topology::{Link, Targetable, Topology},
};

pub const POLICY_CONTROLLER_NAME: &str = "kuadrant.io/policy-controller";

/// The API group of the policies managed by the controller.
pub const POLICY_API_GROUP: &str = "kuadrant.io";

pub fn rate_limit_policy_kind() -> GroupKind {
    GroupKind::new(POLICY_API_GROUP, "RateLimitPolicy")
}

pub fn auth_policy_kind() -> GroupKind {
    GroupKind::new(POLICY_API_GROUP, "AuthPolicy")
}
