pub mod auth_policy;
pub mod ratelimit_policy;
mod status;
mod target_ref;

pub use self::{
    auth_policy::{AuthPolicy, AuthPolicySpec, AuthRules, AuthScheme},
    ratelimit_policy::{Limit, Rate, RateLimitPolicy, RateLimitPolicySpec, RateLimits},
    status::{PolicyStatus, CONDITION_ACCEPTED, CONDITION_ENFORCED},
    target_ref::LocalPolicyTargetReference,
};
use gateway_policy_controller_core::{
    GroupKind, MergeStrategy, ObjectId, Policy, Precedence, Rule,
};
use kube::Resource;
use std::collections::BTreeMap;

/// How the rules of a `defaults` or `overrides` block merge with those of
/// other policies.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Atomic,
    Merge,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct MergeableSpec<T> {
    #[serde(default)]
    pub strategy: Strategy,

    #[serde(flatten)]
    pub rules: T,
}

/// A set of policy rules, keyed by a name that is stable across updates.
pub trait RuleSet {
    fn is_empty(&self) -> bool;

    fn rules(&self) -> BTreeMap<String, Rule>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidPolicy {
    #[error("defaults and overrides are mutually exclusive")]
    DefaultsAndOverrides,

    #[error("implicit and explicit defaults are mutually exclusive")]
    ImplicitAndExplicitDefaults,

    #[error("implicit defaults and explicit overrides are mutually exclusive")]
    ImplicitDefaultsAndOverrides,

    #[error("target reference must name a kind and an object")]
    IncompleteTargetRef,

    #[error("policy has no namespace")]
    MissingNamespace,
}

/// A policy resource of any supported kind.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyResource {
    RateLimit(RateLimitPolicy),
    Auth(AuthPolicy),
}

// === impl PolicyResource ===

impl PolicyResource {
    pub fn group_kind(&self) -> GroupKind {
        match self {
            Self::RateLimit(_) => group_kind::<RateLimitPolicy>(),
            Self::Auth(_) => group_kind::<AuthPolicy>(),
        }
    }

    pub fn api_version(&self) -> String {
        match self {
            Self::RateLimit(_) => RateLimitPolicy::api_version(&()).to_string(),
            Self::Auth(_) => AuthPolicy::api_version(&()).to_string(),
        }
    }

    pub fn meta(&self) -> &kube::api::ObjectMeta {
        match self {
            Self::RateLimit(p) => p.meta(),
            Self::Auth(p) => p.meta(),
        }
    }

    pub fn namespace(&self) -> String {
        self.meta().namespace.clone().unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    pub fn status(&self) -> Option<&PolicyStatus> {
        match self {
            Self::RateLimit(p) => p.status.as_ref(),
            Self::Auth(p) => p.status.as_ref(),
        }
    }

    pub fn target_ref(&self) -> &LocalPolicyTargetReference {
        match self {
            Self::RateLimit(p) => &p.spec.target_ref,
            Self::Auth(p) => &p.spec.target_ref,
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::namespaced(self.group_kind(), self.namespace(), self.name())
    }

    /// Converts the resource into a policy that can be attached to a
    /// topology.
    pub fn to_core(&self) -> Result<Policy, InvalidPolicy> {
        let namespace = self
            .meta()
            .namespace
            .as_deref()
            .ok_or(InvalidPolicy::MissingNamespace)?;

        let target_ref = self.target_ref();
        if !target_ref.is_complete() {
            return Err(InvalidPolicy::IncompleteTargetRef);
        }

        let (precedence, strategy, rules) = match self {
            Self::RateLimit(p) => {
                mergeable(&p.spec.defaults, &p.spec.overrides, &p.spec.proper)?
            }
            Self::Auth(p) => mergeable(&p.spec.defaults, &p.spec.overrides, &p.spec.proper)?,
        };

        let mut policy = Policy::new(self.id(), vec![target_ref.to_core(namespace)]);
        policy.creation_timestamp = self.meta().creation_timestamp.as_ref().map(|t| t.0);
        policy.precedence = precedence;
        policy.strategy = strategy;
        policy.rules = rules;
        Ok(policy)
    }
}

impl From<RateLimitPolicy> for PolicyResource {
    fn from(policy: RateLimitPolicy) -> Self {
        Self::RateLimit(policy)
    }
}

impl From<AuthPolicy> for PolicyResource {
    fn from(policy: AuthPolicy) -> Self {
        Self::Auth(policy)
    }
}

pub fn group_kind<T>() -> GroupKind
where
    T: Resource<DynamicType = ()>,
{
    GroupKind::new(T::group(&()), T::kind(&()))
}

fn mergeable<T: RuleSet>(
    defaults: &Option<MergeableSpec<T>>,
    overrides: &Option<MergeableSpec<T>>,
    proper: &T,
) -> Result<(Precedence, MergeStrategy, BTreeMap<String, Rule>), InvalidPolicy> {
    match (defaults, overrides) {
        (Some(_), Some(_)) => Err(InvalidPolicy::DefaultsAndOverrides),
        (Some(_), None) if !proper.is_empty() => Err(InvalidPolicy::ImplicitAndExplicitDefaults),
        (None, Some(_)) if !proper.is_empty() => Err(InvalidPolicy::ImplicitDefaultsAndOverrides),
        (Some(spec), None) => Ok((
            Precedence::Defaults,
            strategy(spec.strategy),
            spec.rules.rules(),
        )),
        (None, Some(spec)) => Ok((
            Precedence::Overrides,
            strategy(spec.strategy),
            spec.rules.rules(),
        )),
        (None, None) => Ok((Precedence::Defaults, MergeStrategy::Merge, proper.rules())),
    }
}

fn strategy(strategy: Strategy) -> MergeStrategy {
    match strategy {
        Strategy::Atomic => MergeStrategy::Atomic,
        Strategy::Merge => MergeStrategy::Merge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_policy_controller_core::TargetRef;

    fn rate_limit_policy(yaml: &str) -> PolicyResource {
        let policy: RateLimitPolicy = serde_yaml::from_str(yaml).expect("valid policy");
        policy.into()
    }

    #[test]
    fn converts_implicit_defaults() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: HTTPRoute
    name: route
  limits:
    per-user:
      rates:
        - limit: 10
          window: 1m
      counters:
        - auth.identity.username
"#,
        );

        let core = policy.to_core().expect("policy is valid");
        assert_eq!(core.locator(), "ratelimitpolicy:ns/rlp");
        assert_eq!(core.precedence, Precedence::Defaults);
        assert_eq!(core.strategy, MergeStrategy::Merge);
        assert_eq!(
            core.target_refs,
            [TargetRef::new("gateway.networking.k8s.io", "HTTPRoute", "route").in_namespace("ns")]
        );
        assert_eq!(core.rules.keys().collect::<Vec<_>>(), ["per-user"]);
        assert_eq!(
            core.rules["per-user"],
            Rule(serde_json::json!({
                "rates": [{ "limit": 10, "window": "1m" }],
                "counters": ["auth.identity.username"],
            }))
        );
    }

    #[test]
    fn converts_explicit_overrides() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: gw
    sectionName: http
  overrides:
    strategy: merge
    limits:
      global:
        rates:
          - limit: 100
            window: 1s
"#,
        );

        let core = policy.to_core().expect("policy is valid");
        assert_eq!(core.precedence, Precedence::Overrides);
        assert_eq!(core.strategy, MergeStrategy::Merge);
        assert_eq!(core.target_refs[0].section.as_deref(), Some("http"));
        assert!(core.rules.contains_key("global"));
    }

    #[test]
    fn explicit_blocks_default_to_atomic() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: gw
  defaults:
    limits:
      global:
        rates:
          - limit: 100
            window: 1s
"#,
        );
        let core = policy.to_core().expect("policy is valid");
        assert_eq!(core.precedence, Precedence::Defaults);
        assert_eq!(core.strategy, MergeStrategy::Atomic);
    }

    #[test]
    fn rejects_defaults_with_overrides() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: gw
  defaults:
    limits: {}
  overrides:
    limits: {}
"#,
        );
        assert_eq!(policy.to_core(), Err(InvalidPolicy::DefaultsAndOverrides));
    }

    #[test]
    fn rejects_implicit_with_explicit_rules() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: gw
  limits:
    a:
      rates:
        - limit: 1
          window: 1s
  overrides:
    limits:
      b:
        rates:
          - limit: 1
            window: 1s
"#,
        );
        assert_eq!(
            policy.to_core(),
            Err(InvalidPolicy::ImplicitDefaultsAndOverrides)
        );
    }

    #[test]
    fn rejects_incomplete_target_refs() {
        let policy = rate_limit_policy(
            r#"
apiVersion: kuadrant.io/v1
kind: RateLimitPolicy
metadata:
  namespace: ns
  name: rlp
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: ""
"#,
        );
        assert_eq!(policy.to_core(), Err(InvalidPolicy::IncompleteTargetRef));
    }

    #[test]
    fn keys_auth_rules_by_phase() {
        let policy: AuthPolicy = serde_yaml::from_str(
            r#"
apiVersion: kuadrant.io/v1
kind: AuthPolicy
metadata:
  namespace: ns
  name: auth
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: HTTPRoute
    name: route
  rules:
    authentication:
      api-key:
        apiKey:
          selector: {}
    authorization:
      admins:
        opa:
          rego: allow = true
    response:
      unauthorized:
        code: 403
      success:
        headers:
          x-user:
            plain:
              value: user
"#,
        )
        .expect("valid policy");

        let core = PolicyResource::from(policy)
            .to_core()
            .expect("policy is valid");
        assert_eq!(
            core.rules.keys().map(String::as_str).collect::<Vec<_>>(),
            [
                "authentication#api-key",
                "authorization#admins",
                "response.success.headers#x-user",
                "response.unauthorized",
            ]
        );
    }
}
