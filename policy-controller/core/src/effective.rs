//! Merges the policies attached along each path of a topology.
//!
//! Paths are folded from the leaf towards the root, so that a policy attached
//! closer to a route is seen before one attached to a broader scope. Plain
//! (`defaults`) rules only fill keys that nothing nearer has claimed, while
//! `overrides` rules replace whatever has been contributed so far; the
//! broadest override therefore wins.

use crate::{
    id::GroupKind,
    policy::{MergeStrategy, Policy, Precedence, Rule},
    topology::{kinds, Targetable, Topology},
};
use std::collections::{BTreeMap, BTreeSet};

/// The merged result of the policies of one kind along one path.
#[derive(Clone, Debug)]
pub struct EffectivePolicy {
    /// Targetables from the root to the leaf.
    pub path: Vec<Targetable>,

    /// Locators of the policies attached along the path.
    pub policies: Vec<String>,

    pub rules: BTreeMap<String, EffectiveRule>,

    /// Policies whose rules were dropped as a whole by an atomic merge, mapped
    /// to the policies that contributed in their place. An empty set means the
    /// overrider could not be attributed.
    pub contested: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveRule {
    pub rule: Rule,
    pub source: String,
}

/// Computes one effective policy per root-to-leaf path that carries at least
/// one policy of the given kind.
pub fn effective_policies(topology: &Topology, kind: &GroupKind) -> Vec<EffectivePolicy> {
    let mut effective = Vec::new();
    for path in topology.node_paths() {
        // Leaf first; within a node, oldest first.
        let along = path
            .iter()
            .rev()
            .map(|&n| {
                topology
                    .node_policies(n)
                    .filter(|p| p.id.group_kind == *kind)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        if along.iter().all(Vec::is_empty) {
            continue;
        }

        let mut merge = Merge::default();
        for at_node in &along {
            for policy in at_node
                .iter()
                .filter(|p| p.precedence == Precedence::Defaults)
            {
                merge.defaults(policy);
            }
            // Applied newest first so that the oldest override has the last
            // word at a node.
            for policy in at_node
                .iter()
                .rev()
                .filter(|p| p.precedence == Precedence::Overrides)
            {
                merge.overrides(policy);
            }
        }

        let policies = along
            .iter()
            .rev()
            .flat_map(|at_node| at_node.iter().map(|p| p.locator()))
            .collect();
        effective.push(EffectivePolicy {
            path: path.iter().map(|&n| topology.node(n).clone()).collect(),
            policies,
            rules: merge.rules,
            contested: merge.contested,
        });
    }
    effective
}

#[derive(Default)]
struct Merge {
    rules: BTreeMap<String, EffectiveRule>,
    contested: BTreeMap<String, BTreeSet<String>>,
}

// === impl Merge ===

impl Merge {
    fn defaults(&mut self, policy: &Policy) {
        let source = policy.locator();
        match policy.strategy {
            MergeStrategy::Merge => {
                for (key, rule) in &policy.rules {
                    self.rules
                        .entry(key.clone())
                        .or_insert_with(|| EffectiveRule {
                            rule: rule.clone(),
                            source: source.clone(),
                        });
                }
            }
            MergeStrategy::Atomic => {
                if self.rules.is_empty() {
                    self.insert_all(policy, &source);
                } else if !policy.rules.is_empty() {
                    let winners = self.sources();
                    self.contested.entry(source).or_default().extend(winners);
                }
            }
        }
    }

    fn overrides(&mut self, policy: &Policy) {
        let source = policy.locator();
        if policy.strategy == MergeStrategy::Atomic {
            for dropped in self.sources() {
                if dropped != source {
                    self.contested
                        .entry(dropped)
                        .or_default()
                        .insert(source.clone());
                }
            }
            self.rules.clear();
        }
        self.insert_all(policy, &source);
    }

    fn insert_all(&mut self, policy: &Policy, source: &str) {
        for (key, rule) in &policy.rules {
            self.rules.insert(
                key.clone(),
                EffectiveRule {
                    rule: rule.clone(),
                    source: source.to_string(),
                },
            );
        }
    }

    fn sources(&self) -> BTreeSet<String> {
        self.rules.values().map(|r| r.source.clone()).collect()
    }
}

// === impl EffectivePolicy ===

impl EffectivePolicy {
    /// The gateway this path runs through, if any.
    pub fn gateway(&self) -> Option<&Targetable> {
        self.path.iter().find(|t| kinds::is_gateway(t))
    }

    pub fn gateway_class(&self) -> Option<&Targetable> {
        let gateway_class = kinds::gateway_class();
        self.path.iter().find(|t| t.is_kind(&gateway_class))
    }

    pub fn listener(&self) -> Option<&Targetable> {
        let gateway = kinds::gateway();
        self.path
            .iter()
            .find(|t| t.is_kind(&gateway) && t.id().section.is_some())
    }

    pub fn route(&self) -> Option<&Targetable> {
        let routes = kinds::route_kinds();
        self.path
            .iter()
            .find(|t| routes.iter().any(|kind| t.is_kind(kind)))
    }

    /// Whether the path reaches a route through a gateway, i.e. whether its
    /// rules can apply to traffic.
    pub fn carries_traffic(&self) -> bool {
        self.gateway().is_some() && self.route().is_some()
    }

    /// Whether traffic actually flows along the path: its listener is
    /// programmed and the controller of the gateway's class has accepted the
    /// route for that gateway.
    pub fn is_ready(&self) -> bool {
        let (Some(class), Some(gateway), Some(listener), Some(route)) = (
            self.gateway_class(),
            self.gateway(),
            self.listener(),
            self.route(),
        ) else {
            return false;
        };
        let Some(class) = class.data::<kinds::GatewayClassData>() else {
            return false;
        };
        listener
            .data::<kinds::ListenerData>()
            .is_some_and(|l| l.programmed)
            && route.data::<kinds::RouteData>().is_some_and(|r| {
                r.is_accepted_by(
                    gateway.id(),
                    &class.controller_name,
                    route.id().namespace.as_deref(),
                )
            })
    }

    pub fn includes(&self, policy_locator: &str) -> bool {
        self.policies.iter().any(|p| p == policy_locator)
    }

    /// Returns the rule keys contributed by the given policy.
    pub fn keys_from<'e>(&'e self, policy_locator: &'e str) -> impl Iterator<Item = &'e str> {
        self.rules
            .iter()
            .filter(move |(_, r)| r.source == policy_locator)
            .map(|(k, _)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        id::{ObjectId, TargetRef},
        topology::kinds::*,
    };
    use chrono::{TimeZone, Utc};
    use maplit::btreemap;
    use serde_json::json;

    const NS: &str = "ns";

    fn rate_limit_policy() -> GroupKind {
        GroupKind::new("kuadrant.io", "RateLimitPolicy")
    }

    fn policy(name: &str, target: TargetRef, rules: &[(&str, i64)]) -> Policy {
        let mut policy = Policy::new(
            ObjectId::namespaced(rate_limit_policy(), NS, name),
            vec![target],
        );
        policy.rules = rules
            .iter()
            .map(|(k, v)| (k.to_string(), Rule(json!(v))))
            .collect();
        policy
    }

    fn gateway_ref() -> TargetRef {
        TargetRef::new(GATEWAY_API_GROUP, "Gateway", "gw")
    }

    fn route_ref() -> TargetRef {
        TargetRef::new(GATEWAY_API_GROUP, "HTTPRoute", "route")
    }

    const CONTROLLER: &str = "example.com/controller";

    /// `gc -> gw -> gw#http -> route -> svc`
    fn topology(policies: Vec<Policy>) -> Topology {
        topology_with(ListenerData::programmed("http"), true, policies)
    }

    fn topology_with(listener: ListenerData, accepted: bool, policies: Vec<Policy>) -> Topology {
        let mut targetables = vec![gateway_class_targetable("gc", CONTROLLER)];
        targetables.extend(gateway_targetables(
            NS,
            "gw",
            GatewayData {
                class_name: "gc".to_string(),
                listeners: vec![listener],
            },
        ));
        targetables.push(route_targetable(
            http_route(),
            NS,
            "route",
            RouteData {
                parents: vec![ParentRef::new("gw")],
                backends: vec![BackendRef::new("svc")],
                statuses: vec![RouteParentStatus {
                    parent: ParentRef::new("gw"),
                    controller_name: CONTROLLER.to_string(),
                    accepted,
                }],
            },
        ));
        targetables.push(service_targetable(NS, "svc"));
        Topology::builder()
            .with_targetables(targetables)
            .with_links(links())
            .with_policies(policies)
            .build()
    }

    fn sources(ep: &EffectivePolicy) -> BTreeMap<&str, &str> {
        ep.rules
            .iter()
            .map(|(k, r)| (k.as_str(), r.source.as_str()))
            .collect()
    }

    #[test]
    fn paths_without_policies_are_skipped() {
        let topology = topology(vec![]);
        assert!(effective_policies(&topology, &rate_limit_policy()).is_empty());
    }

    #[test]
    fn nearest_plain_policy_wins() {
        let topology = topology(vec![
            policy("gw-policy", gateway_ref(), &[("k1", 1), ("k2", 2)]),
            policy("route-policy", route_ref(), &[("k1", 10)]),
        ]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(effective.len(), 1);
        assert_eq!(
            sources(&effective[0]),
            btreemap! {
                "k1" => "ratelimitpolicy:ns/route-policy",
                "k2" => "ratelimitpolicy:ns/gw-policy",
            }
        );
        assert_eq!(effective[0].rules["k1"].rule, Rule(json!(10)));
        assert_eq!(
            effective[0].policies,
            [
                "ratelimitpolicy:ns/gw-policy",
                "ratelimitpolicy:ns/route-policy"
            ]
        );
        assert!(effective[0].carries_traffic());
        assert!(effective[0].is_ready());
        assert_eq!(
            effective[0].gateway().map(Targetable::locator),
            Some("gateway:ns/gw")
        );
        assert_eq!(
            effective[0].listener().map(Targetable::locator),
            Some("gateway:ns/gw#http")
        );
    }

    #[test]
    fn paths_through_unready_listeners_or_rejected_routes() {
        let policies = || vec![policy("route-policy", route_ref(), &[("k1", 1)])];

        let topology = topology_with(ListenerData::new("http"), true, policies());
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert!(effective[0].carries_traffic());
        assert!(!effective[0].is_ready(), "listener is not programmed");

        let topology = topology_with(ListenerData::programmed("http"), false, policies());
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert!(!effective[0].is_ready(), "route was rejected");
    }

    #[test]
    fn gateway_override_beats_route_policy() {
        let mut a = policy("a", gateway_ref(), &[("k1", 5)]);
        a.precedence = Precedence::Overrides;
        let b = policy("b", route_ref(), &[("k1", 7)]);

        let topology = topology(vec![a, b]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(effective.len(), 1);
        let k1 = &effective[0].rules["k1"];
        assert_eq!(k1.source, "ratelimitpolicy:ns/a");
        assert_eq!(k1.rule, Rule(json!(5)));
    }

    #[test]
    fn broadest_override_wins() {
        let mut gw = policy("gw-override", gateway_ref(), &[("k1", 1)]);
        gw.precedence = Precedence::Overrides;
        let mut route = policy("route-override", route_ref(), &[("k1", 2), ("k2", 2)]);
        route.precedence = Precedence::Overrides;

        let topology = topology(vec![gw, route]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(
            sources(&effective[0]),
            btreemap! {
                "k1" => "ratelimitpolicy:ns/gw-override",
                "k2" => "ratelimitpolicy:ns/route-override",
            }
        );
    }

    #[test]
    fn atomic_defaults_lose_as_a_whole() {
        let mut gw = policy("gw-atomic", gateway_ref(), &[("k1", 1), ("k2", 2)]);
        gw.strategy = MergeStrategy::Atomic;
        let route = policy("route-policy", route_ref(), &[("k1", 10)]);

        let topology = topology(vec![gw, route]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(
            sources(&effective[0]),
            btreemap! { "k1" => "ratelimitpolicy:ns/route-policy" }
        );
        assert_eq!(
            effective[0].contested,
            btreemap! {
                "ratelimitpolicy:ns/gw-atomic".to_string() => ["ratelimitpolicy:ns/route-policy".to_string()].into(),
            }
        );
    }

    #[test]
    fn atomic_override_drops_everything_below() {
        let mut gw = policy("gw-atomic", gateway_ref(), &[("k1", 1)]);
        gw.precedence = Precedence::Overrides;
        gw.strategy = MergeStrategy::Atomic;
        let route = policy("route-policy", route_ref(), &[("k2", 10)]);

        let topology = topology(vec![gw, route]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(
            sources(&effective[0]),
            btreemap! { "k1" => "ratelimitpolicy:ns/gw-atomic" }
        );
        assert_eq!(
            effective[0].contested,
            btreemap! {
                "ratelimitpolicy:ns/route-policy".to_string() => ["ratelimitpolicy:ns/gw-atomic".to_string()].into(),
            }
        );
    }

    #[test]
    fn older_policy_wins_at_the_same_node() {
        let mut older = policy("zz-older", route_ref(), &[("k1", 1)]);
        older.creation_timestamp = Utc.timestamp_opt(1_000, 0).single();
        let mut newer = policy("aa-newer", route_ref(), &[("k1", 2)]);
        newer.creation_timestamp = Utc.timestamp_opt(2_000, 0).single();

        let topology = topology(vec![newer.clone(), older.clone()]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(effective[0].rules["k1"].source, "ratelimitpolicy:ns/zz-older");

        older.precedence = Precedence::Overrides;
        newer.precedence = Precedence::Overrides;
        let topology = self::topology(vec![newer, older]);
        let effective = effective_policies(&topology, &rate_limit_policy());
        assert_eq!(effective[0].rules["k1"].source, "ratelimitpolicy:ns/zz-older");
    }

    #[test]
    fn other_kinds_are_ignored() {
        let mut other = policy("auth", gateway_ref(), &[("k1", 1)]);
        other.id.group_kind = GroupKind::new("kuadrant.io", "AuthPolicy");
        let topology = topology(vec![other]);
        assert!(effective_policies(&topology, &rate_limit_policy()).is_empty());
    }
}
