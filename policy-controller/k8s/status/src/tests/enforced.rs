use super::*;
use crate::{Enforcement, Engine, GatewayControllers, PolicyError};
use gateway_policy_controller_core::{auth_policy_kind, MergeStrategy, CORE_GROUP};
use gateway_policy_controller_k8s_api::{
    downstream::{EnvoyExtensionPolicy, EnvoyPatchPolicy},
    kuadrant::Authorino,
};
use pretty_assertions::assert_eq;

const ENVOY_GATEWAY: &str = "gateway.envoyproxy.io/gatewayclass-controller";

fn enforced(
    topology: &Topology,
    signals: &Signals,
    name: &str,
) -> Result<Enforcement, PolicyError> {
    let controllers = GatewayControllers::default();
    let engine = Engine::new(topology, signals, true, &controllers);
    let locator = ObjectId::namespaced(rate_limit_policy_kind(), NS, name).locator();
    let policy = topology.policy(&locator).expect("policy must be attached");
    engine.enforced(policy)
}

#[test]
fn enforced_when_components_are_ready() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let signals = Signals::ready(&["route-gw"]);
    assert_eq!(enforced(&topology, &signals, "rlp"), Ok(Enforcement::Full));
}

#[test]
fn overridden_policy_names_overrider() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![
            overrides(policy("gw-policy", gateway_ref("route-gw"), &["k1"])),
            policy("route-policy", route_ref("route"), &["k1"]),
        ],
    );
    let signals = Signals::ready(&["route-gw"]);

    assert_eq!(
        enforced(&topology, &signals, "route-policy"),
        Err(PolicyError::Overridden {
            kind: "RateLimitPolicy".to_string(),
            overriders: vec!["ns/gw-policy".to_string()],
        })
    );
    assert_eq!(
        enforced(&topology, &signals, "gw-policy"),
        Ok(Enforcement::Full)
    );
}

#[test]
fn partially_overridden_policy_is_enforced() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![
            overrides(policy("gw-policy", gateway_ref("route-gw"), &["k1"])),
            policy("route-policy", route_ref("route"), &["k1", "k2"]),
        ],
    );
    let signals = Signals::ready(&["route-gw"]);
    assert_eq!(
        enforced(&topology, &signals, "route-policy"),
        Ok(Enforcement::Partial)
    );
}

#[test]
fn atomic_override_names_contested_overrider() {
    let mut gw = overrides(policy("gw-atomic", gateway_ref("route-gw"), &["k1"]));
    gw.strategy = MergeStrategy::Atomic;
    let topology = topology(
        ISTIO,
        &["route"],
        vec![gw, policy("route-policy", route_ref("route"), &["k2"])],
    );
    let signals = Signals::ready(&["route-gw"]);
    assert_eq!(
        enforced(&topology, &signals, "route-policy"),
        Err(PolicyError::Overridden {
            kind: "RateLimitPolicy".to_string(),
            overriders: vec!["ns/gw-atomic".to_string()],
        })
    );
}

#[test]
fn modified_component_is_out_of_sync() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let mut signals = Signals::ready(&["route-gw"]);
    signals
        .modified
        .insert((group_kind::<WasmPlugin>(), Some(gateway_id("route-gw"))));

    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::OutOfSync {
            kind: "RateLimitPolicy".to_string(),
            components: vec!["WasmPlugin (ns/route-gw)".to_string()],
        })
    );
}

#[test]
fn every_affected_gateway_is_checked() {
    // The service is reached through both gateways.
    let topology = topology(
        ISTIO,
        &["a", "b"],
        vec![policy("rlp", TargetRef::new(CORE_GROUP, "Service", "svc"), &["k1"])],
    );
    let mut signals = Signals::ready(&["a-gw"]);
    signals.set(
        group_kind::<EnvoyFilter>(),
        Some(gateway_id("b-gw")),
        Readiness::NotReady,
    );

    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::OutOfSync {
            kind: "RateLimitPolicy".to_string(),
            components: vec![
                "EnvoyFilter (ns/b-gw)".to_string(),
                "WasmPlugin (ns/b-gw)".to_string(),
            ],
        })
    );
}

#[test]
fn rate_limiter_must_be_installed_and_ready() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let mut signals = Signals::ready(&["route-gw"]);

    signals.set(group_kind::<Limitador>(), None, Readiness::NotReady);
    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::OutOfSync {
            kind: "RateLimitPolicy".to_string(),
            components: vec!["Limitador".to_string()],
        })
    );

    signals.set(group_kind::<Limitador>(), None, Readiness::Absent);
    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::MissingDependency("limitador".to_string()))
    );
}

#[test]
fn envoy_gateway_components() {
    let topology = topology(
        ENVOY_GATEWAY,
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let mut signals = Signals::ready(&[]);
    signals.set(
        group_kind::<EnvoyPatchPolicy>(),
        Some(gateway_id("route-gw")),
        Readiness::Ready,
    );
    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::OutOfSync {
            kind: "RateLimitPolicy".to_string(),
            components: vec!["EnvoyExtensionPolicy (ns/route-gw)".to_string()],
        })
    );

    signals.set(
        group_kind::<EnvoyExtensionPolicy>(),
        Some(gateway_id("route-gw")),
        Readiness::Ready,
    );
    assert_eq!(enforced(&topology, &signals, "rlp"), Ok(Enforcement::Full));
}

#[test]
fn unsupported_gateway_controller_is_pending() {
    let topology = topology(
        "example.com/gateway-controller",
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let signals = Signals::ready(&["route-gw"]);
    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::OutOfSync {
            kind: "RateLimitPolicy".to_string(),
            components: vec!["Gateway (ns/route-gw)".to_string()],
        })
    );
}

#[test]
fn listener_policy_reaches_routes_attached_to_the_gateway() {
    // The route names the gateway without a section, so it is attached to
    // the listener.
    let topology = topology(
        ISTIO,
        &["route"],
        vec![policy(
            "listener",
            gateway_ref("route-gw").with_section("http"),
            &["k1"],
        )],
    );
    let signals = Signals::ready(&["route-gw"]);
    assert_eq!(
        enforced(&topology, &signals, "listener"),
        Ok(Enforcement::Full)
    );
}

#[test]
fn policy_without_routes() {
    let topology = topology(
        ISTIO,
        &[],
        vec![policy("rlp", TargetRef::new(CORE_GROUP, "Service", "svc"), &["k1"])],
    );
    let signals = Signals::ready(&[]);
    assert_eq!(
        enforced(&topology, &signals, "rlp"),
        Err(PolicyError::NoRoutes {
            kind: "RateLimitPolicy".to_string(),
        })
    );
}

#[test]
fn rejected_routes_and_unprogrammed_listeners_carry_no_traffic() {
    let signals = Signals::ready(&["route-gw"]);
    let policies = || vec![policy("rlp", route_ref("route"), &["k1"])];

    let rejected = topology_with(ISTIO, &["route"], true, false, policies());
    assert_eq!(
        enforced(&rejected, &signals, "rlp"),
        Err(PolicyError::NoRoutes {
            kind: "RateLimitPolicy".to_string(),
        })
    );

    let unprogrammed = topology_with(ISTIO, &["route"], false, true, policies());
    assert_eq!(
        enforced(&unprogrammed, &signals, "rlp"),
        Err(PolicyError::NoRoutes {
            kind: "RateLimitPolicy".to_string(),
        })
    );
}

#[test]
fn auth_policies_depend_on_authorino() {
    let mut auth = policy("auth", route_ref("route"), &["authentication#api-key"]);
    auth.id.group_kind = auth_policy_kind();
    let topology = topology(ISTIO, &["route"], vec![auth]);
    let locator = ObjectId::namespaced(auth_policy_kind(), NS, "auth").locator();
    let policy = topology.policy(&locator).expect("policy must be attached");
    let controllers = GatewayControllers::default();

    // Limitador is ready but irrelevant to auth policies.
    let mut signals = Signals::ready(&["route-gw"]);
    let engine = Engine::new(&topology, &signals, true, &controllers);
    assert_eq!(
        engine.enforced(policy),
        Err(PolicyError::MissingDependency("authorino".to_string()))
    );

    signals.set(group_kind::<Authorino>(), None, Readiness::NotReady);
    let engine = Engine::new(&topology, &signals, true, &controllers);
    assert_eq!(
        engine.enforced(policy),
        Err(PolicyError::OutOfSync {
            kind: "AuthPolicy".to_string(),
            components: vec!["Authorino".to_string()],
        })
    );

    signals.set(group_kind::<Authorino>(), None, Readiness::Ready);
    let engine = Engine::new(&topology, &signals, true, &controllers);
    assert_eq!(engine.enforced(policy), Ok(Enforcement::Full));
}

#[test]
fn missing_umbrella() {
    let topology = topology(
        ISTIO,
        &["route"],
        vec![policy("rlp", route_ref("route"), &["k1"])],
    );
    let signals = Signals::ready(&["route-gw"]);
    let controllers = GatewayControllers::default();
    let engine = Engine::new(&topology, &signals, false, &controllers);
    let policy = topology.policies().next().expect("policy must be attached");
    assert_eq!(
        engine.enforced(policy),
        Err(PolicyError::MissingDependency("kuadrant".to_string()))
    );
}
