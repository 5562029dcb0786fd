//! Decides whether a policy's rules are in effect and have been propagated to
//! the components that enforce them.

use crate::conditions::PolicyError;
use gateway_policy_controller_core::{
    auth_policy_kind,
    effective::{effective_policies, EffectivePolicy},
    rate_limit_policy_kind,
    topology::kinds::GatewayClassData,
    GroupKind, Policy, Readiness, ReadinessSignals, Targetable, Topology,
};
use gateway_policy_controller_k8s_api::{
    downstream::{EnvoyExtensionPolicy, EnvoyFilter, EnvoyPatchPolicy, WasmPlugin},
    kuadrant::{Authorino, Limitador},
    policy::group_kind,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Gateway class controller names, by the gateway implementation that
/// enforces policies for them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayControllers {
    pub istio: Vec<String>,
    pub envoy_gateway: Vec<String>,
}

/// A gateway implementation and the downstream objects it is configured with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GatewayProvider {
    Istio,
    EnvoyGateway,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Enforcement {
    Full,

    /// Some of the policy's rules were overridden by other policies.
    Partial,
}

/// Computes the enforcement status of the policies of one topology snapshot.
pub struct Engine<'t, S> {
    topology: &'t Topology,
    effective: HashMap<GroupKind, Vec<EffectivePolicy>>,
    signals: S,
    umbrella: bool,
    controllers: &'t GatewayControllers,
}

// === impl GatewayControllers ===

impl Default for GatewayControllers {
    fn default() -> Self {
        Self {
            istio: vec!["istio.io/gateway-controller".to_string()],
            envoy_gateway: vec!["gateway.envoyproxy.io/gatewayclass-controller".to_string()],
        }
    }
}

impl GatewayControllers {
    pub fn provider(&self, controller_name: &str) -> Option<GatewayProvider> {
        if self.istio.iter().any(|c| c == controller_name) {
            Some(GatewayProvider::Istio)
        } else if self.envoy_gateway.iter().any(|c| c == controller_name) {
            Some(GatewayProvider::EnvoyGateway)
        } else {
            None
        }
    }
}

// === impl GatewayProvider ===

impl GatewayProvider {
    pub fn components(self) -> [GroupKind; 2] {
        match self {
            Self::Istio => [group_kind::<EnvoyFilter>(), group_kind::<WasmPlugin>()],
            Self::EnvoyGateway => [
                group_kind::<EnvoyPatchPolicy>(),
                group_kind::<EnvoyExtensionPolicy>(),
            ],
        }
    }
}

// === impl Engine ===

impl<'t, S: ReadinessSignals> Engine<'t, S> {
    /// Resolves the effective policies of every policy kind in the topology.
    pub fn new(
        topology: &'t Topology,
        signals: S,
        umbrella: bool,
        controllers: &'t GatewayControllers,
    ) -> Self {
        let kinds = topology
            .policies()
            .map(|p| p.id.group_kind.clone())
            .collect::<BTreeSet<_>>();
        let effective = kinds
            .into_iter()
            .map(|kind| {
                let effective = effective_policies(topology, &kind);
                (kind, effective)
            })
            .collect();
        Self {
            topology,
            effective,
            signals,
            umbrella,
            controllers,
        }
    }

    pub fn enforced(&self, policy: &Policy) -> Result<Enforcement, PolicyError> {
        let kind = policy.id.kind().to_string();
        if !self.umbrella {
            return Err(PolicyError::MissingDependency("kuadrant".to_string()));
        }

        // Only paths whose listener is programmed and whose route was
        // accepted by the gateway count.
        let locator = policy.locator();
        let mut overridden = false;
        let mut overriders = BTreeSet::new();
        // Keyed by locator so that components are reported in a stable order.
        let mut gateways = BTreeMap::<&str, (&Targetable, Option<&str>)>::new();
        for ep in self
            .effective
            .get(&policy.id.group_kind)
            .into_iter()
            .flatten()
            .filter(|ep| ep.is_ready() && ep.includes(&locator))
        {
            for key in policy.rules.keys() {
                match ep.rules.get(key) {
                    Some(rule) if rule.source == locator => {
                        if let Some(gateway) = ep.gateway() {
                            let controller = ep
                                .gateway_class()
                                .and_then(|gc| gc.data::<GatewayClassData>())
                                .map(|gc| gc.controller_name.as_str());
                            gateways.insert(gateway.locator(), (gateway, controller));
                        }
                    }
                    Some(rule) => {
                        overridden = true;
                        overriders.insert(rule.source.clone());
                    }
                    None => {
                        overridden = true;
                        if let Some(contested) = ep.contested.get(&locator) {
                            overriders.extend(contested.iter().cloned());
                        }
                    }
                }
            }
        }

        if gateways.is_empty() {
            if !overridden {
                return Err(PolicyError::NoRoutes { kind });
            }
            let overriders = overriders
                .iter()
                .filter_map(|l| self.topology.policy(l))
                .map(|p| p.id.namespaced_name())
                .collect();
            return Err(PolicyError::Overridden { kind, overriders });
        }

        let mut pending = Vec::new();
        if let Some(system) = system_component(&policy.id.group_kind) {
            let ready = !self.signals.modified(&system, None)
                && match self.signals.readiness(&system, None) {
                    Readiness::Absent => {
                        return Err(PolicyError::MissingDependency(
                            system.kind.to_ascii_lowercase(),
                        ))
                    }
                    readiness => readiness.is_ready(),
                };
            if !ready {
                pending.push(system.kind);
            }
        }

        for (gateway, controller) in gateways.into_values() {
            let name = gateway.id().namespaced_name();
            let Some(provider) = controller.and_then(|c| self.controllers.provider(c)) else {
                tracing::debug!(gateway = %name, ?controller, "Unsupported gateway controller");
                pending.push(format!("Gateway ({name})"));
                continue;
            };
            for component in provider.components() {
                let id = Some(gateway.id());
                let ready = !self.signals.modified(&component, id)
                    && self.signals.readiness(&component, id).is_ready();
                if !ready {
                    pending.push(format!("{} ({name})", component.kind));
                }
            }
        }

        if !pending.is_empty() {
            return Err(PolicyError::OutOfSync {
                kind,
                components: pending,
            });
        }
        Ok(if overridden {
            Enforcement::Partial
        } else {
            Enforcement::Full
        })
    }
}

/// The component-wide deployment that enforces policies of a kind.
fn system_component(kind: &GroupKind) -> Option<GroupKind> {
    if *kind == rate_limit_policy_kind() {
        Some(group_kind::<Limitador>())
    } else if *kind == auth_policy_kind() {
        Some(group_kind::<Authorino>())
    } else {
        None
    }
}
