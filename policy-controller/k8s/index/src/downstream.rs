//! Tracks the objects through which policies are realized by gateway
//! providers and answers whether they have caught up.

use crate::ResourceId;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use gateway_policy_controller_core::{
    topology::kinds, GroupKind, ObjectId, Readiness, ReadinessSignals,
};
use gateway_policy_controller_k8s_api::{
    downstream::{
        self, AncestorPolicyStatus, EnvoyExtensionPolicy, EnvoyFilter, EnvoyPatchPolicy,
        PolicyTargetReference, WasmPlugin,
    },
    is_condition_true,
    kuadrant::{self, Authorino, Limitador},
    policy::group_kind,
    ResourceExt,
};

const PROGRAMMED: &str = "Programmed";
const ACCEPTED: &str = "Accepted";

#[derive(Clone, Debug, Default)]
pub struct DownstreamIndex {
    /// System deployments, keyed by kind, recording whether each is ready.
    systems: HashMap<GroupKind, HashMap<ResourceId, bool>>,

    /// Gateway-scoped objects, keyed by kind.
    objects: HashMap<GroupKind, HashMap<ResourceId, DownstreamObject>>,

    /// The controller of each gateway's class, used to select the ancestor
    /// status reported by that controller.
    gateway_controllers: HashMap<ObjectId, String>,

    modified: HashSet<(GroupKind, Option<ObjectId>)>,
}

#[derive(Clone, Debug, PartialEq)]
struct DownstreamObject {
    generation: Option<i64>,
    targets: Vec<PolicyTargetReference>,
    status: Option<AncestorPolicyStatus>,
}

// === impl DownstreamIndex ===

impl DownstreamIndex {
    /// Flags an object as written during the current pass. Its readiness is
    /// considered stale until it reports ready again.
    pub fn mark_modified(&mut self, kind: GroupKind, gateway: Option<ObjectId>) {
        self.modified.insert((kind, gateway));
    }

    /// Records the controller of each gateway's class. Flags of objects that
    /// become ready under the new controllers are cleared.
    pub(crate) fn set_gateway_controllers(&mut self, controllers: HashMap<ObjectId, String>) {
        if self.gateway_controllers == controllers {
            return;
        }
        self.gateway_controllers = controllers;
        self.clear_ready_flags(None);
    }

    pub(crate) fn apply_limitador(&mut self, limitador: Limitador) {
        let ready = kuadrant::is_ready(limitador.status.as_ref());
        self.apply_system(group_kind::<Limitador>(), resource_id(&limitador), ready);
    }

    pub(crate) fn apply_authorino(&mut self, authorino: Authorino) {
        let ready = kuadrant::is_ready(authorino.status.as_ref());
        self.apply_system(group_kind::<Authorino>(), resource_id(&authorino), ready);
    }

    pub(crate) fn delete_system(&mut self, kind: &GroupKind, id: &ResourceId) {
        if let Some(objects) = self.systems.get_mut(kind) {
            objects.remove(id);
        }
    }

    pub(crate) fn apply_envoy_filter(&mut self, filter: EnvoyFilter) {
        let object = DownstreamObject {
            generation: filter.metadata.generation,
            targets: filter.spec.target_refs.clone().unwrap_or_default(),
            status: None,
        };
        self.apply_object(group_kind::<EnvoyFilter>(), resource_id(&filter), object);
    }

    pub(crate) fn apply_wasm_plugin(&mut self, plugin: WasmPlugin) {
        let object = DownstreamObject {
            generation: plugin.metadata.generation,
            targets: plugin.spec.target_refs.clone().unwrap_or_default(),
            status: None,
        };
        self.apply_object(group_kind::<WasmPlugin>(), resource_id(&plugin), object);
    }

    pub(crate) fn apply_envoy_patch_policy(&mut self, policy: EnvoyPatchPolicy) {
        let id = resource_id(&policy);
        let object = DownstreamObject {
            generation: policy.metadata.generation,
            targets: vec![policy.spec.target_ref],
            status: policy.status,
        };
        self.apply_object(group_kind::<EnvoyPatchPolicy>(), id, object);
    }

    pub(crate) fn apply_envoy_extension_policy(&mut self, policy: EnvoyExtensionPolicy) {
        let id = resource_id(&policy);
        let object = DownstreamObject {
            generation: policy.metadata.generation,
            targets: policy.spec.target_refs,
            status: policy.status,
        };
        self.apply_object(group_kind::<EnvoyExtensionPolicy>(), id, object);
    }

    pub(crate) fn delete_object(&mut self, kind: &GroupKind, id: &ResourceId) {
        if let Some(objects) = self.objects.get_mut(kind) {
            objects.remove(id);
        }
    }

    pub(crate) fn len(&self, kind: &GroupKind, namespace: &str) -> usize {
        let systems = self
            .systems
            .get(kind)
            .map_or(0, |objs| objs.keys().filter(|id| id.namespace == namespace).count());
        let objects = self
            .objects
            .get(kind)
            .map_or(0, |objs| objs.keys().filter(|id| id.namespace == namespace).count());
        systems + objects
    }

    fn apply_system(&mut self, kind: GroupKind, id: ResourceId, ready: bool) {
        if ready {
            self.modified.remove(&(kind.clone(), None));
        }
        self.systems.entry(kind).or_default().insert(id, ready);
    }

    fn apply_object(&mut self, kind: GroupKind, id: ResourceId, object: DownstreamObject) {
        self.objects
            .entry(kind.clone())
            .or_default()
            .insert(id, object);
        self.clear_ready_flags(Some(&kind));
    }

    /// Clears the flags of every gateway whose view of the kind (or of any
    /// kind) is now ready.
    fn clear_ready_flags(&mut self, kind: Option<&GroupKind>) {
        let ready = self
            .modified
            .iter()
            .filter(|(k, gw)| gw.is_some() && kind.map_or(true, |kind| k == kind))
            .filter(|(k, gw)| self.object_readiness(k, gw.as_ref()).is_ready())
            .cloned()
            .collect::<Vec<_>>();
        for key in ready {
            self.modified.remove(&key);
        }
    }

    fn system_readiness(&self, kind: &GroupKind) -> Readiness {
        match self.systems.get(kind) {
            Some(objects) if !objects.is_empty() => {
                if objects.values().any(|ready| *ready) {
                    Readiness::Ready
                } else {
                    Readiness::NotReady
                }
            }
            _ => Readiness::Absent,
        }
    }

    fn object_readiness(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> Readiness {
        let Some(gateway) = gateway else {
            return Readiness::Absent;
        };
        let gw_ns = gateway.namespace.as_deref().unwrap_or_default();

        let mut targeting = self
            .objects
            .get(kind)
            .into_iter()
            .flatten()
            .filter(|(id, obj)| {
                obj.targets.iter().any(|t| {
                    t.kind == kinds::gateway().kind
                        && t.name == gateway.name
                        && id.namespace == gw_ns
                })
            })
            .peekable();
        if targeting.peek().is_none() {
            return Readiness::Absent;
        }

        let Some(condition) = required_condition(kind) else {
            return Readiness::Ready;
        };
        let controller = self
            .gateway_controllers
            .get(gateway)
            .map(String::as_str)
            .unwrap_or_default();
        let ready = targeting.any(|(id, obj)| {
            let conditions = downstream::ancestor_conditions(
                obj.status.as_ref(),
                controller,
                gw_ns,
                &gateway.name,
                &id.namespace,
            );
            // A condition observed for an older generation is stale.
            is_condition_true(conditions, condition)
                && conditions
                    .iter()
                    .filter(|c| c.type_ == condition)
                    .all(|c| match (c.observed_generation, obj.generation) {
                        (Some(observed), Some(generation)) => observed >= generation,
                        _ => true,
                    })
        });
        if ready {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }
}

impl ReadinessSignals for DownstreamIndex {
    fn readiness(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> Readiness {
        if is_system_kind(kind) {
            return self.system_readiness(kind);
        }
        self.object_readiness(kind, gateway)
    }

    fn modified(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> bool {
        self.modified.contains(&(kind.clone(), gateway.cloned()))
    }
}

fn is_system_kind(kind: &GroupKind) -> bool {
    *kind == group_kind::<Limitador>() || *kind == group_kind::<Authorino>()
}

/// The condition a gateway-scoped ancestor status must report for an object
/// of the kind to be ready. Kinds without one are ready once they exist.
fn required_condition(kind: &GroupKind) -> Option<&'static str> {
    if *kind == group_kind::<EnvoyPatchPolicy>() {
        Some(PROGRAMMED)
    } else if *kind == group_kind::<EnvoyExtensionPolicy>() {
        Some(ACCEPTED)
    } else {
        None
    }
}

fn resource_id<T: ResourceExt>(resource: &T) -> ResourceId {
    ResourceId::new(resource.namespace().unwrap_or_default(), resource.name_any())
}
