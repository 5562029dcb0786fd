use crate::{gateway, DownstreamIndex, ResourceId};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use gateway_policy_controller_core::{
    topology::kinds::{self, GatewayClassData, GatewayData, RouteData},
    Cell, GroupKind, ObjectId, Topology,
};
use gateway_policy_controller_k8s_api::{
    self as k8s,
    downstream::{EnvoyExtensionPolicy, EnvoyFilter, EnvoyPatchPolicy, WasmPlugin},
    gateway as k8s_gateway,
    kuadrant::{Authorino, Kuadrant, Limitador},
    policy::{group_kind, AuthPolicy, PolicyResource, RateLimitPolicy},
    Resource, ResourceExt,
};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the latest observed state of all watched resources.
pub struct Index {
    /// Publishes each snapshot's topology to readers outside of the
    /// reconciliation pass.
    topology: Arc<Cell<Topology>>,

    gateway_classes: HashMap<String, GatewayClassData>,
    gateways: HashMap<ResourceId, GatewayData>,
    routes: HashMap<ObjectId, RouteData>,
    services: HashSet<ResourceId>,
    policies: HashMap<ObjectId, PolicyResource>,
    kuadrants: HashSet<ResourceId>,
    downstream: DownstreamIndex,
}

/// The state observed by a single reconciliation pass.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub topology: Arc<Topology>,

    /// Every policy resource, including those that could not be attached to
    /// the topology, ordered by identity.
    pub policies: Vec<PolicyResource>,

    pub downstream: DownstreamIndex,

    /// Whether the umbrella `Kuadrant` object exists.
    pub umbrella: bool,
}

// === impl Index ===

impl Index {
    pub fn shared(topology: Arc<Cell<Topology>>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            topology,
            gateway_classes: HashMap::new(),
            gateways: HashMap::new(),
            routes: HashMap::new(),
            services: HashSet::new(),
            policies: HashMap::new(),
            kuadrants: HashSet::new(),
            downstream: DownstreamIndex::default(),
        }))
    }

    /// Flags a downstream object as written during the current pass.
    pub fn mark_modified(&mut self, kind: GroupKind, gateway: Option<ObjectId>) {
        self.downstream.mark_modified(kind, gateway);
    }

    /// Builds a topology from the current state, publishes it, and returns it
    /// along with the rest of the state a reconciliation pass needs.
    pub fn snapshot(&self) -> Snapshot {
        let mut targetables = Vec::new();
        for (name, class) in &self.gateway_classes {
            targetables.push(kinds::gateway_class_targetable(
                name.clone(),
                class.controller_name.clone(),
            ));
        }
        for (id, gw) in &self.gateways {
            targetables.extend(kinds::gateway_targetables(
                id.namespace.clone(),
                id.name.clone(),
                gw.clone(),
            ));
        }
        for (id, route) in &self.routes {
            targetables.push(kinds::route_targetable(
                id.group_kind.clone(),
                id.namespace.clone().unwrap_or_default(),
                id.name.clone(),
                route.clone(),
            ));
        }
        for id in &self.services {
            targetables.push(kinds::service_targetable(
                id.namespace.clone(),
                id.name.clone(),
            ));
        }

        let mut resources = self.policies.values().cloned().collect::<Vec<_>>();
        resources.sort_by_key(PolicyResource::id);

        let mut policies = Vec::with_capacity(resources.len());
        for resource in &resources {
            match resource.to_core() {
                Ok(policy) => policies.push(policy),
                Err(error) => {
                    tracing::debug!(
                        namespace = %resource.namespace(),
                        name = %resource.name(),
                        %error,
                        "Policy cannot be attached"
                    );
                }
            }
        }

        let topology = Topology::builder()
            .with_targetables(targetables)
            .with_links(kinds::links())
            .with_policies(policies)
            .build();
        let topology = self.topology.set(topology);

        Snapshot {
            topology,
            policies: resources,
            downstream: self.downstream.clone(),
            umbrella: !self.kuadrants.is_empty(),
        }
    }

    /// Counts the indexed resources of a kind in a namespace. Cluster-scoped
    /// kinds are counted in the empty namespace.
    pub(crate) fn len(&self, kind: &GroupKind, namespace: &str) -> usize {
        if *kind == kinds::gateway_class() {
            return if namespace.is_empty() {
                self.gateway_classes.len()
            } else {
                0
            };
        }
        if *kind == kinds::gateway() {
            return count_in(self.gateways.keys(), namespace);
        }
        if *kind == kinds::service() {
            return count_in(self.services.iter(), namespace);
        }
        if *kind == group_kind::<Kuadrant>() {
            return count_in(self.kuadrants.iter(), namespace);
        }
        if kinds::route_kinds().contains(kind) {
            return self
                .routes
                .keys()
                .filter(|id| id.group_kind == *kind && id.namespace.as_deref() == Some(namespace))
                .count();
        }
        if *kind == group_kind::<RateLimitPolicy>() || *kind == group_kind::<AuthPolicy>() {
            return self
                .policies
                .keys()
                .filter(|id| id.group_kind == *kind && id.namespace.as_deref() == Some(namespace))
                .count();
        }
        self.downstream.len(kind, namespace)
    }

    /// Keeps the downstream index's view of gateway controllers current, so
    /// that objects applied later are judged against the right ancestor
    /// status.
    fn refresh_gateway_controllers(&mut self) {
        let controllers = self.gateway_controllers();
        self.downstream.set_gateway_controllers(controllers);
    }

    fn gateway_controllers(&self) -> HashMap<ObjectId, String> {
        self.gateways
            .iter()
            .filter_map(|(id, gw)| {
                let class = self.gateway_classes.get(&gw.class_name)?;
                let gw = ObjectId::namespaced(kinds::gateway(), &*id.namespace, &*id.name);
                Some((gw, class.controller_name.clone()))
            })
            .collect()
    }

    fn apply_route(&mut self, kind: GroupKind, meta: &k8s::ObjectMeta, route: RouteData) {
        let id = ObjectId::namespaced(
            kind,
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        self.routes.insert(id, route);
    }

    fn delete_route(&mut self, kind: GroupKind, namespace: String, name: String) {
        self.routes
            .remove(&ObjectId::namespaced(kind, namespace, name));
    }

    fn apply_policy(&mut self, policy: PolicyResource) {
        self.policies.insert(policy.id(), policy);
    }

    fn delete_policy(&mut self, kind: GroupKind, namespace: String, name: String) {
        self.policies
            .remove(&ObjectId::namespaced(kind, namespace, name));
    }
}

fn count_in<'i>(ids: impl Iterator<Item = &'i ResourceId>, namespace: &str) -> usize {
    ids.filter(|id| id.namespace == namespace).count()
}

fn resource_id<T: ResourceExt>(resource: &T) -> ResourceId {
    ResourceId::new(resource.namespace().unwrap_or_default(), resource.name_any())
}

// === Gateway API ===

impl kubert::index::IndexClusterResource<k8s_gateway::GatewayClass> for Index {
    fn apply(&mut self, class: k8s_gateway::GatewayClass) {
        let data = gateway::gateway_class_data(&class);
        self.gateway_classes.insert(class.name_unchecked(), data);
        self.refresh_gateway_controllers();
    }

    fn delete(&mut self, name: String) {
        self.gateway_classes.remove(&name);
        self.refresh_gateway_controllers();
    }
}

impl kubert::index::IndexNamespacedResource<k8s_gateway::Gateway> for Index {
    fn apply(&mut self, gw: k8s_gateway::Gateway) {
        let data = gateway::gateway_data(&gw);
        self.gateways.insert(resource_id(&gw), data);
        self.refresh_gateway_controllers();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.gateways.remove(&ResourceId::new(namespace, name));
        self.refresh_gateway_controllers();
    }
}

impl kubert::index::IndexNamespacedResource<k8s_gateway::HttpRoute> for Index {
    fn apply(&mut self, route: k8s_gateway::HttpRoute) {
        let data = gateway::http_route_data(&route);
        self.apply_route(kinds::http_route(), route.meta(), data);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route(kinds::http_route(), namespace, name);
    }
}

impl kubert::index::IndexNamespacedResource<k8s_gateway::GrpcRoute> for Index {
    fn apply(&mut self, route: k8s_gateway::GrpcRoute) {
        let data = gateway::grpc_route_data(&route);
        self.apply_route(kinds::grpc_route(), route.meta(), data);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route(kinds::grpc_route(), namespace, name);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, svc: k8s::Service) {
        self.services.insert(resource_id(&svc));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.services.remove(&ResourceId::new(namespace, name));
    }
}

// === Policies ===

impl kubert::index::IndexNamespacedResource<RateLimitPolicy> for Index {
    fn apply(&mut self, policy: RateLimitPolicy) {
        self.apply_policy(policy.into());
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy(group_kind::<RateLimitPolicy>(), namespace, name);
    }
}

impl kubert::index::IndexNamespacedResource<AuthPolicy> for Index {
    fn apply(&mut self, policy: AuthPolicy) {
        self.apply_policy(policy.into());
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy(group_kind::<AuthPolicy>(), namespace, name);
    }
}

// === System ===

impl kubert::index::IndexNamespacedResource<Kuadrant> for Index {
    fn apply(&mut self, kuadrant: Kuadrant) {
        self.kuadrants.insert(resource_id(&kuadrant));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.kuadrants.remove(&ResourceId::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<Limitador> for Index {
    fn apply(&mut self, limitador: Limitador) {
        self.downstream.apply_limitador(limitador);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream
            .delete_system(&group_kind::<Limitador>(), &ResourceId::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<Authorino> for Index {
    fn apply(&mut self, authorino: Authorino) {
        self.downstream.apply_authorino(authorino);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream
            .delete_system(&group_kind::<Authorino>(), &ResourceId::new(namespace, name));
    }
}

// === Gateway providers ===

impl kubert::index::IndexNamespacedResource<EnvoyFilter> for Index {
    fn apply(&mut self, filter: EnvoyFilter) {
        self.downstream.apply_envoy_filter(filter);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream
            .delete_object(&group_kind::<EnvoyFilter>(), &ResourceId::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<WasmPlugin> for Index {
    fn apply(&mut self, plugin: WasmPlugin) {
        self.downstream.apply_wasm_plugin(plugin);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream
            .delete_object(&group_kind::<WasmPlugin>(), &ResourceId::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<EnvoyPatchPolicy> for Index {
    fn apply(&mut self, policy: EnvoyPatchPolicy) {
        self.downstream.apply_envoy_patch_policy(policy);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream.delete_object(
            &group_kind::<EnvoyPatchPolicy>(),
            &ResourceId::new(namespace, name),
        );
    }
}

impl kubert::index::IndexNamespacedResource<EnvoyExtensionPolicy> for Index {
    fn apply(&mut self, policy: EnvoyExtensionPolicy) {
        self.downstream.apply_envoy_extension_policy(policy);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.downstream.delete_object(
            &group_kind::<EnvoyExtensionPolicy>(),
            &ResourceId::new(namespace, name),
        );
    }
}
