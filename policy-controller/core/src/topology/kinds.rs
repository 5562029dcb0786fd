//! Gateway API targetables and the rules that link them.

use super::{Link, Targetable};
use crate::id::{GroupKind, ObjectId, CORE_GROUP};

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

pub fn gateway_class() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "GatewayClass")
}

pub fn gateway() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "Gateway")
}

pub fn http_route() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "HTTPRoute")
}

pub fn grpc_route() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "GRPCRoute")
}

pub fn tcp_route() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "TCPRoute")
}

pub fn tls_route() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "TLSRoute")
}

pub fn udp_route() -> GroupKind {
    GroupKind::new(GATEWAY_API_GROUP, "UDPRoute")
}

pub fn service() -> GroupKind {
    GroupKind::new(CORE_GROUP, "Service")
}

pub fn route_kinds() -> [GroupKind; 5] {
    [http_route(), grpc_route(), tcp_route(), tls_route(), udp_route()]
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewayClassData {
    pub controller_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewayData {
    pub class_name: String,
    pub listeners: Vec<ListenerData>,
}

/// A gateway listener and whether the gateway reports it as programmed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerData {
    pub name: String,
    pub programmed: bool,
}

/// A route's reference to a gateway (or one of its listeners).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParentRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub section: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteData {
    pub parents: Vec<ParentRef>,
    pub backends: Vec<BackendRef>,

    /// The status gateway controllers reported for the route's parents.
    pub statuses: Vec<RouteParentStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteParentStatus {
    pub parent: ParentRef,
    pub controller_name: String,
    pub accepted: bool,
}

/// Whether a targetable is a gateway, as opposed to one of its listeners.
pub fn is_gateway(t: &Targetable) -> bool {
    t.is_kind(&gateway()) && t.id().section.is_none()
}

pub fn gateway_class_targetable(
    name: impl Into<String>,
    controller_name: impl Into<String>,
) -> Targetable {
    Targetable::new(
        ObjectId::cluster(gateway_class(), name),
        GatewayClassData {
            controller_name: controller_name.into(),
        },
    )
}

/// Returns the gateway's targetable followed by one targetable per listener.
/// Listeners carry their [`ListenerData`].
pub fn gateway_targetables(
    namespace: impl Into<String>,
    name: impl Into<String>,
    data: GatewayData,
) -> Vec<Targetable> {
    let id = ObjectId::namespaced(gateway(), namespace, name);
    let mut targetables = Vec::with_capacity(data.listeners.len() + 1);
    for listener in &data.listeners {
        targetables.push(Targetable::new(
            id.clone().with_section(listener.name.clone()),
            listener.clone(),
        ));
    }
    targetables.insert(0, Targetable::new(id, data));
    targetables
}

pub fn route_targetable(
    kind: GroupKind,
    namespace: impl Into<String>,
    name: impl Into<String>,
    data: RouteData,
) -> Targetable {
    Targetable::new(ObjectId::namespaced(kind, namespace, name), data)
}

pub fn service_targetable(namespace: impl Into<String>, name: impl Into<String>) -> Targetable {
    Targetable::bare(ObjectId::namespaced(service(), namespace, name))
}

/// Links every supported kind: gateway classes to gateways, gateways to their
/// listeners, listeners to routes of every kind, and routes to their backend
/// services.
pub fn links() -> Vec<Link> {
    let mut links = vec![link_gateway_class_to_gateway(), link_gateway_to_listener()];
    for kind in route_kinds() {
        links.push(link_gateway_to_route(kind.clone()));
        links.push(link_route_to_service(kind));
    }
    links
}

pub fn link_gateway_class_to_gateway() -> Link {
    Link::new(gateway_class(), gateway(), |class, gw| {
        gw.id().section.is_none()
            && gw
                .data::<GatewayData>()
                .is_some_and(|gw| gw.class_name == class.id().name)
    })
}

pub fn link_gateway_to_listener() -> Link {
    Link::new(gateway(), gateway(), |gw, listener| {
        gw.id().section.is_none()
            && listener.id().section.is_some()
            && listener.id().without_section() == *gw.id()
    })
}

/// Links a route to every listener of the gateway it names, or only to the
/// named listener when the parent reference carries a section name. Routes
/// never link to a gateway directly.
pub fn link_gateway_to_route(kind: GroupKind) -> Link {
    Link::new(gateway(), kind, |listener, route| {
        let Some(data) = route.data::<RouteData>() else {
            return false;
        };
        data.parents.iter().any(|parent| {
            parent.references_listener(listener.id(), route.id().namespace.as_deref())
        })
    })
}

pub fn link_route_to_service(kind: GroupKind) -> Link {
    Link::new(kind, service(), |route, svc| {
        let Some(data) = route.data::<RouteData>() else {
            return false;
        };
        svc.id().section.is_none()
            && data
                .backends
                .iter()
                .any(|backend| backend.references(svc.id(), route.id().namespace.as_deref()))
    })
}

// === impl ParentRef ===

impl ParentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Whether the reference names the gateway, regardless of any section.
    pub fn references_gateway(&self, gateway: &ObjectId, route_ns: Option<&str>) -> bool {
        let kind = self.kind.as_deref().unwrap_or("Gateway");
        let group = self.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
        let namespace = self.namespace.as_deref().or(route_ns);
        gateway.group_kind.kind == kind
            && gateway.group_kind.group_eq(group)
            && gateway.namespace.as_deref() == namespace
            && gateway.name == self.name
    }

    fn references_listener(&self, listener: &ObjectId, route_ns: Option<&str>) -> bool {
        let Some(section) = listener.section.as_deref() else {
            return false;
        };
        self.references_gateway(listener, route_ns)
            && self.section.as_deref().map_or(true, |s| s == section)
    }
}

// === impl ListenerData ===

impl ListenerData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            programmed: false,
        }
    }

    pub fn programmed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            programmed: true,
        }
    }
}

// === impl RouteData ===

impl RouteData {
    /// Whether the controller accepted the route for the gateway. Only the
    /// status the controller reported for that gateway is considered.
    pub fn is_accepted_by(
        &self,
        gateway: &ObjectId,
        controller_name: &str,
        route_ns: Option<&str>,
    ) -> bool {
        self.statuses.iter().any(|status| {
            status.accepted
                && status.controller_name == controller_name
                && status.parent.references_gateway(gateway, route_ns)
        })
    }
}

// === impl BackendRef ===

impl BackendRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn references(&self, id: &ObjectId, route_ns: Option<&str>) -> bool {
        let kind = self.kind.as_deref().unwrap_or("Service");
        let group = self.group.as_deref().unwrap_or(CORE_GROUP);
        let namespace = self.namespace.as_deref().or(route_ns);
        id.group_kind.kind == kind
            && id.group_kind.group_eq(group)
            && id.namespace.as_deref() == namespace
            && id.name == self.name
    }
}
