//! Converts gateway API resources into topology payloads.

use gateway_policy_controller_core::topology::kinds::{
    BackendRef, GatewayClassData, GatewayData, ListenerData, ParentRef, RouteData,
    RouteParentStatus,
};
use gateway_policy_controller_k8s_api::{gateway, is_condition_true};

const PROGRAMMED: &str = "Programmed";
const ACCEPTED: &str = "Accepted";

pub(crate) fn gateway_class_data(class: &gateway::GatewayClass) -> GatewayClassData {
    GatewayClassData {
        controller_name: class.spec.controller_name.clone(),
    }
}

/// A listener is programmed when the gateway's status says so.
pub(crate) fn gateway_data(gw: &gateway::Gateway) -> GatewayData {
    let statuses = gw
        .status
        .as_ref()
        .and_then(|s| s.listeners.as_deref())
        .unwrap_or_default();
    let listeners = gw
        .spec
        .listeners
        .iter()
        .map(|l| ListenerData {
            name: l.name.clone(),
            programmed: statuses
                .iter()
                .any(|s| s.name == l.name && is_condition_true(&s.conditions, PROGRAMMED)),
        })
        .collect();
    GatewayData {
        class_name: gw.spec.gateway_class_name.clone(),
        listeners,
    }
}

pub(crate) fn http_route_data(route: &gateway::HttpRoute) -> RouteData {
    let backends = route
        .spec
        .rules
        .iter()
        .flatten()
        .flat_map(|rule| rule.backend_refs.iter().flatten())
        .filter_map(|http_backend_ref| http_backend_ref.backend_ref.as_ref())
        .map(|br| backend_ref(&br.inner))
        .collect();
    RouteData {
        parents: parent_refs(&route.spec.inner),
        backends,
        statuses: route
            .status
            .as_ref()
            .map(|s| parent_statuses(&s.inner))
            .unwrap_or_default(),
    }
}

pub(crate) fn grpc_route_data(route: &gateway::GrpcRoute) -> RouteData {
    let backends = route
        .spec
        .rules
        .iter()
        .flatten()
        .flat_map(|rule| rule.backend_refs.iter().flatten())
        .map(|br| backend_ref(&br.inner))
        .collect();
    RouteData {
        parents: parent_refs(&route.spec.inner),
        backends,
        statuses: route
            .status
            .as_ref()
            .map(|s| parent_statuses(&s.inner))
            .unwrap_or_default(),
    }
}

fn parent_refs(spec: &gateway::CommonRouteSpec) -> Vec<ParentRef> {
    spec.parent_refs.iter().flatten().map(parent_ref).collect()
}

fn parent_ref(pr: &gateway::ParentReference) -> ParentRef {
    ParentRef {
        group: pr.group.clone(),
        kind: pr.kind.clone(),
        namespace: pr.namespace.clone(),
        name: pr.name.clone(),
        section: pr.section_name.clone(),
    }
}

fn parent_statuses(status: &gateway::RouteStatus) -> Vec<RouteParentStatus> {
    status
        .parents
        .iter()
        .map(|ps| RouteParentStatus {
            parent: parent_ref(&ps.parent_ref),
            controller_name: ps.controller_name.clone(),
            accepted: is_condition_true(&ps.conditions, ACCEPTED),
        })
        .collect()
}

fn backend_ref(br: &gateway::BackendObjectReference) -> BackendRef {
    BackendRef {
        group: br.group.clone(),
        kind: br.kind.clone(),
        namespace: br.namespace.clone(),
        name: br.name.clone(),
        port: br.port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_policy_controller_k8s_api::ObjectMeta;
    use serde_json::json;

    #[test]
    fn http_route_refs() {
        let route = gateway::HttpRoute {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("route".to_string()),
                ..Default::default()
            },
            spec: gateway::HttpRouteSpec {
                inner: gateway::CommonRouteSpec {
                    parent_refs: Some(vec![gateway::ParentReference {
                        group: None,
                        kind: None,
                        namespace: Some("gw-ns".to_string()),
                        name: "gw".to_string(),
                        section_name: Some("http".to_string()),
                        port: None,
                    }]),
                },
                hostnames: None,
                rules: Some(vec![gateway::HttpRouteRule {
                    matches: None,
                    filters: None,
                    backend_refs: Some(vec![
                        gateway::HttpBackendRef {
                            backend_ref: Some(gateway::BackendRef {
                                weight: None,
                                inner: gateway::BackendObjectReference {
                                    group: None,
                                    kind: None,
                                    name: "web".to_string(),
                                    namespace: None,
                                    port: Some(8080),
                                },
                            }),
                            filters: None,
                        },
                        gateway::HttpBackendRef {
                            backend_ref: None,
                            filters: None,
                        },
                    ]),
                }]),
            },
            status: None,
        };

        let data = http_route_data(&route);
        assert_eq!(
            data.parents,
            [ParentRef {
                namespace: Some("gw-ns".to_string()),
                ..ParentRef::new("gw").with_section("http")
            }]
        );
        assert_eq!(
            data.backends,
            [BackendRef {
                port: Some(8080),
                ..BackendRef::new("web")
            }]
        );
        assert!(data.statuses.is_empty());
    }

    fn condition(type_: &str, status: &str) -> serde_json::Value {
        json!({
            "type": type_,
            "status": status,
            "reason": type_,
            "message": "",
            "lastTransitionTime": "2024-01-01T00:00:00Z",
        })
    }

    #[test]
    fn route_acceptance_per_parent() {
        let route: gateway::HttpRoute = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1beta1",
            "kind": "HTTPRoute",
            "metadata": { "namespace": "ns", "name": "route" },
            "spec": { "parentRefs": [{ "name": "a" }, { "name": "b" }] },
            "status": {
                "parents": [
                    {
                        "parentRef": { "name": "a" },
                        "controllerName": "example.com/controller",
                        "conditions": [condition("Accepted", "True")],
                    },
                    {
                        "parentRef": { "name": "b" },
                        "controllerName": "example.com/controller",
                        "conditions": [condition("Accepted", "False")],
                    },
                ],
            },
        }))
        .expect("route must deserialize");

        let data = http_route_data(&route);
        assert_eq!(
            data.statuses,
            [
                RouteParentStatus {
                    parent: ParentRef::new("a"),
                    controller_name: "example.com/controller".to_string(),
                    accepted: true,
                },
                RouteParentStatus {
                    parent: ParentRef::new("b"),
                    controller_name: "example.com/controller".to_string(),
                    accepted: false,
                },
            ]
        );
    }

    #[test]
    fn programmed_listeners() {
        let gw: gateway::Gateway = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1beta1",
            "kind": "Gateway",
            "metadata": { "namespace": "ns", "name": "gw" },
            "spec": {
                "gatewayClassName": "gc",
                "listeners": [
                    { "name": "http", "port": 80, "protocol": "HTTP" },
                    { "name": "https", "port": 443, "protocol": "HTTPS" },
                ],
            },
            "status": {
                "listeners": [{
                    "name": "http",
                    "supportedKinds": [],
                    "attachedRoutes": 0,
                    "conditions": [condition("Programmed", "True")],
                }],
            },
        }))
        .expect("gateway must deserialize");

        assert_eq!(
            gateway_data(&gw).listeners,
            [ListenerData::programmed("http"), ListenerData::new("https")]
        );
    }
}
