//! An immutable graph of targetable objects and the policies attached to them.
//!
//! A topology is built once per reconciliation pass from the objects observed
//! in the cluster. Nodes are stored in an arena and linked by index in both
//! directions, so the graph can be walked upward (towards gateway classes) and
//! downward (towards services) without shared ownership:
//!
//! ```text
//! [ GatewayClass ] -> [ Gateway ] -> [ Listener ] -> [ *Route ] -> [ Service ]
//! ```
//!
//! A route attached to a whole gateway is linked to each of its listeners.
//!
//! Edges are produced by [`Link`] rules, each matching the objects of a parent
//! kind against the objects of a child kind. Policies attach to the
//! targetables named by their target references.

use crate::{
    id::{GroupKind, ObjectId, TargetRef},
    policy::Policy,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

pub mod kinds;


/// An object that policies may attach to.
///
/// The payload carries kind-specific data (e.g. a route's parent references)
/// that link rules inspect when the graph is built.
#[derive(Clone)]
pub struct Targetable {
    id: ObjectId,
    locator: String,
    data: Arc<dyn Any + Send + Sync>,
}

type MatchFn = dyn Fn(&Targetable, &Targetable) -> bool + Send + Sync;

/// Produces parent -> child edges between two kinds of targetables.
pub struct Link {
    parent: GroupKind,
    child: GroupKind,
    matches: Box<MatchFn>,
}

#[derive(Default)]
pub struct Builder {
    targetables: Vec<Targetable>,
    links: Vec<Link>,
    policies: Vec<Policy>,
}

pub struct Topology {
    nodes: Vec<Node>,
    by_id: HashMap<ObjectId, usize>,
    policies: Vec<AttachedPolicy>,
    policies_by_locator: HashMap<String, usize>,
}

struct Node {
    targetable: Targetable,
    parents: Vec<usize>,
    children: Vec<usize>,
    /// Indexes into `Topology::policies`, ordered by precedence (oldest
    /// first).
    policies: Vec<usize>,
}

struct AttachedPolicy {
    policy: Policy,
    targets: Vec<usize>,
    unresolved: Vec<TargetRef>,
}

// === impl Targetable ===

impl Targetable {
    pub fn new<T: Any + Send + Sync>(id: ObjectId, data: T) -> Self {
        Self {
            locator: id.locator(),
            id,
            data: Arc::new(data),
        }
    }

    /// Creates a targetable without a payload.
    pub fn bare(id: ObjectId) -> Self {
        Self::new(id, ())
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub fn is_kind(&self, gk: &GroupKind) -> bool {
        self.id.group_kind == *gk
    }
}

impl fmt::Debug for Targetable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Targetable")
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Targetable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Targetable {}

// === impl Link ===

impl Link {
    pub fn new(
        parent: GroupKind,
        child: GroupKind,
        matches: impl Fn(&Targetable, &Targetable) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            parent,
            child,
            matches: Box::new(matches),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("parent", &self.parent)
            .field("child", &self.child)
            .finish_non_exhaustive()
    }
}

// === impl Builder ===

impl Builder {
    pub fn with_targetables(mut self, targetables: impl IntoIterator<Item = Targetable>) -> Self {
        self.targetables.extend(targetables);
        self
    }

    pub fn with_links(mut self, links: impl IntoIterator<Item = Link>) -> Self {
        self.links.extend(links);
        self
    }

    pub fn with_policies(mut self, policies: impl IntoIterator<Item = Policy>) -> Self {
        self.policies.extend(policies);
        self
    }

    pub fn build(self) -> Topology {
        let Self {
            targetables,
            links,
            policies,
        } = self;

        let mut nodes = Vec::with_capacity(targetables.len());
        let mut by_id = HashMap::with_capacity(targetables.len());
        for targetable in targetables {
            if by_id.contains_key(targetable.id()) {
                tracing::debug!(locator = %targetable.locator(), "Ignoring duplicate targetable");
                continue;
            }
            by_id.insert(targetable.id().clone(), nodes.len());
            nodes.push(Node {
                targetable,
                parents: vec![],
                children: vec![],
                policies: vec![],
            });
        }

        let mut edges = HashSet::new();
        for link in &links {
            let parents = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.targetable.is_kind(&link.parent))
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            let children = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.targetable.is_kind(&link.child))
                .map(|(i, _)| i)
                .collect::<Vec<_>>();

            for &p in &parents {
                for &c in &children {
                    if p != c && (link.matches)(&nodes[p].targetable, &nodes[c].targetable) {
                        edges.insert((p, c));
                    }
                }
            }
        }

        let mut edges = edges.into_iter().collect::<Vec<_>>();
        edges.sort_unstable();
        for (p, c) in edges {
            nodes[p].children.push(c);
            nodes[c].parents.push(p);
        }

        let mut topology = Topology {
            nodes,
            by_id,
            policies: Vec::with_capacity(policies.len()),
            policies_by_locator: HashMap::with_capacity(policies.len()),
        };
        topology.attach(policies);
        topology
    }
}

// === impl Topology ===

impl Topology {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn targetables(&self) -> impl Iterator<Item = &Targetable> {
        self.nodes.iter().map(|n| &n.targetable)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Targetable> {
        self.by_id.get(id).map(|&i| &self.nodes[i].targetable)
    }

    pub fn parents(&self, id: &ObjectId) -> impl Iterator<Item = &Targetable> {
        self.adjacent(id, |n| &n.parents)
    }

    pub fn children(&self, id: &ObjectId) -> impl Iterator<Item = &Targetable> {
        self.adjacent(id, |n| &n.children)
    }

    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().map(|p| &p.policy)
    }

    pub fn policies_of_kind<'t>(&'t self, kind: &'t GroupKind) -> impl Iterator<Item = &'t Policy> {
        self.policies().filter(move |p| p.id.group_kind == *kind)
    }

    pub fn policy(&self, locator: &str) -> Option<&Policy> {
        self.policies_by_locator
            .get(locator)
            .map(|&i| &self.policies[i].policy)
    }

    /// Returns the targetables a policy is attached to.
    pub fn policy_targets(&self, locator: &str) -> Vec<&Targetable> {
        self.policies_by_locator
            .get(locator)
            .map(|&i| {
                self.policies[i]
                    .targets
                    .iter()
                    .map(|&n| &self.nodes[n].targetable)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the target references of a policy that did not resolve to
    /// exactly one targetable.
    pub fn unresolved_refs(&self, locator: &str) -> &[TargetRef] {
        self.policies_by_locator
            .get(locator)
            .map(|&i| &*self.policies[i].unresolved)
            .unwrap_or(&[])
    }

    /// Returns the policies attached directly to a targetable, ordered by
    /// precedence.
    pub fn attached_policies(&self, id: &ObjectId) -> impl Iterator<Item = &Policy> {
        self.by_id
            .get(id)
            .into_iter()
            .flat_map(move |&n| self.node_policies(n))
    }

    /// Returns all targetables matching the reference.
    pub fn resolve(&self, target_ref: &TargetRef) -> Vec<&Targetable> {
        self.resolve_nodes(target_ref)
            .into_iter()
            .map(|i| &self.nodes[i].targetable)
            .collect()
    }

    /// Returns the gateways from which any of the referenced targetables are
    /// reachable, ordered by locator.
    pub fn find_gateways_for(&self, target_refs: &[TargetRef]) -> Vec<&Targetable> {
        let mut gateways = BTreeMap::new();
        for target_ref in target_refs {
            for start in self.resolve_nodes(target_ref) {
                for n in self.ancestors_or_self(start) {
                    let t = &self.nodes[n].targetable;
                    if kinds::is_gateway(t) {
                        gateways.insert(t.locator(), t);
                    }
                }
            }
        }
        gateways.into_values().collect()
    }

    /// Returns the policies of the given kind attached to any of the
    /// referenced targetables or their ancestors, ordered by locator.
    ///
    /// A reference to a policy of the given kind stands for that policy's own
    /// targets.
    pub fn find_policies_for(
        &self,
        target_refs: &[TargetRef],
        policy_kind: &GroupKind,
    ) -> Vec<&Policy> {
        let mut refs = Vec::with_capacity(target_refs.len());
        for target_ref in target_refs {
            if target_ref.targets_kind(policy_kind) {
                refs.extend(
                    self.policies_of_kind(policy_kind)
                        .filter(|p| target_ref.matches(&p.id))
                        .flat_map(Policy::local_target_refs),
                );
            } else {
                refs.push(target_ref.clone());
            }
        }

        let mut found = BTreeMap::new();
        for target_ref in &refs {
            for start in self.resolve_nodes(target_ref) {
                for n in self.ancestors_or_self(start) {
                    for policy in self.node_policies(n) {
                        if policy.id.group_kind == *policy_kind {
                            found.insert(policy.locator(), policy);
                        }
                    }
                }
            }
        }
        found.into_values().collect()
    }

    /// Returns every path from a root targetable (one without parents) to a
    /// leaf targetable (one without children).
    pub fn paths(&self) -> Vec<Vec<&Targetable>> {
        self.node_paths()
            .into_iter()
            .map(|path| path.into_iter().map(|n| &self.nodes[n].targetable).collect())
            .collect()
    }

    pub(crate) fn node_paths(&self) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        for root in (0..self.nodes.len()).filter(|&n| self.nodes[n].parents.is_empty()) {
            let mut stack = vec![root];
            self.walk_paths(&mut stack, &mut paths);
        }
        paths
    }

    pub(crate) fn node(&self, n: usize) -> &Targetable {
        &self.nodes[n].targetable
    }

    pub(crate) fn node_policies(&self, n: usize) -> impl Iterator<Item = &Policy> {
        self.nodes[n]
            .policies
            .iter()
            .map(move |&p| &self.policies[p].policy)
    }

    fn walk_paths(&self, stack: &mut Vec<usize>, paths: &mut Vec<Vec<usize>>) {
        let Some(&last) = stack.last() else {
            return;
        };
        let children = self.nodes[last]
            .children
            .iter()
            .filter(|c| !stack.contains(c))
            .copied()
            .collect::<Vec<_>>();
        if children.is_empty() {
            paths.push(stack.clone());
            return;
        }
        for child in children {
            stack.push(child);
            self.walk_paths(stack, paths);
            stack.pop();
        }
    }

    fn adjacent<'t>(
        &'t self,
        id: &ObjectId,
        edges: impl Fn(&'t Node) -> &'t Vec<usize>,
    ) -> impl Iterator<Item = &'t Targetable> {
        self.by_id
            .get(id)
            .map(|&n| edges(&self.nodes[n]).as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.nodes[i].targetable)
    }

    fn resolve_nodes(&self, target_ref: &TargetRef) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| target_ref.matches(n.targetable.id()))
            .map(|(i, _)| i)
            .collect()
    }

    fn ancestors_or_self(&self, start: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut queue = vec![start];
        let mut found = vec![];
        while let Some(n) = queue.pop() {
            if !seen.insert(n) {
                continue;
            }
            found.push(n);
            queue.extend(self.nodes[n].parents.iter().copied());
        }
        found
    }

    fn attach(&mut self, mut policies: Vec<Policy>) {
        policies.sort_by(|a, b| {
            a.creation_timestamp
                .cmp(&b.creation_timestamp)
                .then_with(|| a.locator().cmp(&b.locator()))
        });

        for policy in policies {
            let locator = policy.locator();
            if self.policies_by_locator.contains_key(&locator) {
                tracing::debug!(%locator, "Ignoring duplicate policy");
                continue;
            }

            let mut targets = vec![];
            let mut unresolved = vec![];
            for target_ref in policy.local_target_refs() {
                match self.resolve_nodes(&target_ref).as_slice() {
                    &[n] => {
                        if !targets.contains(&n) {
                            targets.push(n);
                        }
                    }
                    _ => {
                        tracing::debug!(%locator, target = %target_ref, "Unresolved target reference");
                        unresolved.push(target_ref);
                    }
                }
            }

            let idx = self.policies.len();
            for &n in &targets {
                self.nodes[n].policies.push(idx);
            }
            self.policies_by_locator.insert(locator, idx);
            self.policies.push(AttachedPolicy {
                policy,
                targets,
                unresolved,
            });
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Topology::builder().build()
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("targetables", &self.nodes.len())
            .field("policies", &self.policies.len())
            .finish()
    }
}
