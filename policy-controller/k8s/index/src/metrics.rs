use crate::Index;
use gateway_policy_controller_k8s_api::{policy::group_kind, Resource, ResourceExt};
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps an index, recording the updates it observes.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

/// Cluster-scoped resources are labeled with an empty namespace.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

impl<R> SizedIndex<R> for Index
where
    R: Resource<DynamicType = ()>,
{
    fn size(&self, namespace: &str) -> usize {
        self.len(&group_kind::<R>(), namespace)
    }
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn record_apply(&self, kind: &str, namespace: &str) {
        self.index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_delete(&self, kind: &str, namespace: &str) {
        self.index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_reset(&self, kind: &str) {
        self.index_resets
            .get_or_create(&IndexLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_size<R>(&self, kind: &str, namespace: String)
    where
        T: SizedIndex<R>,
    {
        let size = self.inner.size(&namespace);
        self.index_size
            .get_or_create(&NamespacedIndexLabels {
                namespace,
                kind: kind.to_string(),
            })
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        let namespace = resource.namespace().unwrap_or_default();
        self.record_apply(&kind, &namespace);
        self.inner.write().apply(resource);
        self.record_size::<R>(&kind, namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = R::kind(&());
        self.record_delete(&kind, &namespace);
        self.inner.write().delete(namespace.clone(), name);
        self.record_size::<R>(&kind, namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let kind = R::kind(&());
        let namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.iter().map(|(namespace, _)| namespace.clone()))
            .collect::<Vec<_>>();
        self.record_reset(&kind);
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.record_size::<R>(&kind, ns);
        }
    }
}

impl<R, T> kubert::index::IndexClusterResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexClusterResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        self.record_apply(&kind, "");
        self.inner.write().apply(resource);
        self.record_size::<R>(&kind, String::new());
    }

    fn delete(&mut self, name: String) {
        let kind = R::kind(&());
        self.record_delete(&kind, "");
        self.inner.write().delete(name);
        self.record_size::<R>(&kind, String::new());
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        let kind = R::kind(&());
        self.record_reset(&kind);
        self.inner.write().reset(resources, removed);
        self.record_size::<R>(&kind, String::new());
    }
}
