use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::{Registry, Unit},
};

/// Records the outcome of status patches.
#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patch_succeeded: Family<KindLabels, Counter>,
    patch_failed: Family<KindLabels, Counter>,
    patch_timeout: Family<KindLabels, Counter>,
    patch_conflict: Family<KindLabels, Counter>,
    patch_duration: Histogram,
}

/// Records how reconciliation passes dispose of computed statuses.
#[derive(Clone, Debug)]
pub struct ReconcilerMetrics {
    passes: Counter,
    updates_enqueued: Family<KindLabels, Counter>,
    updates_skipped: Family<KindLabels, Counter>,
    updates_dropped: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Family::default();
        prom.register(
            "patch_succeeded",
            "Count of successful status patches",
            patch_succeeded.clone(),
        );

        let patch_failed = Family::default();
        prom.register(
            "patch_failed",
            "Count of status patches that failed",
            patch_failed.clone(),
        );

        let patch_timeout = Family::default();
        prom.register(
            "patch_timeout",
            "Count of status patches that timed out",
            patch_timeout.clone(),
        );

        let patch_conflict = Family::default();
        prom.register(
            "patch_conflict",
            "Count of status patches rejected because the resource changed",
            patch_conflict.clone(),
        );

        let patch_duration = Histogram::new(exponential_buckets(0.005, 2.0, 12));
        prom.register_with_unit(
            "patch_duration",
            "Histogram of status patch latency",
            Unit::Seconds,
            patch_duration.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeout,
            patch_conflict,
            patch_duration,
        }
    }

    pub(crate) fn succeeded(&self, kind: &str) {
        self.patch_succeeded.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn failed(&self, kind: &str) {
        self.patch_failed.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn timeout(&self, kind: &str) {
        self.patch_timeout.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn conflict(&self, kind: &str) {
        self.patch_conflict.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn observe_duration(&self, elapsed: std::time::Duration) {
        self.patch_duration.observe(elapsed.as_secs_f64());
    }
}

// === impl ReconcilerMetrics ===

impl ReconcilerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let passes = Counter::default();
        prom.register(
            "reconcile_passes",
            "Count of reconciliation passes",
            passes.clone(),
        );

        let updates_enqueued = Family::default();
        prom.register(
            "updates_enqueued",
            "Count of status updates sent to the controller",
            updates_enqueued.clone(),
        );

        let updates_skipped = Family::default();
        prom.register(
            "updates_skipped",
            "Count of status updates skipped because the status is unchanged",
            updates_skipped.clone(),
        );

        let updates_dropped = Family::default();
        prom.register(
            "updates_dropped",
            "Count of status updates dropped because the queue was full",
            updates_dropped.clone(),
        );

        Self {
            passes,
            updates_enqueued,
            updates_skipped,
            updates_dropped,
        }
    }

    pub(crate) fn pass(&self) {
        self.passes.inc();
    }

    pub(crate) fn enqueued(&self, kind: &str) {
        self.updates_enqueued.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn skipped(&self, kind: &str) {
        self.updates_skipped.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn dropped(&self, kind: &str) {
        self.updates_dropped.get_or_create(&labels(kind)).inc();
    }

    #[cfg(test)]
    pub(crate) fn skipped_count(&self, kind: &str) -> u64 {
        self.updates_skipped.get_or_create(&labels(kind)).get()
    }
}

fn labels(kind: &str) -> KindLabels {
    KindLabels {
        kind: kind.to_string(),
    }
}
