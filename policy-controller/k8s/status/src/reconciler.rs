use crate::{
    conditions::{self, PolicyError},
    enforced::{Engine, GatewayControllers},
    metrics::ReconcilerMetrics,
};
use chrono::{DateTime, Utc};
use gateway_policy_controller_core::{ObjectId, Policy, ReadinessSignals, Topology};
use gateway_policy_controller_k8s_api::{
    self as k8s,
    policy::{PolicyResource, PolicyStatus, CONDITION_ENFORCED},
};
use gateway_policy_controller_k8s_index::{SharedIndex, Snapshot};
use tokio::{
    sync::mpsc,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// A status patch for one policy.
#[derive(Clone, Debug)]
pub struct Update {
    pub id: ObjectId,
    pub patch: k8s::Patch<serde_json::Value>,
}

/// Computes the status of every policy in a snapshot and queues a patch for
/// each status that changed.
pub struct Reconciler {
    updates: mpsc::Sender<Update>,
    controllers: GatewayControllers,
    metrics: ReconcilerMetrics,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        updates: mpsc::Sender<Update>,
        controllers: GatewayControllers,
        metrics: ReconcilerMetrics,
    ) -> Self {
        Self {
            updates,
            controllers,
            metrics,
        }
    }

    /// Reconciles the index every `period` until `shutdown` fires.
    pub async fn run(self, index: SharedIndex, period: Duration, shutdown: CancellationToken) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!("Reconciler shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            let snapshot = index.read().snapshot();
            if !self.reconcile(&snapshot, &shutdown, Utc::now()) {
                return;
            }
        }
    }

    /// Runs one reconciliation pass. Returns false if the status controller
    /// has gone away.
    pub fn reconcile(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> bool {
        self.metrics.pass();
        let engine = Engine::new(
            &snapshot.topology,
            &snapshot.downstream,
            snapshot.umbrella,
            &self.controllers,
        );

        for resource in &snapshot.policies {
            if cancel.is_cancelled() {
                tracing::debug!("Reconciliation cancelled");
                return true;
            }

            let Some(update) = self.status_update(&engine, &snapshot.topology, resource, now)
            else {
                continue;
            };
            let kind = update.id.group_kind.kind.clone();
            match self.updates.try_send(update) {
                Ok(()) => self.metrics.enqueued(&kind),
                Err(mpsc::error::TrySendError::Full(update)) => {
                    tracing::warn!(
                        namespace = ?update.id.namespace,
                        name = %update.id.name,
                        "Status update queue is full; dropping update"
                    );
                    self.metrics.dropped(&kind);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Status controller is gone");
                    return false;
                }
            }
        }
        true
    }

    fn status_update<S: ReadinessSignals>(
        &self,
        engine: &Engine<'_, S>,
        topology: &Topology,
        resource: &PolicyResource,
        now: DateTime<Utc>,
    ) -> Option<Update> {
        let namespace = resource.namespace();
        let name = resource.name();
        if resource.is_deleting() {
            tracing::debug!(%namespace, %name, "Skipping policy being deleted");
            return None;
        }

        let kind = resource.group_kind().kind;
        let generation = resource.generation();
        let current = resource.status().cloned().unwrap_or_default();
        let mut status = current.clone();

        let accepted = accepted(resource, topology);
        conditions::set_status_condition(
            &mut status.conditions,
            conditions::accepted(&kind, accepted.as_ref().map(|_| ()), generation, now),
        );
        match &accepted {
            Ok(policy) => {
                let enforced = engine.enforced(policy);
                conditions::set_status_condition(
                    &mut status.conditions,
                    conditions::enforced(&kind, enforced.as_ref().copied(), generation, now),
                );
            }
            Err(_) => conditions::remove_condition(&mut status.conditions, CONDITION_ENFORCED),
        }

        if status.conditions == current.conditions && generation == current.observed_generation {
            self.metrics.skipped(&kind);
            return None;
        }
        status.observed_generation = generation;

        match make_patch(resource, &status) {
            Ok(patch) => Some(Update {
                id: resource.id(),
                patch,
            }),
            Err(error) => {
                tracing::error!(%namespace, %name, %error, "Failed to serialize policy status");
                None
            }
        }
    }
}

fn accepted(resource: &PolicyResource, topology: &Topology) -> Result<Policy, PolicyError> {
    let policy = resource
        .to_core()
        .map_err(|error| PolicyError::Invalid {
            kind: resource.group_kind().kind,
            message: error.to_string(),
        })?;
    if topology.policy_targets(&policy.locator()).is_empty() {
        return Err(PolicyError::TargetNotFound(
            resource.target_ref().name.clone(),
        ));
    }
    Ok(policy)
}

/// Builds a merge patch of the policy's status. The patch carries the
/// resource version it was computed from, so it is rejected if the policy
/// has changed since.
pub(crate) fn make_patch(
    resource: &PolicyResource,
    status: &PolicyStatus,
) -> Result<k8s::Patch<serde_json::Value>, serde_json::Error> {
    let mut metadata = serde_json::json!({ "name": resource.name() });
    if let Some(version) = resource.meta().resource_version.as_ref() {
        metadata["resourceVersion"] = version.clone().into();
    }
    let value = serde_json::json!({
        "apiVersion": resource.api_version(),
        "kind": resource.group_kind().kind,
        "metadata": metadata,
        "status": serde_json::to_value(status)?,
    });
    Ok(k8s::Patch::Merge(value))
}
