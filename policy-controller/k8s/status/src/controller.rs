use crate::{metrics::ControllerMetrics, reconciler::Update};
use gateway_policy_controller_core::{
    auth_policy_kind, rate_limit_policy_kind, POLICY_CONTROLLER_NAME,
};
use gateway_policy_controller_k8s_api::{
    self as k8s,
    policy::{AuthPolicy, RateLimitPolicy},
};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};

/// Applies status updates to the cluster, one at a time.
pub struct Controller {
    client: k8s::Client,
    updates: mpsc::Receiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

/// Reported by the API server when a patch races with a write to the object.
const STALE_OBJECT: &str = "StorageError: invalid object";

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        updates: mpsc::Receiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            updates,
            patch_timeout,
            metrics,
        }
    }

    /// Processes updates until every sender has been dropped. Failed patches
    /// are not retried; the next reconciliation recomputes them.
    pub async fn run(mut self) {
        let patch_params = k8s::PatchParams::apply(POLICY_CONTROLLER_NAME);

        while let Some(Update { id, patch }) = self.updates.recv().await {
            let namespace = id.namespace.clone().unwrap_or_default();
            let name = id.name.as_str();
            let kind = id.kind();

            let start = Instant::now();
            let patched = if id.group_kind == rate_limit_policy_kind() {
                let api = k8s::Api::<RateLimitPolicy>::namespaced(self.client.clone(), &namespace);
                time::timeout(
                    self.patch_timeout,
                    api.patch_status(name, &patch_params, &patch),
                )
                .await
                .map(|res| res.map(drop))
            } else if id.group_kind == auth_policy_kind() {
                let api = k8s::Api::<AuthPolicy>::namespaced(self.client.clone(), &namespace);
                time::timeout(
                    self.patch_timeout,
                    api.patch_status(name, &patch_params, &patch),
                )
                .await
                .map(|res| res.map(drop))
            } else {
                tracing::error!(%namespace, %name, %kind, "Unexpected policy kind");
                continue;
            };
            self.metrics.observe_duration(start.elapsed());

            match patched {
                Ok(Ok(())) => {
                    tracing::debug!(%namespace, %name, %kind, "Patched policy status");
                    self.metrics.succeeded(kind);
                }
                Ok(Err(k8s::Error::Api(error))) if error.code == 409 => {
                    tracing::info!(%namespace, %name, %kind, error = %error.message, "Policy changed before its status was patched");
                    self.metrics.conflict(kind);
                }
                Ok(Err(error)) if error.to_string().contains(STALE_OBJECT) => {
                    tracing::info!(%namespace, %name, %kind, %error, "Policy status is stale");
                    self.metrics.conflict(kind);
                }
                Ok(Err(error)) => {
                    tracing::error!(%namespace, %name, %kind, %error, "Failed to patch policy status");
                    self.metrics.failed(kind);
                }
                Err(_) => {
                    tracing::error!(%namespace, %name, %kind, timeout = ?self.patch_timeout, "Policy status patch timed out");
                    self.metrics.timeout(kind);
                }
            }
        }
    }
}
