use crate::{
    core::{Cell, Topology},
    index::{self, IndexMetrics},
    k8s::{
        self,
        downstream::{EnvoyExtensionPolicy, EnvoyFilter, EnvoyPatchPolicy, WasmPlugin},
        gateway,
        kuadrant::{Authorino, Kuadrant, Limitador},
        policy::{AuthPolicy, RateLimitPolicy},
        Client, Resource,
    },
    status,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "gateway-policy-controller",
    about = "Reports the status of gateway policies"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_policy_controller=info,warn",
        env = "GATEWAY_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// How often policy statuses are recomputed.
    #[clap(long, default_value = "10")]
    reconciliation_period_secs: u64,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Gateway class controllers implemented by Istio.
    #[clap(
        long,
        default_value = "istio.io/gateway-controller",
        value_delimiter = ','
    )]
    istio_gateway_controller_names: Vec<String>,

    /// Gateway class controllers implemented by Envoy Gateway.
    #[clap(
        long,
        default_value = "gateway.envoyproxy.io/gatewayclass-controller",
        value_delimiter = ','
    )]
    envoy_gateway_controller_names: Vec<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            reconciliation_period_secs,
            patch_timeout_ms,
            istio_gateway_controller_names,
            envoy_gateway_controller_names,
        } = self;

        if reconciliation_period_secs == 0 {
            bail!("--reconciliation-period-secs must be positive");
        }
        let reconciliation_period = Duration::from_secs(reconciliation_period_secs);
        let controllers = status::GatewayControllers {
            istio: istio_gateway_controller_names,
            envoy_gateway: envoy_gateway_controller_names,
        };

        // The latest topology is published to the cell by each reconciliation
        // pass.
        let topology = Arc::new(Cell::<Topology>::new());
        let index = index::Index::shared(topology);

        let mut prom = <Registry>::default();
        let indexed =
            IndexMetrics::register(index.clone(), prom.sub_registry_with_prefix("index")).shared();
        let policy_status = prom.sub_registry_with_prefix("policy_status");
        let controller_metrics = status::ControllerMetrics::register(policy_status);
        let reconciler_metrics = status::ReconcilerMetrics::register(policy_status);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        if api_resource_exists::<gateway::GatewayClass>(&runtime.client()).await {
            let classes = runtime.watch_all::<gateway::GatewayClass>(watcher::Config::default());
            tokio::spawn(
                kubert::index::cluster(indexed.clone(), classes)
                    .instrument(info_span!("gatewayclasses")),
            );
        } else {
            tracing::warn!(
                "gatewayclasses.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<gateway::Gateway>(&runtime.client()).await {
            let gateways = runtime.watch_all::<gateway::Gateway>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), gateways)
                    .instrument(info_span!("gateways")),
            );
        } else {
            tracing::warn!(
                "gateways.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<gateway::HttpRoute>(&runtime.client()).await {
            let http_routes = runtime.watch_all::<gateway::HttpRoute>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), http_routes)
                    .instrument(info_span!("httproutes")),
            );
        } else {
            tracing::warn!(
                "httproutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<gateway::GrpcRoute>(&runtime.client()).await {
            let grpc_routes = runtime.watch_all::<gateway::GrpcRoute>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), grpc_routes)
                    .instrument(info_span!("grpcroutes")),
            );
        } else {
            tracing::warn!(
                "grpcroutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexed.clone(), services).instrument(info_span!("services")),
        );

        let ratelimit_policies = runtime.watch_all::<RateLimitPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexed.clone(), ratelimit_policies)
                .instrument(info_span!("ratelimitpolicies")),
        );

        let auth_policies = runtime.watch_all::<AuthPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexed.clone(), auth_policies)
                .instrument(info_span!("authpolicies")),
        );

        // Without the umbrella resource, every policy reports a missing
        // dependency.
        if api_resource_exists::<Kuadrant>(&runtime.client()).await {
            let kuadrants = runtime.watch_all::<Kuadrant>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), kuadrants)
                    .instrument(info_span!("kuadrants")),
            );
        } else {
            tracing::warn!("kuadrants.kuadrant.io resource kind not found, skipping watches");
        }

        if api_resource_exists::<Limitador>(&runtime.client()).await {
            let limitadors = runtime.watch_all::<Limitador>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), limitadors)
                    .instrument(info_span!("limitadors")),
            );
        } else {
            tracing::warn!(
                "limitadors.limitador.kuadrant.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<Authorino>(&runtime.client()).await {
            let authorinos = runtime.watch_all::<Authorino>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), authorinos)
                    .instrument(info_span!("authorinos")),
            );
        } else {
            tracing::warn!(
                "authorinos.operator.authorino.kuadrant.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<EnvoyFilter>(&runtime.client()).await {
            let envoy_filters = runtime.watch_all::<EnvoyFilter>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), envoy_filters)
                    .instrument(info_span!("envoyfilters")),
            );
        } else {
            tracing::warn!("envoyfilters.networking.istio.io resource kind not found, skipping watches");
        }

        if api_resource_exists::<WasmPlugin>(&runtime.client()).await {
            let wasm_plugins = runtime.watch_all::<WasmPlugin>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), wasm_plugins)
                    .instrument(info_span!("wasmplugins")),
            );
        } else {
            tracing::warn!("wasmplugins.extensions.istio.io resource kind not found, skipping watches");
        }

        if api_resource_exists::<EnvoyPatchPolicy>(&runtime.client()).await {
            let patch_policies = runtime.watch_all::<EnvoyPatchPolicy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), patch_policies)
                    .instrument(info_span!("envoypatchpolicies")),
            );
        } else {
            tracing::warn!(
                "envoypatchpolicies.gateway.envoyproxy.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<EnvoyExtensionPolicy>(&runtime.client()).await {
            let extension_policies =
                runtime.watch_all::<EnvoyExtensionPolicy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed, extension_policies)
                    .instrument(info_span!("envoyextensionpolicies")),
            );
        } else {
            tracing::warn!(
                "envoyextensionpolicies.gateway.envoyproxy.io resource kind not found, skipping watches"
            );
        }

        // The maximum number of status patches to buffer. As a conservative
        // estimate, we assume that sending a patch will take at least 1ms, so
        // the buffer holds as many patches as can be sent in one period.
        let queue_size = reconciliation_period.as_millis().clamp(1, 60_000) as usize;
        let (updates_tx, updates_rx) = mpsc::channel(queue_size);

        // Spawn the status reconciliation, cancelling any in-flight pass on
        // shutdown.
        let reconciler = status::Reconciler::new(updates_tx, controllers, reconciler_metrics);
        tokio::spawn(
            reconcile(
                reconciler,
                index,
                reconciliation_period,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("reconciler")),
        );

        let status_controller = status::Controller::new(
            runtime.client(),
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            controller_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn reconcile(
    reconciler: status::Reconciler,
    index: index::SharedIndex,
    period: Duration,
    drain: drain::Watch,
) {
    let shutdown = CancellationToken::new();
    let run = reconciler.run(index, period, shutdown.clone());
    tokio::pin!(run);
    tokio::select! {
        () = &mut run => {}
        handle = drain.signaled() => {
            shutdown.cancel();
            handle.release_after(run).await;
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
