//! The protocol spoken with out-of-process extensions that evaluate
//! expressions embedded in policies, and the topology queries served to them.

use crate::{
    cell::Cell,
    id::{GroupKind, ObjectId, TargetRef},
    policy::Policy,
    topology::Topology,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Identifies the policy on whose behalf an expression is resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMeta {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub target_refs: Vec<TargetRefMeta>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRefMeta {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub policy: PolicyMeta,
    pub expression: String,

    /// Asks the extension to notify the controller when the result changes.
    #[serde(default)]
    pub subscribe: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub result: Result<serde_json::Value, ResolveError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveError {
    pub code: i32,
    pub message: String,
}

#[async_trait::async_trait]
pub trait ExtensionService {
    async fn resolve(&self, req: ResolveRequest) -> anyhow::Result<ResolveResponse>;
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveFailure {
    #[error("extension failed to resolve expression: {message} (code {code})")]
    Remote { code: i32, message: String },

    #[error("resolution was cancelled")]
    Cancelled,

    #[error("failed to reach extension: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Resolves an expression, abandoning the call when `cancel` fires.
///
/// Errors reported with a non-zero code fail the resolution; they are not
/// retried. An error with code zero counts as an empty (`null`) result.
pub async fn resolve<S>(
    service: &S,
    req: ResolveRequest,
    cancel: &CancellationToken,
) -> Result<serde_json::Value, ResolveFailure>
where
    S: ExtensionService + ?Sized,
{
    let rsp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ResolveFailure::Cancelled),
        rsp = service.resolve(req) => rsp.map_err(ResolveFailure::Transport)?,
    };
    match rsp.result {
        Ok(value) => Ok(value),
        Err(ResolveError { code: 0, .. }) => Ok(serde_json::Value::Null),
        Err(ResolveError { code, message }) => Err(ResolveFailure::Remote { code, message }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no topology has been published within {0:?}")]
    NotReady(Duration),
}

/// Answers topology queries against the most recently published topology.
#[derive(Clone, Debug)]
pub struct TopologyQueries {
    topology: Arc<Cell<Topology>>,
    timeout: Duration,
}

// === impl PolicyMeta ===

impl PolicyMeta {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            group: policy.id.group_kind.group.clone(),
            kind: policy.id.group_kind.kind.clone(),
            namespace: policy.id.namespace.clone().unwrap_or_default(),
            name: policy.id.name.clone(),
            target_refs: policy
                .target_refs
                .iter()
                .map(|tr| TargetRefMeta {
                    group: tr.group.clone(),
                    kind: tr.kind.clone(),
                    name: tr.name.clone(),
                    section_name: tr.section.clone(),
                })
                .collect(),
        }
    }

    pub fn target_refs(&self) -> Vec<TargetRef> {
        self.target_refs
            .iter()
            .map(|tr| {
                let mut target_ref =
                    TargetRef::new(&*tr.group, &*tr.kind, &*tr.name).in_namespace(&*self.namespace);
                target_ref.section = tr.section_name.clone();
                target_ref
            })
            .collect()
    }
}

// === impl TopologyQueries ===

impl TopologyQueries {
    pub fn new(topology: Arc<Cell<Topology>>, timeout: Duration) -> Self {
        Self { topology, timeout }
    }

    pub async fn find_gateways_for(
        &self,
        target_refs: &[TargetRef],
    ) -> Result<Vec<ObjectId>, QueryError> {
        let topology = self.topology().await?;
        Ok(topology
            .find_gateways_for(target_refs)
            .into_iter()
            .map(|gw| gw.id().clone())
            .collect())
    }

    pub async fn find_policies_for(
        &self,
        target_refs: &[TargetRef],
        policy_kind: &GroupKind,
    ) -> Result<Vec<Policy>, QueryError> {
        let topology = self.topology().await?;
        Ok(topology
            .find_policies_for(target_refs, policy_kind)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn topology(&self) -> Result<Arc<Topology>, QueryError> {
        self.topology
            .get_wait_timeout(self.timeout)
            .await
            .ok_or(QueryError::NotReady(self.timeout))
    }
}
