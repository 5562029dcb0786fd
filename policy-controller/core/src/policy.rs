use crate::id::{ObjectId, TargetRef};
use chrono::{offset::Utc, DateTime};
use std::collections::BTreeMap;

/// Whether a policy's rules yield to, or replace, rules of policies attached
/// closer to a route.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Precedence {
    #[default]
    Defaults,
    Overrides,
}

/// Whether a policy's rules are merged key by key or win/lose as a whole.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    Atomic,
    #[default]
    Merge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule(pub serde_json::Value);

#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub id: ObjectId,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub target_refs: Vec<TargetRef>,
    pub precedence: Precedence,
    pub strategy: MergeStrategy,
    pub rules: BTreeMap<String, Rule>,
}

// === impl Policy ===

impl Policy {
    /// Creates a plain policy: defaults with a per-key merge.
    pub fn new(id: ObjectId, target_refs: Vec<TargetRef>) -> Self {
        Self {
            id,
            creation_timestamp: None,
            target_refs,
            precedence: Precedence::Defaults,
            strategy: MergeStrategy::Merge,
            rules: BTreeMap::new(),
        }
    }

    pub fn locator(&self) -> String {
        self.id.locator()
    }

    /// Target references with the namespace defaulted to the policy's own.
    pub fn local_target_refs(&self) -> impl Iterator<Item = TargetRef> + '_ {
        self.target_refs.iter().map(|tr| {
            let mut tr = tr.clone();
            if tr.namespace.is_none() {
                tr.namespace = self.id.namespace.clone();
            }
            tr
        })
    }

    pub fn is_inert(&self) -> bool {
        self.target_refs.is_empty()
    }
}
