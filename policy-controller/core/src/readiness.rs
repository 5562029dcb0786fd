use crate::id::{GroupKind, ObjectId};

/// The observed state of a downstream object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
    Absent,
}

/// Answers whether the objects that realize policies in downstream components
/// have caught up.
///
/// Lookups are scoped to a gateway when a single downstream object carries
/// status for several gateways. Component-wide objects (e.g. the rate limiter
/// deployment) are queried without a gateway.
pub trait ReadinessSignals {
    fn readiness(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> Readiness;

    /// Whether the object was written during the current pass and has not yet
    /// reported ready, in which case its readiness is stale.
    fn modified(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> bool;
}

impl<S: ReadinessSignals + ?Sized> ReadinessSignals for &S {
    fn readiness(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> Readiness {
        (**self).readiness(kind, gateway)
    }

    fn modified(&self, kind: &GroupKind, gateway: Option<&ObjectId>) -> bool {
        (**self).modified(kind, gateway)
    }
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}
