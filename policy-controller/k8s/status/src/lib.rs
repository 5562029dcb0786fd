//! Computes the `Accepted` and `Enforced` conditions of policies and writes
//! them back to the cluster.
//!
//! A [`Reconciler`] periodically snapshots the index and derives each
//! policy's status from the snapshot's topology and downstream readiness.
//! Statuses that changed are queued to the [`Controller`], which patches them
//! one at a time.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod conditions;
mod controller;
pub mod enforced;
mod metrics;
mod reconciler;


pub use self::{
    conditions::PolicyError,
    controller::Controller,
    enforced::{Enforcement, Engine, GatewayControllers, GatewayProvider},
    metrics::{ControllerMetrics, ReconcilerMetrics},
    reconciler::{Reconciler, Update},
};
