//! Gateway Policy Controller Index
//!
//! The index maintains the latest observed state of every resource that
//! contributes to the policy topology:
//!
//! - `GatewayClass`, `Gateway`, `HTTPRoute`, `GRPCRoute` and `Service`
//!   objects become targetables, linked by their references to one another.
//! - `RateLimitPolicy` and `AuthPolicy` objects are attached to the
//!   targetables they reference.
//! - The `Kuadrant` object, and the `Limitador` and `Authorino` deployments,
//!   signal whether the system is installed.
//! - Gateway provider resources (`EnvoyFilter`, `WasmPlugin`,
//!   `EnvoyPatchPolicy`, `EnvoyExtensionPolicy`) report whether policies have
//!   been realized for each gateway.
//!
//! ```text
//! [ GatewayClass ] -> [ Gateway ] -> [ Listener ] -> [ Route ] -> [ Service ]
//!                          ^             ^              ^            ^
//!                          +-------------+-- [ Policy ] +------------+
//! ```
//!
//! The index does not compute anything on update. Instead, each reconciliation
//! pass takes a [`Snapshot`], which builds an immutable topology and publishes
//! it through a shared cell for readers outside of the pass.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod downstream;
mod gateway;
mod index;
pub mod metrics;
mod resource_id;


pub use self::{
    downstream::DownstreamIndex,
    index::{Index, SharedIndex, Snapshot},
    metrics::IndexMetrics,
    resource_id::ResourceId,
};
