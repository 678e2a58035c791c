//! UDS shared egress controller
//!
//! Packages that allow egress to remote hosts are collected into two
//! registries, one per mesh mode. Every change triggers a pass that
//! synthesizes the shared egress objects from the whole registry, applies
//! them under a new generation and deletes what the generation did not
//! rewrite.
//!
//! - Sidecar mode routes through the egress gateway in
//!   `istio-egress-gateway` (Gateway, VirtualService, ServiceEntry and a
//!   shared DestinationRule), plus per-package ServiceEntry and Sidecar
//!   objects in the package namespace.
//! - Ambient mode routes through the `egress-waypoint` in
//!   `istio-egress-ambient` with a ServiceEntry and AuthorizationPolicy per
//!   host.

pub mod apply;
pub mod client;
pub mod config;
pub mod controller;
pub mod extract;
pub mod purge;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod shared;
pub mod synth;
pub mod types;
pub mod waypoint;

#[cfg(test)]
mod testing;
