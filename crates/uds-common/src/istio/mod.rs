//! Istio resource types
//!
//! Types for generating Istio egress resources:
//! - Gateway, VirtualService, DestinationRule: sidecar egress through the gateway
//! - ServiceEntry: external host registration (sidecar and ambient)
//! - Sidecar: per-workload outbound restriction
//! - AuthorizationPolicy: ambient waypoint authorization

mod networking;
mod security;

pub use networking::{
    Destination, DestinationRule, DestinationRuleSpec, Gateway, GatewaySpec, OutboundTrafficPolicy,
    PortSelector, Route, RouteDestination, RouteMatch, Server, ServerPort, ServerTls,
    ServiceEntry, ServiceEntryPort, ServiceEntrySpec, Sidecar, SidecarSpec,
    SidecarWorkloadSelector, Subset, VirtualService, VirtualServiceSpec, LOCATION_MESH_EXTERNAL,
    OUTBOUND_REGISTRY_ONLY, RESOLUTION_DNS, TLS_MODE_PASSTHROUGH,
};
pub use security::{
    AuthorizationOperation, AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule,
    AuthorizationSource, OperationSpec, SourceSpec, TargetRef, ACTION_ALLOW,
};
