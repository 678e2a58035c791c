//! Istio `networking.istio.io` types used for egress
//!
//! Types are deserialized from the cluster as well as generated, so every
//! collection defaults to empty and unknown fields are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kube_utils::{impl_api_defaults, HasApiResource, ObjectMeta};

// =============================================================================
// Gateway
// =============================================================================

/// Istio Gateway running on the egress gateway pods
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    /// API version
    #[serde(default = "Gateway::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Gateway::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: GatewaySpec,
}

impl HasApiResource for Gateway {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "Gateway";
}

impl_api_defaults!(Gateway);

impl Gateway {
    /// Create a new Gateway
    pub fn new(metadata: ObjectMeta, spec: GatewaySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }

    /// Whether any server on this gateway claims `host`
    pub fn claims_host(&self, host: &str) -> bool {
        self.spec
            .servers
            .iter()
            .any(|s| s.hosts.iter().any(|h| h == host))
    }
}

/// Gateway spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Pod labels selecting the gateway deployment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    /// Servers (one per port/protocol)
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// Gateway server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Hosts exposed on this server
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Listening port
    pub port: ServerPort,
    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ServerTls>,
}

/// Gateway server port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerPort {
    /// Port name
    pub name: String,
    /// Port number
    pub number: u16,
    /// Protocol (TLS, HTTP)
    pub protocol: String,
}

/// Gateway server TLS settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerTls {
    /// TLS mode (PASSTHROUGH for egress)
    pub mode: String,
}

/// TLS passthrough mode
pub const TLS_MODE_PASSTHROUGH: &str = "PASSTHROUGH";

// =============================================================================
// VirtualService
// =============================================================================

/// Istio VirtualService routing egress through the gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    /// API version
    #[serde(default = "VirtualService::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "VirtualService::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: VirtualServiceSpec,
}

impl HasApiResource for VirtualService {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "VirtualService";
}

impl_api_defaults!(VirtualService);

impl VirtualService {
    /// Create a new VirtualService
    pub fn new(metadata: ObjectMeta, spec: VirtualServiceSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// VirtualService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Destination hosts
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Gateways (and `mesh`) the routes bind to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// TLS routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<Route>,
    /// HTTP routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<Route>,
}

/// A TLS or HTTP route: egress routes only use match + destination
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Route {
    /// Match conditions
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<RouteMatch>,
    /// Destinations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<RouteDestination>,
}

/// Route match condition
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    /// Gateways this match applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// Port to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// SNI hosts (TLS routes only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sni_hosts: Vec<String>,
}

/// Route destination wrapper
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteDestination {
    /// Destination
    pub destination: Destination,
}

/// Destination host, subset and port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    /// Destination host
    pub host: String,
    /// DestinationRule subset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    /// Destination port
    pub port: PortSelector,
}

/// Numeric port selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PortSelector {
    /// Port number
    pub number: u16,
}

// =============================================================================
// ServiceEntry
// =============================================================================

/// Istio ServiceEntry registering an external host with the mesh
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    /// API version
    #[serde(default = "ServiceEntry::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "ServiceEntry::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceEntrySpec,
}

impl HasApiResource for ServiceEntry {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "ServiceEntry";
}

impl_api_defaults!(ServiceEntry);

impl ServiceEntry {
    /// Create a new ServiceEntry
    pub fn new(metadata: ObjectMeta, spec: ServiceEntrySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// ServiceEntry spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    /// Hosts (DNS names)
    pub hosts: Vec<String>,
    /// Ports
    pub ports: Vec<ServiceEntryPort>,
    /// Location: MESH_EXTERNAL or MESH_INTERNAL
    pub location: String,
    /// Resolution: DNS, STATIC, NONE
    pub resolution: String,
    /// Namespaces the entry is visible to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_to: Vec<String>,
}

/// ServiceEntry port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceEntryPort {
    /// Port number
    pub number: u16,
    /// Port name
    pub name: String,
    /// Protocol (TLS, HTTP)
    pub protocol: String,
}

/// ServiceEntry location for hosts outside the mesh
pub const LOCATION_MESH_EXTERNAL: &str = "MESH_EXTERNAL";

/// ServiceEntry DNS resolution
pub const RESOLUTION_DNS: &str = "DNS";

// =============================================================================
// DestinationRule
// =============================================================================

/// Istio DestinationRule defining the egress gateway subset
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRule {
    /// API version
    #[serde(default = "DestinationRule::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "DestinationRule::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DestinationRuleSpec,
}

impl HasApiResource for DestinationRule {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "DestinationRule";
}

impl_api_defaults!(DestinationRule);

impl DestinationRule {
    /// Create a new DestinationRule
    pub fn new(metadata: ObjectMeta, spec: DestinationRuleSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// DestinationRule spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Service host the rule applies to
    pub host: String,
    /// Named subsets
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

/// DestinationRule subset
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subset {
    /// Subset name
    pub name: String,
}

// =============================================================================
// Sidecar
// =============================================================================

/// Istio Sidecar restricting a workload's outbound traffic to the registry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    /// API version
    #[serde(default = "Sidecar::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Sidecar::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: SidecarSpec,
}

impl HasApiResource for Sidecar {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "Sidecar";
}

impl_api_defaults!(Sidecar);

impl Sidecar {
    /// Create a new Sidecar
    pub fn new(metadata: ObjectMeta, spec: SidecarSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Sidecar spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Outbound policy
    pub outbound_traffic_policy: OutboundTrafficPolicy,
    /// Workloads this sidecar config applies to (all in namespace when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<SidecarWorkloadSelector>,
}

/// Sidecar outbound traffic policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OutboundTrafficPolicy {
    /// REGISTRY_ONLY or ALLOW_ANY
    pub mode: String,
}

/// Outbound traffic restricted to the service registry
pub const OUTBOUND_REGISTRY_ONLY: &str = "REGISTRY_ONLY";

/// Sidecar workload selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SidecarWorkloadSelector {
    /// Pod labels
    pub labels: BTreeMap<String, String>,
}
