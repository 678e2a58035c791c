//! UDS Package CRD, restricted to the network fields egress reconciliation reads
//!
//! Packages carry many more fields (expose, sso, monitor). Unknown fields are
//! ignored on deserialization, so only the allow rules and the service mesh
//! mode are modelled here.

use std::collections::BTreeMap;
use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// CRD
// =============================================================================

/// Spec for a UDS Package
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "uds.dev",
    version = "v1alpha1",
    kind = "Package",
    plural = "packages",
    shortname = "pkg",
    namespaced,
    status = "PackageStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Network configuration for the package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

/// Network section of a package
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Allow rules for traffic in and out of the package
    #[serde(default)]
    pub allow: Vec<Allow>,

    /// Service mesh configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_mesh: Option<ServiceMesh>,
}

/// Service mesh configuration for a package
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMesh {
    /// Data plane mode
    #[serde(default)]
    pub mode: Mode,
}

/// Istio data plane mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Per-pod sidecar proxies, egress through the egress gateway
    Sidecar,
    /// ztunnel plus the shared egress waypoint
    #[default]
    Ambient,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sidecar => write!(f, "sidecar"),
            Mode::Ambient => write!(f, "ambient"),
        }
    }
}

/// A single network allow rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Allow {
    /// Traffic direction
    pub direction: Direction,

    /// Remote host for egress (e.g. `api.example.com`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,

    /// Protocol used to reach the remote host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_protocol: Option<RemoteProtocol>,

    /// Generated remote target (e.g. `Anywhere`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_generated: Option<RemoteGenerated>,

    /// Single port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Port list, takes priority over `port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,

    /// Service account the rule applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Pod labels the rule applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Direction of an allow rule
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Direction {
    /// Traffic into the package
    #[default]
    Ingress,
    /// Traffic out of the package
    Egress,
}

/// Protocol for a remote host
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum RemoteProtocol {
    /// TLS passthrough (SNI routed)
    #[default]
    #[serde(rename = "TLS")]
    Tls,
    /// Plain HTTP
    #[serde(rename = "HTTP")]
    Http,
}

impl RemoteProtocol {
    /// Wire name as it appears in Istio resources
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteProtocol::Tls => "TLS",
            RemoteProtocol::Http => "HTTP",
        }
    }

    /// Port used when a rule names neither `port` nor `ports`
    pub fn default_port(&self) -> u16 {
        match self {
            RemoteProtocol::Tls => 443,
            RemoteProtocol::Http => 80,
        }
    }
}

impl fmt::Display for RemoteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generated remote targets
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RemoteGenerated {
    /// The Kubernetes API server
    KubeAPI,
    /// Cluster nodes
    KubeNodes,
    /// The package's own namespace
    IntraNamespace,
    /// Cloud instance metadata endpoints
    CloudMetadata,
    /// Any destination
    Anywhere,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Package as written by the egress controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    /// Current phase
    #[serde(default)]
    pub phase: PackagePhase,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Phase of a package
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PackagePhase {
    /// Waiting for reconciliation
    #[default]
    Pending,
    /// Egress resources applied
    Ready,
    /// Egress reconciliation failed
    Failed,
}

// =============================================================================
// Helpers
// =============================================================================

impl Allow {
    /// Explicit ports on the rule, `ports` taking priority over `port`
    pub fn explicit_ports(&self) -> Option<Vec<u16>> {
        match (&self.ports, self.port) {
            (Some(ports), _) if !ports.is_empty() => Some(ports.clone()),
            (_, Some(port)) => Some(vec![port]),
            _ => None,
        }
    }

    /// Protocol, defaulting to TLS
    pub fn protocol(&self) -> RemoteProtocol {
        self.remote_protocol.unwrap_or_default()
    }

    /// Ports a host rule resolves to, falling back to the protocol default
    pub fn host_ports(&self) -> Vec<u16> {
        self.explicit_ports()
            .unwrap_or_else(|| vec![self.protocol().default_port()])
    }

    /// Egress rule naming a remote host
    pub fn is_remote_host_egress(&self) -> bool {
        self.direction == Direction::Egress && self.remote_host.is_some()
    }
}

impl Package {
    /// Allow rules, empty when the package has no network section
    pub fn allow_rules(&self) -> &[Allow] {
        self.spec
            .network
            .as_ref()
            .map(|n| n.allow.as_slice())
            .unwrap_or_default()
    }

    /// Service mesh mode, ambient unless the package asks for sidecar
    pub fn mesh_mode(&self) -> Mode {
        self.spec
            .network
            .as_ref()
            .and_then(|n| n.service_mesh.as_ref())
            .map(|m| m.mode)
            .unwrap_or_default()
    }

    /// Registry key `<name>-<namespace>`
    pub fn package_id(&self) -> String {
        crate::mesh::package_id(&self.name_any(), &self.namespace().unwrap_or_default())
    }

    /// `metadata.generation`, 0 before the API server assigns one
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Whether the package is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_from_yaml(spec: serde_json::Value) -> Package {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "uds.dev/v1alpha1",
            "kind": "Package",
            "metadata": {"name": "curl", "namespace": "curl-ns", "generation": 3},
            "spec": spec,
        }))
        .unwrap()
    }

    #[test]
    fn parses_egress_rules_and_ignores_unknown_fields() {
        let pkg = package_from_yaml(serde_json::json!({
            "network": {
                "expose": [{"service": "ignored"}],
                "allow": [{
                    "direction": "Egress",
                    "remoteHost": "example.com",
                    "remoteProtocol": "HTTP",
                    "port": 8080,
                    "selector": {"app": "curl"},
                }],
                "serviceMesh": {"mode": "sidecar"},
            },
            "sso": [],
        }));

        let rule = &pkg.allow_rules()[0];
        assert_eq!(rule.remote_host.as_deref(), Some("example.com"));
        assert_eq!(rule.protocol(), RemoteProtocol::Http);
        assert_eq!(rule.host_ports(), vec![8080]);
        assert!(rule.is_remote_host_egress());
        assert_eq!(pkg.mesh_mode(), Mode::Sidecar);
        assert_eq!(pkg.package_id(), "curl-curl-ns");
        assert_eq!(pkg.generation(), 3);
    }

    #[test]
    fn mode_defaults_to_ambient() {
        let pkg = package_from_yaml(serde_json::json!({}));
        assert_eq!(pkg.mesh_mode(), Mode::Ambient);
        assert!(pkg.allow_rules().is_empty());
    }

    #[test]
    fn ports_take_priority_over_port() {
        let rule = Allow {
            direction: Direction::Egress,
            port: Some(8443),
            ports: Some(vec![443, 8443]),
            ..Default::default()
        };
        assert_eq!(rule.host_ports(), vec![443, 8443]);
    }

    #[test]
    fn default_ports_follow_protocol() {
        let tls = Allow::default();
        assert_eq!(tls.host_ports(), vec![443]);
        let http = Allow {
            remote_protocol: Some(RemoteProtocol::Http),
            ..Default::default()
        };
        assert_eq!(http.host_ports(), vec![80]);
        assert_eq!(http.explicit_ports(), None);
    }
}
