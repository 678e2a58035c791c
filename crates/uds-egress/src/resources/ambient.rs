//! Shared ambient-mode egress resources in `istio-egress-ambient`
//!
//! One waypoint Gateway handles all ambient egress. Each host gets a
//! ServiceEntry bound to the waypoint and an AuthorizationPolicy, enforced at
//! the waypoint, that lists per port which workloads may reach the host.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use uds_common::crd::{Direction, Mode, Package, RemoteGenerated};
use uds_common::gateway_api::{
    AllowedRoutes, Gateway, GatewayInfrastructure, GatewayListener, GatewaySpec, ParametersRef,
    RouteGroupKind, RouteNamespaces,
};
use uds_common::istio::{
    AuthorizationOperation, AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule,
    AuthorizationSource, OperationSpec, ServiceEntry, ServiceEntrySpec, SourceSpec, TargetRef,
    ACTION_ALLOW, LOCATION_MESH_EXTERNAL, RESOLUTION_DNS,
};
use uds_common::kube_utils::{HasApiResource, ObjectMeta};
use uds_common::mesh::{
    principal, sanitize_resource_name, AMBIENT_EGRESS_NAMESPACE, AMBIENT_SHARED_EGRESS_PKG_ID,
    EGRESS_WAYPOINT_CONFIG, EGRESS_WAYPOINT_NAME, HBONE_PORT, USE_WAYPOINT_LABEL,
    USE_WAYPOINT_NAMESPACE_LABEL, WAYPOINT_GATEWAY_CLASS,
};

use super::{istio_ports, owner_annotations};
use crate::types::EgressResource;

/// `ambient-se-<host>`
pub fn ambient_service_entry_name(host: &str) -> String {
    sanitize_resource_name(&format!("ambient-se-{}", host))
}

/// `ambient-ap-<host>`
pub fn ambient_authorization_policy_name(host: &str) -> String {
    sanitize_resource_name(&format!("ambient-ap-{}", host))
}

fn shared_metadata<'a>(
    name: String,
    packages: impl IntoIterator<Item = &'a String>,
    generation: u64,
) -> ObjectMeta {
    let mut meta = ObjectMeta::new(name, AMBIENT_EGRESS_NAMESPACE)
        .with_ownership_labels(AMBIENT_SHARED_EGRESS_PKG_ID, generation);
    meta.annotations = owner_annotations(packages);
    meta
}

/// The shared egress waypoint, annotated with every ambient package
pub fn generate_egress_waypoint<'a>(
    packages: impl IntoIterator<Item = &'a String>,
    generation: u64,
) -> Gateway {
    Gateway::new(
        shared_metadata(EGRESS_WAYPOINT_NAME.to_string(), packages, generation),
        GatewaySpec {
            gateway_class_name: WAYPOINT_GATEWAY_CLASS.to_string(),
            listeners: vec![GatewayListener {
                name: "mesh".to_string(),
                port: HBONE_PORT,
                protocol: "HBONE".to_string(),
                allowed_routes: Some(AllowedRoutes {
                    namespaces: RouteNamespaces {
                        from: "All".to_string(),
                    },
                    kinds: vec![RouteGroupKind {
                        group: "networking.istio.io".to_string(),
                        kind: ServiceEntry::KIND.to_string(),
                    }],
                }),
            }],
            infrastructure: Some(GatewayInfrastructure {
                parameters_ref: ParametersRef {
                    group: String::new(),
                    kind: "ConfigMap".to_string(),
                    name: EGRESS_WAYPOINT_CONFIG.to_string(),
                },
            }),
        },
    )
}

/// ServiceEntry for `host`, routed through the egress waypoint
pub fn generate_ambient_service_entry(
    host: &str,
    resource: &EgressResource,
    generation: u64,
) -> ServiceEntry {
    let meta = shared_metadata(ambient_service_entry_name(host), &resource.packages, generation)
        .with_label(USE_WAYPOINT_LABEL, EGRESS_WAYPOINT_NAME)
        .with_label(USE_WAYPOINT_NAMESPACE_LABEL, AMBIENT_EGRESS_NAMESPACE);

    ServiceEntry::new(
        meta,
        ServiceEntrySpec {
            hosts: vec![host.to_string()],
            ports: istio_ports(&resource.port_protocols),
            location: LOCATION_MESH_EXTERNAL.to_string(),
            resolution: RESOLUTION_DNS.to_string(),
            export_to: vec![".".to_string()],
        },
    )
}

/// Callers allowed through the waypoint on one port
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortIdentities {
    /// `cluster.local/ns/<ns>/sa/<sa>` principals
    pub principals: BTreeSet<String>,
    /// Whole namespaces
    pub namespaces: BTreeSet<String>,
}

impl PortIdentities {
    /// Neither principals nor namespaces
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty() && self.namespaces.is_empty()
    }

    fn add(&mut self, namespace: &str, service_account: Option<&str>) {
        match service_account {
            Some(sa) => {
                self.principals.insert(principal(namespace, sa));
            }
            None => {
                self.namespaces.insert(namespace.to_string());
            }
        }
    }
}

/// Port → identities allowed to reach a host
pub type HostIdentities = BTreeMap<u16, PortIdentities>;

/// Resolve which ambient workloads may reach each port of `host`
///
/// Deleting packages and packages in sidecar mode contribute nothing.
/// `remoteGenerated: Anywhere` rules match every host, restricted to their
/// explicit ports when they name any. Ports with no identity are omitted.
pub fn resolve_host_identities(
    packages: &[Package],
    host: &str,
    resource: &EgressResource,
) -> HostIdentities {
    let mut identities = HostIdentities::new();

    for pkg in packages
        .iter()
        .filter(|p| !p.is_deleting() && p.mesh_mode() == Mode::Ambient)
    {
        let Some(namespace) = pkg.namespace() else {
            continue;
        };

        for rule in pkg
            .allow_rules()
            .iter()
            .filter(|r| r.direction == Direction::Egress)
        {
            let covered: Vec<u16> = if rule.remote_host.as_deref() == Some(host) {
                rule.host_ports()
            } else if rule.remote_generated == Some(RemoteGenerated::Anywhere) {
                match rule.explicit_ports() {
                    Some(ports) => ports,
                    None => resource.port_protocols.iter().map(|pp| pp.port).collect(),
                }
            } else {
                continue;
            };

            for pp in resource
                .port_protocols
                .iter()
                .filter(|pp| covered.contains(&pp.port))
            {
                identities
                    .entry(pp.port)
                    .or_default()
                    .add(&namespace, rule.service_account.as_deref());
            }
        }
    }

    identities
}

/// AuthorizationPolicy allowing the resolved identities to reach `host`
///
/// One rule per port; principals and namespaces are separate sources so
/// either grants access.
pub fn generate_ambient_authorization_policy(
    host: &str,
    resource: &EgressResource,
    identities: &HostIdentities,
    generation: u64,
) -> AuthorizationPolicy {
    let rules = identities
        .iter()
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(port, ids)| {
            let mut from = Vec::new();
            if !ids.principals.is_empty() {
                from.push(AuthorizationSource {
                    source: SourceSpec {
                        principals: ids.principals.iter().cloned().collect(),
                        namespaces: Vec::new(),
                    },
                });
            }
            if !ids.namespaces.is_empty() {
                from.push(AuthorizationSource {
                    source: SourceSpec {
                        principals: Vec::new(),
                        namespaces: ids.namespaces.iter().cloned().collect(),
                    },
                });
            }
            AuthorizationRule {
                from,
                to: vec![AuthorizationOperation {
                    operation: OperationSpec {
                        ports: vec![port.to_string()],
                    },
                }],
            }
        })
        .collect();

    AuthorizationPolicy::new(
        shared_metadata(
            ambient_authorization_policy_name(host),
            &resource.packages,
            generation,
        ),
        AuthorizationPolicySpec {
            target_refs: vec![TargetRef {
                group: "networking.istio.io".to_string(),
                kind: ServiceEntry::KIND.to_string(),
                name: ambient_service_entry_name(host),
            }],
            action: ACTION_ALLOW.to_string(),
            rules,
        },
    )
}
