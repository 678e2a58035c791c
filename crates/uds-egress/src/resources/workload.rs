//! Per-package sidecar egress resources, written in the package's namespace
//!
//! A namespaced ServiceEntry per requested host and a `REGISTRY_ONLY`
//! Sidecar per distinct workload selector. All carry the package's ownership
//! labels and an owner reference to the Package.

use std::collections::BTreeMap;

use kube::ResourceExt;

use uds_common::crd::Package;
use uds_common::istio::{
    OutboundTrafficPolicy, ServiceEntry, ServiceEntrySpec, Sidecar, SidecarSpec,
    SidecarWorkloadSelector, LOCATION_MESH_EXTERNAL, OUTBOUND_REGISTRY_ONLY, RESOLUTION_DNS,
};
use uds_common::kube_utils::ObjectMeta;
use uds_common::mesh::sanitize_resource_name;

use super::istio_ports;
use crate::types::{HostResource, PortProtocol};

/// Label marking per-package objects written for egress
pub const LABEL_FOR: &str = "uds/for";

/// Value of [`LABEL_FOR`] on per-package egress objects
pub const FOR_EGRESS: &str = "egress";

/// `<pkg>-egress-<host>-<port>-<proto>[-<port>-<proto>...]`
pub fn local_service_entry_name(pkg_name: &str, port_protocols: &[PortProtocol], host: &str) -> String {
    let pp = port_protocols
        .iter()
        .map(|pp| format!("{}-{}", pp.port, pp.protocol.as_str().to_lowercase()))
        .collect::<Vec<_>>()
        .join("-");
    sanitize_resource_name(&format!("{}-egress-{}-{}", pkg_name, host, pp))
}

/// `<pkg>-egress-<k>-<v>...` or `<pkg>-egress-default` without a selector
pub fn sidecar_name(pkg_name: &str, selector: Option<&BTreeMap<String, String>>) -> String {
    let selector = match selector {
        Some(labels) if !labels.is_empty() => labels
            .iter()
            .map(|(k, v)| format!("{}-{}", k, v))
            .collect::<Vec<_>>()
            .join("-"),
        _ => "default".to_string(),
    };
    sanitize_resource_name(&format!("{}-egress-{}", pkg_name, selector))
}

fn package_metadata(name: String, pkg: &Package) -> ObjectMeta {
    let generation = u64::try_from(pkg.generation()).unwrap_or_default();
    ObjectMeta::new(name, pkg.namespace().unwrap_or_default())
        .with_ownership_labels(pkg.name_any(), generation)
        .with_label(LABEL_FOR, FOR_EGRESS)
        .with_owner(pkg)
}

/// Namespace-local ServiceEntry for one host the package requested
pub fn generate_local_service_entry(host: &str, resource: &HostResource, pkg: &Package) -> ServiceEntry {
    let name = local_service_entry_name(&pkg.name_any(), &resource.port_protocol, host);
    ServiceEntry::new(
        package_metadata(name, pkg),
        ServiceEntrySpec {
            hosts: vec![host.to_string()],
            ports: istio_ports(&resource.port_protocol),
            location: LOCATION_MESH_EXTERNAL.to_string(),
            resolution: RESOLUTION_DNS.to_string(),
            export_to: vec![".".to_string()],
        },
    )
}

/// Sidecar restricting the selected workloads to the service registry
pub fn generate_egress_sidecar(
    selector: Option<&BTreeMap<String, String>>,
    pkg: &Package,
) -> Sidecar {
    let name = sidecar_name(&pkg.name_any(), selector);
    Sidecar::new(
        package_metadata(name, pkg),
        SidecarSpec {
            outbound_traffic_policy: OutboundTrafficPolicy {
                mode: OUTBOUND_REGISTRY_ONLY.to_string(),
            },
            workload_selector: selector
                .filter(|labels| !labels.is_empty())
                .map(|labels| SidecarWorkloadSelector {
                    labels: labels.clone(),
                }),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uds_common::crd::{PackageSpec, RemoteProtocol};

    fn package() -> Package {
        let mut pkg = Package::new("curl", PackageSpec::default());
        pkg.metadata.namespace = Some("curl-ns".to_string());
        pkg.metadata.uid = Some("1234".to_string());
        pkg.metadata.generation = Some(5);
        pkg
    }

    #[test]
    fn local_service_entry_name_lists_ports() {
        let name = local_service_entry_name(
            "curl",
            &[
                PortProtocol::new(443, RemoteProtocol::Tls),
                PortProtocol::new(80, RemoteProtocol::Http),
            ],
            "example.com",
        );
        assert_eq!(name, "curl-egress-example-com-443-tls-80-http");
    }

    #[test]
    fn local_service_entry_is_owned_by_package() {
        let mut resource = HostResource::default();
        resource.insert(PortProtocol::new(443, RemoteProtocol::Tls));
        let se = generate_local_service_entry("example.com", &resource, &package());

        assert_eq!(se.metadata.namespace, "curl-ns");
        assert_eq!(se.metadata.labels["uds/package"], "curl");
        assert_eq!(se.metadata.labels["uds/generation"], "5");
        assert_eq!(se.metadata.labels["uds/for"], "egress");
        assert_eq!(se.metadata.owner_references.len(), 1);
        assert_eq!(se.metadata.owner_references[0].kind, "Package");
        assert_eq!(se.spec.export_to, vec!["."]);
    }

    #[test]
    fn sidecar_per_selector() {
        let selector = BTreeMap::from([
            ("app".to_string(), "curl".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        let sidecar = generate_egress_sidecar(Some(&selector), &package());
        assert_eq!(sidecar.metadata.name, "curl-egress-app-curl-tier-web");
        assert_eq!(
            sidecar.spec.workload_selector.as_ref().map(|s| &s.labels),
            Some(&selector)
        );
        assert_eq!(sidecar.spec.outbound_traffic_policy.mode, "REGISTRY_ONLY");

        let default = generate_egress_sidecar(None, &package());
        assert_eq!(default.metadata.name, "curl-egress-default");
        assert!(default.spec.workload_selector.is_none());
    }
}
