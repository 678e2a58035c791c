//! Resource generators
//!
//! Pure functions from the synthesized egress request to typed Istio and
//! Gateway API objects. Nothing here talks to the cluster.

pub mod ambient;
pub mod sidecar;
pub mod workload;

use std::collections::BTreeMap;

use uds_common::istio::ServiceEntryPort;
use uds_common::mesh::shared_annotation_key;
use uds_common::SHARED_ANNOTATION_VALUE;

use crate::types::PortProtocol;

/// `uds.dev/user-<pkgId>: user` for every contributing package
pub fn owner_annotations<'a>(
    packages: impl IntoIterator<Item = &'a String>,
) -> BTreeMap<String, String> {
    packages
        .into_iter()
        .map(|id| (shared_annotation_key(id), SHARED_ANNOTATION_VALUE.to_string()))
        .collect()
}

/// ServiceEntry ports named `<protocol lower>-<port>`
pub fn istio_ports(port_protocols: &[PortProtocol]) -> Vec<ServiceEntryPort> {
    port_protocols
        .iter()
        .map(|pp| ServiceEntryPort {
            number: pp.port,
            name: pp.port_name(),
            protocol: pp.protocol.as_str().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uds_common::crd::RemoteProtocol;

    #[test]
    fn owner_annotations_key_by_package_id() {
        let packages = vec!["a-ns1".to_string(), "b-ns2".to_string()];
        let annotations = owner_annotations(&packages);
        assert_eq!(annotations["uds.dev/user-a-ns1"], "user");
        assert_eq!(annotations["uds.dev/user-b-ns2"], "user");
        assert_eq!(annotations.len(), 2);
    }

    #[test]
    fn istio_ports_keep_order() {
        let ports = istio_ports(&[
            PortProtocol::new(8080, RemoteProtocol::Http),
            PortProtocol::new(443, RemoteProtocol::Tls),
        ]);
        assert_eq!(ports[0].name, "http-8080");
        assert_eq!(ports[0].protocol, "HTTP");
        assert_eq!(ports[1].name, "tls-443");
    }
}
