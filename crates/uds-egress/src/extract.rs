//! Turn a Package's allow rules into its egress request

use uds_common::crd::{Allow, Package};

use crate::types::{HostResourceMap, PortProtocol};

/// Host map for every allow rule naming a `remoteHost`
///
/// `None` when no rule names a remote host, so "no egress" and "egress to
/// nothing" are the same thing for the registries.
pub fn create_host_resource_map(pkg: &Package) -> Option<HostResourceMap> {
    let mut map = HostResourceMap::new();

    for rule in pkg.allow_rules() {
        let Some(host) = rule.remote_host.as_deref() else {
            continue;
        };
        let protocol = rule.protocol();
        let entry = map.entry(host.to_string()).or_default();
        for port in rule.host_ports() {
            entry.insert(PortProtocol::new(port, protocol));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Egress rules naming a remote host
pub fn egress_requested(rules: &[Allow]) -> Vec<&Allow> {
    rules.iter().filter(|r| r.is_remote_host_egress()).collect()
}
