//! Fold a registry into one request per host

use crate::types::{EgressResourceMap, PackageHostMap};

/// Union every package's hosts into an [`EgressResourceMap`]
///
/// Packages are listed once per host in registry order; port/protocol
/// pairs are unioned in first-seen order.
pub fn synthesize(packages: &PackageHostMap) -> EgressResourceMap {
    let mut resources = EgressResourceMap::new();

    for (pkg_id, host_map) in packages {
        for (host, requested) in host_map {
            let resource = resources.entry(host.clone()).or_default();
            if !resource.packages.contains(pkg_id) {
                resource.packages.push(pkg_id.clone());
            }
            for pp in &requested.port_protocol {
                if !resource.port_protocols.contains(pp) {
                    resource.port_protocols.push(*pp);
                }
            }
        }
    }

    resources
}
