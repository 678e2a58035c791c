//! In-memory egress registries, one per mesh mode
//!
//! Each registry maps a package id to the hosts it requested. Updates go
//! through a `tokio::sync::Mutex`, which queues waiters in arrival order, so
//! concurrent reconciles of different packages never lose each other's writes.

use tokio::sync::Mutex;
use tracing::debug;

use uds_common::crd::Mode;
use uds_common::{Error, Result};

use crate::types::{HostResourceMap, PackageAction, PackageHostMap};

/// Egress requests for every package in one mesh mode
#[derive(Debug)]
pub struct Registry {
    mode: Mode,
    packages: Mutex<PackageHostMap>,
}

impl Registry {
    /// Create an empty registry for `mode`
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            packages: Mutex::new(PackageHostMap::new()),
        }
    }

    /// Mode this registry tracks
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Insert, replace or remove a package's entry
    ///
    /// `Remove` and `AddOrUpdate` with no host map both drop the entry.
    /// An upsert that would give an already-registered host and port a second
    /// protocol is rejected and leaves the registry untouched.
    pub async fn update(
        &self,
        host_map: Option<HostResourceMap>,
        pkg_id: &str,
        action: PackageAction,
    ) -> Result<()> {
        debug!(mode = %self.mode, package = pkg_id, "Locking egress package map for update");
        let mut packages = self.packages.lock().await;

        let result = match (action, host_map) {
            (PackageAction::Remove, _) | (PackageAction::AddOrUpdate, None) => {
                packages.remove(pkg_id);
                Ok(())
            }
            (PackageAction::AddOrUpdate, Some(map)) => {
                validate_protocols(&packages, &map, pkg_id).map(|()| {
                    packages.insert(pkg_id.to_string(), map);
                })
            }
        };

        drop(packages);
        debug!(mode = %self.mode, package = pkg_id, "Unlocking egress package map for update");
        result
    }

    /// Copy of the current contents
    pub async fn snapshot(&self) -> PackageHostMap {
        self.packages.lock().await.clone()
    }
}

/// Reject a host map that gives a port two protocols, either within itself or
/// against another package
pub fn validate_protocols(
    packages: &PackageHostMap,
    host_map: &HostResourceMap,
    pkg_id: &str,
) -> Result<()> {
    for (host, requested) in host_map {
        for (i, pp) in requested.port_protocol.iter().enumerate() {
            if let Some(earlier) = requested.port_protocol[..i]
                .iter()
                .find(|e| e.port == pp.port && e.protocol != pp.protocol)
            {
                return Err(Error::ProtocolConflict {
                    host: host.clone(),
                    port: pp.port,
                    package: pkg_id.to_string(),
                    requested: pp.protocol.to_string(),
                    existing_package: pkg_id.to_string(),
                    existing: earlier.protocol.to_string(),
                });
            }
        }

        for (other_id, other_map) in packages.iter().filter(|(id, _)| id.as_str() != pkg_id) {
            let Some(existing) = other_map.get(host) else {
                continue;
            };
            for pp in &requested.port_protocol {
                if let Some(conflict) = existing
                    .port_protocol
                    .iter()
                    .find(|e| e.port == pp.port && e.protocol != pp.protocol)
                {
                    return Err(Error::ProtocolConflict {
                        host: host.clone(),
                        port: pp.port,
                        package: pkg_id.to_string(),
                        requested: pp.protocol.to_string(),
                        existing_package: other_id.clone(),
                        existing: conflict.protocol.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
