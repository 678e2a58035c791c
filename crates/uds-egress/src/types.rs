//! Egress request model shared by the registries, synthesizer and appliers

use std::collections::BTreeMap;
use std::fmt;

use uds_common::crd::RemoteProtocol;

/// `<name>-<namespace>` of a Package
pub type PackageId = String;

/// A port and the protocol spoken on it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocol {
    /// Destination port
    pub port: u16,
    /// Protocol
    pub protocol: RemoteProtocol,
}

impl PortProtocol {
    /// Create a new port/protocol pair
    pub fn new(port: u16, protocol: RemoteProtocol) -> Self {
        Self { port, protocol }
    }

    /// Istio port name: `<protocol lower>-<port>`
    pub fn port_name(&self) -> String {
        format!("{}-{}", self.protocol.as_str().to_lowercase(), self.port)
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Ports and protocols requested for one host, in first-requested order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostResource {
    /// Unique port/protocol pairs
    pub port_protocol: Vec<PortProtocol>,
}

impl HostResource {
    /// Add a pair unless it is already present
    pub fn insert(&mut self, pp: PortProtocol) {
        if !self.port_protocol.contains(&pp) {
            self.port_protocol.push(pp);
        }
    }
}

/// Host → requested ports for a single package
pub type HostResourceMap = BTreeMap<String, HostResource>;

/// Registry contents: package → its host map
pub type PackageHostMap = BTreeMap<PackageId, HostResourceMap>;

/// What a registry update does with a package's entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageAction {
    /// Insert or replace the package's entry
    AddOrUpdate,
    /// Drop the package's entry
    Remove,
}

/// Union of every package's request for one host
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EgressResource {
    /// Requesting packages, first-seen order, unique
    pub packages: Vec<PackageId>,
    /// Unique port/protocol pairs across those packages
    pub port_protocols: Vec<PortProtocol>,
}

/// Host → merged request, rebuilt every pass
pub type EgressResourceMap = BTreeMap<String, EgressResource>;
