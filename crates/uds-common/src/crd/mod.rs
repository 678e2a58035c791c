//! Custom Resource Definitions consumed by the egress controller

mod package;

pub use package::{
    Allow, Direction, Mode, Network, Package, PackagePhase, PackageSpec, PackageStatus,
    RemoteGenerated, RemoteProtocol, ServiceMesh,
};
