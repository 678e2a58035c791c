//! Shared sidecar-mode egress resources in `istio-egress-gateway`
//!
//! Per host: a Gateway on the egress gateway pods, a VirtualService steering
//! mesh traffic to the gateway and the gateway out to the host, and a
//! ServiceEntry registering the host. One DestinationRule defines the
//! gateway subset for all of them.

use std::collections::BTreeMap;

use uds_common::crd::RemoteProtocol;
use uds_common::istio::{
    Destination, DestinationRule, DestinationRuleSpec, Gateway, GatewaySpec, PortSelector, Route,
    RouteDestination, RouteMatch, Server, ServerPort, ServerTls, ServiceEntry, ServiceEntrySpec,
    Subset, VirtualService, VirtualServiceSpec, LOCATION_MESH_EXTERNAL, RESOLUTION_DNS,
    TLS_MODE_PASSTHROUGH,
};
use uds_common::kube_utils::ObjectMeta;
use uds_common::mesh::{
    egress_gateway_host, sanitize_resource_name, EGRESS_DESTINATION_RULE, EGRESS_GATEWAY_SERVICE,
    EGRESS_GATEWAY_SUBSET, MESH_GATEWAY, SHARED_EGRESS_PKG_ID, SIDECAR_EGRESS_NAMESPACE,
};

use super::{istio_ports, owner_annotations};
use crate::types::{EgressResource, PortProtocol};

/// `gateway-<host>`
pub fn gateway_name(host: &str) -> String {
    sanitize_resource_name(&format!("gateway-{}", host))
}

/// `egress-vs-<host>`
pub fn virtual_service_name(host: &str) -> String {
    sanitize_resource_name(&format!("egress-vs-{}", host))
}

/// `service-entry-<host>`
pub fn service_entry_name(host: &str) -> String {
    sanitize_resource_name(&format!("service-entry-{}", host))
}

fn shared_metadata<'a>(
    name: String,
    packages: impl IntoIterator<Item = &'a String>,
    generation: u64,
) -> ObjectMeta {
    let mut meta = ObjectMeta::new(name, SIDECAR_EGRESS_NAMESPACE)
        .with_ownership_labels(SHARED_EGRESS_PKG_ID, generation);
    meta.annotations = owner_annotations(packages);
    meta
}

/// Egress gateway server for one port of `host`
///
/// TLS servers pass the connection through untouched.
fn generate_gateway_server(host: &str, pp: &PortProtocol) -> Server {
    Server {
        hosts: vec![host.to_string()],
        port: ServerPort {
            name: pp.port_name(),
            number: pp.port,
            protocol: pp.protocol.as_str().to_string(),
        },
        tls: (pp.protocol == RemoteProtocol::Tls).then(|| ServerTls {
            mode: TLS_MODE_PASSTHROUGH.to_string(),
        }),
    }
}

/// Gateway exposing every requested port of `host` on the egress gateway
pub fn generate_egress_gateway(host: &str, resource: &EgressResource, generation: u64) -> Gateway {
    Gateway::new(
        shared_metadata(gateway_name(host), &resource.packages, generation),
        GatewaySpec {
            selector: BTreeMap::from([("app".to_string(), EGRESS_GATEWAY_SERVICE.to_string())]),
            servers: resource
                .port_protocols
                .iter()
                .map(|pp| generate_gateway_server(host, pp))
                .collect(),
        },
    )
}

/// Mesh → egress gateway and egress gateway → host routes for one port
fn generate_routes(host: &str, gateway: &str, pp: &PortProtocol) -> [Route; 2] {
    let sni_hosts = match pp.protocol {
        RemoteProtocol::Tls => vec![host.to_string()],
        RemoteProtocol::Http => Vec::new(),
    };

    let to_gateway = Route {
        matches: vec![RouteMatch {
            gateways: vec![MESH_GATEWAY.to_string()],
            port: Some(pp.port),
            sni_hosts: sni_hosts.clone(),
        }],
        route: vec![RouteDestination {
            destination: Destination {
                host: egress_gateway_host(),
                subset: Some(EGRESS_GATEWAY_SUBSET.to_string()),
                port: PortSelector { number: pp.port },
            },
        }],
    };

    let to_host = Route {
        matches: vec![RouteMatch {
            gateways: vec![gateway.to_string()],
            port: Some(pp.port),
            sni_hosts,
        }],
        route: vec![RouteDestination {
            destination: Destination {
                host: host.to_string(),
                subset: None,
                port: PortSelector { number: pp.port },
            },
        }],
    };

    [to_gateway, to_host]
}

/// VirtualService routing `host` through the egress gateway
pub fn generate_egress_virtual_service(
    host: &str,
    resource: &EgressResource,
    generation: u64,
) -> VirtualService {
    let gateway = gateway_name(host);
    let mut tls = Vec::new();
    let mut http = Vec::new();

    for pp in &resource.port_protocols {
        let routes = generate_routes(host, &gateway, pp);
        match pp.protocol {
            RemoteProtocol::Tls => tls.extend(routes),
            RemoteProtocol::Http => http.extend(routes),
        }
    }

    VirtualService::new(
        shared_metadata(virtual_service_name(host), &resource.packages, generation),
        VirtualServiceSpec {
            hosts: vec![host.to_string()],
            gateways: vec![MESH_GATEWAY.to_string(), gateway],
            tls,
            http,
        },
    )
}

/// ServiceEntry registering `host` in the egress gateway namespace
pub fn generate_shared_service_entry(
    host: &str,
    resource: &EgressResource,
    generation: u64,
) -> ServiceEntry {
    ServiceEntry::new(
        shared_metadata(service_entry_name(host), &resource.packages, generation),
        ServiceEntrySpec {
            hosts: vec![host.to_string()],
            ports: istio_ports(&resource.port_protocols),
            location: LOCATION_MESH_EXTERNAL.to_string(),
            resolution: RESOLUTION_DNS.to_string(),
            export_to: vec![".".to_string()],
        },
    )
}

/// DestinationRule defining the egress gateway subset
pub fn generate_destination_rule(packages: &[String], generation: u64) -> DestinationRule {
    DestinationRule::new(
        shared_metadata(EGRESS_DESTINATION_RULE.to_string(), packages, generation),
        DestinationRuleSpec {
            host: egress_gateway_host(),
            subsets: vec![Subset {
                name: EGRESS_GATEWAY_SUBSET.to_string(),
            }],
        },
    )
}
