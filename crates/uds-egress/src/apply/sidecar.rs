//! Sidecar-mode egress through the shared egress gateway

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use k8s_openapi::api::core::v1::Service;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{error, info, warn};

use uds_common::crd::Package;
use uds_common::istio::{DestinationRule, Gateway, ServiceEntry, Sidecar, VirtualService};
use uds_common::kube_utils::HasApiResource;
use uds_common::mesh::{EGRESS_GATEWAY_SERVICE, SHARED_EGRESS_PKG_ID, SIDECAR_EGRESS_NAMESPACE};
use uds_common::{Error, Result, LABEL_PACKAGE};

use super::{apply_object, describe};
use crate::client::{parse_dynamic, EgressClient};
use crate::extract::egress_requested;
use crate::purge::{purge_by_selector, purge_orphans};
use crate::resources::sidecar::{generate_egress_virtual_service, generate_shared_service_entry};
use crate::resources::workload::{
    generate_egress_sidecar, generate_local_service_entry, FOR_EGRESS, LABEL_FOR,
};
use crate::shared::SharedResourceManager;
use crate::types::{EgressResource, EgressResourceMap, HostResourceMap};

/// Check the egress gateway is deployed and exposes every requested port
pub async fn validate_egress_gateway(
    client: &dyn EgressClient,
    host_map: &HostResourceMap,
) -> Result<()> {
    if !client.namespace_exists(SIDECAR_EGRESS_NAMESPACE).await? {
        let msg = "Egress gateway is not enabled in the cluster. Please enable the egress gateway and retry.";
        error!(namespace = SIDECAR_EGRESS_NAMESPACE, "{}", msg);
        return Err(Error::egress_unavailable(SIDECAR_EGRESS_NAMESPACE, msg));
    }

    let ar = ApiResource::erase::<Service>(&());
    let Some(obj) = client
        .get(&ar, SIDECAR_EGRESS_NAMESPACE, EGRESS_GATEWAY_SERVICE)
        .await?
    else {
        return Err(Error::egress_unavailable(
            SIDECAR_EGRESS_NAMESPACE,
            format!("Service {} not found", EGRESS_GATEWAY_SERVICE),
        ));
    };
    let service: Service = parse_dynamic(&obj)?;

    let exposed: BTreeSet<i32> = service
        .spec
        .and_then(|s| s.ports)
        .unwrap_or_default()
        .iter()
        .map(|p| p.port)
        .collect();

    for (host, resource) in host_map {
        for pp in &resource.port_protocol {
            if !exposed.contains(&i32::from(pp.port)) {
                let msg = format!(
                    "Egress gateway does not expose port {} for host {}. Please update the egress gateway service to expose this port.",
                    pp.port, host
                );
                error!(host = %host, port = pp.port, "{}", msg);
                return Err(Error::egress_unavailable(SIDECAR_EGRESS_NAMESPACE, msg));
            }
        }
    }

    Ok(())
}

fn workload_selector(pkg: &Package) -> String {
    format!(
        "{}={},{}={}",
        LABEL_PACKAGE,
        pkg.name_any(),
        LABEL_FOR,
        FOR_EGRESS
    )
}

/// Write the package's namespaced ServiceEntries and Sidecars, then drop the
/// ones an earlier generation of the package left behind
pub async fn create_sidecar_workload_egress_resources(
    client: &dyn EgressClient,
    pkg: &Package,
    host_map: &HostResourceMap,
) -> Result<()> {
    for (host, resource) in host_map {
        let se = generate_local_service_entry(host, resource, pkg);
        apply_object(client, &ServiceEntry::api_resource(), &se.metadata, &se).await?;
    }

    let mut seen: BTreeSet<Option<BTreeMap<String, String>>> = BTreeSet::new();
    for rule in egress_requested(pkg.allow_rules()) {
        let selector = rule.selector.clone().filter(|s| !s.is_empty());
        if !seen.insert(selector.clone()) {
            continue;
        }
        let sidecar = generate_egress_sidecar(selector.as_ref(), pkg);
        apply_object(client, &Sidecar::api_resource(), &sidecar.metadata, &sidecar).await?;
    }

    purge_workload_egress_resources(client, pkg).await
}

/// Delete the package's namespaced egress objects not written at its
/// current generation
pub async fn purge_workload_egress_resources(client: &dyn EgressClient, pkg: &Package) -> Result<()> {
    let Some(namespace) = pkg.namespace() else {
        return Ok(());
    };
    let generation = pkg.generation().to_string();
    let selector = workload_selector(pkg);

    for ar in [ServiceEntry::api_resource(), Sidecar::api_resource()] {
        purge_by_selector(client, &generation, &namespace, &selector, &ar).await?;
    }
    Ok(())
}

/// Warn about Gateways and VirtualServices outside the egress namespace that
/// already claim `host`
pub async fn warn_matching_existing_resources(client: &dyn EgressClient, host: &str) {
    match client.list_all(&Gateway::api_resource()).await {
        Ok(gateways) => {
            for obj in gateways {
                let Ok(gw) = parse_dynamic::<Gateway>(&obj) else {
                    continue;
                };
                if gw.metadata.namespace != SIDECAR_EGRESS_NAMESPACE && gw.claims_host(host) {
                    warn!(
                        host,
                        namespace = %gw.metadata.namespace,
                        name = %gw.metadata.name,
                        "Found existing Gateway with a server for the egress host"
                    );
                }
            }
        }
        Err(e) => warn!(host, error = %e, "could not list Gateways"),
    }

    match client.list_all(&VirtualService::api_resource()).await {
        Ok(services) => {
            for obj in services {
                let Ok(vs) = parse_dynamic::<VirtualService>(&obj) else {
                    continue;
                };
                if vs.metadata.namespace != SIDECAR_EGRESS_NAMESPACE
                    && vs.spec.hosts.iter().any(|h| h == host)
                {
                    warn!(
                        host,
                        namespace = %vs.metadata.namespace,
                        name = %vs.metadata.name,
                        "Found existing VirtualService routing the egress host"
                    );
                }
            }
        }
        Err(e) => warn!(host, error = %e, "could not list VirtualServices"),
    }
}

async fn apply_host_resources(
    client: &dyn EgressClient,
    shared: &SharedResourceManager,
    host: &str,
    resource: &EgressResource,
    generation: u64,
) -> std::result::Result<(), String> {
    warn_matching_existing_resources(client, host).await;

    let virtual_service = generate_egress_virtual_service(host, resource, generation);
    let service_entry = generate_shared_service_entry(host, resource, generation);

    let (vs_ar, se_ar) = (VirtualService::api_resource(), ServiceEntry::api_resource());

    let (gw, vs, se) = tokio::join!(
        describe(
            format!("Failed to apply Gateway for host {}", host),
            shared.ensure_gateway_servers(host, resource, generation),
        ),
        describe(
            format!("Failed to apply Virtual Service for host {}", host),
            apply_object(client, &vs_ar, &virtual_service.metadata, &virtual_service),
        ),
        describe(
            format!("Failed to apply Service Entry for host {}", host),
            apply_object(client, &se_ar, &service_entry.metadata, &service_entry),
        ),
    );

    let failures: Vec<String> = [gw, vs, se].into_iter().filter_map(|r| r.err()).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        error!(host, generation, ?failures, "failed to apply egress resources for host");
        Err(failures.join("; "))
    }
}

/// Write the shared sidecar egress objects for every host
///
/// Hosts are applied concurrently. A failing host or DestinationRule does not
/// stop the rest, but fails the call once everything has been attempted.
pub async fn apply_sidecar_egress_resources(
    client: &dyn EgressClient,
    shared: &SharedResourceManager,
    resources: &EgressResourceMap,
    generation: u64,
) -> Result<()> {
    let packages: Vec<String> = resources
        .values()
        .flat_map(|r| r.packages.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let destination_rule = if packages.is_empty() {
        Ok(())
    } else {
        describe(
            "Failed to reconcile DestinationRule".to_string(),
            shared.ensure_destination_rule(&packages, generation),
        )
        .await
    };

    let results = join_all(resources.iter().map(|(host, resource)| {
        apply_host_resources(client, shared, host, resource, generation)
    }))
    .await;

    let failures: Vec<String> = std::iter::once(destination_rule)
        .chain(results)
        .filter_map(|r| r.err())
        .collect();
    if !failures.is_empty() {
        return Err(Error::internal_with_context(
            "apply_sidecar_egress_resources",
            failures.join("; "),
        ));
    }

    info!(hosts = resources.len(), generation, "applied sidecar egress resources");
    Ok(())
}

/// Delete shared sidecar egress objects from older generations
pub async fn purge_sidecar_egress_resources(
    client: &dyn EgressClient,
    generation: u64,
) -> Result<usize> {
    let generation = generation.to_string();
    let mut deleted = 0;
    for ar in [
        Gateway::api_resource(),
        VirtualService::api_resource(),
        ServiceEntry::api_resource(),
        DestinationRule::api_resource(),
    ] {
        deleted += purge_orphans(
            client,
            &generation,
            SIDECAR_EGRESS_NAMESPACE,
            SHARED_EGRESS_PKG_ID,
            &ar,
        )
        .await?;
    }
    Ok(deleted)
}
