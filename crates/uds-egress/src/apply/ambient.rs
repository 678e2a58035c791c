//! Ambient-mode egress through the shared egress waypoint

use tracing::{debug, error, info, warn};

use uds_common::gateway_api::Gateway as WaypointGateway;
use uds_common::istio::{AuthorizationPolicy, ServiceEntry};
use uds_common::kube_utils::HasApiResource;
use uds_common::mesh::{AMBIENT_EGRESS_NAMESPACE, AMBIENT_SHARED_EGRESS_PKG_ID};
use uds_common::{Error, Result};

use super::apply_object;
use crate::client::EgressClient;
use crate::config::WaypointPollConfig;
use crate::purge::purge_orphans;
use crate::resources::ambient::{
    generate_ambient_authorization_policy, generate_ambient_service_entry,
    generate_egress_waypoint, resolve_host_identities,
};
use crate::types::{EgressResourceMap, PackageId};
use crate::waypoint::ensure_waypoint_ready;

/// Fail early when the ambient egress component is not deployed
pub async fn validate_ambient_namespace(client: &dyn EgressClient) -> Result<()> {
    if client.namespace_exists(AMBIENT_EGRESS_NAMESPACE).await? {
        return Ok(());
    }
    let msg = format!(
        "The '{ns}' namespace was not found. Ensure the '{ns}' component is deployed and try again.",
        ns = AMBIENT_EGRESS_NAMESPACE
    );
    error!(namespace = AMBIENT_EGRESS_NAMESPACE, "{}", msg);
    Err(Error::egress_unavailable(AMBIENT_EGRESS_NAMESPACE, msg))
}

/// Write the waypoint and the per-host ServiceEntry and AuthorizationPolicy
///
/// Nothing is written when no ambient package requests egress. Hosts whose
/// callers cannot be resolved yet are skipped, so a later purge removes any
/// policy they had.
pub async fn apply_ambient_egress_resources(
    client: &dyn EgressClient,
    packages: &[PackageId],
    resources: &EgressResourceMap,
    generation: u64,
    poll: &WaypointPollConfig,
) -> Result<()> {
    if packages.is_empty() {
        debug!("no ambient egress requested, skipping waypoint");
        return Ok(());
    }

    let waypoint = generate_egress_waypoint(packages, generation);
    ensure_waypoint_ready(client, &waypoint, poll).await?;

    let all_packages = client.list_packages().await?;
    let se_ar = ServiceEntry::api_resource();
    let ap_ar = AuthorizationPolicy::api_resource();

    for (host, resource) in resources {
        let identities = resolve_host_identities(&all_packages, host, resource);
        if identities.values().all(|ids| ids.is_empty()) {
            warn!(
                host = %host,
                "Skipping ambient egress resources for host with no resolved source identities"
            );
            continue;
        }
        debug!(host = %host, ports = identities.len(), packages = ?resource.packages, "resolved ambient egress identities");

        let se = generate_ambient_service_entry(host, resource, generation);
        apply_object(client, &se_ar, &se.metadata, &se).await?;

        let ap = generate_ambient_authorization_policy(host, resource, &identities, generation);
        apply_object(client, &ap_ar, &ap.metadata, &ap).await?;
    }

    info!(hosts = resources.len(), generation, "applied ambient egress resources");
    Ok(())
}

/// Delete shared ambient egress objects from older generations
pub async fn purge_ambient_egress_resources(
    client: &dyn EgressClient,
    generation: u64,
) -> Result<usize> {
    let generation = generation.to_string();
    let mut deleted = 0;
    for ar in [
        WaypointGateway::api_resource(),
        ServiceEntry::api_resource(),
        AuthorizationPolicy::api_resource(),
    ] {
        deleted += purge_orphans(
            client,
            &generation,
            AMBIENT_EGRESS_NAMESPACE,
            AMBIENT_SHARED_EGRESS_PKG_ID,
            &ar,
        )
        .await?;
    }
    Ok(deleted)
}
