//! Service mesh constants for Istio sidecar and ambient egress
//!
//! Single source of truth for the namespaces, names and labels that egress
//! resources share across the registry, appliers and orphan collector.

// =============================================================================
// Namespaces
// =============================================================================

/// Namespace of the sidecar egress gateway deployment.
pub const SIDECAR_EGRESS_NAMESPACE: &str = "istio-egress-gateway";

/// Namespace of the ambient egress waypoint.
pub const AMBIENT_EGRESS_NAMESPACE: &str = "istio-egress-ambient";

// =============================================================================
// Shared pseudo-packages
// =============================================================================

/// `uds/package` value on shared sidecar egress resources.
pub const SHARED_EGRESS_PKG_ID: &str = "shared-egress-resource";

/// `uds/package` value on shared ambient egress resources.
pub const AMBIENT_SHARED_EGRESS_PKG_ID: &str = "shared-ambient-egress-resource";

// =============================================================================
// Sidecar egress gateway
// =============================================================================

/// Name of the egress gateway Service (and the `app` label of its pods).
pub const EGRESS_GATEWAY_SERVICE: &str = "egressgateway";

/// DestinationRule subset routing to the egress gateway.
pub const EGRESS_GATEWAY_SUBSET: &str = "egressgateway-subset";

/// Name of the shared egress DestinationRule.
pub const EGRESS_DESTINATION_RULE: &str = "egressgateway-destination-rule";

/// Gateway name that binds VirtualService routes to every sidecar.
pub const MESH_GATEWAY: &str = "mesh";

/// Fully qualified host of the egress gateway Service.
pub fn egress_gateway_host() -> String {
    format!(
        "{}.{}.svc.cluster.local",
        EGRESS_GATEWAY_SERVICE, SIDECAR_EGRESS_NAMESPACE
    )
}

// =============================================================================
// Ambient waypoint
// =============================================================================

/// Name of the shared egress waypoint Gateway.
pub const EGRESS_WAYPOINT_NAME: &str = "egress-waypoint";

/// ConfigMap holding the waypoint deployment parameters.
pub const EGRESS_WAYPOINT_CONFIG: &str = "egress-waypoint-config";

/// HBONE port for Istio Ambient waypoint communication.
pub const HBONE_PORT: u16 = 15008;

/// Istio waypoint GatewayClass.
pub const WAYPOINT_GATEWAY_CLASS: &str = "istio-waypoint";

/// Label key to route traffic through a specific waypoint.
pub const USE_WAYPOINT_LABEL: &str = "istio.io/use-waypoint";

/// Label key naming the namespace of the waypoint in [`USE_WAYPOINT_LABEL`].
pub const USE_WAYPOINT_NAMESPACE_LABEL: &str = "istio.io/use-waypoint-namespace";

// =============================================================================
// Naming Helpers
// =============================================================================

/// Registry key for a package: `<name>-<namespace>`.
pub fn package_id(name: &str, namespace: &str) -> String {
    format!("{}-{}", name, namespace)
}

/// Ownership annotation key for a package on a shared resource.
pub fn shared_annotation_key(pkg_id: &str) -> String {
    format!("{}-{}", crate::SHARED_ANNOTATION_PREFIX, pkg_id)
}

/// SPIFFE principal (without the `spiffe://` prefix) for a service account.
pub fn principal(namespace: &str, service_account: &str) -> String {
    format!("cluster.local/ns/{}/sa/{}", namespace, service_account)
}

/// Turn an arbitrary string into a valid Kubernetes resource name.
///
/// Lowercases, collapses runs of non-alphanumerics into `-`, truncates to 250
/// characters and strips leading/trailing characters that are not letters.
pub fn sanitize_resource_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out.truncate(250);
    out.trim_matches(|c: char| !c.is_ascii_lowercase())
        .to_string()
}
