//! Shared egress reconciliation across both mesh modes
//!
//! [`EgressReconciler`] owns the two registries, the per-mode generation
//! counters and the scheduler. A package update moves the package into the
//! registry for its mode, out of the other one, then asks the scheduler for
//! a pass that covers it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use uds_common::crd::Mode;
use uds_common::mesh::{AMBIENT_EGRESS_NAMESPACE, SIDECAR_EGRESS_NAMESPACE};
use uds_common::{Error, Result};

use crate::apply::ambient::{apply_ambient_egress_resources, purge_ambient_egress_resources};
use crate::apply::sidecar::{apply_sidecar_egress_resources, purge_sidecar_egress_resources};
use crate::client::EgressClient;
use crate::config::EgressConfig;
use crate::registry::Registry;
use crate::scheduler::ReconciliationScheduler;
use crate::shared::SharedResourceManager;
use crate::synth::synthesize;
use crate::types::{HostResourceMap, PackageAction, PackageHostMap, PackageId};

/// Registries, generations and scheduler for shared egress
pub struct EgressReconciler {
    client: Arc<dyn EgressClient>,
    config: EgressConfig,
    sidecar: Registry,
    ambient: Registry,
    sidecar_generation: AtomicU64,
    ambient_generation: AtomicU64,
    scheduler: ReconciliationScheduler,
    shared: SharedResourceManager,
}

impl EgressReconciler {
    /// Create a reconciler with empty registries
    pub fn new(client: Arc<dyn EgressClient>, config: EgressConfig) -> Self {
        let shared = SharedResourceManager::new(client.clone(), config.shared_resource_attempts);
        Self {
            client,
            config,
            sidecar: Registry::new(Mode::Sidecar),
            ambient: Registry::new(Mode::Ambient),
            sidecar_generation: AtomicU64::new(0),
            ambient_generation: AtomicU64::new(0),
            scheduler: ReconciliationScheduler::new(),
            shared,
        }
    }

    /// Registry for `mode`
    pub fn registry(&self, mode: Mode) -> &Registry {
        match mode {
            Mode::Sidecar => &self.sidecar,
            Mode::Ambient => &self.ambient,
        }
    }

    /// Generation of the last pass for `mode`, 0 before the first
    pub fn generation(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Sidecar => self.sidecar_generation.load(Ordering::SeqCst),
            Mode::Ambient => self.ambient_generation.load(Ordering::SeqCst),
        }
    }

    /// Pass scheduler
    pub fn scheduler(&self) -> &ReconciliationScheduler {
        &self.scheduler
    }

    /// Record a package's egress request under `mode` and reconcile
    ///
    /// The package is removed from the other mode's registry first, so it is
    /// never in both. A protocol conflict is returned before any pass runs.
    #[instrument(skip(self, host_map), fields(package = pkg_id, %mode, ?action))]
    pub async fn reconcile_shared_egress_resources(
        &self,
        host_map: Option<HostResourceMap>,
        pkg_id: &str,
        action: PackageAction,
        mode: Mode,
    ) -> Result<()> {
        let other = match mode {
            Mode::Sidecar => &self.ambient,
            Mode::Ambient => &self.sidecar,
        };
        other.update(None, pkg_id, PackageAction::Remove).await?;
        self.registry(mode).update(host_map, pkg_id, action).await?;

        self.scheduler
            .trigger(pkg_id, || self.perform_reconciliation())
            .await
    }

    /// Run one pass over both modes
    ///
    /// Returns the ids of every package registered when the pass started.
    /// Both modes always run; their failures are reported together.
    pub async fn perform_reconciliation(&self) -> Result<BTreeSet<PackageId>> {
        let sidecar = self.sidecar.snapshot().await;
        let ambient = self.ambient.snapshot().await;
        let covered: BTreeSet<PackageId> = sidecar.keys().chain(ambient.keys()).cloned().collect();

        debug!(packages = covered.len(), "starting egress reconciliation");

        let (sidecar_result, ambient_result) = tokio::join!(
            self.reconcile_sidecar(&sidecar),
            self.reconcile_ambient(&ambient),
        );

        let failures: Vec<String> = [
            sidecar_result.map_err(|e| format!("sidecar: {}", e)),
            ambient_result.map_err(|e| format!("ambient: {}", e)),
        ]
        .into_iter()
        .filter_map(|r| r.err())
        .collect();

        if !failures.is_empty() {
            error!(?failures, "egress reconciliation failed");
            return Err(Error::Reconciliation { failures });
        }

        info!(packages = covered.len(), "egress reconciliation complete");
        Ok(covered)
    }

    async fn mode_enabled(&self, namespace: &str) -> Result<bool> {
        let enabled = self.client.namespace_exists(namespace).await?;
        if !enabled {
            debug!(namespace, "egress namespace not found, skipping mode");
        }
        Ok(enabled)
    }

    async fn reconcile_sidecar(&self, packages: &PackageHostMap) -> Result<()> {
        if !self.mode_enabled(SIDECAR_EGRESS_NAMESPACE).await? {
            return Ok(());
        }
        let generation = self.sidecar_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let resources = synthesize(packages);

        apply_sidecar_egress_resources(self.client.as_ref(), &self.shared, &resources, generation)
            .await?;
        purge_sidecar_egress_resources(self.client.as_ref(), generation).await?;
        Ok(())
    }

    async fn reconcile_ambient(&self, packages: &PackageHostMap) -> Result<()> {
        if !self.mode_enabled(AMBIENT_EGRESS_NAMESPACE).await? {
            return Ok(());
        }
        let generation = self.ambient_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let resources = synthesize(packages);
        let ids: Vec<PackageId> = packages.keys().cloned().collect();

        apply_ambient_egress_resources(
            self.client.as_ref(),
            &ids,
            &resources,
            generation,
            &self.config.waypoint,
        )
        .await?;
        purge_ambient_egress_resources(self.client.as_ref(), generation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use uds_common::crd::RemoteProtocol;
    use uds_common::gateway_api::Gateway as WaypointGateway;
    use uds_common::istio::{DestinationRule, Gateway, ServiceEntry, VirtualService};
    use uds_common::kube_utils::HasApiResource;

    use crate::config::WaypointPollConfig;
    use crate::testing::{label, FakeCluster};
    use crate::types::{HostResource, PortProtocol};

    fn config() -> EgressConfig {
        EgressConfig {
            waypoint: WaypointPollConfig {
                interval: Duration::from_millis(10),
                max_attempts: 3,
            },
            ..EgressConfig::default()
        }
    }

    fn reconciler(cluster: &Arc<FakeCluster>) -> EgressReconciler {
        EgressReconciler::new(cluster.clone(), config())
    }

    fn hosts(entries: &[(&str, u16, RemoteProtocol)]) -> HostResourceMap {
        let mut map = HostResourceMap::new();
        for (host, port, protocol) in entries {
            map.entry(host.to_string())
                .or_insert_with(HostResource::default)
                .insert(PortProtocol::new(*port, *protocol));
        }
        map
    }

    /// Story: a sidecar package asks for example.com:443 and gets the shared
    /// gateway objects at generation 1; when it stops asking, the next pass
    /// (generation 2) removes them
    #[tokio::test]
    async fn story_sidecar_example_com_lifecycle() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);
        let ns = SIDECAR_EGRESS_NAMESPACE;

        reconciler
            .reconcile_shared_egress_resources(
                Some(hosts(&[("example.com", 443, RemoteProtocol::Tls)])),
                "curl-curl-ns",
                PackageAction::AddOrUpdate,
                Mode::Sidecar,
            )
            .await
            .unwrap();

        assert_eq!(reconciler.generation(Mode::Sidecar), 1);
        let gw = cluster
            .object(&Gateway::api_resource(), ns, "gateway-example-com")
            .unwrap();
        assert_eq!(label(&gw, "uds/generation").as_deref(), Some("1"));
        assert!(cluster
            .object(&VirtualService::api_resource(), ns, "egress-vs-example-com")
            .is_some());
        assert!(cluster
            .object(&ServiceEntry::api_resource(), ns, "service-entry-example-com")
            .is_some());
        assert!(cluster
            .object(&DestinationRule::api_resource(), ns, "egressgateway-destination-rule")
            .is_some());

        reconciler
            .reconcile_shared_egress_resources(
                None,
                "curl-curl-ns",
                PackageAction::Remove,
                Mode::Sidecar,
            )
            .await
            .unwrap();

        assert_eq!(reconciler.generation(Mode::Sidecar), 2);
        assert!(cluster.names(&Gateway::api_resource(), ns).is_empty());
        assert!(cluster.names(&VirtualService::api_resource(), ns).is_empty());
        assert!(cluster.names(&ServiceEntry::api_resource(), ns).is_empty());
        assert!(cluster.names(&DestinationRule::api_resource(), ns).is_empty());
    }

    #[tokio::test]
    async fn empty_ambient_pass_writes_no_waypoint() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);

        let covered = reconciler.perform_reconciliation().await.unwrap();

        assert!(covered.is_empty());
        assert_eq!(reconciler.generation(Mode::Ambient), 1);
        assert_eq!(cluster.call_count("apply", "Gateway"), 0);
        assert!(cluster
            .names(&WaypointGateway::api_resource(), AMBIENT_EGRESS_NAMESPACE)
            .is_empty());
    }

    #[tokio::test]
    async fn switching_mode_moves_the_package() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);
        let request = hosts(&[("example.com", 443, RemoteProtocol::Tls)]);

        reconciler
            .reconcile_shared_egress_resources(
                Some(request.clone()),
                "curl-curl-ns",
                PackageAction::AddOrUpdate,
                Mode::Sidecar,
            )
            .await
            .unwrap();
        assert!(reconciler.registry(Mode::Sidecar).snapshot().await.contains_key("curl-curl-ns"));

        reconciler
            .reconcile_shared_egress_resources(
                Some(request),
                "curl-curl-ns",
                PackageAction::AddOrUpdate,
                Mode::Ambient,
            )
            .await
            .unwrap();

        assert!(!reconciler.registry(Mode::Sidecar).snapshot().await.contains_key("curl-curl-ns"));
        assert!(reconciler.registry(Mode::Ambient).snapshot().await.contains_key("curl-curl-ns"));
        assert!(cluster
            .names(&Gateway::api_resource(), SIDECAR_EGRESS_NAMESPACE)
            .is_empty());
    }

    #[tokio::test]
    async fn conflict_is_rejected_before_any_pass() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);

        reconciler
            .reconcile_shared_egress_resources(
                Some(hosts(&[("example.com", 443, RemoteProtocol::Tls)])),
                "a-ns1",
                PackageAction::AddOrUpdate,
                Mode::Sidecar,
            )
            .await
            .unwrap();
        let passes = reconciler.scheduler().passes_started();

        let err = reconciler
            .reconcile_shared_egress_resources(
                Some(hosts(&[("example.com", 443, RemoteProtocol::Http)])),
                "b-ns2",
                PackageAction::AddOrUpdate,
                Mode::Sidecar,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProtocolConflict { port: 443, .. }));
        assert_eq!(reconciler.scheduler().passes_started(), passes);
        assert!(!reconciler.registry(Mode::Sidecar).snapshot().await.contains_key("b-ns2"));
    }

    #[tokio::test]
    async fn two_protocols_on_one_port_writes_nothing() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);

        let err = reconciler
            .reconcile_shared_egress_resources(
                Some(hosts(&[
                    ("example.com", 443, RemoteProtocol::Tls),
                    ("example.com", 443, RemoteProtocol::Http),
                ])),
                "a-ns1",
                PackageAction::AddOrUpdate,
                Mode::Sidecar,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProtocolConflict { port: 443, .. }));
        assert_eq!(reconciler.scheduler().passes_started(), 0);
        assert!(cluster
            .names(&Gateway::api_resource(), SIDECAR_EGRESS_NAMESPACE)
            .is_empty());
    }

    #[tokio::test]
    async fn missing_namespace_skips_mode_without_bumping_generation() {
        let cluster = Arc::new(FakeCluster::new().with_namespace("istio-egress-ambient"));
        let reconciler = reconciler(&cluster);

        reconciler.perform_reconciliation().await.unwrap();

        assert_eq!(reconciler.generation(Mode::Sidecar), 0);
        assert_eq!(reconciler.generation(Mode::Ambient), 1);
    }

    /// Story: the sidecar namespace probe fails, but the ambient mode still
    /// runs and the pass reports the sidecar failure
    #[tokio::test]
    async fn story_mode_failures_are_isolated_and_aggregated() {
        let cluster = Arc::new(FakeCluster::with_egress());
        cluster.fail_namespace_probe(SIDECAR_EGRESS_NAMESPACE);
        let reconciler = reconciler(&cluster);

        let err = reconciler.perform_reconciliation().await.unwrap_err();

        match err {
            Error::Reconciliation { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("sidecar:"));
            }
            other => panic!("expected Reconciliation, got {:?}", other),
        }
        assert_eq!(reconciler.generation(Mode::Ambient), 1);
        assert_eq!(reconciler.generation(Mode::Sidecar), 0);
    }

    #[tokio::test]
    async fn generation_increments_even_with_no_packages() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = reconciler(&cluster);

        reconciler.perform_reconciliation().await.unwrap();
        reconciler.perform_reconciliation().await.unwrap();

        assert_eq!(reconciler.generation(Mode::Sidecar), 2);
        assert_eq!(reconciler.generation(Mode::Ambient), 2);
    }

    /// Story: many packages reconcile at once; every one of them ends up in
    /// the shared objects and passes never overlap
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn story_concurrent_packages_all_land() {
        let cluster = Arc::new(FakeCluster::with_egress());
        let reconciler = Arc::new(reconciler(&cluster));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    reconciler
                        .reconcile_shared_egress_resources(
                            Some(hosts(&[("example.com", 443, RemoteProtocol::Tls)])),
                            &format!("pkg{}-ns", i),
                            PackageAction::AddOrUpdate,
                            Mode::Sidecar,
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let gw = cluster
            .object(&Gateway::api_resource(), SIDECAR_EGRESS_NAMESPACE, "gateway-example-com")
            .unwrap();
        let owners = gw["metadata"]["annotations"].as_object().unwrap();
        assert_eq!(owners.len(), 16);
        assert!(reconciler.scheduler().passes_started() <= 16);
        assert!(!reconciler.scheduler().is_running());
    }
}
