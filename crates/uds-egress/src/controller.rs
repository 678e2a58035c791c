//! Package controller
//!
//! Watches `Package` objects and feeds their egress requests into the shared
//! [`EgressReconciler`]. A finalizer holds deleted packages until their
//! entries are dropped from the registries and the shared objects rewritten
//! without them. Per-package sidecar objects carry owner references and are
//! garbage-collected with the Package.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use uds_common::crd::{Mode, Package, PackagePhase, PackageStatus};
use uds_common::{Error, Result};

use crate::apply::ambient::validate_ambient_namespace;
use crate::apply::sidecar::{
    create_sidecar_workload_egress_resources, purge_workload_egress_resources,
    validate_egress_gateway,
};
use crate::client::EgressClient;
use crate::config::{EgressConfig, FINALIZER};
use crate::extract::create_host_resource_map;
use crate::reconciler::EgressReconciler;
use crate::types::PackageAction;

/// Shared state for the Package controller
pub struct Context {
    /// Cluster access (trait object for testability)
    pub client: Arc<dyn EgressClient>,
    /// Registries and scheduler shared by every reconcile
    pub reconciler: Arc<EgressReconciler>,
}

impl Context {
    /// Build a context over `client`
    pub fn new(client: Arc<dyn EgressClient>, config: EgressConfig) -> Self {
        let reconciler = Arc::new(EgressReconciler::new(client.clone(), config));
        Self { client, reconciler }
    }
}

fn has_finalizer(pkg: &Package) -> bool {
    pkg.finalizers().iter().any(|f| f == FINALIZER)
}

/// Reconcile one Package
#[instrument(skip(pkg, ctx), fields(package = %pkg.name_any(), namespace = ?pkg.namespace()))]
pub async fn reconcile(pkg: Arc<Package>, ctx: Arc<Context>) -> Result<Action> {
    let name = pkg.name_any();
    let Some(namespace) = pkg.namespace() else {
        return Err(Error::validation_for(name, "Package has no namespace"));
    };

    if pkg.is_deleting() {
        return handle_deletion(&pkg, &ctx, &name, &namespace).await;
    }

    if !has_finalizer(&pkg) {
        info!("Adding egress finalizer");
        ctx.client
            .add_package_finalizer(&name, &namespace, FINALIZER)
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    match reconcile_egress(&pkg, &ctx).await {
        Ok(()) => {
            update_status(&pkg, &ctx, PackagePhase::Ready, None).await?;
            Ok(Action::await_change())
        }
        Err(e @ (Error::Validation { .. } | Error::ProtocolConflict { .. })) => {
            warn!(error = %e, "egress request rejected");
            update_status(&pkg, &ctx, PackagePhase::Failed, Some(e.to_string())).await?;
            // fixing this needs a spec change
            Ok(Action::await_change())
        }
        Err(e) => {
            if let Err(status_err) =
                update_status(&pkg, &ctx, PackagePhase::Failed, Some(e.to_string())).await
            {
                warn!(error = %status_err, "failed to record failure on package status");
            }
            Err(e)
        }
    }
}

async fn reconcile_egress(pkg: &Package, ctx: &Context) -> Result<()> {
    let client = ctx.client.as_ref();
    let mode = pkg.mesh_mode();
    let host_map = create_host_resource_map(pkg);

    if let Some(map) = &host_map {
        match mode {
            Mode::Sidecar => validate_egress_gateway(client, map).await?,
            Mode::Ambient => validate_ambient_namespace(client).await?,
        }
    }

    ctx.reconciler
        .reconcile_shared_egress_resources(
            host_map.clone(),
            &pkg.package_id(),
            PackageAction::AddOrUpdate,
            mode,
        )
        .await?;

    match (mode, &host_map) {
        (Mode::Sidecar, Some(map)) => {
            create_sidecar_workload_egress_resources(client, pkg, map).await
        }
        _ => purge_workload_egress_resources(client, pkg).await,
    }
}

async fn handle_deletion(
    pkg: &Package,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action> {
    if !has_finalizer(pkg) {
        return Ok(Action::await_change());
    }

    info!("Releasing shared egress for deleted package");
    ctx.reconciler
        .reconcile_shared_egress_resources(
            None,
            &pkg.package_id(),
            PackageAction::Remove,
            pkg.mesh_mode(),
        )
        .await?;

    ctx.client
        .remove_package_finalizer(name, namespace, FINALIZER)
        .await?;
    Ok(Action::await_change())
}

async fn update_status(
    pkg: &Package,
    ctx: &Context,
    phase: PackagePhase,
    message: Option<String>,
) -> Result<()> {
    let status = PackageStatus {
        phase,
        message,
        observed_generation: pkg.metadata.generation,
    };
    if pkg.status.as_ref() == Some(&status) {
        return Ok(());
    }
    ctx.client
        .patch_package_status(&pkg.name_any(), &pkg.namespace().unwrap_or_default(), &status)
        .await
}

/// Requeue after 30s for transient failures, 5 minutes otherwise
pub fn error_policy(pkg: Arc<Package>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        package = %pkg.name_any(),
        "egress reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}
