//! UDS egress controller

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing::info;

use uds_common::crd::Package;
use uds_common::telemetry::{init_telemetry, TelemetryConfig};
use uds_egress::client::KubeEgressClient;
use uds_egress::config::{EgressConfig, OsEnv};
use uds_egress::controller::{error_policy, reconcile, Context};

/// Watch timeout, kept below the API server's default idle cutoff
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Shared egress controller for UDS Packages
#[derive(Parser, Debug)]
#[command(name = "uds-egress", version, about, long_about = None)]
struct Cli {
    /// Print the Package CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", serde_yaml::to_string(&Package::crd())?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;

    let config = EgressConfig::from_env(&OsEnv)?;
    info!(
        waypoint_attempts = config.waypoint.max_attempts,
        waypoint_interval_ms = config.waypoint.interval.as_millis() as u64,
        shared_resource_attempts = config.shared_resource_attempts,
        "starting egress controller"
    );

    let client = Client::try_default().await?;
    let egress_client = Arc::new(KubeEgressClient::new(
        client.clone(),
        config.field_manager.clone(),
    ));
    let ctx = Arc::new(Context::new(egress_client, config));

    Controller::new(
        Api::<Package>::all(client),
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("Package"))
    .await;

    info!("egress controller stopped");
    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
