//! Readiness polling for the ambient egress waypoint
//!
//! ```text
//!   Absent ──▶ Creating ──▶ Polling ──▶ Ready
//!                  ▲           │
//!   stale ─────────┘           └──▶ TimedOut
//! ```
//!
//! A waypoint that exists, is Ready and already carries the desired owner
//! annotations and generation is left alone.

use tracing::{debug, info, warn};

use uds_common::gateway_api::Gateway;
use uds_common::kube_utils::HasApiResource;
use uds_common::{Error, Result, SHARED_ANNOTATION_PREFIX};

use crate::client::{parse_dynamic, to_object, EgressClient};
use crate::config::WaypointPollConfig;

/// Where the waypoint is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaypointState {
    /// No waypoint object in the cluster
    Absent,
    /// Waypoint missing or stale, about to be applied
    Creating,
    /// Applied, waiting for Accepted and Programmed
    Polling {
        /// Readiness checks made so far
        attempt: u32,
    },
    /// Accepted and Programmed
    Ready,
    /// Attempt budget spent without becoming Ready
    TimedOut,
}

/// Whether `current` is missing any of the desired labels or has a
/// different set of owner annotations
pub fn is_stale(current: &Gateway, desired: &Gateway) -> bool {
    let labels_differ = desired
        .metadata
        .labels
        .iter()
        .any(|(k, v)| current.metadata.labels.get(k) != Some(v));

    let owners = |gw: &Gateway| {
        gw.metadata
            .annotations
            .iter()
            .filter(|(k, _)| k.starts_with(SHARED_ANNOTATION_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>()
    };

    labels_differ || owners(current) != owners(desired)
}

/// Apply `desired` if needed and wait until it is Ready
pub async fn ensure_waypoint_ready(
    client: &dyn EgressClient,
    desired: &Gateway,
    poll: &WaypointPollConfig,
) -> Result<()> {
    let ar = Gateway::api_resource();
    let namespace = desired.metadata.namespace.as_str();
    let name = desired.metadata.name.as_str();

    let mut state = match client.get(&ar, namespace, name).await? {
        None => WaypointState::Absent,
        Some(obj) => {
            let current: Gateway = parse_dynamic(&obj)?;
            if is_stale(&current, desired) {
                debug!(namespace, name, "waypoint out of date");
                WaypointState::Creating
            } else if current.is_ready() {
                WaypointState::Ready
            } else {
                WaypointState::Polling { attempt: 0 }
            }
        }
    };

    loop {
        state = match state {
            WaypointState::Absent => {
                info!(namespace, name, "egress waypoint not found, creating");
                WaypointState::Creating
            }
            WaypointState::Creating => {
                client
                    .apply(&ar, namespace, name, to_object(Gateway::KIND, desired)?)
                    .await?;
                WaypointState::Polling { attempt: 0 }
            }
            WaypointState::Polling { attempt } => {
                poll_once(client, namespace, name, attempt, poll).await
            }
            WaypointState::Ready => {
                info!(namespace, name, "egress waypoint ready");
                return Ok(());
            }
            WaypointState::TimedOut => {
                return Err(Error::WaypointTimeout {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    attempts: poll.max_attempts,
                });
            }
        };
    }
}

async fn poll_once(
    client: &dyn EgressClient,
    namespace: &str,
    name: &str,
    attempt: u32,
    poll: &WaypointPollConfig,
) -> WaypointState {
    let ar = Gateway::api_resource();
    let attempt = attempt + 1;

    match client.get(&ar, namespace, name).await {
        Ok(Some(obj)) => match parse_dynamic::<Gateway>(&obj) {
            Ok(gw) if gw.is_ready() => return WaypointState::Ready,
            Ok(_) => debug!(namespace, name, attempt, "waypoint not ready yet"),
            Err(e) => warn!(namespace, name, attempt, error = %e, "unreadable waypoint"),
        },
        Ok(None) => warn!(namespace, name, attempt, "waypoint disappeared while waiting"),
        Err(e) => warn!(namespace, name, attempt, error = %e, "waypoint readiness check failed"),
    }

    if attempt >= poll.max_attempts {
        return WaypointState::TimedOut;
    }
    tokio::time::sleep(poll.interval).await;
    WaypointState::Polling { attempt }
}
