//! Appliers: write synthesized egress objects to the cluster and collect
//! what the last pass did not rewrite

pub mod ambient;
pub mod sidecar;

use std::future::Future;

use kube::discovery::ApiResource;
use serde::Serialize;
use tracing::debug;

use uds_common::kube_utils::ObjectMeta;
use uds_common::Result;

use crate::client::{to_object, EgressClient};

/// Force-apply one typed object
pub(crate) async fn apply_object<T: Serialize>(
    client: &dyn EgressClient,
    ar: &ApiResource,
    meta: &ObjectMeta,
    object: &T,
) -> Result<()> {
    debug!(kind = %ar.kind, namespace = %meta.namespace, name = %meta.name, "applying");
    client
        .apply(ar, &meta.namespace, &meta.name, to_object(&ar.kind, object)?)
        .await
}

/// Await `fut`, turning a failure into `"<what>: <error>"`
pub(crate) async fn describe<F>(what: String, fut: F) -> std::result::Result<(), String>
where
    F: Future<Output = Result<()>>,
{
    fut.await.map_err(|e| format!("{}: {}", what, e))
}
