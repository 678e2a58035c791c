//! Create-or-patch for singleton shared objects
//!
//! The egress DestinationRule and the per-host gateway servers are written by
//! every sidecar package. Rather than overwriting them, the manager reads the
//! live object and sends a JSON patch with only what is missing: the owner
//! annotation, the generation label, a subset or a server. The whole
//! get/create/patch sequence is retried as a unit.

use std::sync::Arc;

use json_patch::{AddOperation, PatchOperation, RemoveOperation};
use jsonptr::PointerBuf;
use kube::discovery::ApiResource;
use serde_json::Value;
use tracing::{debug, info};

use uds_common::istio::{DestinationRule, Gateway};
use uds_common::kube_utils::{HasApiResource, ObjectMeta};
use uds_common::mesh::EGRESS_GATEWAY_SUBSET;
use uds_common::retry::{retry_with_backoff, RetryConfig};
use uds_common::{Error, Result, SHARED_ANNOTATION_PREFIX};

use crate::client::{to_object, EgressClient};
use crate::resources::sidecar::{generate_destination_rule, generate_egress_gateway};
use crate::types::EgressResource;

/// Find-or-create-or-patch for shared egress objects
pub struct SharedResourceManager {
    client: Arc<dyn EgressClient>,
    retry: RetryConfig,
}

impl SharedResourceManager {
    /// Retry each operation up to `attempts` times with no delay
    pub fn new(client: Arc<dyn EgressClient>, attempts: u32) -> Self {
        Self {
            client,
            retry: RetryConfig::immediate(attempts),
        }
    }

    /// Make sure the egress DestinationRule exists and names every package
    ///
    /// Owner annotations of packages no longer in `packages` are dropped.
    pub async fn ensure_destination_rule(&self, packages: &[String], generation: u64) -> Result<()> {
        let desired = generate_destination_rule(packages, generation);
        let object = to_object(DestinationRule::KIND, &desired)?;

        self.ensure(
            &DestinationRule::api_resource(),
            &desired.metadata,
            object,
            true,
            destination_rule_spec_ops,
        )
        .await
    }

    /// Make sure the Gateway for `host` serves every requested port
    ///
    /// Missing servers are appended and servers for ports no package still
    /// requests are removed; servers already in place are not rewritten.
    /// Owner annotations track `resource.packages`.
    pub async fn ensure_gateway_servers(
        &self,
        host: &str,
        resource: &EgressResource,
        generation: u64,
    ) -> Result<()> {
        let desired = generate_egress_gateway(host, resource, generation);
        let object = to_object(Gateway::KIND, &desired)?;
        let servers = desired
            .spec
            .servers
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.ensure(
            &Gateway::api_resource(),
            &desired.metadata,
            object,
            true,
            |existing| gateway_server_ops(existing, &servers),
        )
        .await
    }

    async fn ensure<F>(
        &self,
        ar: &ApiResource,
        meta: &ObjectMeta,
        desired: Value,
        prune_owners: bool,
        spec_ops: F,
    ) -> Result<()>
    where
        F: Fn(&Value) -> Vec<PatchOperation>,
    {
        let resource = format!("{}/{}/{}", ar.kind, meta.namespace, meta.name);

        retry_with_backoff(&self.retry, &resource, || {
            self.try_ensure(ar, meta, &desired, prune_owners, &spec_ops)
        })
        .await
        .map_err(|e| Error::RetriesExhausted {
            resource: resource.clone(),
            attempts: self.retry.max_attempts,
            message: e.to_string(),
        })
    }

    async fn try_ensure<F>(
        &self,
        ar: &ApiResource,
        meta: &ObjectMeta,
        desired: &Value,
        prune_owners: bool,
        spec_ops: &F,
    ) -> Result<()>
    where
        F: Fn(&Value) -> Vec<PatchOperation>,
    {
        let Some(existing) = self.client.get(ar, &meta.namespace, &meta.name).await? else {
            info!(kind = %ar.kind, name = %meta.name, "creating shared egress resource");
            return self
                .client
                .create(ar, &meta.namespace, desired.clone())
                .await;
        };

        let existing = serde_json::to_value(&existing)?;
        let mut ops = metadata_ops(&existing, meta, prune_owners);
        ops.extend(spec_ops(&existing));

        if ops.is_empty() {
            debug!(kind = %ar.kind, name = %meta.name, "shared egress resource up to date");
            return Ok(());
        }

        debug!(kind = %ar.kind, name = %meta.name, ops = ops.len(), "patching shared egress resource");
        self.client
            .patch_json(ar, &meta.namespace, &meta.name, json_patch::Patch(ops))
            .await
    }
}

fn pointer<'a>(tokens: impl IntoIterator<Item = &'a str>) -> PointerBuf {
    PointerBuf::from_tokens(tokens)
}

fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

/// Ops bringing labels and annotations in line with `desired`
///
/// With `prune_owners`, owner annotations not in `desired` are removed.
pub fn metadata_ops(existing: &Value, desired: &ObjectMeta, prune_owners: bool) -> Vec<PatchOperation> {
    let mut ops = Vec::new();

    for (field, wanted) in [("labels", &desired.labels), ("annotations", &desired.annotations)] {
        let current = existing["metadata"][field].as_object();

        let Some(current) = current else {
            if !wanted.is_empty() {
                let map = wanted
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                ops.push(add(pointer(["metadata", field]), Value::Object(map)));
            }
            continue;
        };

        for (key, value) in wanted {
            if current.get(key).and_then(Value::as_str) != Some(value.as_str()) {
                ops.push(add(
                    pointer(["metadata", field, key.as_str()]),
                    Value::String(value.clone()),
                ));
            }
        }

        if prune_owners && field == "annotations" {
            for key in current.keys() {
                if key.starts_with(SHARED_ANNOTATION_PREFIX) && !wanted.contains_key(key) {
                    ops.push(PatchOperation::Remove(RemoveOperation {
                        path: pointer(["metadata", field, key.as_str()]),
                    }));
                }
            }
        }
    }

    ops
}

/// Add the gateway subset when the DestinationRule lacks it
fn destination_rule_spec_ops(existing: &Value) -> Vec<PatchOperation> {
    let subset = serde_json::json!({ "name": EGRESS_GATEWAY_SUBSET });
    append_unless_present(existing, "subsets", subset, |s| {
        s["name"].as_str() == Some(EGRESS_GATEWAY_SUBSET)
    })
}

fn server_key(server: &Value) -> (&Value, &Value) {
    (&server["port"]["number"], &server["port"]["protocol"])
}

/// Bring the Gateway's servers in line with `desired`, matched by port and
/// protocol
fn gateway_server_ops(existing: &Value, desired: &[Value]) -> Vec<PatchOperation> {
    let Some(current) = existing["spec"]["servers"].as_array() else {
        let servers = Value::Array(desired.to_vec());
        if existing["spec"].is_object() {
            return vec![add(pointer(["spec", "servers"]), servers)];
        }
        let mut spec = serde_json::Map::new();
        spec.insert("servers".to_string(), servers);
        return vec![add(pointer(["spec"]), Value::Object(spec))];
    };

    let wanted: Vec<_> = desired.iter().map(server_key).collect();
    let present: Vec<_> = current.iter().map(server_key).collect();

    // highest index first so earlier removals do not shift later ones
    let mut ops: Vec<PatchOperation> = present
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, key)| !wanted.contains(key))
        .map(|(i, _)| {
            let index = i.to_string();
            PatchOperation::Remove(RemoveOperation {
                path: pointer(["spec", "servers", index.as_str()]),
            })
        })
        .collect();

    ops.extend(
        desired
            .iter()
            .filter(|server| !present.contains(&server_key(server)))
            .map(|server| add(pointer(["spec", "servers", "-"]), server.clone())),
    );
    ops
}

fn append_unless_present(
    existing: &Value,
    field: &str,
    item: Value,
    matches: impl Fn(&Value) -> bool,
) -> Vec<PatchOperation> {
    match existing["spec"][field].as_array() {
        Some(items) if items.iter().any(matches) => Vec::new(),
        Some(_) => vec![add(pointer(["spec", field, "-"]), item)],
        None if existing["spec"].is_object() => {
            vec![add(pointer(["spec", field]), Value::Array(vec![item]))]
        }
        None => {
            let mut spec = serde_json::Map::new();
            spec.insert(field.to_string(), Value::Array(vec![item]));
            vec![add(pointer(["spec"]), Value::Object(spec))]
        }
    }
}
