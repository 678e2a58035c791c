//! Generation-based garbage collection
//!
//! Every object a pass writes carries that pass's `uds/generation`. After the
//! pass, anything labelled for the same owner with another generation was not
//! rewritten and is deleted.

use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, info};

use uds_common::{Result, LABEL_GENERATION};

use crate::client::{package_selector, EgressClient};

/// Delete `uds/package=<package_label>` objects of one kind left by older passes
///
/// Returns the number of objects deleted.
pub async fn purge_orphans(
    client: &dyn EgressClient,
    generation: &str,
    namespace: &str,
    package_label: &str,
    ar: &ApiResource,
) -> Result<usize> {
    purge_by_selector(
        client,
        generation,
        namespace,
        &package_selector(package_label),
        ar,
    )
    .await
}

/// Delete objects matching `selector` whose generation is not `generation`
pub async fn purge_by_selector(
    client: &dyn EgressClient,
    generation: &str,
    namespace: &str,
    selector: &str,
    ar: &ApiResource,
) -> Result<usize> {
    let objects = client.list(ar, namespace, selector).await?;
    let mut deleted = 0;

    for obj in objects {
        if obj.labels().get(LABEL_GENERATION).map(String::as_str) == Some(generation) {
            continue;
        }
        let name = obj.name_any();
        debug!(kind = %ar.kind, namespace, name = %name, "deleting orphaned resource");
        client.delete(ar, namespace, &name).await?;
        deleted += 1;
    }

    if deleted > 0 {
        info!(kind = %ar.kind, namespace, selector, generation, deleted, "purged orphaned resources");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::DynamicObject;
    use uds_common::istio::ServiceEntry;
    use uds_common::kube_utils::HasApiResource;

    use crate::client::MockEgressClient;

    fn object(name: &str, generation: Option<&str>) -> DynamicObject {
        let mut labels = serde_json::Map::new();
        labels.insert("uds/package".into(), "shared-egress-resource".into());
        if let Some(g) = generation {
            labels.insert("uds/generation".into(), g.into());
        }
        serde_json::from_value(serde_json::json!({
            "apiVersion": "networking.istio.io/v1",
            "kind": "ServiceEntry",
            "metadata": {"name": name, "namespace": "istio-egress-gateway", "labels": labels},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn deletes_only_stale_generations() {
        let mut mock = MockEgressClient::new();
        mock.expect_list()
            .withf(|_, ns, selector| {
                ns == "istio-egress-gateway" && selector == "uds/package=shared-egress-resource"
            })
            .returning(|_, _, _| {
                Ok(vec![
                    object("current", Some("2")),
                    object("stale", Some("1")),
                    object("unlabelled", None),
                ])
            });
        mock.expect_delete()
            .withf(|_, _, name| name == "stale" || name == "unlabelled")
            .times(2)
            .returning(|_, _, _| Ok(()));

        let deleted = purge_orphans(
            &mock,
            "2",
            "istio-egress-gateway",
            "shared-egress-resource",
            &ServiceEntry::api_resource(),
        )
        .await
        .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn nothing_to_purge() {
        let mut mock = MockEgressClient::new();
        mock.expect_list().returning(|_, _, _| Ok(vec![object("current", Some("3"))]));
        mock.expect_delete().never();

        let deleted = purge_orphans(
            &mock,
            "3",
            "istio-egress-gateway",
            "shared-egress-resource",
            &ServiceEntry::api_resource(),
        )
        .await
        .unwrap();
        assert_eq!(deleted, 0);
    }
}
