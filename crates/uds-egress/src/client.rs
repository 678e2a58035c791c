//! Kubernetes access for egress reconciliation
//!
//! Every Istio and Gateway API object goes through [`EgressClient`] as a
//! `DynamicObject` keyed by its `ApiResource`. Package reads and writes have
//! typed methods. Tests mock the trait (`MockEgressClient`) or use the
//! in-memory cluster in `testing`.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use uds_common::crd::{Package, PackageStatus};
use uds_common::{Error, Result};

/// Cluster operations the egress controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EgressClient: Send + Sync {
    /// Whether a namespace exists. Only a 404 maps to `false`.
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Get an object, `None` on 404
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects in a namespace, filtered by a label selector (empty for all)
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>>;

    /// List objects across all namespaces
    async fn list_all(&self, ar: &ApiResource) -> Result<Vec<DynamicObject>>;

    /// Create an object, failing if it already exists
    async fn create(&self, ar: &ApiResource, namespace: &str, object: serde_json::Value)
        -> Result<()>;

    /// Server-side apply with force
    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        object: serde_json::Value,
    ) -> Result<()>;

    /// RFC 6902 JSON patch
    async fn patch_json(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()>;

    /// Delete an object. A 404 is success.
    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// List Packages across all namespaces
    async fn list_packages(&self) -> Result<Vec<Package>>;

    /// Patch the status subresource of a Package
    async fn patch_package_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PackageStatus,
    ) -> Result<()>;

    /// Add a finalizer to a Package (no-op when present)
    async fn add_package_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<()>;

    /// Remove a finalizer from a Package
    async fn remove_package_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeEgressClient {
    client: Client,
    field_manager: String,
}

impl KubeEgressClient {
    /// Wrap a client, writing with the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn dynamic(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }

    async fn patch_package_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let api: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EgressClient for KubeEgressClient {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        use k8s_openapi::api::core::v1::Namespace;

        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        match self.dynamic(ar, namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self.dynamic(ar, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn list_all(&self, ar: &ApiResource) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        namespace: &str,
        object: serde_json::Value,
    ) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(object)
            .map_err(|e| Error::serialization_for_kind(&ar.kind, e.to_string()))?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.dynamic(ar, namespace).create(&params, &obj).await?;
        Ok(())
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        mut object: serde_json::Value,
    ) -> Result<()> {
        if let Some(obj) = object.as_object_mut() {
            obj.insert(
                "apiVersion".to_string(),
                serde_json::Value::String(ar.api_version.clone()),
            );
        }
        let params = PatchParams::apply(&self.field_manager).force();
        debug!(kind = %ar.kind, namespace, name, "applying resource");
        self.dynamic(ar, namespace)
            .patch(name, &params, &Patch::Apply(&object))
            .await?;
        Ok(())
    }

    async fn patch_json(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.dynamic(ar, namespace)
            .patch(name, &params, &Patch::<()>::Json(patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        match self
            .dynamic(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_packages(&self) -> Result<Vec<Package>> {
        let api: Api<Package> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn patch_package_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PackageStatus,
    ) -> Result<()> {
        let api: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn add_package_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<()> {
        let api: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        let pkg = api.get(name).await?;
        let mut finalizers = pkg.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }

        finalizers.push(finalizer.to_string());
        self.patch_package_finalizers(name, namespace, finalizers)
            .await
    }

    async fn remove_package_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<()> {
        let api: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        let pkg = match api.get(name).await {
            Ok(pkg) => pkg,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = pkg
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().filter(|s| *s != finalizer).cloned().collect())
            .unwrap_or_default();

        self.patch_package_finalizers(name, namespace, finalizers)
            .await
    }
}

/// Decode a `DynamicObject` into one of the typed egress resources
pub fn parse_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Serialize a typed resource for `create`/`apply`
pub fn to_object<T: serde::Serialize>(kind: &str, resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// `uds/package=<label>` selector
pub fn package_selector(package_label: &str) -> String {
    format!("{}={}", uds_common::LABEL_PACKAGE, package_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uds_common::istio::ServiceEntry;

    #[test]
    fn parse_dynamic_decodes_typed_resource() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "networking.istio.io/v1",
            "kind": "ServiceEntry",
            "metadata": {"name": "service-entry-example-com", "namespace": "istio-egress-gateway"},
            "spec": {
                "hosts": ["example.com"],
                "ports": [{"number": 443, "name": "tls-443", "protocol": "TLS"}],
                "location": "MESH_EXTERNAL",
                "resolution": "DNS"
            }
        }))
        .unwrap();

        let se: ServiceEntry = parse_dynamic(&obj).unwrap();
        assert_eq!(se.metadata.name, "service-entry-example-com");
        assert_eq!(se.spec.ports[0].number, 443);
    }

    #[test]
    fn parse_dynamic_reports_kind_on_failure() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "networking.istio.io/v1",
            "kind": "ServiceEntry",
            "metadata": {"name": "broken"},
            "spec": {"hosts": "not-a-list"}
        }))
        .unwrap();

        match parse_dynamic::<ServiceEntry>(&obj) {
            Err(Error::Serialization { kind, .. }) => {
                assert_eq!(kind.as_deref(), Some("ServiceEntry"))
            }
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[test]
    fn selector_uses_package_label() {
        assert_eq!(
            package_selector("shared-egress-resource"),
            "uds/package=shared-egress-resource"
        );
    }
}
