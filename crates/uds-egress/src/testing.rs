//! In-memory cluster for scenario tests
//!
//! Objects are kept as JSON keyed by group/kind, namespace and name, so
//! labels, generations and patches behave like the API server's for the
//! subset of behavior egress reconciliation relies on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

use uds_common::crd::{Package, PackageStatus};
use uds_common::{Error, Result};

use crate::client::EgressClient;

type ObjectKey = (String, String, String);

#[derive(Default)]
struct FakeState {
    namespaces: BTreeSet<String>,
    objects: BTreeMap<ObjectKey, Value>,
    packages: Vec<Package>,
    statuses: BTreeMap<(String, String), PackageStatus>,
    finalizers: BTreeMap<(String, String), Vec<String>>,
    failing_writes: BTreeSet<String>,
    failing_namespaces: BTreeSet<String>,
    pending_gateways: bool,
    calls: Vec<(String, String, String)>,
}

/// In-memory [`EgressClient`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

pub fn api_error(code: u16, message: &str) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "Test".to_string(),
        code,
    }))
}

fn type_key(ar: &ApiResource) -> String {
    format!("{}/{}", ar.group, ar.kind)
}

fn matches_selector(obj: &Value, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        let (key, value) = term.split_once('=').unwrap_or((term, ""));
        obj["metadata"]["labels"][key].as_str() == Some(value)
    })
}

fn ready_status() -> Value {
    let condition = |t: &str| {
        serde_json::json!({
            "type": t,
            "status": "True",
            "reason": t,
            "message": "",
            "lastTransitionTime": "2025-01-01T00:00:00Z",
        })
    };
    serde_json::json!({ "conditions": [condition("Accepted"), condition("Programmed")] })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster with both egress namespaces and an egress gateway Service
    /// exposing 80 and 443
    pub fn with_egress() -> Self {
        let cluster = Self::new()
            .with_namespace("istio-egress-gateway")
            .with_namespace("istio-egress-ambient");
        cluster.insert_egress_gateway_service(&[80, 443]);
        cluster
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .expect("fake cluster mutex should not be poisoned")
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.lock().namespaces.insert(namespace.to_string());
        self
    }

    /// Make namespace probes for `namespace` fail with a 500
    pub fn fail_namespace_probe(&self, namespace: &str) {
        self.lock().failing_namespaces.insert(namespace.to_string());
    }

    /// Make applies, creates and patches of objects named `name` fail with a 500
    pub fn fail_writes(&self, name: &str) {
        self.lock().failing_writes.insert(name.to_string());
    }

    /// Applied Gateway API Gateways never become ready
    pub fn keep_gateways_pending(&self) {
        self.lock().pending_gateways = true;
    }

    pub fn insert_egress_gateway_service(&self, ports: &[u16]) {
        let ports: Vec<Value> = ports
            .iter()
            .map(|p| serde_json::json!({ "name": format!("port-{}", p), "port": p }))
            .collect();
        let service = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "egressgateway", "namespace": "istio-egress-gateway" },
            "spec": { "ports": ports },
        });
        self.lock().objects.insert(
            (
                "/Service".to_string(),
                "istio-egress-gateway".to_string(),
                "egressgateway".to_string(),
            ),
            service,
        );
    }

    pub fn insert(&self, ar: &ApiResource, object: Value) {
        let namespace = object["metadata"]["namespace"].as_str().unwrap_or_default().to_string();
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.lock()
            .objects
            .insert((type_key(ar), namespace, name), object);
    }

    pub fn set_packages(&self, packages: Vec<Package>) {
        self.lock().packages = packages;
    }

    pub fn object(&self, ar: &ApiResource, namespace: &str, name: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&(type_key(ar), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Sorted names of every object of one type in `namespace`
    pub fn names(&self, ar: &ApiResource, namespace: &str) -> Vec<String> {
        let kind = type_key(ar);
        self.lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn status(&self, name: &str, namespace: &str) -> Option<PackageStatus> {
        self.lock()
            .statuses
            .get(&(name.to_string(), namespace.to_string()))
            .cloned()
    }

    pub fn finalizers(&self, name: &str, namespace: &str) -> Vec<String> {
        self.lock()
            .finalizers
            .get(&(name.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `verb` calls made for objects of `kind`
    pub fn call_count(&self, verb: &str, kind: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(v, k, _)| v == verb && k == kind)
            .count()
    }

    fn record(&self, verb: &str, ar: &ApiResource, name: &str) {
        self.lock()
            .calls
            .push((verb.to_string(), ar.kind.clone(), name.to_string()));
    }
}

#[async_trait]
impl EgressClient for FakeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let state = self.lock();
        if state.failing_namespaces.contains(name) {
            return Err(api_error(500, "namespace probe failed"));
        }
        Ok(state.namespaces.contains(name))
    }

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.record("get", ar, name);
        self.object(ar, namespace, name)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let kind = type_key(ar);
        let objects: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), obj)| {
                *k == kind && ns == namespace && matches_selector(obj, label_selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        objects
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    async fn list_all(&self, ar: &ApiResource) -> Result<Vec<DynamicObject>> {
        let kind = type_key(ar);
        let objects: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, obj)| obj.clone())
            .collect();
        objects
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    async fn create(&self, ar: &ApiResource, namespace: &str, object: Value) -> Result<()> {
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.record("create", ar, &name);
        let mut state = self.lock();
        if state.failing_writes.contains(&name) {
            return Err(api_error(500, "create failed"));
        }
        let key = (type_key(ar), namespace.to_string(), name);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "already exists"));
        }
        state.objects.insert(key, object);
        Ok(())
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        mut object: Value,
    ) -> Result<()> {
        self.record("apply", ar, name);
        let mut state = self.lock();
        if state.failing_writes.contains(name) {
            return Err(api_error(500, "apply failed"));
        }
        if ar.group == "gateway.networking.k8s.io" && !state.pending_gateways {
            object["status"] = ready_status();
        }
        state
            .objects
            .insert((type_key(ar), namespace.to_string(), name.to_string()), object);
        Ok(())
    }

    async fn patch_json(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()> {
        self.record("patch", ar, name);
        let mut state = self.lock();
        if state.failing_writes.contains(name) {
            return Err(api_error(500, "patch failed"));
        }
        let key = (type_key(ar), namespace.to_string(), name.to_string());
        let Some(doc) = state.objects.get_mut(&key) else {
            return Err(api_error(404, "not found"));
        };
        json_patch::patch(doc, &patch.0).map_err(|e| api_error(422, &e.to_string()))
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.record("delete", ar, name);
        self.lock()
            .objects
            .remove(&(type_key(ar), namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_packages(&self) -> Result<Vec<Package>> {
        Ok(self.lock().packages.clone())
    }

    async fn patch_package_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PackageStatus,
    ) -> Result<()> {
        self.lock()
            .statuses
            .insert((name.to_string(), namespace.to_string()), status.clone());
        Ok(())
    }

    async fn add_package_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        let list = state
            .finalizers
            .entry((name.to_string(), namespace.to_string()))
            .or_default();
        if !list.iter().any(|f| f == finalizer) {
            list.push(finalizer.to_string());
        }
        Ok(())
    }

    async fn remove_package_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<()> {
        if let Some(list) = self
            .lock()
            .finalizers
            .get_mut(&(name.to_string(), namespace.to_string()))
        {
            list.retain(|f| f != finalizer);
        }
        Ok(())
    }
}

/// Label value of `key` on a stored object
pub fn label(object: &Value, key: &str) -> Option<String> {
    object["metadata"]["labels"][key].as_str().map(str::to_string)
}
