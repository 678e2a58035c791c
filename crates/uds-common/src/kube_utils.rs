//! Shared Kubernetes helpers for typed Istio and Gateway API resources
//!
//! The egress controller never links generated clients for Istio or the
//! Gateway API. Every resource is serialized from a typed struct and sent as
//! a `DynamicObject`, so each type declares its apiVersion and kind once via
//! [`HasApiResource`] and the `ApiResource` is derived from that.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference};
use kube::discovery::ApiResource;
use kube::Resource;

// =============================================================================
// ObjectMeta
// =============================================================================

/// Metadata for resources generated by the egress controller.
///
/// Only the fields the controller writes. Labels and annotations serialize
/// only when present so server-side apply does not claim empty maps.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default)]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references (per-package resources point at their Package)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Create metadata with a name and namespace and nothing else
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add the `uds/package` and `uds/generation` labels
    pub fn with_ownership_labels(self, package: impl Into<String>, generation: u64) -> Self {
        self.with_label(crate::LABEL_PACKAGE, package)
            .with_label(crate::LABEL_GENERATION, generation.to_string())
    }

    /// Point the resource at its owning object for garbage collection
    ///
    /// Skipped silently when the owner has no uid yet (never persisted).
    pub fn with_owner<K>(mut self, owner: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        if let Some(reference) = owner.controller_owner_ref(&()) {
            self.owner_references.push(reference);
        }
        self
    }
}

// =============================================================================
// HasApiResource
// =============================================================================

/// Types with a compile-time apiVersion and kind.
///
/// ```ignore
/// impl HasApiResource for ServiceEntry {
///     const API_VERSION: &'static str = "networking.istio.io/v1";
///     const KIND: &'static str = "ServiceEntry";
/// }
///
/// let ar = ServiceEntry::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "networking.istio.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ServiceEntry")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Generate the serde `default_api_version`/`default_kind` helpers for a
/// type that implements [`HasApiResource`].
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as $crate::kube_utils::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as $crate::kube_utils::HasApiResource>::KIND.to_string()
            }
        }
    };
}
pub(crate) use impl_api_defaults;

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// ```
/// use uds_common::kube_utils::parse_api_version;
///
/// assert_eq!(
///     parse_api_version("networking.istio.io/v1"),
///     ("networking.istio.io".to_string(), "v1".to_string())
/// );
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind using the API server's simple rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}
