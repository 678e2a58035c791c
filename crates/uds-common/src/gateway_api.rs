//! Gateway API Gateway, as used for the ambient egress waypoint
//!
//! The waypoint is a `gateway.networking.k8s.io/v1` Gateway of class
//! `istio-waypoint`. Its readiness is read back from `status.conditions`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

use crate::kube_utils::{has_condition, impl_api_defaults, HasApiResource, ObjectMeta};

/// Gateway condition set once the controller accepted the spec
pub const CONDITION_ACCEPTED: &str = "Accepted";

/// Gateway condition set once the data plane is programmed
pub const CONDITION_PROGRAMMED: &str = "Programmed";

/// Kubernetes Gateway API Gateway resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    /// API version (gateway.networking.k8s.io/v1)
    #[serde(default = "Gateway::default_api_version")]
    pub api_version: String,
    /// Resource kind (Gateway)
    #[serde(default = "Gateway::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Gateway specification
    pub spec: GatewaySpec,
    /// Status reported by the gateway controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GatewayStatus>,
}

impl HasApiResource for Gateway {
    const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
    const KIND: &'static str = "Gateway";
}

impl_api_defaults!(Gateway);

impl Gateway {
    /// Create a new Gateway
    pub fn new(metadata: ObjectMeta, spec: GatewaySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// Accepted and Programmed are both True
    pub fn is_ready(&self) -> bool {
        let conditions = self.status.as_ref().map(|s| s.conditions.as_slice());
        has_condition(conditions, CONDITION_ACCEPTED)
            && has_condition(conditions, CONDITION_PROGRAMMED)
    }
}

/// Gateway spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// GatewayClass name (e.g., "istio-waypoint")
    pub gateway_class_name: String,
    /// Listener configurations
    pub listeners: Vec<GatewayListener>,
    /// Infrastructure parameters for the generated deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<GatewayInfrastructure>,
}

/// Gateway listener configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayListener {
    /// Listener name
    pub name: String,
    /// Port number
    pub port: u16,
    /// Protocol (HBONE for waypoints)
    pub protocol: String,
    /// Allowed routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

/// Allowed routes for a gateway listener
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    /// Namespace selector
    pub namespaces: RouteNamespaces,
    /// Route kinds accepted by the listener
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<RouteGroupKind>,
}

/// Route namespace selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    /// Namespace selection mode (Same, All, Selector)
    pub from: String,
}

/// Group and kind of an accepted route
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteGroupKind {
    /// API group
    pub group: String,
    /// Kind
    pub kind: String,
}

/// Gateway infrastructure settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfrastructure {
    /// Reference to the parameters object
    pub parameters_ref: ParametersRef,
}

/// Reference to a local parameters object
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParametersRef {
    /// API group (empty for core)
    pub group: String,
    /// Kind
    pub kind: String,
    /// Name
    pub name: String,
}

/// Gateway status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayStatus {
    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_with_status(status: serde_json::Value) -> Gateway {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "egress-waypoint", "namespace": "istio-egress-ambient"},
            "spec": {
                "gatewayClassName": "istio-waypoint",
                "listeners": [{"name": "mesh", "port": 15008, "protocol": "HBONE"}]
            },
            "status": status,
        }))
        .unwrap()
    }

    fn condition(type_: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "type": type_,
            "status": status,
            "reason": "Test",
            "message": "",
            "lastTransitionTime": "2025-01-01T00:00:00Z",
        })
    }

    #[test]
    fn ready_requires_accepted_and_programmed() {
        let ready = gateway_with_status(serde_json::json!({
            "conditions": [condition("Accepted", "True"), condition("Programmed", "True")]
        }));
        assert!(ready.is_ready());

        let not_programmed = gateway_with_status(serde_json::json!({
            "conditions": [condition("Accepted", "True"), condition("Programmed", "False")]
        }));
        assert!(!not_programmed.is_ready());

        let no_status = gateway_with_status(serde_json::Value::Null);
        assert!(!no_status.is_ready());
    }

    #[test]
    fn status_is_not_serialized_when_absent() {
        let gw = Gateway::new(
            ObjectMeta::new("egress-waypoint", "istio-egress-ambient"),
            GatewaySpec {
                gateway_class_name: "istio-waypoint".to_string(),
                listeners: vec![],
                infrastructure: None,
            },
        );
        let json = serde_json::to_value(&gw).unwrap();
        assert!(json.get("status").is_none());
        assert_eq!(json["apiVersion"], "gateway.networking.k8s.io/v1");
    }
}
