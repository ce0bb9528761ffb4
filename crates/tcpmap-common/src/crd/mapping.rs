//! TCPIngressMapping CRD types
//!
//! A `TCPIngressMapping` asks the controller to expose a backend Service
//! through a dedicated TCP port on a shared frontend Service (typically the
//! ingress-nginx controller) and a TCP services ConfigMap consumed by the
//! proxy.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{set_condition, Condition, ConditionStatus};

/// Condition type carrying the overall outcome of the last reconcile
pub const READY_CONDITION: &str = "Ready";

/// Reasons reported on the Ready condition.
///
/// These strings are part of the resource's public contract.
pub mod reasons {
    /// The port is elected and registered with frontend and proxy store
    pub const PORT_READY: &str = "PortReady";
    /// No frontend Service is configured or it does not exist
    pub const FRONTEND_SERVICE_NOT_FOUND: &str = "FrontendServiceNotFound";
    /// The backend Service does not exist
    pub const BACKEND_SERVICE_NOT_FOUND: &str = "BackendServiceNotFound";
    /// No proxy ConfigMap is configured or it does not exist
    pub const CONFIG_STORE_NOT_FOUND: &str = "ConfigStoreNotFound";
    /// Patching the frontend Service's port list failed
    pub const FAILED_REGISTER_FRONTEND_PORT: &str = "FailedRegisterFrontendPort";
    /// Patching the proxy ConfigMap failed
    pub const FAILED_REGISTER_CONFIG_MAP_PORT: &str = "FailedRegisterConfigMapPort";
    /// The backend Service exposes no port matching `backendRef.port`
    pub const BACKEND_PORT_NOT_FOUND: &str = "BackendPortNotFound";
    /// Every port in the configured range is already in use
    pub const NO_PORT_ELECTED: &str = "NoPortElected";
}

/// Reference to the backend Service whose traffic is exposed
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Service name
    pub name: String,

    /// Service namespace, defaults to the mapping's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Service port, by name or by number
    pub port: IntOrString,
}

/// Reference to a namespaced object (frontend Service or proxy ConfigMap)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRefSpec {
    /// Object name
    pub name: String,

    /// Object namespace, defaults to the mapping's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Exposes a backend Service through an elected TCP port
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.infra.doodle.com",
    version = "v1beta1",
    kind = "TCPIngressMapping",
    plural = "tcpingressmappings",
    shortname = "tcpmap",
    namespaced,
    status = "TCPIngressMappingStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".status.electedPort"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TCPIngressMappingSpec {
    /// Service receiving the proxied traffic
    pub backend_ref: BackendRef,

    /// Frontend Service carrying the elected port; falls back to the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_ref: Option<ObjectRefSpec>,

    /// ConfigMap read by the TCP proxy; falls back to the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_store_ref: Option<ObjectRefSpec>,
}

/// Observed state of a TCPIngressMapping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TCPIngressMappingStatus {
    /// Conditions keyed by type; only `Ready` is used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Port elected for this mapping, 0 while none has been elected
    #[serde(default)]
    pub elected_port: i32,

    /// Generation of the spec the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TCPIngressMappingStatus {
    /// The Ready condition, if one has been recorded
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == READY_CONDITION)
    }

    /// Whether the Ready condition is currently True
    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Set Ready=True with the given reason. Returns true if the condition changed.
    pub fn mark_ready(&mut self, reason: &str, message: impl Into<String>) -> bool {
        set_condition(
            &mut self.conditions,
            Condition::new(READY_CONDITION, ConditionStatus::True, reason, message),
        )
    }

    /// Set Ready=False with the given reason. Returns true if the condition changed.
    pub fn mark_not_ready(&mut self, reason: &str, message: impl Into<String>) -> bool {
        set_condition(
            &mut self.conditions,
            Condition::new(READY_CONDITION, ConditionStatus::False, reason, message),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_uses_ref_field_names() {
        let spec: TCPIngressMappingSpec = serde_json::from_value(serde_json::json!({
            "backendRef": { "name": "backend", "port": "http" },
            "frontendRef": { "name": "nginx", "namespace": "ingress" },
        }))
        .expect("spec should parse");

        assert_eq!(spec.backend_ref.name, "backend");
        assert_eq!(spec.backend_ref.port, IntOrString::String("http".to_string()));
        assert_eq!(
            spec.frontend_ref.and_then(|r| r.namespace).as_deref(),
            Some("ingress")
        );
        assert!(spec.config_store_ref.is_none());
    }

    #[test]
    fn spec_accepts_numeric_backend_port() {
        let spec: TCPIngressMappingSpec = serde_json::from_value(serde_json::json!({
            "backendRef": { "name": "db", "namespace": "data", "port": 5432 },
            "configStoreRef": { "name": "tcp-services" },
        }))
        .expect("spec should parse");

        assert_eq!(spec.backend_ref.port, IntOrString::Int(5432));
        assert_eq!(spec.backend_ref.namespace.as_deref(), Some("data"));
        assert_eq!(
            spec.config_store_ref.map(|r| r.name).as_deref(),
            Some("tcp-services")
        );
    }

    #[test]
    fn status_defaults_to_unelected() {
        let status: TCPIngressMappingStatus =
            serde_json::from_value(serde_json::json!({})).expect("status should parse");
        assert_eq!(status.elected_port, 0);
        assert!(!status.is_ready());
        assert!(status.ready_condition().is_none());
    }

    #[test]
    fn mark_ready_then_not_ready_flips_single_condition() {
        let mut status = TCPIngressMappingStatus::default();
        assert!(status.mark_ready(reasons::PORT_READY, "registered"));
        assert!(status.is_ready());
        assert!(!status.mark_ready(reasons::PORT_READY, "registered"));

        assert!(status.mark_not_ready(reasons::NO_PORT_ELECTED, "exhausted"));
        assert!(!status.is_ready());
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.ready_condition().map(|c| c.reason.as_str()),
            Some(reasons::NO_PORT_ELECTED)
        );
    }

    #[test]
    fn crd_metadata() {
        let crd = TCPIngressMapping::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("tcpingressmappings.networking.infra.doodle.com")
        );
        assert_eq!(crd.spec.names.kind, "TCPIngressMapping");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["tcpmap".to_string()])
        );
        let yaml = serde_yaml::to_string(&crd).expect("crd should serialize");
        assert!(yaml.contains("electedPort"));
    }
}
