//! Frontend port and proxy store registration
//!
//! Pure helpers compute the desired frontend port list and proxy entries; the
//! two `update_*` functions wrap them in a get-latest-then-conditional-patch
//! transaction so a concurrent writer surfaces as [`Error::Conflict`] instead
//! of a silent overwrite.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::client::MappingKubeClient;
use crate::reference::ObjectKey;
use crate::Error;

/// Suffix the downstream TCP proxy expects on every entry
const PROXY_PROTOCOL_SUFFIX: &str = "PROXY";

/// Name of the frontend port entry owned by the mapping of `backend`
pub fn frontend_port_name(backend: &ObjectKey) -> String {
    format!("{}-{}", backend.namespace, backend.name)
}

/// Proxy store value routing to `backend` on `port`
pub fn proxy_target(backend: &ObjectKey, port: i32) -> String {
    format!(
        "{}/{}:{}:{}",
        backend.namespace, backend.name, port, PROXY_PROTOCOL_SUFFIX
    )
}

/// Ports of a Service's spec, empty if unset
pub fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default()
}

/// Ports already taken on the frontend or in the proxy store.
///
/// Proxy store keys that don't parse as integers are ignored.
pub fn used_ports(frontend: &Service, store: &ConfigMap) -> BTreeSet<i32> {
    let declared = service_ports(frontend).iter().map(|p| p.port);
    let keyed = store
        .data
        .iter()
        .flat_map(|data| data.keys())
        .filter_map(|k| k.parse::<i32>().ok());
    declared.chain(keyed).collect()
}

/// Resolve `backendRef.port` against the backend's declared ports.
///
/// A port whose name matches wins; otherwise the value is compared as a
/// number. Returns the Service port (not its target port).
pub fn resolve_backend_port(backend: &Service, wanted: &IntOrString) -> Option<i32> {
    let ports = service_ports(backend);
    let (name, number) = match wanted {
        IntOrString::Int(n) => (n.to_string(), Some(*n)),
        IntOrString::String(s) => (s.clone(), s.parse::<i32>().ok()),
    };

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(name.as_str()))
        .or_else(|| number.and_then(|n| ports.iter().find(|p| p.port == n)))
        .map(|p| p.port)
}

/// Ensure the frontend carries `port` under `name`.
///
/// If some entry already carries the port the list is left alone. Otherwise
/// any stale entry with the same name is replaced. Returns true if the list
/// changed.
pub fn register_frontend_port(ports: &mut Vec<ServicePort>, name: &str, port: i32) -> bool {
    if ports.iter().any(|p| p.port == port) {
        return false;
    }

    ports.retain(|p| p.name.as_deref() != Some(name));
    ports.push(ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    });
    true
}

/// Whether some entry other than `name` already carries `port`
pub fn port_taken_by_other(ports: &[ServicePort], name: &str, port: i32) -> bool {
    ports
        .iter()
        .any(|p| p.port == port && p.name.as_deref() != Some(name))
}

/// Remove every frontend entry carrying `port`. Returns true if any was removed.
///
/// Matches by value rather than name so a renamed entry still gets cleaned up.
pub fn deregister_frontend_port(ports: &mut Vec<ServicePort>, port: i32) -> bool {
    let before = ports.len();
    ports.retain(|p| p.port != port);
    ports.len() != before
}

/// Get the latest frontend Service, let `edit` change its ports, and patch if it did.
///
/// Returns whether a patch was submitted. A vanished Service is
/// [`Error::NotFound`]. An error from `edit` aborts without writing.
pub async fn update_frontend_ports(
    kube: &dyn MappingKubeClient,
    frontend: &ObjectKey,
    edit: impl FnOnce(&mut Vec<ServicePort>) -> Result<bool, Error>,
) -> Result<bool, Error> {
    let service = kube
        .get_service(&frontend.namespace, &frontend.name)
        .await?
        .ok_or_else(|| Error::not_found("Service", frontend.to_string()))?;

    let mut ports = service_ports(&service).to_vec();
    if !edit(&mut ports)? {
        return Ok(false);
    }

    let resource_version = service.metadata.resource_version.unwrap_or_default();
    kube.patch_service_ports(
        &frontend.namespace,
        &frontend.name,
        &resource_version,
        &ports,
    )
    .await?;
    Ok(true)
}

/// Get the latest proxy ConfigMap, compute key changes from its data, and
/// patch the ones that differ.
///
/// `desired` returns `Some(value)` to set a key and `None` to delete it.
/// Returns whether a patch was submitted. An error from `desired` aborts
/// without writing.
pub async fn update_config_store(
    kube: &dyn MappingKubeClient,
    store: &ObjectKey,
    desired: impl FnOnce(&BTreeMap<String, String>) -> Result<BTreeMap<String, Option<String>>, Error>,
) -> Result<bool, Error> {
    let config_map = kube
        .get_config_map(&store.namespace, &store.name)
        .await?
        .ok_or_else(|| Error::not_found("ConfigMap", store.to_string()))?;

    let data = config_map.data.unwrap_or_default();
    let mut changes = desired(&data)?;
    changes.retain(|key, value| data.get(key) != value.as_ref());
    if changes.is_empty() {
        return Ok(false);
    }

    let resource_version = config_map.metadata.resource_version.unwrap_or_default();
    kube.patch_config_map_data(&store.namespace, &store.name, &resource_version, &changes)
        .await?;
    Ok(true)
}
