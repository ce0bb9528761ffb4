//! Kubernetes API access for the mapping controller
//!
//! Everything the engine reads or writes goes through [`MappingKubeClient`]
//! so reconciliation can be exercised against mocks. Writes to the frontend
//! Service and proxy ConfigMap are JSON merge patches that carry the
//! `resourceVersion` the change was computed from; the API server rejects
//! them with 409 if the object moved on, which surfaces as
//! [`Error::Conflict`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tcpmap_common::CONTROLLER_NAME;

use crate::crd::{TCPIngressMapping, TCPIngressMappingStatus};
use crate::Error;

/// Trait abstracting Kubernetes client operations for TCPIngressMapping
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MappingKubeClient: Send + Sync {
    /// Get a Service, `None` if it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Get a ConfigMap, `None` if it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Replace a Service's port list, conditional on `resource_version`
    async fn patch_service_ports(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        ports: &[ServicePort],
    ) -> Result<(), Error>;

    /// Set (`Some`) or delete (`None`) ConfigMap data keys, conditional on `resource_version`
    async fn patch_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource of a mapping
    async fn patch_mapping_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TCPIngressMappingStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a mapping if it is not already present
    async fn add_mapping_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a mapping
    async fn remove_mapping_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct MappingKubeClientImpl {
    client: Client,
}

impl MappingKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Vec<String>) -> bool,
    ) -> Result<(), Error> {
        let api: Api<TCPIngressMapping> = Api::namespaced(self.client.clone(), namespace);

        // Get current mapping to read existing finalizers
        let mapping = api.get(name).await?;
        let mut finalizers = mapping.metadata.finalizers.unwrap_or_default();
        if !edit(&mut finalizers) {
            return Ok(());
        }

        let patch = json!({
            "metadata": {
                "resourceVersion": mapping.metadata.resource_version,
                "finalizers": finalizers
            }
        });

        api.patch(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| Error::from_write(e, "TCPIngressMapping", &format!("{namespace}/{name}")))?;

        Ok(())
    }
}

/// Attach a resourceVersion precondition to a merge patch body
fn with_precondition(mut body: Value, resource_version: &str) -> Value {
    if !resource_version.is_empty() {
        body["metadata"] = json!({ "resourceVersion": resource_version });
    }
    body
}

#[async_trait]
impl MappingKubeClient for MappingKubeClientImpl {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_service_ports(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        ports: &[ServicePort],
    ) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let patch = with_precondition(json!({ "spec": { "ports": ports } }), resource_version);

        api.patch(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| Error::from_write(e, "Service", &format!("{namespace}/{name}")))?;

        debug!(service = %name, namespace = %namespace, ports = ports.len(), "patched service ports");
        Ok(())
    }

    async fn patch_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        // JSON merge patch: null deletes a key
        let data: Map<String, Value> = changes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().map(Value::String).unwrap_or(Value::Null)))
            .collect();
        let patch = with_precondition(json!({ "data": data }), resource_version);

        api.patch(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| Error::from_write(e, "ConfigMap", &format!("{namespace}/{name}")))?;

        debug!(config_map = %name, namespace = %namespace, keys = changes.len(), "patched config map");
        Ok(())
    }

    async fn patch_mapping_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TCPIngressMappingStatus,
    ) -> Result<(), Error> {
        let api: Api<TCPIngressMapping> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn add_mapping_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.patch_finalizers(namespace, name, |finalizers| {
            // Don't add if already present
            if finalizers.iter().any(|f| f == finalizer) {
                return false;
            }
            finalizers.push(finalizer.to_string());
            true
        })
        .await
    }

    async fn remove_mapping_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.patch_finalizers(namespace, name, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            finalizers.len() != before
        })
        .await
    }
}
