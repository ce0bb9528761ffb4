//! Startup steps run before the controller: CRD installation using
//! server-side apply and rebuilding the backend index from existing mappings

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use tcpmap_common::crd::TCPIngressMapping;
use tcpmap_common::CONTROLLER_NAME;
use tcpmap_controller::router::MappingIndex;

use crate::config::WatchScope;

/// Ensure the TCPIngressMapping CRD is installed and current
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();
    let crd = TCPIngressMapping::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();

    tracing::info!("Installing {} CRD...", name);
    crds.patch(&name, &params, &Patch::Apply(&crd))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    tracing::info!("{} CRD installed/updated", name);

    Ok(())
}

/// List parameters selecting the mappings this controller owns
pub fn mapping_list_params(scope: &WatchScope) -> ListParams {
    match &scope.label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

/// Index every existing mapping by its backend
///
/// The Service watch routes through the index, so it has to know mappings
/// that were registered before this process started and have not been
/// reconciled yet.
pub async fn load_mapping_index(client: &Client, scope: &WatchScope) -> anyhow::Result<MappingIndex> {
    let mappings: Api<TCPIngressMapping> = match &scope.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let list = mappings
        .list(&mapping_list_params(scope))
        .await
        .map_err(|e| anyhow::anyhow!("failed to list TCPIngressMappings: {}", e))?;
    let index = MappingIndex::from_mappings(&list.items);
    tracing::info!(mappings = index.len(), "Indexed existing mappings by backend");

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_listing_honours_label_selector() {
        let scope = WatchScope {
            namespace: None,
            label_selector: Some("tier=edge".to_string()),
        };
        assert_eq!(
            mapping_list_params(&scope).label_selector.as_deref(),
            Some("tier=edge")
        );
    }

    #[test]
    fn index_listing_without_selector_lists_everything() {
        let scope = WatchScope {
            namespace: Some("ingress".to_string()),
            label_selector: None,
        };
        assert!(mapping_list_params(&scope).label_selector.is_none());
    }
}
