//! Controller runner - builds the TCPIngressMapping controller future
//!
//! Mappings are watched directly. Backend Services are watched too and routed
//! through the controller's [`MappingIndex`] so a backend change requeues
//! every mapping that points at it.
//!
//! When the controller is limited to one namespace, both watches are limited
//! to it. A mapping whose `backendRef.namespace` points elsewhere is not
//! requeued by changes to its backend; it picks them up on the periodic
//! resync instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};

use tcpmap_common::crd::TCPIngressMapping;
use tcpmap_controller::config::MappingConfig;
use tcpmap_controller::controller::{error_policy, reconcile, Context};
use tcpmap_controller::reference::ObjectKey;
use tcpmap_controller::router::MappingIndex;

use crate::config::WatchScope;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the mapping controller future
///
/// `index` should already hold the existing mappings, see
/// [`crate::startup::load_mapping_index`].
pub fn build_mapping_controller(
    client: Client,
    config: MappingConfig,
    scope: &WatchScope,
    index: MappingIndex,
    concurrency: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let (mappings, services): (Api<TCPIngressMapping>, Api<Service>) = match &scope.namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let mut mapping_watch = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    if let Some(selector) = &scope.label_selector {
        mapping_watch = mapping_watch.labels(selector);
    }

    let index = Arc::new(index);
    let ctx = Arc::new(Context::new(client, config, index.clone()));

    tracing::info!(
        namespace = scope.namespace.as_deref().unwrap_or("*"),
        indexed = index.len(),
        concurrency,
        "- TCPIngressMapping controller"
    );

    Box::pin(
        Controller::new(mappings, mapping_watch)
            .watches(
                services,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                move |service| mappings_for_service(&index, &service),
            )
            .with_config(controller::Config::default().concurrency(concurrency))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("TCPIngressMapping")),
    )
}

/// Requests for every mapping whose backend is `service`
pub fn mappings_for_service(
    index: &MappingIndex,
    service: &Service,
) -> Vec<ObjectRef<TCPIngressMapping>> {
    let Some(namespace) = service.namespace() else {
        return vec![];
    };
    let backend = ObjectKey::new(namespace, service.name_any());
    let affected = index.mappings_for(&backend);

    if !affected.is_empty() {
        tracing::debug!(
            backend = %backend,
            affected_count = affected.len(),
            "Triggering re-reconciliation of mappings"
        );
    }

    affected
        .into_iter()
        .map(|m| ObjectRef::new(&m.name).within(&m.namespace))
        .collect()
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
