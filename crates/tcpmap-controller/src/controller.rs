//! TCPIngressMapping reconciliation
//!
//! Each attempt is an explicit two-branch dispatch. A mapping with a deletion
//! timestamp runs cleanup and then releases its finalizer; anything else has
//! its finalizer ensured, its collaborators resolved, a port elected once and
//! the frontend Service and proxy ConfigMap registrations (re)applied.
//!
//! Lifecycle: Pending -> Active -> Registered -> Deleting -> Removed
//!
//! The controller runtime guarantees at most one in-flight reconcile per
//! mapping, so nothing here locks. Every write is computed from a fresh read
//! and carries that read's resourceVersion, which makes a full replay after
//! any failure converge on the same frontend and proxy entries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use tcpmap_common::events::{actions, reasons as event_reasons};
use tcpmap_common::{EventPublisher, KubeEventPublisher, CONTROLLER_NAME, MAPPING_FINALIZER};

use crate::allocator::NO_PORT;
use crate::backoff::Backoff;
use crate::client::{MappingKubeClient, MappingKubeClientImpl};
use crate::config::MappingConfig;
use crate::crd::{reasons, TCPIngressMapping, TCPIngressMappingStatus};
use crate::reference::{resolve_reference, ObjectKey};
use crate::registration::{
    deregister_frontend_port, frontend_port_name, port_taken_by_other, proxy_target,
    register_frontend_port, resolve_backend_port, update_config_store, update_frontend_ports,
    used_ports,
};
use crate::router::{keys_for, MappingIndex};
use crate::status;
use crate::Error;

/// Requeue delay after the finalizer was added
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);
/// Requeue delay while a collaborator or backend port is missing
pub const NOT_FOUND_REQUEUE: Duration = Duration::from_secs(300);
/// Requeue delay while every port in the range is taken
pub const NO_PORT_REQUEUE: Duration = Duration::from_secs(30);
/// Periodic re-validation of registered mappings
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Controller context shared by all reconciles
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn MappingKubeClient>,
    /// Event publisher for transitions
    pub events: Arc<dyn EventPublisher>,
    /// Port range and default references
    pub config: Arc<MappingConfig>,
    /// Backend Service to mapping index used to route Service watch events
    pub index: Arc<MappingIndex>,
    /// Per-mapping error backoff
    pub backoff: Backoff,
}

impl Context {
    /// Create a context backed by the API server
    pub fn new(client: Client, config: MappingConfig, index: Arc<MappingIndex>) -> Self {
        Self {
            kube: Arc::new(MappingKubeClientImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config: Arc::new(config),
            index,
            backoff: Backoff::default(),
        }
    }

    /// Create a context for testing with custom implementations
    pub fn for_testing(
        kube: Arc<dyn MappingKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: MappingConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config: Arc::new(config),
            index: Arc::new(MappingIndex::new()),
            backoff: Backoff::default(),
        }
    }
}

/// Why an attempt stopped short of a registered port
#[derive(Debug)]
enum Failure {
    /// Something is missing or exhausted; reported on the condition and
    /// retried on a fixed delay without an error
    NotReady {
        reason: &'static str,
        message: String,
        requeue: Duration,
    },
    /// A read or write of a collaborator failed; reported on the condition
    /// and retried with backoff
    Failed { reason: &'static str, error: Error },
    /// An invariant broke; only observedGeneration is recorded
    Error(Error),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Error(error)
    }
}

impl Failure {
    fn not_found(reason: &'static str, message: String) -> Self {
        Failure::NotReady {
            reason,
            message,
            requeue: NOT_FOUND_REQUEUE,
        }
    }

    fn failed(reason: &'static str) -> impl FnOnce(Error) -> Self {
        move |error| Failure::Failed { reason, error }
    }
}

/// Port registered for the mapping in this attempt
struct Registration {
    port: i32,
    newly_elected: bool,
}

/// Reconcile a TCPIngressMapping
#[instrument(
    skip(mapping, ctx),
    fields(mapping = %mapping.name_any(), namespace = %mapping.namespace().unwrap_or_default())
)]
pub async fn reconcile(mapping: Arc<TCPIngressMapping>, ctx: Arc<Context>) -> Result<Action, Error> {
    let (key, backend) = keys_for(&mapping)
        .ok_or_else(|| Error::validation("TCPIngressMapping must be namespaced"))?;

    let result = if mapping.metadata.deletion_timestamp.is_some() {
        handle_deletion(&mapping, &ctx, &key).await
    } else {
        ctx.index.put(key.clone(), backend.clone());
        handle_active(&mapping, &ctx, &key, &backend).await
    };

    if result.is_ok() {
        ctx.backoff.reset(&key.to_string());
    }
    result
}

/// Error policy for the controller
///
/// Retryable errors back off exponentially per mapping. Anything else waits
/// for the mapping to change.
pub fn error_policy(mapping: Arc<TCPIngressMapping>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}",
        mapping.namespace().unwrap_or_default(),
        mapping.name_any()
    );

    if !error.is_retryable() {
        error!(?error, mapping = %key, "reconciliation failed, waiting for a change");
        return Action::await_change();
    }

    let delay = ctx.backoff.next_delay(&key);
    error!(
        ?error,
        mapping = %key,
        retry_in_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

fn has_finalizer(mapping: &TCPIngressMapping) -> bool {
    mapping.finalizers().iter().any(|f| f == MAPPING_FINALIZER)
}

async fn handle_active(
    mapping: &TCPIngressMapping,
    ctx: &Context,
    key: &ObjectKey,
    backend: &ObjectKey,
) -> Result<Action, Error> {
    if !has_finalizer(mapping) {
        info!("adding finalizer");
        ctx.kube
            .add_mapping_finalizer(&key.namespace, &key.name, MAPPING_FINALIZER)
            .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let mut status = status::observe(mapping);
    match register(mapping, ctx, &key.namespace, backend, status.elected_port).await {
        Ok(Registration {
            port,
            newly_elected,
        }) => {
            status.elected_port = port;
            // Set on re-validation too, not only on a new election
            let changed = status.mark_ready(
                reasons::PORT_READY,
                format!("port {port} routes to {backend}"),
            );
            status::persist(ctx.kube.as_ref(), mapping, &status).await?;

            if newly_elected {
                info!(port, backend = %backend, "port elected and registered");
                publish(
                    ctx,
                    mapping,
                    EventType::Normal,
                    reasons::PORT_READY,
                    actions::REGISTER,
                    format!("Elected port {port} for {backend}"),
                )
                .await;
            } else if changed {
                info!(port, backend = %backend, "registration recovered");
            } else {
                debug!(port, "registration re-validated");
            }
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Err(failure) => report_failure(mapping, ctx, status, failure, actions::REGISTER).await,
    }
}

/// Resolve collaborators, elect a port if needed and apply both registrations.
///
/// The frontend is patched before the proxy store; a failed frontend patch
/// stops the attempt before the store is touched.
async fn register(
    mapping: &TCPIngressMapping,
    ctx: &Context,
    namespace: &str,
    backend: &ObjectKey,
    elected_port: i32,
) -> Result<Registration, Failure> {
    let kube = ctx.kube.as_ref();
    let spec = &mapping.spec;

    let backend_service = kube
        .get_service(&backend.namespace, &backend.name)
        .await
        .map_err(Failure::failed(reasons::BACKEND_SERVICE_NOT_FOUND))?
        .ok_or_else(|| {
            Failure::not_found(
                reasons::BACKEND_SERVICE_NOT_FOUND,
                format!("backend service {backend} not found"),
            )
        })?;

    let frontend_key = resolve_reference(
        spec.frontend_ref.as_ref(),
        ctx.config.default_frontend.as_ref(),
        namespace,
    )
    .ok_or_else(|| {
        Failure::not_found(
            reasons::FRONTEND_SERVICE_NOT_FOUND,
            "no frontend service configured".to_string(),
        )
    })?;
    let frontend = kube
        .get_service(&frontend_key.namespace, &frontend_key.name)
        .await
        .map_err(Failure::failed(reasons::FRONTEND_SERVICE_NOT_FOUND))?
        .ok_or_else(|| {
            Failure::not_found(
                reasons::FRONTEND_SERVICE_NOT_FOUND,
                format!("frontend service {frontend_key} not found"),
            )
        })?;

    let store_key = resolve_reference(
        spec.config_store_ref.as_ref(),
        ctx.config.default_config_store.as_ref(),
        namespace,
    )
    .ok_or_else(|| {
        Failure::not_found(
            reasons::CONFIG_STORE_NOT_FOUND,
            "no tcp services config map configured".to_string(),
        )
    })?;
    let store = kube
        .get_config_map(&store_key.namespace, &store_key.name)
        .await
        .map_err(Failure::failed(reasons::CONFIG_STORE_NOT_FOUND))?
        .ok_or_else(|| {
            Failure::not_found(
                reasons::CONFIG_STORE_NOT_FOUND,
                format!("config map {store_key} not found"),
            )
        })?;

    let (port, newly_elected) = if elected_port == NO_PORT {
        let used = used_ports(&frontend, &store);
        let port = ctx.config.ports.allocate(&used);
        if port == NO_PORT {
            return Err(Failure::NotReady {
                reason: reasons::NO_PORT_ELECTED,
                message: format!("no free port in range {}", ctx.config.ports),
                requeue: NO_PORT_REQUEUE,
            });
        }
        debug!(port, used = used.len(), "elected port");
        (port, true)
    } else if (1..=65535).contains(&elected_port) {
        (elected_port, false)
    } else {
        return Err(Error::invariant(format!(
            "elected port {elected_port} is outside 1-65535"
        ))
        .into());
    };

    let backend_port = resolve_backend_port(&backend_service, &spec.backend_ref.port)
        .ok_or_else(|| {
            Failure::not_found(
                reasons::BACKEND_PORT_NOT_FOUND,
                format!(
                    "backend service {backend} has no port {}",
                    describe_port(&spec.backend_ref.port)
                ),
            )
        })?;

    // A new election must still find the port free on the fresh objects
    let port_name = frontend_port_name(backend);
    update_frontend_ports(kube, &frontend_key, |ports| {
        if newly_elected && port_taken_by_other(ports, &port_name, port) {
            return Err(Error::conflict(
                "Service",
                format!("{frontend_key} (port {port} was taken)"),
            ));
        }
        Ok(register_frontend_port(ports, &port_name, port))
    })
    .await
    .map_err(Failure::failed(reasons::FAILED_REGISTER_FRONTEND_PORT))?;

    // Always desired, so an externally removed or edited entry is restored
    let key = port.to_string();
    let target = proxy_target(backend, backend_port);
    update_config_store(kube, &store_key, |data| {
        if newly_elected && data.get(&key).is_some_and(|current| current != &target) {
            return Err(Error::conflict(
                "ConfigMap",
                format!("{store_key} (key {key} was taken)"),
            ));
        }
        Ok(BTreeMap::from([(key, Some(target))]))
    })
    .await
    .map_err(Failure::failed(reasons::FAILED_REGISTER_CONFIG_MAP_PORT))?;

    Ok(Registration {
        port,
        newly_elected,
    })
}

async fn handle_deletion(
    mapping: &TCPIngressMapping,
    ctx: &Context,
    key: &ObjectKey,
) -> Result<Action, Error> {
    if !has_finalizer(mapping) {
        ctx.index.remove(key);
        return Ok(Action::await_change());
    }

    info!("mapping deleted, releasing port");
    let status = status::observe(mapping);
    match cleanup(mapping, ctx, &key.namespace, status.elected_port).await {
        Ok(released) => {
            ctx.kube
                .remove_mapping_finalizer(&key.namespace, &key.name, MAPPING_FINALIZER)
                .await?;
            ctx.index.remove(key);

            if released {
                info!(port = status.elected_port, "port released");
                publish(
                    ctx,
                    mapping,
                    EventType::Normal,
                    event_reasons::PORT_RELEASED,
                    actions::CLEANUP,
                    format!("Released port {}", status.elected_port),
                )
                .await;
            }
            Ok(Action::await_change())
        }
        Err(failure) => report_failure(mapping, ctx, status, failure, actions::CLEANUP).await,
    }
}

/// Undo both registrations of the elected port.
///
/// A collaborator that is unconfigured or gone has nothing left to undo.
/// Returns whether anything was removed.
async fn cleanup(
    mapping: &TCPIngressMapping,
    ctx: &Context,
    namespace: &str,
    elected_port: i32,
) -> Result<bool, Failure> {
    if elected_port == NO_PORT {
        return Ok(false);
    }

    let kube = ctx.kube.as_ref();
    let spec = &mapping.spec;
    let mut released = false;

    let frontend = resolve_reference(
        spec.frontend_ref.as_ref(),
        ctx.config.default_frontend.as_ref(),
        namespace,
    );
    if let Some(frontend) = frontend {
        match update_frontend_ports(kube, &frontend, |ports| {
            Ok(deregister_frontend_port(ports, elected_port))
        })
        .await
        {
            Ok(changed) => released |= changed,
            Err(Error::NotFound { .. }) => debug!(frontend = %frontend, "frontend service gone"),
            Err(error) => {
                return Err(Failure::Failed {
                    reason: reasons::FAILED_REGISTER_FRONTEND_PORT,
                    error,
                })
            }
        }
    }

    let store = resolve_reference(
        spec.config_store_ref.as_ref(),
        ctx.config.default_config_store.as_ref(),
        namespace,
    );
    if let Some(store) = store {
        let entry = (elected_port.to_string(), None);
        match update_config_store(kube, &store, |_| Ok(BTreeMap::from([entry]))).await {
            Ok(changed) => released |= changed,
            Err(Error::NotFound { .. }) => debug!(config_map = %store, "config map gone"),
            Err(error) => {
                return Err(Failure::Failed {
                    reason: reasons::FAILED_REGISTER_CONFIG_MAP_PORT,
                    error,
                })
            }
        }
    }

    Ok(released)
}

/// Record a failed attempt on the Ready condition and pick the next step
async fn report_failure(
    mapping: &TCPIngressMapping,
    ctx: &Context,
    mut status: TCPIngressMappingStatus,
    failure: Failure,
    action: &str,
) -> Result<Action, Error> {
    let (reason, message, outcome) = match failure {
        Failure::Error(error) => {
            if let Err(e) = status::persist(ctx.kube.as_ref(), mapping, &status).await {
                warn!(error = %e, "failed to record observed generation");
            }
            return Err(error);
        }
        Failure::NotReady {
            reason,
            message,
            requeue,
        } => (reason, message, Ok(Action::requeue(requeue))),
        Failure::Failed { reason, error } => (reason, error.to_string(), Err(error)),
    };

    warn!(reason, %message, "mapping not ready");
    let changed = status.mark_not_ready(reason, message.as_str());
    match status::persist(ctx.kube.as_ref(), mapping, &status).await {
        Ok(_) => {}
        // Keep the write error for the error policy
        Err(e) if outcome.is_err() => warn!(error = %e, "failed to record not-ready status"),
        Err(e) => return Err(e),
    }

    if changed {
        publish(ctx, mapping, EventType::Warning, reason, action, message).await;
    }
    outcome
}

async fn publish(
    ctx: &Context,
    mapping: &TCPIngressMapping,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&mapping.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

fn describe_port(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}
