//! Status projection for TCPIngressMapping
//!
//! Every attempt starts from the persisted status with `observedGeneration`
//! moved to the current generation; the engine then marks Ready or Not-Ready
//! and [`persist`] writes the result only if it differs from what is stored.

use kube::ResourceExt;
use tracing::debug;

use crate::client::MappingKubeClient;
use crate::crd::{TCPIngressMapping, TCPIngressMappingStatus};
use crate::Error;

/// Working copy of the mapping's status for this attempt
pub fn observe(mapping: &TCPIngressMapping) -> TCPIngressMappingStatus {
    let mut status = mapping.status.clone().unwrap_or_default();
    status.observed_generation = mapping.metadata.generation;
    status
}

/// Check if the status would be unchanged, to avoid update loops
fn is_status_unchanged(mapping: &TCPIngressMapping, status: &TCPIngressMappingStatus) -> bool {
    mapping.status.as_ref() == Some(status)
}

/// Write `status` to the mapping's status subresource unless it is already current.
///
/// Returns whether a patch was sent.
pub async fn persist(
    kube: &dyn MappingKubeClient,
    mapping: &TCPIngressMapping,
    status: &TCPIngressMappingStatus,
) -> Result<bool, Error> {
    if is_status_unchanged(mapping, status) {
        debug!(mapping = %mapping.name_any(), "status unchanged, skipping update");
        return Ok(false);
    }

    let namespace = mapping
        .namespace()
        .ok_or_else(|| Error::validation("TCPIngressMapping must be namespaced"))?;
    kube.patch_mapping_status(&namespace, &mapping.name_any(), status)
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    use crate::client::MockMappingKubeClient;
    use crate::crd::{reasons, BackendRef, TCPIngressMappingSpec};

    fn mapping(generation: i64, status: Option<TCPIngressMappingStatus>) -> TCPIngressMapping {
        let mut mapping = TCPIngressMapping::new(
            "db",
            TCPIngressMappingSpec {
                backend_ref: BackendRef {
                    name: "postgres".to_string(),
                    namespace: None,
                    port: IntOrString::Int(5432),
                },
                frontend_ref: None,
                config_store_ref: None,
            },
        );
        mapping.metadata.namespace = Some("apps".to_string());
        mapping.metadata.generation = Some(generation);
        mapping.status = status;
        mapping
    }

    fn ready_status(port: i32) -> TCPIngressMappingStatus {
        let mut status = TCPIngressMappingStatus {
            elected_port: port,
            observed_generation: Some(1),
            ..Default::default()
        };
        status.mark_ready(reasons::PORT_READY, "port elected");
        status
    }

    #[test]
    fn observe_tracks_generation_and_keeps_port() {
        let observed = observe(&mapping(4, Some(ready_status(1028))));
        assert_eq!(observed.observed_generation, Some(4));
        assert_eq!(observed.elected_port, 1028);
        assert!(observed.is_ready());
    }

    #[test]
    fn observe_starts_empty_without_status() {
        let observed = observe(&mapping(1, None));
        assert_eq!(observed.elected_port, 0);
        assert!(observed.conditions.is_empty());
        assert_eq!(observed.observed_generation, Some(1));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let mut mock = MockMappingKubeClient::new();
        mock.expect_patch_mapping_status().never();

        let current = mapping(1, Some(ready_status(1028)));
        let status = observe(&current);
        assert!(!persist(&mock, &current, &status).await.unwrap());
    }

    #[tokio::test]
    async fn changed_status_is_written_to_mapping_namespace() {
        let writes: Arc<Mutex<Vec<(String, String, TCPIngressMappingStatus)>>> = Arc::default();
        let captured = writes.clone();

        let mut mock = MockMappingKubeClient::new();
        mock.expect_patch_mapping_status()
            .returning(move |ns, name, status| {
                captured
                    .lock()
                    .expect("mutex should not be poisoned")
                    .push((ns.to_string(), name.to_string(), status.clone()));
                Ok(())
            });

        let current = mapping(2, None);
        let mut status = observe(&current);
        status.mark_not_ready(reasons::BACKEND_SERVICE_NOT_FOUND, "service apps/postgres not found");
        assert!(persist(&mock, &current, &status).await.unwrap());

        let writes = writes.lock().expect("mutex should not be poisoned");
        let (ns, name, written) = &writes[0];
        assert_eq!((ns.as_str(), name.as_str()), ("apps", "db"));
        assert_eq!(written.observed_generation, Some(2));
        assert!(!written.is_ready());
    }

    #[tokio::test]
    async fn cluster_scoped_mapping_is_rejected() {
        let mock = MockMappingKubeClient::new();
        let mut current = mapping(1, None);
        current.metadata.namespace = None;

        let err = persist(&mock, &current, &observe(&current))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
