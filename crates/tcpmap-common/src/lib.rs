//! Common types for tcpmap: the TCPIngressMapping CRD, errors, events and logging

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher};

/// Finalizer guarding a TCPIngressMapping until its port registrations are removed
pub const MAPPING_FINALIZER: &str = "finalizer.infra.doodle.com";

/// Field manager / reporting component name used for all writes
pub const CONTROLLER_NAME: &str = "tcpmap-controller";
