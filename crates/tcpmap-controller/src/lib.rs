//! Port election and registration engine for TCPIngressMapping resources
//!
//! - **allocator**: picks the lowest free port in the configured range
//! - **reference**: resolves `[namespace/]name` references with operator defaults
//! - **router**: maps backend Service changes to the mappings that use them
//! - **registration**: frontend port and proxy store writes against the latest object version
//! - **controller**: finalizer-guarded reconcile and cleanup
//! - **status**: Ready condition and observed generation persistence

pub mod allocator;
pub mod backoff;
pub mod client;
pub mod config;
pub mod controller;
pub mod reference;
pub mod registration;
pub mod router;
pub mod status;

pub(crate) use tcpmap_common::{crd, Error};
