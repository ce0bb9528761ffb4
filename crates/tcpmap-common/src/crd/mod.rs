//! Custom Resource Definitions for tcpmap

mod mapping;
mod types;

pub use mapping::{
    reasons, BackendRef, ObjectRefSpec, TCPIngressMapping, TCPIngressMappingSpec,
    TCPIngressMappingStatus, READY_CONDITION,
};
pub use types::{set_condition, Condition, ConditionStatus};
