//! Shared status types following Kubernetes API conventions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or replace a condition keyed by its type.
///
/// An existing condition of the same type is replaced in place, so list order
/// is stable. Its `last_transition_time` is kept unless the status value
/// changed. Returns true if anything about the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            if *existing == condition {
                return false;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, type_: &str, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            last_transition_time: Utc.timestamp_opt(secs, 0).unwrap(),
            ..Condition::new(type_, status, reason, "msg")
        }
    }

    #[test]
    fn condition_status_display() {
        assert_eq!(ConditionStatus::True.to_string(), "True");
        assert_eq!(ConditionStatus::False.to_string(), "False");
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
    }

    #[test]
    fn set_condition_appends_new_type() {
        let mut conditions = vec![at(1, "Other", ConditionStatus::True, "X")];
        assert!(set_condition(
            &mut conditions,
            at(2, "Ready", ConditionStatus::True, "PortReady")
        ));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].type_, "Ready");
    }

    #[test]
    fn same_status_keeps_transition_time_and_position() {
        let mut conditions = vec![
            at(1, "Ready", ConditionStatus::False, "BackendServiceNotFound"),
            at(1, "Other", ConditionStatus::True, "X"),
        ];
        let changed = set_condition(
            &mut conditions,
            at(50, "Ready", ConditionStatus::False, "ConfigStoreNotFound"),
        );

        assert!(changed);
        assert_eq!(conditions[0].type_, "Ready");
        assert_eq!(conditions[0].reason, "ConfigStoreNotFound");
        assert_eq!(conditions[0].last_transition_time.timestamp(), 1);
    }

    #[test]
    fn status_flip_updates_transition_time() {
        let mut conditions = vec![at(1, "Ready", ConditionStatus::False, "NoPortElected")];
        set_condition(
            &mut conditions,
            at(50, "Ready", ConditionStatus::True, "PortReady"),
        );
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].last_transition_time.timestamp(), 50);
    }

    #[test]
    fn identical_condition_is_not_a_change() {
        let mut conditions = vec![at(1, "Ready", ConditionStatus::True, "PortReady")];
        assert!(!set_condition(
            &mut conditions,
            at(99, "Ready", ConditionStatus::True, "PortReady")
        ));
        assert_eq!(conditions[0].last_transition_time.timestamp(), 1);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let json = serde_json::to_value(at(0, "Ready", ConditionStatus::True, "PortReady"))
            .expect("condition should serialize");
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
