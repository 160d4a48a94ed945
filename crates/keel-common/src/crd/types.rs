//! Shared status types for keel CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type set by the lifecycle controller while an object's
/// reconciler is succeeding.
pub const ACTIVE_CONDITION: &str = "Active";

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition state is not known
    #[default]
    Unknown,
}

/// A single observed condition on a target object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Active)
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

/// Objects whose status carries a condition list
pub trait Conditioned {
    /// Mutable access to the condition list, creating status if absent
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Upsert a condition by type. The transition timestamp is only refreshed
/// when the status actually changes.
pub fn set_condition(conditions: &mut Vec<Condition>, next: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == next.type_) {
        if existing.status == next.status {
            existing.reason = next.reason;
            existing.message = next.message;
        } else {
            *existing = next;
        }
    } else {
        conditions.push(next);
    }
}

/// Mark a condition true with no message
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set_condition(
        conditions,
        Condition::new(type_, ConditionStatus::True, "Reconciled", ""),
    );
}

/// Mark a condition false, carrying the failure message
pub fn mark_false(conditions: &mut Vec<Condition>, type_: &str, message: &str) {
    set_condition(
        conditions,
        Condition::new(type_, ConditionStatus::False, "ReconcileFailed", message),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_are_deduplicated_by_type() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, ACTIVE_CONDITION, "network not ready");
        mark_false(&mut conditions, ACTIVE_CONDITION, "fleet not ready");
        mark_true(&mut conditions, ACTIVE_CONDITION);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn transition_time_is_kept_when_status_unchanged() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, ACTIVE_CONDITION, "first");
        let first = conditions[0].last_transition_time;
        mark_false(&mut conditions, ACTIVE_CONDITION, "second");
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].message, "second");
    }
}
