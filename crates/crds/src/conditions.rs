//! Status conditions
//!
//! Kubernetes-style conditions carried in `StaticSiteStatus.conditions`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Overall readiness of the site
pub const CONDITION_READY: &str = "Ready";
/// Content has been synced at least once
pub const CONDITION_SYNCED: &str = "Synced";
/// Routing and rewrite resources are applied
pub const CONDITION_INGRESS_READY: &str = "IngressReady";
/// Mirrors the shared certificate's Ready condition
pub const CONDITION_CERTIFICATE_READY: &str = "CertificateReady";

/// Condition represents one observation about a site
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition cannot be determined
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Parses the status string used by upstream resources (e.g. cert-manager)
    pub fn parse(raw: &str) -> Self {
        match raw {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }

    /// Build a status from a boolean
    pub fn from_bool(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

impl Condition {
    /// Creates a condition without a transition time
    pub fn new(
        r#type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status,
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: None,
        }
    }
}

/// Inserts or replaces `condition` in `conditions`.
///
/// The transition time is carried over from the existing condition of the
/// same type when the status did not change, otherwise it is set to `now`.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: &str) {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(now.to_string())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now.to_string());
            conditions.push(condition);
        }
    }
}

/// Looks up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "Configured", "ok"),
            "2024-01-01T00:00:00Z",
        );
        set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "Configured", "still ok"),
            "2024-01-02T00:00:00Z",
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message.as_deref(), Some("still ok"));
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_set_condition_updates_transition_time_on_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "Configured", "ok"),
            "2024-01-01T00:00:00Z",
        );
        set_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::False, "Failed", "boom"),
            "2024-01-02T00:00:00Z",
        );

        let ready = find_condition(&conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.last_transition_time.as_deref(), Some("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(ConditionStatus::parse("True"), ConditionStatus::True);
        assert_eq!(ConditionStatus::parse("False"), ConditionStatus::False);
        assert_eq!(ConditionStatus::parse("weird"), ConditionStatus::Unknown);
    }
}
