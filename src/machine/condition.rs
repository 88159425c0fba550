//! Conditions: the engine's primary observable output.
//!
//! A condition is `(type, status, severity, reason, message,
//! last_transition_time)` attached to a declarative object. Within one
//! reconcile the set is monotone: a phase marked True stays True even when
//! a later phase fails; only explicit re-runs or resource deletion revert
//! bits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// OS preparation finished
    Bootstrapped,
    /// Package repository usable, prerequisite packages installed
    RepositoryReady,
    /// Cluster binaries downloaded and placed
    BinariesReady,
    /// Container runtime present
    CriReady,
    /// Bootstrap payload executed
    Provisioned,
    /// Deletion-time cleanup finished
    DeletingBootstrap,
    /// The machine converged
    Ready,
    /// Per-machine: the node agent is healthy
    MachineAgentHealthy,
    /// Per-machine: the datastore member is healthy
    MachineEtcdMemberHealthy,
    /// Cluster aggregate of agent health
    ControlPlaneComponentsHealthy,
    /// Cluster aggregate of datastore-member health
    EtcdClusterHealthy,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Bootstrapped => "Bootstrapped",
            ConditionType::RepositoryReady => "RepositoryReady",
            ConditionType::BinariesReady => "BinariesReady",
            ConditionType::CriReady => "CRIReady",
            ConditionType::Provisioned => "Provisioned",
            ConditionType::DeletingBootstrap => "DeletingBootstrap",
            ConditionType::Ready => "Ready",
            ConditionType::MachineAgentHealthy => "MachineAgentHealthy",
            ConditionType::MachineEtcdMemberHealthy => "MachineEtcdMemberHealthy",
            ConditionType::ControlPlaneComponentsHealthy => "ControlPlaneComponentsHealthy",
            ConditionType::EtcdClusterHealthy => "EtcdClusterHealthy",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// How severe a False condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One condition entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// The condition set of one declarative object.
///
/// `last_transition_time` only moves when the status itself changes;
/// re-marking a True condition True is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    entries: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `condition_type`, if ever written.
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.entries
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Whether `condition_type` is currently True.
    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        matches!(
            self.get(condition_type),
            Some(Condition {
                status: ConditionStatus::True,
                ..
            })
        )
    }

    /// Whether `condition_type` has ever been written.
    pub fn has(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type).is_some()
    }

    /// All entries, in first-written order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter()
    }

    /// Mark `condition_type` True.
    pub fn mark_true(&mut self, condition_type: ConditionType) {
        self.upsert(Condition {
            condition_type,
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: String::new(),
            last_transition_time: Utc::now(),
        });
    }

    /// Mark `condition_type` False with a stable reason code.
    pub fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.upsert(Condition {
            condition_type,
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: message.into(),
            last_transition_time: Utc::now(),
        });
    }

    /// Mark `condition_type` Unknown.
    pub fn mark_unknown(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        message: impl Into<String>,
    ) {
        self.upsert(Condition {
            condition_type,
            status: ConditionStatus::Unknown,
            severity: None,
            reason: Some(reason.to_string()),
            message: message.into(),
            last_transition_time: Utc::now(),
        });
    }

    /// Remove the entry for `condition_type` (explicit re-run).
    pub fn clear(&mut self, condition_type: ConditionType) {
        self.entries.retain(|c| c.condition_type != condition_type);
    }

    fn upsert(&mut self, mut condition: Condition) {
        match self
            .entries
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.entries.push(condition),
        }
    }
}

/// Aggregate a group of conditions to one (status, severity) pair.
///
/// Errors dominate warnings, warnings dominate info, info dominates true,
/// true dominates unknown. Returns `None` when no input carries the
/// condition at all.
pub fn aggregate<'a>(
    conditions: impl IntoIterator<Item = &'a Condition>,
) -> Option<(ConditionStatus, Option<Severity>)> {
    let mut any = false;
    let (mut errors, mut warnings, mut infos, mut trues) = (0, 0, 0, 0);
    for condition in conditions {
        any = true;
        match condition.status {
            ConditionStatus::True => trues += 1,
            ConditionStatus::Unknown => {}
            ConditionStatus::False => match condition.severity {
                Some(Severity::Error) => errors += 1,
                Some(Severity::Warning) => warnings += 1,
                _ => infos += 1,
            },
        }
    }
    if !any {
        return None;
    }
    Some(if errors > 0 {
        (ConditionStatus::False, Some(Severity::Error))
    } else if warnings > 0 {
        (ConditionStatus::False, Some(Severity::Warning))
    } else if infos > 0 {
        (ConditionStatus::False, Some(Severity::Info))
    } else if trues > 0 {
        (ConditionStatus::True, None)
    } else {
        (ConditionStatus::Unknown, None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: ConditionStatus, severity: Option<Severity>) -> Condition {
        Condition {
            condition_type: ConditionType::MachineAgentHealthy,
            status,
            severity,
            reason: None,
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    #[test]
    fn test_mark_true_then_lookup() {
        let mut conditions = Conditions::new();
        assert!(!conditions.is_true(ConditionType::Bootstrapped));
        conditions.mark_true(ConditionType::Bootstrapped);
        assert!(conditions.is_true(ConditionType::Bootstrapped));
    }

    #[test]
    fn test_remark_true_keeps_transition_time() {
        let mut conditions = Conditions::new();
        conditions.mark_true(ConditionType::Bootstrapped);
        let first = conditions.get(ConditionType::Bootstrapped).unwrap().clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        conditions.mark_true(ConditionType::Bootstrapped);
        let second = conditions.get(ConditionType::Bootstrapped).unwrap();
        assert_eq!(first.last_transition_time, second.last_transition_time);
    }

    #[test]
    fn test_status_change_moves_transition_time() {
        let mut conditions = Conditions::new();
        conditions.mark_true(ConditionType::BinariesReady);
        let first = conditions.get(ConditionType::BinariesReady).unwrap().clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        conditions.mark_false(
            ConditionType::BinariesReady,
            "GetBinaryFailed",
            Severity::Error,
            "404 Not Found",
        );
        let second = conditions.get(ConditionType::BinariesReady).unwrap();
        assert_ne!(first.last_transition_time, second.last_transition_time);
        assert_eq!(second.severity, Some(Severity::Error));
        assert_eq!(second.reason.as_deref(), Some("GetBinaryFailed"));
    }

    #[test]
    fn test_later_failure_does_not_revert_earlier_bit() {
        let mut conditions = Conditions::new();
        conditions.mark_true(ConditionType::Bootstrapped);
        conditions.mark_false(
            ConditionType::BinariesReady,
            "GetBinaryFailed",
            Severity::Error,
            "404",
        );
        assert!(conditions.is_true(ConditionType::Bootstrapped));
    }

    #[test]
    fn test_aggregate_all_true() {
        let set = vec![entry(ConditionStatus::True, None); 3];
        assert_eq!(aggregate(&set), Some((ConditionStatus::True, None)));
    }

    #[test]
    fn test_aggregate_error_dominates() {
        let set = vec![
            entry(ConditionStatus::True, None),
            entry(ConditionStatus::False, Some(Severity::Warning)),
            entry(ConditionStatus::False, Some(Severity::Error)),
            entry(ConditionStatus::Unknown, None),
        ];
        assert_eq!(
            aggregate(&set),
            Some((ConditionStatus::False, Some(Severity::Error)))
        );
    }

    #[test]
    fn test_aggregate_warning_dominates_info() {
        let set = vec![
            entry(ConditionStatus::False, Some(Severity::Info)),
            entry(ConditionStatus::False, Some(Severity::Warning)),
        ];
        assert_eq!(
            aggregate(&set),
            Some((ConditionStatus::False, Some(Severity::Warning)))
        );
    }

    #[test]
    fn test_aggregate_info_dominates_true() {
        let set = vec![
            entry(ConditionStatus::True, None),
            entry(ConditionStatus::False, Some(Severity::Info)),
        ];
        assert_eq!(
            aggregate(&set),
            Some((ConditionStatus::False, Some(Severity::Info)))
        );
    }

    #[test]
    fn test_aggregate_all_unknown() {
        let set = vec![entry(ConditionStatus::Unknown, None); 2];
        assert_eq!(aggregate(&set), Some((ConditionStatus::Unknown, None)));
    }

    #[test]
    fn test_aggregate_empty_is_none() {
        assert_eq!(aggregate(std::iter::empty::<&Condition>()), None);
    }
}
