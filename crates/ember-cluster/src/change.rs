//! Change plans and their history.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::operation::ClusterConfigurationChangeOperation;

/// Returns wall-clock time in milliseconds since the unix epoch.
///
/// Change timestamps are compared across members, so this is wall time
/// rather than a process-local monotonic clock.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeStatus::InProgress => write!(f, "in-progress"),
            ChangeStatus::Completed => write!(f, "completed"),
            ChangeStatus::Failed => write!(f, "failed"),
            ChangeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An operation that has been applied, with the time it completed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletedOperation {
    pub operation: ClusterConfigurationChangeOperation,
    pub completed_at: u64,
}

/// Summary of the most recently finished change plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletedChange {
    pub id: u64,
    pub status: ChangeStatus,
    pub started_at: u64,
    pub completed_at: u64,
}

/// A change plan in progress.
///
/// Operations run strictly in order; only the head of
/// `pending_operations` may be applied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterChangePlan {
    /// Configuration version at which the plan was started.
    pub id: u64,
    /// Bumped each time an operation completes.
    pub version: u64,
    pub status: ChangeStatus,
    pub started_at: u64,
    pub completed_operations: Vec<CompletedOperation>,
    pub pending_operations: Vec<ClusterConfigurationChangeOperation>,
}

impl ClusterChangePlan {
    pub fn init(
        id: u64,
        operations: Vec<ClusterConfigurationChangeOperation>,
        started_at: u64,
    ) -> Self {
        Self {
            id,
            version: 0,
            status: ChangeStatus::InProgress,
            started_at,
            completed_operations: Vec::new(),
            pending_operations: operations,
        }
    }

    pub fn has_pending_operations(&self) -> bool {
        !self.pending_operations.is_empty()
    }

    /// Returns the operation that must be applied next.
    pub fn next_operation(&self) -> Option<&ClusterConfigurationChangeOperation> {
        self.pending_operations.first()
    }

    /// Marks the head operation as completed.
    pub fn advance(mut self, completed_at: u64) -> Self {
        if !self.pending_operations.is_empty() {
            let operation = self.pending_operations.remove(0);
            self.completed_operations.push(CompletedOperation {
                operation,
                completed_at,
            });
            self.version += 1;
        }
        self
    }

    /// Summarizes this plan as finished with `status`.
    pub fn finish(&self, status: ChangeStatus, completed_at: u64) -> CompletedChange {
        CompletedChange {
            id: self.id,
            status,
            started_at: self.started_at,
            completed_at,
        }
    }

    /// Merges two views of a plan: more progress wins, ties go to the
    /// greater value.
    pub fn merge(self, other: ClusterChangePlan) -> ClusterChangePlan {
        if (other.version, &other) > (self.version, &self) {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemberId;

    fn join(member: &str) -> ClusterConfigurationChangeOperation {
        ClusterConfigurationChangeOperation::MemberJoin {
            member_id: MemberId::from(member),
        }
    }

    #[test]
    fn advance_moves_head_to_completed() {
        let plan = ClusterChangePlan::init(2, vec![join("a"), join("b")], 100);
        assert_eq!(plan.next_operation(), Some(&join("a")));

        let plan = plan.advance(150);
        assert_eq!(plan.version, 1);
        assert_eq!(plan.next_operation(), Some(&join("b")));
        assert_eq!(
            plan.completed_operations,
            vec![CompletedOperation {
                operation: join("a"),
                completed_at: 150
            }]
        );

        let plan = plan.advance(200);
        assert!(!plan.has_pending_operations());
        assert_eq!(plan.version, 2);
    }

    #[test]
    fn advance_on_empty_plan_is_noop() {
        let plan = ClusterChangePlan::init(2, vec![], 100);
        assert_eq!(plan.clone().advance(10), plan);
    }

    #[test]
    fn merge_prefers_progress() {
        let plan = ClusterChangePlan::init(2, vec![join("a"), join("b")], 100);
        let advanced = plan.clone().advance(120);
        assert_eq!(plan.clone().merge(advanced.clone()), advanced);
        assert_eq!(advanced.clone().merge(plan), advanced);
    }

    #[test]
    fn finish_records_timing() {
        let plan = ClusterChangePlan::init(5, vec![join("a")], 100);
        let done = plan.finish(ChangeStatus::Cancelled, 300);
        assert_eq!(done.id, 5);
        assert_eq!(done.status, ChangeStatus::Cancelled);
        assert_eq!(done.started_at, 100);
        assert_eq!(done.completed_at, 300);
    }
}
