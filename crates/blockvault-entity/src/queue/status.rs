//! Queue task status and its forward-only transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use blockvault_core::error::AppError;

/// Status of a queue task.
///
/// Statuses only move forward: `Planned -> Wip -> Completed`, with
/// `Failed` reachable from either non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueTaskStatus {
    /// Waiting for a backup to be initiated.
    Planned,
    /// Backup initiated, waiting for the provider to finish it.
    Wip,
    /// Backup finished at the provider.
    Completed,
    /// Abandoned; never retried within the cohort.
    Failed,
}

impl QueueTaskStatus {
    /// Position in the lifecycle; terminal statuses share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Planned => 0,
            Self::Wip => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a task in this status may be moved to `next`.
    ///
    /// Staying in the same status is allowed so that other fields can be
    /// updated.
    pub fn can_transition_to(&self, next: QueueTaskStatus) -> bool {
        *self == next
            || matches!(
                (self, next),
                (Self::Planned, Self::Wip)
                    | (Self::Planned, Self::Failed)
                    | (Self::Wip, Self::Completed)
                    | (Self::Wip, Self::Failed)
            )
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Wip => "wip",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// All statuses in lifecycle order.
    pub fn all() -> [QueueTaskStatus; 4] {
        [Self::Planned, Self::Wip, Self::Completed, Self::Failed]
    }
}

impl fmt::Display for QueueTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueTaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "planned" => Ok(Self::Planned),
            "wip" => Ok(Self::Wip),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::validation(format!(
                "Unknown queue task status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use QueueTaskStatus::*;
        assert!(Planned.can_transition_to(Wip));
        assert!(Wip.can_transition_to(Completed));
        assert!(Planned.can_transition_to(Failed));
        assert!(Wip.can_transition_to(Failed));
        assert!(Wip.can_transition_to(Wip));
    }

    #[test]
    fn test_no_regression() {
        use QueueTaskStatus::*;
        for from in QueueTaskStatus::all() {
            for to in QueueTaskStatus::all() {
                if to.rank() < from.rank() {
                    assert!(!from.can_transition_to(to), "{from} -> {to}");
                }
            }
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Planned.can_transition_to(Completed));
    }

    #[test]
    fn test_parse() {
        assert_eq!("WIP".parse::<QueueTaskStatus>().expect("parse"), QueueTaskStatus::Wip);
        assert!("running".parse::<QueueTaskStatus>().is_err());
    }
}
