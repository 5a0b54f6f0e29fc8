// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

use chrono::{DateTime, Utc};
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::params::SearchParams;

/// Default number of concurrent registry connections suggested to a worker.
pub const DEFAULT_CONCURRENT_CONNECTIONS: u32 = 5;

/// Lifecycle of a download task.
///
/// Statuses are persisted as integer codes. Positive codes are live states,
/// zero is success and the negative range is the failure/cancellation
/// family, leaving space for new codes in between.
#[rustfmt::skip]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, IntoPrimitive, FromPrimitive, Serialize, Deserialize, ToSchema)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed  =     0,
    Pending    =  1000,
    Assigned   =  2000,
    InProgress =  3000,
    Failed     = -1000,
    Cancelled  = -3000,
    #[num_enum(default)]
    Corrupted  = -9999,
}

impl TaskStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// A held task is owned by exactly one worker.
    pub fn is_held(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Corrupted => "corrupted",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "completed" => Ok(TaskStatus::Completed),
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Download counters reported by a worker. Counters only ever grow over a
/// task's lifetime; a regression is rejected as a protocol violation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskCounters {
    pub downloaded: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl TaskCounters {
    pub fn regresses_from(&self, prev: &TaskCounters) -> bool {
        self.downloaded < prev.downloaded
            || self.failed < prev.failed
            || self.skipped < prev.skipped
    }
}

/// A unit of download work: fetch up to `max_documents` documents starting
/// at `start_page` with the given search parameters.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub search_params: SearchParams,
    pub start_page: u32,
    pub max_documents: u32,
    pub concurrent_connections: u32,
    /// The worker currently holding the task, when `assigned`/`in_progress`.
    pub client_id: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: TaskCounters,
    pub error_message: Option<String>,
    pub result_summary: Option<serde_json::Value>,
}

/// Parameters for inserting a fresh `pending` task. Duplicates are allowed;
/// re-running a query is an expected operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTask {
    pub search_params: SearchParams,
    pub start_page: u32,
    pub max_documents: u32,
    pub concurrent_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let code: i32 = status.into();
            assert_eq!(TaskStatus::from(code), status);
        }
        // Unknown codes collapse into the corruption marker.
        assert_eq!(TaskStatus::from(42), TaskStatus::Corrupted);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_parse_matches_display() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn counter_regression() {
        let prev = TaskCounters {
            downloaded: 10,
            failed: 2,
            skipped: 1,
        };
        let same = prev;
        let ahead = TaskCounters {
            downloaded: 12,
            ..prev
        };
        let behind = TaskCounters {
            downloaded: 9,
            ..prev
        };
        assert!(!same.regresses_from(&prev));
        assert!(!ahead.regresses_from(&prev));
        assert!(behind.regresses_from(&prev));
    }
}
