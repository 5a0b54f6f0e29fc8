// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

//! Derived aggregate shapes served to dashboards, recomputed on read.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::task::Task;
use crate::worker::WorkerStatus;

/// Upper bound of the recent-errors ring kept per worker.
pub const RECENT_ERRORS_LIMIT: usize = 10;

/// Task totals per status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TasksSummary {
    pub total: i64,
    pub pending: i64,
    pub assigned: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// One (court region, instance type, date range) bucket of the task map the
/// admin UI paginates through.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskIndexBucket {
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub totals: TasksSummary,
}

/// Per-worker statistics over its tasks and registered documents.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkerStatistics {
    pub worker_id: Uuid,
    pub tasks: TasksSummary,
    /// Sums over the worker's completed tasks.
    pub documents_downloaded: i64,
    pub documents_failed: i64,
    pub documents_skipped: i64,
    pub first_task_at: Option<DateTime<Utc>>,
    pub last_task_at: Option<DateTime<Utc>>,
    /// Distinct counts over the worker's registered documents.
    pub distinct_regions: i64,
    pub distinct_instance_types: i64,
    pub distinct_case_types: i64,
    pub classified_documents: i64,
}

/// Stats for the activity window since the worker last became active.
#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionStats {
    pub since: Option<DateTime<Utc>>,
    pub tasks_completed: i64,
    pub documents_downloaded: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
pub struct LifetimeStats {
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub documents_downloaded: i64,
    pub documents_registered: i64,
}

/// The task a worker is currently holding, with live throughput figures.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentTaskActivity {
    pub task: Task,
    /// Completed documents per second, undefined until one download
    /// completed.
    pub throughput: Option<f64>,
    pub eta_seconds: Option<f64>,
}

/// Live snapshot of a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkerActivity {
    pub worker_id: Uuid,
    pub status: WorkerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_task: Option<CurrentTaskActivity>,
    pub session: SessionStats,
    pub lifetime: LifetimeStats,
    pub recent_errors: Vec<String>,
}

/// Completed documents per second over `elapsed`. Undefined until at least
/// one document has completed.
pub fn throughput(completed: u64, elapsed: chrono::Duration) -> Option<f64> {
    if completed == 0 {
        return None;
    }
    let secs = elapsed.num_microseconds()? as f64 / 1_000_000.0;
    if secs <= 0.0 {
        return None;
    }
    Some(completed as f64 / secs)
}

/// Remaining seconds at the observed throughput.
pub fn eta_seconds(remaining: u64, throughput: f64) -> Option<f64> {
    if throughput <= 0.0 {
        return None;
    }
    Some(remaining as f64 / throughput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_undefined_without_completions() {
        assert!(throughput(0, chrono::Duration::seconds(60)).is_none());
        assert!(throughput(5, chrono::Duration::zero()).is_none());
    }

    #[test]
    fn throughput_and_eta() {
        let rate = throughput(30, chrono::Duration::seconds(60)).unwrap();
        assert!((rate - 0.5).abs() < f64::EPSILON);
        let eta = eta_seconds(70, rate).unwrap();
        assert!((eta - 140.0).abs() < f64::EPSILON);
    }

    #[test]
    fn eta_undefined_at_zero_rate() {
        assert!(eta_seconds(10, 0.0).is_none());
    }
}
