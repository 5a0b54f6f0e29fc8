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

/// Liveness of a registered worker, persisted as an integer code.
#[rustfmt::skip]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, IntoPrimitive, FromPrimitive, Serialize, Deserialize, ToSchema)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active   =     0,
    Inactive =  1000,
    #[num_enum(default)]
    Error    = -1000,
}

/// A remote download process registered with the dispatcher.
///
/// The shared secret authenticates the worker and is never serialized into
/// API responses; registration returns it through a dedicated field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub host: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub status: WorkerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Start of the current activity window, reset on every
    /// `inactive -> active` transition.
    pub session_started_at: Option<DateTime<Utc>>,
    pub total_tasks_completed: i64,
    pub total_tasks_failed: i64,
    /// Sum of `documents_downloaded` over this worker's completed tasks.
    pub total_documents_downloaded: i64,
    /// Count of documents first registered by this worker.
    pub total_documents_registered: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            WorkerStatus::Active,
            WorkerStatus::Inactive,
            WorkerStatus::Error,
        ] {
            let code: i32 = status.into();
            assert_eq!(WorkerStatus::from(code), status);
        }
    }

    #[test]
    fn api_key_is_never_serialized() {
        let worker = Worker {
            id: Uuid::nil(),
            name: "scraper-1".to_owned(),
            host: None,
            api_key: Some("reyestr_secret".to_owned()),
            status: WorkerStatus::Active,
            last_heartbeat: None,
            session_started_at: None,
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            total_documents_downloaded: 0,
            total_documents_registered: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&worker).unwrap();
        assert!(value.get("api_key").is_none());
    }
}
