// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

//! # Reyestr store gateway
//!
//! All persistent state of the dispatcher lives behind the [`Db`] trait:
//! tasks with their exclusive-assignment lifecycle, workers with their
//! liveness counters, registered documents with their classification, and
//! the per-(task, document) progress trail.
//!
//! Two backends implement the trait:
//! - [`pg::PgDb`] over a pooled PostgreSQL connection, the production
//!   store; every operation is a single short transaction or a single
//!   auto-committed statement, and every state transition is a conditional
//!   update gated on the current status so that transitions linearize
//!   through the store.
//! - [`mem_db::InMemoryDb`], a `HashMap` store behind one mutex, used by
//!   the test suites and `--dev` runs.
//!
//! The optional read-through cache lives in [`cache`]; it is a sidecar of
//! the read paths and never participates in correctness.

use chrono::{Duration, NaiveDate};
use serde_json::Value;
use uuid::Uuid;

use reyestr_lib::{
    Document, DocumentMeta, NewTask, ProgressStatus, SearchParams, Task, TaskCounters,
    TaskIndexBucket, TaskStatus, TasksSummary, Worker, WorkerActivity, WorkerStatistics,
};

pub mod cache;
pub mod mem_db;
pub mod pg;

pub use cache::{Cache, CacheTtl};
pub use mem_db::InMemoryDb;
pub use pg::PgDb;

// Types
// ----------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store corruption: {0}")]
    Corruption(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> DbError {
        match error {
            sqlx::Error::RowNotFound => DbError::NotFound("row"),
            sqlx::Error::PoolTimedOut => DbError::Timeout,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DbError::Unavailable(error.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Conflict(db.to_string())
            }
            other => DbError::Corruption(other.to_string()),
        }
    }
}

/// Reject a state-machine violation with a `Conflict`.
pub fn ensure(expression: bool, message: &str) -> DbResult<()> {
    if !expression {
        return Err(DbError::Conflict(message.to_string()));
    }
    Ok(())
}

/// Store configuration. Without a database URL the in-memory backend is
/// selected.
#[derive(Debug, Clone)]
pub struct DbOpts {
    pub database_url: Option<String>,
    pub pool_min: u32,
    pub pool_max: u32,
    pub acquire_timeout: std::time::Duration,
}

impl Default for DbOpts {
    fn default() -> Self {
        DbOpts {
            database_url: None,
            pool_min: 10,
            pool_max: 250,
            acquire_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// Registration input for a downloaded document.
#[derive(Debug, Clone, Default)]
pub struct RegisterDocument {
    pub meta: DocumentMeta,
    pub task_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    pub search_params: Option<SearchParams>,
}

/// Outcome of a document registration.
#[derive(Debug, Clone)]
pub struct RegisteredDocument {
    pub system_id: Uuid,
    pub classified: bool,
    pub classification: Option<reyestr_lib::Classification>,
    /// True when this call created the row.
    pub created: bool,
}

// The store trait
// ----------------------------------------------------------------

#[async_trait::async_trait]
pub trait Db: Send + Sync {
    // Tasks

    /// Insert a new `pending` task.
    async fn create_task(&self, new: NewTask) -> DbResult<Task>;

    /// Atomically claim the oldest `pending` task for `worker_id`. Two
    /// concurrent requesters never receive the same task; the loser gets
    /// `None` (as does everyone when the queue is empty).
    async fn request_task(&self, worker_id: Uuid) -> DbResult<Option<Task>>;

    /// Record a progress report. Only the holding worker may report;
    /// counters must not regress. The first report moves the task
    /// `assigned -> in_progress`.
    async fn report_progress(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
    ) -> DbResult<Task>;

    /// Finalize a held task and credit the worker's cumulative counters in
    /// the same transaction.
    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<Value>,
    ) -> DbResult<Task>;

    /// Fail a held task, record the error on the task and in the worker's
    /// recent-errors ring, and flip the worker to `error`.
    async fn fail_task(&self, task_id: Uuid, worker_id: Uuid, error_message: &str)
        -> DbResult<Task>;

    /// Cancel any non-terminal task (admin operation).
    async fn cancel_task(&self, task_id: Uuid) -> DbResult<Task>;

    async fn get_task(&self, task_id: Uuid) -> DbResult<Option<Task>>;

    /// Global per-status summary plus the newest tasks, optionally filtered
    /// by status.
    async fn list_tasks(
        &self,
        status_filter: Option<TaskStatus>,
        limit: usize,
    ) -> DbResult<(TasksSummary, Vec<Task>)>;

    /// Group all tasks by (court region, instance type, date range).
    async fn task_indexes(&self) -> DbResult<Vec<TaskIndexBucket>>;

    /// Tasks of one index bucket.
    async fn tasks_by_index(
        &self,
        court_region: Option<&str>,
        instance_type: Option<&str>,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> DbResult<Vec<Task>>;

    /// Return held tasks whose worker has not heartbeat within
    /// `stalled_after` to `pending`. Reclamation is not a failure and the
    /// previous holder is not penalized.
    async fn reclaim_stalled(&self, stalled_after: Duration) -> DbResult<Vec<Uuid>>;

    // Workers

    /// Register a worker, reusing the row when name and secret match,
    /// generating a fresh secret otherwise (unless one is supplied).
    async fn register_worker(
        &self,
        name: &str,
        host: Option<&str>,
        api_key: Option<&str>,
    ) -> DbResult<Worker>;

    /// Refresh liveness; forces `active` and never moves the heartbeat
    /// backwards.
    async fn heartbeat(&self, worker_id: Uuid) -> DbResult<()>;

    async fn find_worker_by_key(&self, api_key: &str) -> DbResult<Option<Worker>>;

    async fn get_worker(&self, worker_id: Uuid) -> DbResult<Option<Worker>>;

    async fn list_workers(&self) -> DbResult<Vec<Worker>>;

    /// Flip `active` workers without a heartbeat within `inactive_after` to
    /// `inactive`. Task assignments are untouched; reclamation is separate.
    async fn mark_inactive(&self, inactive_after: Duration) -> DbResult<Vec<Uuid>>;

    async fn worker_statistics(&self, worker_id: Uuid) -> DbResult<WorkerStatistics>;

    async fn worker_activity(&self, worker_id: Uuid) -> DbResult<WorkerActivity>;

    // Documents

    /// Idempotent registration keyed on the external id: first call creates
    /// the row under a fresh system id, later calls fill missing fields and
    /// never overwrite stored values. Classification runs in the same
    /// transaction.
    async fn register_document(&self, reg: RegisterDocument) -> DbResult<RegisteredDocument>;

    async fn get_document(&self, system_id: Uuid) -> DbResult<Option<Document>>;

    /// Open (or reset) the progress record for a (task, document) pair.
    async fn open_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        reg_number: Option<&str>,
        worker_id: Uuid,
    ) -> DbResult<()>;

    /// Close a progress record with its final status.
    async fn close_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        status: ProgressStatus,
    ) -> DbResult<()>;

    // Sweeps

    /// Take the named sweep lease for `ttl`. Returns false while another
    /// instance holds it.
    async fn try_sweep_lease(&self, name: &str, ttl: Duration) -> DbResult<bool>;
}

// Backend selection
// ----------------------------------------------------------------

enum DbInstance {
    Postgres(PgDb),
    InMemory(InMemoryDb),
}

pub struct DbWrapper {
    inner: DbInstance,
}

impl Clone for DbWrapper {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            DbInstance::Postgres(db) => DbInstance::Postgres(db.clone()),
            DbInstance::InMemory(db) => DbInstance::InMemory(db.clone()),
        };
        DbWrapper { inner }
    }
}

impl DbWrapper {
    fn backend(&self) -> &dyn Db {
        match &self.inner {
            DbInstance::Postgres(db) => db,
            DbInstance::InMemory(db) => db,
        }
    }
}

#[async_trait::async_trait]
impl Db for DbWrapper {
    async fn create_task(&self, new: NewTask) -> DbResult<Task> {
        self.backend().create_task(new).await
    }

    async fn request_task(&self, worker_id: Uuid) -> DbResult<Option<Task>> {
        self.backend().request_task(worker_id).await
    }

    async fn report_progress(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
    ) -> DbResult<Task> {
        self.backend()
            .report_progress(task_id, worker_id, counters)
            .await
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<Value>,
    ) -> DbResult<Task> {
        self.backend()
            .complete_task(task_id, worker_id, counters, result_summary)
            .await
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        error_message: &str,
    ) -> DbResult<Task> {
        self.backend()
            .fail_task(task_id, worker_id, error_message)
            .await
    }

    async fn cancel_task(&self, task_id: Uuid) -> DbResult<Task> {
        self.backend().cancel_task(task_id).await
    }

    async fn get_task(&self, task_id: Uuid) -> DbResult<Option<Task>> {
        self.backend().get_task(task_id).await
    }

    async fn list_tasks(
        &self,
        status_filter: Option<TaskStatus>,
        limit: usize,
    ) -> DbResult<(TasksSummary, Vec<Task>)> {
        self.backend().list_tasks(status_filter, limit).await
    }

    async fn task_indexes(&self) -> DbResult<Vec<TaskIndexBucket>> {
        self.backend().task_indexes().await
    }

    async fn tasks_by_index(
        &self,
        court_region: Option<&str>,
        instance_type: Option<&str>,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> DbResult<Vec<Task>> {
        self.backend()
            .tasks_by_index(court_region, instance_type, date_start, date_end)
            .await
    }

    async fn reclaim_stalled(&self, stalled_after: Duration) -> DbResult<Vec<Uuid>> {
        self.backend().reclaim_stalled(stalled_after).await
    }

    async fn register_worker(
        &self,
        name: &str,
        host: Option<&str>,
        api_key: Option<&str>,
    ) -> DbResult<Worker> {
        self.backend().register_worker(name, host, api_key).await
    }

    async fn heartbeat(&self, worker_id: Uuid) -> DbResult<()> {
        self.backend().heartbeat(worker_id).await
    }

    async fn find_worker_by_key(&self, api_key: &str) -> DbResult<Option<Worker>> {
        self.backend().find_worker_by_key(api_key).await
    }

    async fn get_worker(&self, worker_id: Uuid) -> DbResult<Option<Worker>> {
        self.backend().get_worker(worker_id).await
    }

    async fn list_workers(&self) -> DbResult<Vec<Worker>> {
        self.backend().list_workers().await
    }

    async fn mark_inactive(&self, inactive_after: Duration) -> DbResult<Vec<Uuid>> {
        self.backend().mark_inactive(inactive_after).await
    }

    async fn worker_statistics(&self, worker_id: Uuid) -> DbResult<WorkerStatistics> {
        self.backend().worker_statistics(worker_id).await
    }

    async fn worker_activity(&self, worker_id: Uuid) -> DbResult<WorkerActivity> {
        self.backend().worker_activity(worker_id).await
    }

    async fn register_document(&self, reg: RegisterDocument) -> DbResult<RegisteredDocument> {
        self.backend().register_document(reg).await
    }

    async fn get_document(&self, system_id: Uuid) -> DbResult<Option<Document>> {
        self.backend().get_document(system_id).await
    }

    async fn open_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        reg_number: Option<&str>,
        worker_id: Uuid,
    ) -> DbResult<()> {
        self.backend()
            .open_progress(task_id, external_id, reg_number, worker_id)
            .await
    }

    async fn close_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        status: ProgressStatus,
    ) -> DbResult<()> {
        self.backend()
            .close_progress(task_id, external_id, status)
            .await
    }

    async fn try_sweep_lease(&self, name: &str, ttl: Duration) -> DbResult<bool> {
        self.backend().try_sweep_lease(name, ttl).await
    }
}

/// Connect the backend selected by `opts`: PostgreSQL when a database URL
/// is configured, the in-memory store otherwise.
pub async fn get_db(opts: &DbOpts) -> DbResult<DbWrapper> {
    let inner = match &opts.database_url {
        Some(url) => DbInstance::Postgres(PgDb::connect(url, opts).await?),
        None => DbInstance::InMemory(InMemoryDb::new()),
    };
    Ok(DbWrapper { inner })
}

/// Generate a fresh worker secret.
pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    format!("reyestr_{}", hex::encode(bytes))
}
