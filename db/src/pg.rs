// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

//! PostgreSQL backend.
//!
//! Every operation runs as one short transaction or one auto-committed
//! statement. State transitions are conditional updates gated on the
//! current status and holder, so concurrent callers serialize through the
//! store; the task claim additionally uses `FOR UPDATE SKIP LOCKED` so that
//! contending workers never block on, or receive, the same row.

// Imports
// ----------------------------------------------------------------
use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use reyestr_lib::{
    classify, eta_seconds, throughput, ClassificationSource, CurrentTaskActivity, Document,
    LifetimeStats, NewTask, ProgressStatus, SessionStats, Task, TaskCounters, TaskIndexBucket,
    TaskStatus, TasksSummary, Worker, WorkerActivity, WorkerStatistics, WorkerStatus,
    RECENT_ERRORS_LIMIT,
};

use crate::{
    generate_api_key, Db, DbError, DbOpts, DbResult, RegisterDocument, RegisteredDocument,
};

#[derive(Debug, Clone)]
pub struct PgDb {
    pool: PgPool,
}

// Row mapping
// ----------------------------------------------------------------

fn task_from_row(row: &PgRow) -> DbResult<Task> {
    let status_code: i32 = row.try_get("status")?;
    let params: Value = row.try_get("search_params")?;
    Ok(Task {
        id: row.try_get("id")?,
        search_params: serde_json::from_value(params)?,
        start_page: row.try_get::<i32, _>("start_page")? as u32,
        max_documents: row.try_get::<i32, _>("max_documents")? as u32,
        concurrent_connections: row.try_get::<i32, _>("concurrent_connections")? as u32,
        client_id: row.try_get("client_id")?,
        status: TaskStatus::from(status_code),
        created_at: row.try_get("created_at")?,
        assigned_at: row.try_get("assigned_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        counters: TaskCounters {
            downloaded: row.try_get("documents_downloaded")?,
            failed: row.try_get("documents_failed")?,
            skipped: row.try_get("documents_skipped")?,
        },
        error_message: row.try_get("error_message")?,
        result_summary: row.try_get("result_summary")?,
    })
}

fn worker_from_row(row: &PgRow) -> DbResult<Worker> {
    let status_code: i32 = row.try_get("status")?;
    Ok(Worker {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        api_key: row.try_get("api_key")?,
        status: WorkerStatus::from(status_code),
        last_heartbeat: row.try_get("last_heartbeat")?,
        session_started_at: row.try_get("session_started_at")?,
        total_tasks_completed: row.try_get("total_tasks_completed")?,
        total_tasks_failed: row.try_get("total_tasks_failed")?,
        total_documents_downloaded: row.try_get("total_documents_downloaded")?,
        total_documents_registered: row.try_get("total_documents_registered")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn document_from_row(row: &PgRow) -> DbResult<Document> {
    let source: String = row.try_get("classification_source")?;
    Ok(Document {
        system_id: row.try_get("system_id")?,
        external_id: row.try_get("external_id")?,
        reg_number: row.try_get("reg_number")?,
        url_path: row.try_get("url_path")?,
        decision_type: row.try_get("decision_type")?,
        decision_date: row.try_get("decision_date")?,
        law_date: row.try_get("law_date")?,
        case_type: row.try_get("case_type")?,
        case_number: row.try_get("case_number")?,
        court_name: row.try_get("court_name")?,
        judge_name: row.try_get("judge_name")?,
        court_region: row.try_get("court_region")?,
        instance_type: row.try_get("instance_type")?,
        classification_source: ClassificationSource::parse(&source),
        classification_date: row.try_get("classification_date")?,
        client_id: row.try_get("client_id")?,
        task_id: row.try_get("task_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn summary_from_row(row: &PgRow) -> DbResult<TasksSummary> {
    Ok(TasksSummary {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        assigned: row.try_get("assigned")?,
        in_progress: row.try_get("in_progress")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        cancelled: row.try_get("cancelled")?,
    })
}

const SUMMARY_SQL: &str = r#"
    SELECT
        count(*) AS total,
        count(*) FILTER (WHERE status = 1000) AS pending,
        count(*) FILTER (WHERE status = 2000) AS assigned,
        count(*) FILTER (WHERE status = 3000) AS in_progress,
        count(*) FILTER (WHERE status = 0) AS completed,
        count(*) FILTER (WHERE status = -1000) AS failed,
        count(*) FILTER (WHERE status = -3000) AS cancelled
    FROM tasks
"#;

/// Explain why a held-task update matched no row.
async fn held_task_rejection(
    conn: &mut PgConnection,
    task_id: Uuid,
    worker_id: Uuid,
    counters: Option<&TaskCounters>,
) -> DbError {
    let row = match sqlx::query("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await
    {
        Ok(Some(row)) => row,
        Ok(None) => return DbError::NotFound("task"),
        Err(error) => return error.into(),
    };
    let task = match task_from_row(&row) {
        Ok(task) => task,
        Err(error) => return error,
    };
    if !task.status.is_held() || task.client_id != Some(worker_id) {
        return DbError::Conflict("task not held by worker".to_string());
    }
    if counters.is_some_and(|counters| counters.regresses_from(&task.counters)) {
        return DbError::Conflict("progress counters regressed".to_string());
    }
    DbError::Conflict("task transition rejected".to_string())
}

impl PgDb {
    /// Connect the pool and bring the schema up to date.
    pub async fn connect(url: &str, opts: &DbOpts) -> DbResult<Self> {
        let connect_options = PgConnectOptions::from_str(url)
            .map_err(|error| DbError::Unavailable(error.to_string()))?;

        let pool = PgPoolOptions::new()
            .min_connections(opts.pool_min)
            .max_connections(opts.pool_max)
            .acquire_timeout(opts.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|error| DbError::Unavailable(error.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|error| DbError::Unavailable(error.to_string()))?;

        info!(
            "Connected task store (pool {}..{})",
            opts.pool_min, opts.pool_max
        );
        Ok(PgDb { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Db for PgDb {
    // Tasks
    // ----------------------------------------------------------------

    async fn create_task(&self, new: NewTask) -> DbResult<Task> {
        let (date_start, date_end) = match new.search_params.date_range() {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None, None),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, search_params, start_page, max_documents, concurrent_connections,
                status, court_region, instance_type, date_start, date_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(serde_json::to_value(&new.search_params)?)
        .bind(new.start_page as i32)
        .bind(new.max_documents as i32)
        .bind(new.concurrent_connections as i32)
        .bind(i32::from(TaskStatus::Pending))
        .bind(new.search_params.court_region.as_deref())
        .bind(new.search_params.ins_type.as_deref())
        .bind(date_start)
        .bind(date_end)
        .fetch_one(&self.pool)
        .await?;

        task_from_row(&row)
    }

    async fn request_task(&self, worker_id: Uuid) -> DbResult<Option<Task>> {
        let known = sqlx::query("SELECT 1 FROM workers WHERE id = $1")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        if known.is_none() {
            return Err(DbError::NotFound("worker"));
        }

        // One atomic claim; SKIP LOCKED keeps contending workers from ever
        // observing the same pending row.
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, client_id = $2, assigned_at = now()
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = $3
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(i32::from(TaskStatus::Assigned))
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Pending))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn report_progress(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
    ) -> DbResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                started_at = COALESCE(started_at, now()),
                documents_downloaded = $2,
                documents_failed = $3,
                documents_skipped = $4
            WHERE id = $5 AND client_id = $6 AND status IN ($7, $1)
              AND documents_downloaded <= $2
              AND documents_failed <= $3
              AND documents_skipped <= $4
            RETURNING *
            "#,
        )
        .bind(i32::from(TaskStatus::InProgress))
        .bind(counters.downloaded)
        .bind(counters.failed)
        .bind(counters.skipped)
        .bind(task_id)
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Assigned))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let rejection =
                held_task_rejection(&mut *tx, task_id, worker_id, Some(&counters)).await;
            tx.rollback().await.ok();
            return Err(rejection);
        };

        let task = task_from_row(&row)?;
        tx.commit().await?;
        Ok(task)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<Value>,
    ) -> DbResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                completed_at = now(),
                documents_downloaded = $2,
                documents_failed = $3,
                documents_skipped = $4,
                result_summary = $5
            WHERE id = $6 AND client_id = $7 AND status IN ($8, $9)
            RETURNING *
            "#,
        )
        .bind(i32::from(TaskStatus::Completed))
        .bind(counters.downloaded)
        .bind(counters.failed)
        .bind(counters.skipped)
        .bind(result_summary)
        .bind(task_id)
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Assigned))
        .bind(i32::from(TaskStatus::InProgress))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let rejection = held_task_rejection(&mut *tx, task_id, worker_id, None).await;
            tx.rollback().await.ok();
            return Err(rejection);
        };
        let task = task_from_row(&row)?;

        // Worker counters move in the same transaction as the transition.
        sqlx::query(
            r#"
            UPDATE workers
            SET total_tasks_completed = total_tasks_completed + 1,
                total_documents_downloaded = total_documents_downloaded + $1,
                updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(counters.downloaded)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        error_message: &str,
    ) -> DbResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, completed_at = now(), error_message = $2
            WHERE id = $3 AND client_id = $4 AND status IN ($5, $6)
            RETURNING *
            "#,
        )
        .bind(i32::from(TaskStatus::Failed))
        .bind(error_message)
        .bind(task_id)
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Assigned))
        .bind(i32::from(TaskStatus::InProgress))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let rejection = held_task_rejection(&mut *tx, task_id, worker_id, None).await;
            tx.rollback().await.ok();
            return Err(rejection);
        };
        let task = task_from_row(&row)?;

        sqlx::query(
            r#"
            UPDATE workers
            SET total_tasks_failed = total_tasks_failed + 1, status = $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(i32::from(WorkerStatus::Error))
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO worker_errors (worker_id, message) VALUES ($1, $2)")
            .bind(worker_id)
            .bind(error_message)
            .execute(&mut *tx)
            .await?;
        // Keep the ring bounded.
        sqlx::query(
            r#"
            DELETE FROM worker_errors
            WHERE worker_id = $1 AND id NOT IN (
                SELECT id FROM worker_errors
                WHERE worker_id = $1
                ORDER BY id DESC
                LIMIT $2
            )
            "#,
        )
        .bind(worker_id)
        .bind(RECENT_ERRORS_LIMIT as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn cancel_task(&self, task_id: Uuid) -> DbResult<Task> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, completed_at = now()
            WHERE id = $2 AND status IN ($3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(i32::from(TaskStatus::Cancelled))
        .bind(task_id)
        .bind(i32::from(TaskStatus::Pending))
        .bind(i32::from(TaskStatus::Assigned))
        .bind(i32::from(TaskStatus::InProgress))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => {
                let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
                    .bind(task_id)
                    .fetch_optional(&self.pool)
                    .await?;
                match exists {
                    Some(_) => Err(DbError::Conflict("task already terminal".to_string())),
                    None => Err(DbError::NotFound("task")),
                }
            }
        }
    }

    async fn get_task(&self, task_id: Uuid) -> DbResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(
        &self,
        status_filter: Option<TaskStatus>,
        limit: usize,
    ) -> DbResult<(TasksSummary, Vec<Task>)> {
        let mut tx = self.pool.begin().await?;

        let summary_row = sqlx::query(SUMMARY_SQL).fetch_one(&mut *tx).await?;
        let summary = summary_from_row(&summary_row)?;

        let rows = match status_filter {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tasks WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
                )
                .bind(i32::from(status))
                .bind(limit as i64)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT $1")
                    .bind(limit as i64)
                    .fetch_all(&mut *tx)
                    .await?
            }
        };
        tx.commit().await?;

        let tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<DbResult<Vec<_>>>()?;
        Ok((summary, tasks))
    }

    async fn task_indexes(&self) -> DbResult<Vec<TaskIndexBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT
                court_region, instance_type, date_start, date_end,
                count(*) AS total,
                count(*) FILTER (WHERE status = 1000) AS pending,
                count(*) FILTER (WHERE status = 2000) AS assigned,
                count(*) FILTER (WHERE status = 3000) AS in_progress,
                count(*) FILTER (WHERE status = 0) AS completed,
                count(*) FILTER (WHERE status = -1000) AS failed,
                count(*) FILTER (WHERE status = -3000) AS cancelled
            FROM tasks
            GROUP BY court_region, instance_type, date_start, date_end
            ORDER BY court_region NULLS FIRST, instance_type NULLS FIRST, date_start NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskIndexBucket {
                    court_region: row.try_get("court_region")?,
                    instance_type: row.try_get("instance_type")?,
                    date_start: row.try_get("date_start")?,
                    date_end: row.try_get("date_end")?,
                    totals: summary_from_row(row)?,
                })
            })
            .collect()
    }

    async fn tasks_by_index(
        &self,
        court_region: Option<&str>,
        instance_type: Option<&str>,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> DbResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE court_region IS NOT DISTINCT FROM $1
              AND instance_type IS NOT DISTINCT FROM $2
              AND date_start IS NOT DISTINCT FROM $3
              AND date_end IS NOT DISTINCT FROM $4
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(court_region)
        .bind(instance_type)
        .bind(date_start)
        .bind(date_end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn reclaim_stalled(&self, stalled_after: Duration) -> DbResult<Vec<Uuid>> {
        let cutoff = Utc::now() - stalled_after;
        let rows = sqlx::query(
            r#"
            UPDATE tasks t
            SET status = $1, client_id = NULL, assigned_at = NULL, started_at = NULL,
                documents_downloaded = 0, documents_failed = 0, documents_skipped = 0
            FROM workers w
            WHERE t.client_id = w.id
              AND t.status IN ($2, $3)
              AND (w.last_heartbeat IS NULL OR w.last_heartbeat < $4)
            RETURNING t.id
            "#,
        )
        .bind(i32::from(TaskStatus::Pending))
        .bind(i32::from(TaskStatus::Assigned))
        .bind(i32::from(TaskStatus::InProgress))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(DbError::from))
            .collect()
    }

    // Workers
    // ----------------------------------------------------------------

    async fn register_worker(
        &self,
        name: &str,
        host: Option<&str>,
        api_key: Option<&str>,
    ) -> DbResult<Worker> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE workers
            SET host = COALESCE($3, host),
                status = $4,
                last_heartbeat = now(),
                session_started_at = now(),
                updated_at = now()
            WHERE id = (
                SELECT id FROM workers
                WHERE name = $1 AND api_key IS NOT DISTINCT FROM $2
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE
            )
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(api_key)
        .bind(host)
        .bind(i32::from(WorkerStatus::Active))
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            let worker = worker_from_row(&row)?;
            tx.commit().await?;
            return Ok(worker);
        }

        let key = api_key.map(str::to_owned).unwrap_or_else(generate_api_key);
        let row = sqlx::query(
            r#"
            INSERT INTO workers (id, name, host, api_key, status, last_heartbeat, session_started_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(host)
        .bind(&key)
        .bind(i32::from(WorkerStatus::Active))
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| match DbError::from(error) {
            DbError::Conflict(_) => DbError::Conflict("api key already in use".to_string()),
            other => other,
        })?;

        let worker = worker_from_row(&row)?;
        info!("Registered new worker {} ({})", worker.name, worker.id);
        tx.commit().await?;
        Ok(worker)
    }

    async fn heartbeat(&self, worker_id: Uuid) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workers
            SET last_heartbeat = GREATEST(COALESCE(last_heartbeat, 'epoch'::timestamptz), now()),
                session_started_at = CASE WHEN status <> $1 THEN now() ELSE session_started_at END,
                status = $1,
                updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(i32::from(WorkerStatus::Active))
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("worker"));
        }
        Ok(())
    }

    async fn find_worker_by_key(&self, api_key: &str) -> DbResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn get_worker(&self, worker_id: Uuid) -> DbResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn list_workers(&self) -> DbResult<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(worker_from_row).collect()
    }

    async fn mark_inactive(&self, inactive_after: Duration) -> DbResult<Vec<Uuid>> {
        let cutoff = Utc::now() - inactive_after;
        let rows = sqlx::query(
            r#"
            UPDATE workers
            SET status = $1, updated_at = now()
            WHERE status = $2 AND (last_heartbeat IS NULL OR last_heartbeat < $3)
            RETURNING id
            "#,
        )
        .bind(i32::from(WorkerStatus::Inactive))
        .bind(i32::from(WorkerStatus::Active))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(DbError::from))
            .collect()
    }

    async fn worker_statistics(&self, worker_id: Uuid) -> DbResult<WorkerStatistics> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM worker_statistics_view WHERE worker_id = $1")
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound("worker"))?;

        let documents = sqlx::query(
            r#"
            SELECT
                count(DISTINCT court_region) AS distinct_regions,
                count(DISTINCT instance_type) AS distinct_instance_types,
                count(DISTINCT case_type) AS distinct_case_types,
                count(*) FILTER (WHERE classification_source <> 'none') AS classified
            FROM documents
            WHERE client_id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(WorkerStatistics {
            worker_id,
            tasks: TasksSummary {
                total: row.try_get("tasks_total")?,
                pending: row.try_get("tasks_pending")?,
                assigned: row.try_get("tasks_assigned")?,
                in_progress: row.try_get("tasks_in_progress")?,
                completed: row.try_get("tasks_completed")?,
                failed: row.try_get("tasks_failed")?,
                cancelled: row.try_get("tasks_cancelled")?,
            },
            documents_downloaded: row.try_get("documents_downloaded")?,
            documents_failed: row.try_get("documents_failed")?,
            documents_skipped: row.try_get("documents_skipped")?,
            first_task_at: row.try_get("first_task_at")?,
            last_task_at: row.try_get("last_task_at")?,
            distinct_regions: documents.try_get("distinct_regions")?,
            distinct_instance_types: documents.try_get("distinct_instance_types")?,
            distinct_case_types: documents.try_get("distinct_case_types")?,
            classified_documents: documents.try_get("classified")?,
        })
    }

    async fn worker_activity(&self, worker_id: Uuid) -> DbResult<WorkerActivity> {
        let mut tx = self.pool.begin().await?;

        let worker_row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound("worker"))?;
        let worker = worker_from_row(&worker_row)?;

        let task_row = sqlx::query(
            "SELECT * FROM tasks WHERE client_id = $1 AND status IN ($2, $3) ORDER BY assigned_at DESC LIMIT 1",
        )
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Assigned))
        .bind(i32::from(TaskStatus::InProgress))
        .fetch_optional(&mut *tx)
        .await?;

        let current_task = match task_row {
            Some(row) => {
                let task = task_from_row(&row)?;
                let completed: i64 = sqlx::query(
                    "SELECT count(*) AS completed FROM document_progress WHERE task_id = $1 AND status = $2",
                )
                .bind(task.id)
                .bind(i32::from(ProgressStatus::Completed))
                .fetch_one(&mut *tx)
                .await?
                .try_get("completed")?;

                let elapsed = task
                    .started_at
                    .or(task.assigned_at)
                    .map(|since| Utc::now() - since)
                    .unwrap_or_else(Duration::zero);
                let rate = throughput(completed.max(0) as u64, elapsed);
                let remaining =
                    (task.max_documents as i64 - task.counters.downloaded).max(0) as u64;
                let eta = rate.and_then(|rate| eta_seconds(remaining, rate));
                Some(CurrentTaskActivity {
                    task,
                    throughput: rate,
                    eta_seconds: eta,
                })
            }
            None => None,
        };

        let session = match worker.session_started_at {
            Some(since) => {
                let row = sqlx::query(
                    r#"
                    SELECT count(*) AS tasks_completed,
                           COALESCE(sum(documents_downloaded), 0)::bigint AS documents_downloaded
                    FROM tasks
                    WHERE client_id = $1 AND status = $2 AND completed_at >= $3
                    "#,
                )
                .bind(worker_id)
                .bind(i32::from(TaskStatus::Completed))
                .bind(since)
                .fetch_one(&mut *tx)
                .await?;
                SessionStats {
                    since: Some(since),
                    tasks_completed: row.try_get("tasks_completed")?,
                    documents_downloaded: row.try_get("documents_downloaded")?,
                }
            }
            None => SessionStats::default(),
        };

        let error_rows = sqlx::query(
            "SELECT message FROM worker_errors WHERE worker_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(worker_id)
        .bind(RECENT_ERRORS_LIMIT as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut recent_errors = error_rows
            .iter()
            .map(|row| row.try_get("message").map_err(DbError::from))
            .collect::<DbResult<Vec<String>>>()?;
        recent_errors.reverse();

        Ok(WorkerActivity {
            worker_id,
            status: worker.status,
            last_heartbeat: worker.last_heartbeat,
            current_task,
            session,
            lifetime: LifetimeStats {
                tasks_completed: worker.total_tasks_completed,
                tasks_failed: worker.total_tasks_failed,
                documents_downloaded: worker.total_documents_downloaded,
                documents_registered: worker.total_documents_registered,
            },
            recent_errors,
        })
    }

    // Documents
    // ----------------------------------------------------------------

    async fn register_document(&self, reg: RegisterDocument) -> DbResult<RegisteredDocument> {
        if reg.meta.external_id.is_empty() {
            return Err(DbError::Conflict("external id must not be empty".to_string()));
        }
        let mut tx = self.pool.begin().await?;

        let task_id = match reg.task_id {
            Some(task_id) => sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|_| task_id),
            None => None,
        };
        let worker_id = match reg.worker_id {
            Some(worker_id) => sqlx::query("SELECT 1 FROM workers WHERE id = $1")
                .bind(worker_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|_| worker_id),
            None => None,
        };

        let mut existing = sqlx::query("SELECT * FROM documents WHERE external_id = $1 FOR UPDATE")
            .bind(&reg.meta.external_id)
            .fetch_optional(&mut *tx)
            .await?;

        let mut created = false;
        if existing.is_none() {
            let mut candidate = Document::from_meta(
                Uuid::new_v4(),
                &reg.meta,
                worker_id,
                task_id,
                Utc::now(),
            );
            if let Some(classification) =
                classify(reg.search_params.as_ref(), candidate.court_name.as_deref())
            {
                candidate.court_region = Some(classification.court_region.clone());
                candidate.instance_type = Some(classification.instance_type.clone());
                candidate.classification_source = classification.source;
                candidate.classification_date = Some(Utc::now());
            }

            // ON CONFLICT DO NOTHING turns a lost race against a concurrent
            // first registration into the merge path below instead of a
            // unique-violation error.
            let insert = sqlx::query(
                r#"
                INSERT INTO documents (
                    system_id, external_id, reg_number, url_path, decision_type,
                    decision_date, law_date, case_type, case_number, court_name,
                    judge_name, court_region, instance_type, classification_source,
                    classification_date, client_id, task_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (external_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(candidate.system_id)
            .bind(&candidate.external_id)
            .bind(&candidate.reg_number)
            .bind(&candidate.url_path)
            .bind(&candidate.decision_type)
            .bind(&candidate.decision_date)
            .bind(&candidate.law_date)
            .bind(&candidate.case_type)
            .bind(&candidate.case_number)
            .bind(&candidate.court_name)
            .bind(&candidate.judge_name)
            .bind(&candidate.court_region)
            .bind(&candidate.instance_type)
            .bind(candidate.classification_source.as_str())
            .bind(candidate.classification_date)
            .bind(candidate.client_id)
            .bind(candidate.task_id)
            .fetch_optional(&mut *tx)
            .await?;

            match insert {
                Some(row) => {
                    created = true;
                    existing = Some(row);
                }
                None => {
                    existing = Some(
                        sqlx::query("SELECT * FROM documents WHERE external_id = $1 FOR UPDATE")
                            .bind(&reg.meta.external_id)
                            .fetch_one(&mut *tx)
                            .await?,
                    );
                }
            }
        }

        let row = existing.ok_or_else(|| {
            DbError::Corruption("document row vanished mid-registration".to_string())
        })?;
        let mut document = document_from_row(&row)?;

        let mut changed = false;
        if !created {
            changed = document.merge_missing(&reg.meta);
            if document.task_id.is_none() && task_id.is_some() {
                document.task_id = task_id;
                changed = true;
            }
            if document.client_id.is_none() && worker_id.is_some() {
                document.client_id = worker_id;
                changed = true;
            }
            if !document.is_classified() {
                if let Some(classification) =
                    classify(reg.search_params.as_ref(), document.court_name.as_deref())
                {
                    document.court_region = Some(classification.court_region.clone());
                    document.instance_type = Some(classification.instance_type.clone());
                    document.classification_source = classification.source;
                    document.classification_date = Some(Utc::now());
                    changed = true;
                }
            }
        }

        if changed {
            sqlx::query(
                r#"
                UPDATE documents
                SET reg_number = $2, url_path = $3, decision_type = $4, decision_date = $5,
                    law_date = $6, case_type = $7, case_number = $8, court_name = $9,
                    judge_name = $10, court_region = $11, instance_type = $12,
                    classification_source = $13, classification_date = $14,
                    client_id = $15, task_id = $16, updated_at = now()
                WHERE system_id = $1
                "#,
            )
            .bind(document.system_id)
            .bind(&document.reg_number)
            .bind(&document.url_path)
            .bind(&document.decision_type)
            .bind(&document.decision_date)
            .bind(&document.law_date)
            .bind(&document.case_type)
            .bind(&document.case_number)
            .bind(&document.court_name)
            .bind(&document.judge_name)
            .bind(&document.court_region)
            .bind(&document.instance_type)
            .bind(document.classification_source.as_str())
            .bind(document.classification_date)
            .bind(document.client_id)
            .bind(document.task_id)
            .execute(&mut *tx)
            .await?;
        }

        // A registration for a held task is also its first sign of progress.
        if let (Some(task_id), Some(worker_id)) = (task_id, worker_id) {
            sqlx::query(
                "UPDATE tasks SET status = $1, started_at = now() WHERE id = $2 AND client_id = $3 AND status = $4",
            )
            .bind(i32::from(TaskStatus::InProgress))
            .bind(task_id)
            .bind(worker_id)
            .bind(i32::from(TaskStatus::Assigned))
            .execute(&mut *tx)
            .await?;
        }

        // Close (or backfill) the download attempt for this pair.
        if let Some(task_id) = task_id {
            sqlx::query(
                r#"
                INSERT INTO document_progress (task_id, external_id, reg_number, client_id, status, completed_at)
                VALUES ($1, $2, $3, $4, $5, now())
                ON CONFLICT (task_id, external_id) DO UPDATE
                SET status = EXCLUDED.status, completed_at = now()
                WHERE document_progress.status = $6
                "#,
            )
            .bind(task_id)
            .bind(&reg.meta.external_id)
            .bind(&reg.meta.reg_number)
            .bind(worker_id)
            .bind(i32::from(ProgressStatus::Completed))
            .bind(i32::from(ProgressStatus::InProgress))
            .execute(&mut *tx)
            .await?;
        }

        if created {
            if let Some(worker_id) = worker_id {
                sqlx::query(
                    "UPDATE workers SET total_documents_registered = total_documents_registered + 1, updated_at = now() WHERE id = $1",
                )
                .bind(worker_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(RegisteredDocument {
            system_id: document.system_id,
            classified: document.is_classified(),
            classification: document.classification(),
            created,
        })
    }

    async fn get_document(&self, system_id: Uuid) -> DbResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE system_id = $1")
            .bind(system_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn open_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        reg_number: Option<&str>,
        worker_id: Uuid,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let known = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?;
        if known.is_none() {
            tx.rollback().await.ok();
            return Err(DbError::NotFound("task"));
        }

        sqlx::query(
            r#"
            INSERT INTO document_progress (task_id, external_id, reg_number, client_id, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (task_id, external_id) DO UPDATE
            SET status = EXCLUDED.status, completed_at = NULL, client_id = EXCLUDED.client_id
            "#,
        )
        .bind(task_id)
        .bind(external_id)
        .bind(reg_number)
        .bind(worker_id)
        .bind(i32::from(ProgressStatus::InProgress))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE tasks SET status = $1, started_at = now() WHERE id = $2 AND client_id = $3 AND status = $4",
        )
        .bind(i32::from(TaskStatus::InProgress))
        .bind(task_id)
        .bind(worker_id)
        .bind(i32::from(TaskStatus::Assigned))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn close_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        status: ProgressStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE document_progress SET status = $1, completed_at = now() WHERE task_id = $2 AND external_id = $3",
        )
        .bind(i32::from(status))
        .bind(task_id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("progress record"));
        }
        Ok(())
    }

    // Sweeps
    // ----------------------------------------------------------------

    async fn try_sweep_lease(&self, name: &str, ttl: Duration) -> DbResult<bool> {
        let locked_until = Utc::now() + ttl;
        let row = sqlx::query(
            r#"
            INSERT INTO sweep_leases (name, locked_until)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE
            SET locked_until = EXCLUDED.locked_until
            WHERE sweep_leases.locked_until < now()
            RETURNING name
            "#,
        )
        .bind(name)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }
}
