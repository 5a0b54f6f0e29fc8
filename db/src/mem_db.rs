// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

// Imports
// ----------------------------------------------------------------
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use reyestr_lib::{
    classify, eta_seconds, throughput, CurrentTaskActivity, Document, DocumentProgress,
    LifetimeStats, NewTask, ProgressStatus, SessionStats, Task, TaskCounters, TaskIndexBucket,
    TaskStatus, TasksSummary, Worker, WorkerActivity, WorkerStatistics, WorkerStatus,
};

use crate::{
    ensure, generate_api_key, Db, DbError, DbResult, RegisterDocument, RegisteredDocument,
};

/// In-memory store: the full dispatcher semantics over `HashMap`s behind a
/// single mutex. The mutex stands in for the transactional isolation of the
/// PostgreSQL backend, which keeps every operation atomic by construction.
#[derive(Debug, Clone)]
pub struct InMemoryDb {
    inner: Arc<Mutex<InMemoryInner>>,
}

#[derive(Debug, Default)]
struct InMemoryInner {
    workers: HashMap<Uuid, Worker>,
    tasks: HashMap<Uuid, Task>,
    /// Documents keyed by external id; uniqueness is structural.
    documents: HashMap<String, Document>,
    /// Progress records keyed by (task, external id).
    progress: HashMap<(Uuid, String), DocumentProgress>,
    worker_errors: HashMap<Uuid, Vec<String>>,
    sweep_leases: HashMap<String, DateTime<Utc>>,
}

type IndexKey = (
    Option<String>,
    Option<String>,
    Option<NaiveDate>,
    Option<NaiveDate>,
);

fn index_key(task: &Task) -> IndexKey {
    let (date_start, date_end) = match task.search_params.date_range() {
        Some((start, end)) => (Some(start), Some(end)),
        None => (None, None),
    };
    (
        task.search_params.court_region.clone(),
        task.search_params.ins_type.clone(),
        date_start,
        date_end,
    )
}

fn bump(summary: &mut TasksSummary, status: TaskStatus) {
    summary.total += 1;
    match status {
        TaskStatus::Pending => summary.pending += 1,
        TaskStatus::Assigned => summary.assigned += 1,
        TaskStatus::InProgress => summary.in_progress += 1,
        TaskStatus::Completed => summary.completed += 1,
        TaskStatus::Failed => summary.failed += 1,
        TaskStatus::Cancelled => summary.cancelled += 1,
        TaskStatus::Corrupted => {}
    }
}

impl InMemoryInner {
    // Tasks
    // ----------------------------------------------------------------

    fn create_task(&mut self, new: NewTask) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            search_params: new.search_params,
            start_page: new.start_page,
            max_documents: new.max_documents,
            concurrent_connections: new.concurrent_connections,
            client_id: None,
            status: TaskStatus::Pending,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            counters: TaskCounters::default(),
            error_message: None,
            result_summary: None,
        };
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn request_task(&mut self, worker_id: Uuid) -> DbResult<Option<Task>> {
        if !self.workers.contains_key(&worker_id) {
            return Err(DbError::NotFound("worker"));
        }

        // Oldest first, ties broken by task id.
        let claimed = self
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .min_by_key(|task| (task.created_at, task.id))
            .map(|task| task.id);

        let Some(task_id) = claimed else {
            return Ok(None);
        };

        let task = self.tasks.get_mut(&task_id).expect("claimed task exists");
        task.status = TaskStatus::Assigned;
        task.client_id = Some(worker_id);
        task.assigned_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    /// Look up a task held by `worker_id`, rejecting everything the state
    /// machine forbids.
    fn held_task_mut(&mut self, task_id: Uuid, worker_id: Uuid) -> DbResult<&mut Task> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(DbError::NotFound("task"))?;
        ensure(
            task.status.is_held() && task.client_id == Some(worker_id),
            "task not held by worker",
        )?;
        Ok(task)
    }

    fn report_progress(
        &mut self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
    ) -> DbResult<Task> {
        let task = self.held_task_mut(task_id, worker_id)?;
        ensure(
            !counters.regresses_from(&task.counters),
            "progress counters regressed",
        )?;
        if task.status == TaskStatus::Assigned {
            task.status = TaskStatus::InProgress;
            task.started_at = Some(Utc::now());
        }
        task.counters = counters;
        Ok(task.clone())
    }

    fn complete_task(
        &mut self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<Value>,
    ) -> DbResult<Task> {
        let task = self.held_task_mut(task_id, worker_id)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.counters = counters;
        task.result_summary = result_summary;
        let task = task.clone();

        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(DbError::NotFound("worker"))?;
        worker.total_tasks_completed += 1;
        worker.total_documents_downloaded += counters.downloaded;
        worker.updated_at = Utc::now();

        Ok(task)
    }

    fn fail_task(
        &mut self,
        task_id: Uuid,
        worker_id: Uuid,
        error_message: &str,
    ) -> DbResult<Task> {
        let task = self.held_task_mut(task_id, worker_id)?;
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error_message = Some(error_message.to_owned());
        let task = task.clone();

        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(DbError::NotFound("worker"))?;
        worker.total_tasks_failed += 1;
        worker.status = WorkerStatus::Error;
        worker.updated_at = Utc::now();

        let ring = self.worker_errors.entry(worker_id).or_default();
        ring.push(error_message.to_owned());
        let overflow = ring.len().saturating_sub(reyestr_lib::RECENT_ERRORS_LIMIT);
        if overflow > 0 {
            ring.drain(..overflow);
        }

        Ok(task)
    }

    fn cancel_task(&mut self, task_id: Uuid) -> DbResult<Task> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(DbError::NotFound("task"))?;
        ensure(!task.status.is_terminal(), "task already terminal")?;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    fn list_tasks(
        &self,
        status_filter: Option<TaskStatus>,
        limit: usize,
    ) -> (TasksSummary, Vec<Task>) {
        let mut summary = TasksSummary::default();
        for task in self.tasks.values() {
            bump(&mut summary, task.status);
        }

        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| status_filter.is_none_or(|status| task.status == status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks.truncate(limit);
        (summary, tasks)
    }

    fn task_indexes(&self) -> Vec<TaskIndexBucket> {
        let mut buckets: HashMap<IndexKey, TasksSummary> = HashMap::new();
        for task in self.tasks.values() {
            bump(buckets.entry(index_key(task)).or_default(), task.status);
        }

        let mut out: Vec<(IndexKey, TasksSummary)> = buckets.into_iter().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter()
            .map(
                |((court_region, instance_type, date_start, date_end), totals)| TaskIndexBucket {
                    court_region,
                    instance_type,
                    date_start,
                    date_end,
                    totals,
                },
            )
            .collect()
    }

    fn tasks_by_index(
        &self,
        court_region: Option<&str>,
        instance_type: Option<&str>,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> Vec<Task> {
        let wanted = (
            court_region.map(str::to_owned),
            instance_type.map(str::to_owned),
            date_start,
            date_end,
        );
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| index_key(task) == wanted)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }

    fn reclaim_stalled(&mut self, stalled_after: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - stalled_after;
        let mut reclaimed = Vec::new();

        for task in self.tasks.values_mut() {
            if !task.status.is_held() {
                continue;
            }
            let stalled = match task.client_id.and_then(|id| self.workers.get(&id)) {
                Some(worker) => worker.last_heartbeat.is_none_or(|hb| hb < cutoff),
                None => true,
            };
            if stalled {
                task.status = TaskStatus::Pending;
                task.client_id = None;
                task.assigned_at = None;
                task.started_at = None;
                task.counters = TaskCounters::default();
                reclaimed.push(task.id);
            }
        }
        reclaimed
    }

    // Workers
    // ----------------------------------------------------------------

    fn register_worker(
        &mut self,
        name: &str,
        host: Option<&str>,
        api_key: Option<&str>,
    ) -> DbResult<Worker> {
        let now = Utc::now();

        let existing = self
            .workers
            .values()
            .find(|worker| worker.name == name && worker.api_key.as_deref() == api_key)
            .map(|worker| worker.id);

        if let Some(worker_id) = existing {
            let worker = self.workers.get_mut(&worker_id).expect("worker exists");
            if host.is_some() {
                worker.host = host.map(str::to_owned);
            }
            worker.status = WorkerStatus::Active;
            worker.last_heartbeat = Some(now);
            worker.session_started_at = Some(now);
            worker.updated_at = now;
            return Ok(worker.clone());
        }

        if let Some(key) = api_key {
            ensure(
                !self
                    .workers
                    .values()
                    .any(|worker| worker.api_key.as_deref() == Some(key)),
                "api key already in use",
            )?;
        }

        let worker = Worker {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            host: host.map(str::to_owned),
            api_key: Some(api_key.map(str::to_owned).unwrap_or_else(generate_api_key)),
            status: WorkerStatus::Active,
            last_heartbeat: Some(now),
            session_started_at: Some(now),
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            total_documents_downloaded: 0,
            total_documents_registered: 0,
            created_at: now,
            updated_at: now,
        };
        info!("Registered new worker {} ({})", worker.name, worker.id);
        self.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    fn heartbeat(&mut self, worker_id: Uuid) -> DbResult<()> {
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(DbError::NotFound("worker"))?;
        let now = Utc::now();
        // The heartbeat only ever moves forward.
        worker.last_heartbeat = Some(worker.last_heartbeat.map_or(now, |hb| hb.max(now)));
        if worker.status != WorkerStatus::Active {
            worker.session_started_at = Some(now);
            worker.status = WorkerStatus::Active;
        }
        worker.updated_at = now;
        Ok(())
    }

    fn mark_inactive(&mut self, inactive_after: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - inactive_after;
        let mut flipped = Vec::new();
        for worker in self.workers.values_mut() {
            if worker.status == WorkerStatus::Active
                && worker.last_heartbeat.is_none_or(|hb| hb < cutoff)
            {
                worker.status = WorkerStatus::Inactive;
                worker.updated_at = Utc::now();
                flipped.push(worker.id);
            }
        }
        flipped
    }

    fn worker_statistics(&self, worker_id: Uuid) -> DbResult<WorkerStatistics> {
        if !self.workers.contains_key(&worker_id) {
            return Err(DbError::NotFound("worker"));
        }

        let mut tasks = TasksSummary::default();
        let mut downloaded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut first_task_at = None;
        let mut last_task_at = None;

        for task in self
            .tasks
            .values()
            .filter(|task| task.client_id == Some(worker_id))
        {
            bump(&mut tasks, task.status);
            if task.status == TaskStatus::Completed {
                downloaded += task.counters.downloaded;
                failed += task.counters.failed;
                skipped += task.counters.skipped;
            }
            first_task_at = match first_task_at {
                None => Some(task.created_at),
                Some(at) => Some(task.created_at.min(at)),
            };
            last_task_at = last_task_at.max(task.completed_at);
        }

        let mut regions = std::collections::HashSet::new();
        let mut instances = std::collections::HashSet::new();
        let mut case_types = std::collections::HashSet::new();
        let mut classified = 0;
        for document in self
            .documents
            .values()
            .filter(|document| document.client_id == Some(worker_id))
        {
            regions.extend(document.court_region.clone());
            instances.extend(document.instance_type.clone());
            case_types.extend(document.case_type.clone());
            if document.is_classified() {
                classified += 1;
            }
        }

        Ok(WorkerStatistics {
            worker_id,
            tasks,
            documents_downloaded: downloaded,
            documents_failed: failed,
            documents_skipped: skipped,
            first_task_at,
            last_task_at,
            distinct_regions: regions.len() as i64,
            distinct_instance_types: instances.len() as i64,
            distinct_case_types: case_types.len() as i64,
            classified_documents: classified,
        })
    }

    fn worker_activity(&self, worker_id: Uuid) -> DbResult<WorkerActivity> {
        let worker = self
            .workers
            .get(&worker_id)
            .ok_or(DbError::NotFound("worker"))?;

        let current_task = self
            .tasks
            .values()
            .find(|task| task.status.is_held() && task.client_id == Some(worker_id))
            .cloned()
            .map(|task| {
                let completed = self
                    .progress
                    .values()
                    .filter(|record| {
                        record.task_id == task.id && record.status == ProgressStatus::Completed
                    })
                    .count() as u64;
                let elapsed = task
                    .started_at
                    .or(task.assigned_at)
                    .map(|since| Utc::now() - since)
                    .unwrap_or_else(Duration::zero);
                let rate = throughput(completed, elapsed);
                let remaining =
                    (task.max_documents as i64 - task.counters.downloaded).max(0) as u64;
                let eta = rate.and_then(|rate| eta_seconds(remaining, rate));
                CurrentTaskActivity {
                    task,
                    throughput: rate,
                    eta_seconds: eta,
                }
            });

        let session_since = worker.session_started_at;
        let mut session = SessionStats {
            since: session_since,
            ..Default::default()
        };
        if let Some(since) = session_since {
            for task in self.tasks.values().filter(|task| {
                task.client_id == Some(worker_id)
                    && task.status == TaskStatus::Completed
                    && task.completed_at.is_some_and(|at| at >= since)
            }) {
                session.tasks_completed += 1;
                session.documents_downloaded += task.counters.downloaded;
            }
        }

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
            recent_errors: self
                .worker_errors
                .get(&worker_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    // Documents
    // ----------------------------------------------------------------

    fn register_document(&mut self, reg: RegisterDocument) -> DbResult<RegisteredDocument> {
        let now = Utc::now();
        let external_id = reg.meta.external_id.clone();
        ensure(!external_id.is_empty(), "external id must not be empty")?;

        let task_id = reg
            .task_id
            .filter(|task_id| self.tasks.contains_key(task_id));
        let worker_id = reg
            .worker_id
            .filter(|worker_id| self.workers.contains_key(worker_id));

        let created = !self.documents.contains_key(&external_id);
        if created {
            let document =
                Document::from_meta(Uuid::new_v4(), &reg.meta, worker_id, task_id, now);
            self.documents.insert(external_id.clone(), document);
        }

        let document = self
            .documents
            .get_mut(&external_id)
            .expect("document row exists");
        let mut changed = if created {
            false
        } else {
            document.merge_missing(&reg.meta)
        };

        if !created {
            if document.task_id.is_none() && task_id.is_some() {
                document.task_id = task_id;
                changed = true;
            }
            if document.client_id.is_none() && worker_id.is_some() {
                document.client_id = worker_id;
                changed = true;
            }
        }

        if !document.is_classified() {
            if let Some(classification) =
                classify(reg.search_params.as_ref(), document.court_name.as_deref())
            {
                document.court_region = Some(classification.court_region.clone());
                document.instance_type = Some(classification.instance_type.clone());
                document.classification_source = classification.source;
                document.classification_date = Some(now);
                changed = true;
            }
        }

        if changed && !created {
            document.updated_at = now;
        }

        let registered = RegisteredDocument {
            system_id: document.system_id,
            classified: document.is_classified(),
            classification: document.classification(),
            created,
        };

        // A registration for a held task is also its first sign of progress.
        if let (Some(task_id), Some(worker_id)) = (task_id, worker_id) {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                if task.status == TaskStatus::Assigned && task.client_id == Some(worker_id) {
                    task.status = TaskStatus::InProgress;
                    task.started_at = Some(now);
                }
            }
        }

        // Close (or backfill) the download attempt for this pair.
        if let Some(task_id) = task_id {
            let record = self
                .progress
                .entry((task_id, external_id.clone()))
                .or_insert_with(|| DocumentProgress {
                    task_id,
                    external_id: external_id.clone(),
                    reg_number: reg.meta.reg_number.clone(),
                    client_id: worker_id,
                    status: ProgressStatus::InProgress,
                    started_at: now,
                    completed_at: None,
                });
            if record.status == ProgressStatus::InProgress {
                record.status = ProgressStatus::Completed;
                record.completed_at = Some(now);
            }
        }

        if created {
            if let Some(worker) = worker_id.and_then(|id| self.workers.get_mut(&id)) {
                worker.total_documents_registered += 1;
                worker.updated_at = now;
            }
        }

        Ok(registered)
    }

    fn open_progress(
        &mut self,
        task_id: Uuid,
        external_id: &str,
        reg_number: Option<&str>,
        worker_id: Uuid,
    ) -> DbResult<()> {
        if !self.tasks.contains_key(&task_id) {
            return Err(DbError::NotFound("task"));
        }
        let now = Utc::now();

        let record = self
            .progress
            .entry((task_id, external_id.to_owned()))
            .or_insert_with(|| DocumentProgress {
                task_id,
                external_id: external_id.to_owned(),
                reg_number: reg_number.map(str::to_owned),
                client_id: Some(worker_id),
                status: ProgressStatus::InProgress,
                started_at: now,
                completed_at: None,
            });
        record.status = ProgressStatus::InProgress;
        record.completed_at = None;
        record.client_id = Some(worker_id);

        if let Some(task) = self.tasks.get_mut(&task_id) {
            if task.status == TaskStatus::Assigned && task.client_id == Some(worker_id) {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(now);
            }
        }
        Ok(())
    }

    fn close_progress(
        &mut self,
        task_id: Uuid,
        external_id: &str,
        status: ProgressStatus,
    ) -> DbResult<()> {
        let record = self
            .progress
            .get_mut(&(task_id, external_id.to_owned()))
            .ok_or(DbError::NotFound("progress record"))?;
        record.status = status;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    // Sweeps
    // ----------------------------------------------------------------

    fn try_sweep_lease(&mut self, name: &str, ttl: Duration) -> bool {
        let now = Utc::now();
        match self.sweep_leases.get(name) {
            Some(locked_until) if *locked_until > now => false,
            _ => {
                self.sweep_leases.insert(name.to_owned(), now + ttl);
                true
            }
        }
    }
}

impl InMemoryDb {
    pub fn new() -> Self {
        InMemoryDb {
            inner: Arc::new(Mutex::new(InMemoryInner::default())),
        }
    }
}

impl Default for InMemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Db for InMemoryDb {
    async fn create_task(&self, new: NewTask) -> DbResult<Task> {
        let mut db = self.inner.lock().await;
        Ok(db.create_task(new))
    }

    async fn request_task(&self, worker_id: Uuid) -> DbResult<Option<Task>> {
        let mut db = self.inner.lock().await;
        db.request_task(worker_id)
    }

    async fn report_progress(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
    ) -> DbResult<Task> {
        let mut db = self.inner.lock().await;
        db.report_progress(task_id, worker_id, counters)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<Value>,
    ) -> DbResult<Task> {
        let mut db = self.inner.lock().await;
        db.complete_task(task_id, worker_id, counters, result_summary)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        error_message: &str,
    ) -> DbResult<Task> {
        let mut db = self.inner.lock().await;
        db.fail_task(task_id, worker_id, error_message)
    }

    async fn cancel_task(&self, task_id: Uuid) -> DbResult<Task> {
        let mut db = self.inner.lock().await;
        db.cancel_task(task_id)
    }

    async fn get_task(&self, task_id: Uuid) -> DbResult<Option<Task>> {
        let db = self.inner.lock().await;
        Ok(db.tasks.get(&task_id).cloned())
    }

    async fn list_tasks(
        &self,
        status_filter: Option<TaskStatus>,
        limit: usize,
    ) -> DbResult<(TasksSummary, Vec<Task>)> {
        let db = self.inner.lock().await;
        Ok(db.list_tasks(status_filter, limit))
    }

    async fn task_indexes(&self) -> DbResult<Vec<TaskIndexBucket>> {
        let db = self.inner.lock().await;
        Ok(db.task_indexes())
    }

    async fn tasks_by_index(
        &self,
        court_region: Option<&str>,
        instance_type: Option<&str>,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> DbResult<Vec<Task>> {
        let db = self.inner.lock().await;
        Ok(db.tasks_by_index(court_region, instance_type, date_start, date_end))
    }

    async fn reclaim_stalled(&self, stalled_after: Duration) -> DbResult<Vec<Uuid>> {
        let mut db = self.inner.lock().await;
        Ok(db.reclaim_stalled(stalled_after))
    }

    async fn register_worker(
        &self,
        name: &str,
        host: Option<&str>,
        api_key: Option<&str>,
    ) -> DbResult<Worker> {
        let mut db = self.inner.lock().await;
        db.register_worker(name, host, api_key)
    }

    async fn heartbeat(&self, worker_id: Uuid) -> DbResult<()> {
        let mut db = self.inner.lock().await;
        db.heartbeat(worker_id)
    }

    async fn find_worker_by_key(&self, api_key: &str) -> DbResult<Option<Worker>> {
        let db = self.inner.lock().await;
        Ok(db
            .workers
            .values()
            .find(|worker| worker.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    async fn get_worker(&self, worker_id: Uuid) -> DbResult<Option<Worker>> {
        let db = self.inner.lock().await;
        Ok(db.workers.get(&worker_id).cloned())
    }

    async fn list_workers(&self) -> DbResult<Vec<Worker>> {
        let db = self.inner.lock().await;
        let mut workers: Vec<Worker> = db.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(workers)
    }

    async fn mark_inactive(&self, inactive_after: Duration) -> DbResult<Vec<Uuid>> {
        let mut db = self.inner.lock().await;
        Ok(db.mark_inactive(inactive_after))
    }

    async fn worker_statistics(&self, worker_id: Uuid) -> DbResult<WorkerStatistics> {
        let db = self.inner.lock().await;
        db.worker_statistics(worker_id)
    }

    async fn worker_activity(&self, worker_id: Uuid) -> DbResult<WorkerActivity> {
        let db = self.inner.lock().await;
        db.worker_activity(worker_id)
    }

    async fn register_document(&self, reg: RegisterDocument) -> DbResult<RegisteredDocument> {
        let mut db = self.inner.lock().await;
        db.register_document(reg)
    }

    async fn get_document(&self, system_id: Uuid) -> DbResult<Option<Document>> {
        let db = self.inner.lock().await;
        Ok(db
            .documents
            .values()
            .find(|document| document.system_id == system_id)
            .cloned())
    }

    async fn open_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        reg_number: Option<&str>,
        worker_id: Uuid,
    ) -> DbResult<()> {
        let mut db = self.inner.lock().await;
        db.open_progress(task_id, external_id, reg_number, worker_id)
    }

    async fn close_progress(
        &self,
        task_id: Uuid,
        external_id: &str,
        status: ProgressStatus,
    ) -> DbResult<()> {
        let mut db = self.inner.lock().await;
        db.close_progress(task_id, external_id, status)
    }

    async fn try_sweep_lease(&self, name: &str, ttl: Duration) -> DbResult<bool> {
        let mut db = self.inner.lock().await;
        Ok(db.try_sweep_lease(name, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_yields_no_claim() {
        let mut db = InMemoryInner::default();
        let worker = db.register_worker("scraper-1", None, None).unwrap();
        assert!(db.request_task(worker.id).unwrap().is_none());
    }

    #[test]
    fn unknown_worker_cannot_claim() {
        let mut db = InMemoryInner::default();
        assert!(matches!(
            db.request_task(Uuid::new_v4()),
            Err(DbError::NotFound("worker"))
        ));
    }

    #[test]
    fn sweep_lease_excludes_second_taker() {
        let mut db = InMemoryInner::default();
        assert!(db.try_sweep_lease("reclaim", Duration::seconds(30)));
        assert!(!db.try_sweep_lease("reclaim", Duration::seconds(30)));
        assert!(db.try_sweep_lease("liveness", Duration::seconds(30)));
    }
}
