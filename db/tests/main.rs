// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    use reyestr_db::{get_db, Db, DbError, DbOpts, DbWrapper, RegisterDocument};
    use reyestr_lib::{
        ClassificationSource, DocumentMeta, NewTask, ProgressStatus, SearchParams, TaskCounters,
        TaskStatus, WorkerStatus, DEFAULT_CONCURRENT_CONNECTIONS,
    };

    async fn open_db() -> DbWrapper {
        get_db(&DbOpts::default()).await.expect("in-memory store")
    }

    fn new_task(params: SearchParams) -> NewTask {
        NewTask {
            search_params: params,
            start_page: 1,
            max_documents: 100,
            concurrent_connections: DEFAULT_CONCURRENT_CONNECTIONS,
        }
    }

    fn random_params(rng: &mut ChaCha8Rng) -> SearchParams {
        SearchParams {
            court_region: Some(rng.gen_range(1..=27).to_string()),
            ins_type: Some(rng.gen_range(1..=3).to_string()),
            reg_date_begin: Some("01.01.2023".to_owned()),
            reg_date_end: Some("31.01.2023".to_owned()),
            ..Default::default()
        }
    }

    fn court_meta(external_id: &str) -> DocumentMeta {
        DocumentMeta {
            external_id: external_id.to_owned(),
            reg_number: Some(external_id.to_owned()),
            court_name: Some("Львівський апеляційний суд".to_owned()),
            case_type: Some("Цивільні справи".to_owned()),
            ..Default::default()
        }
    }

    // Exclusive assignment
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn exclusive_claim_under_contention() {
        let db = open_db().await;
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();

        let mut workers = Vec::new();
        for i in 0..10 {
            workers.push(
                db.register_worker(&format!("scraper-{i}"), None, None)
                    .await
                    .unwrap(),
            );
        }

        let mut handles = Vec::new();
        for worker in &workers {
            let db = db.clone();
            let worker_id = worker.id;
            handles.push(tokio::spawn(
                async move { db.request_task(worker_id).await },
            ));
        }

        let mut claims = Vec::new();
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap().unwrap() {
                claims.push(claimed);
            }
        }

        assert_eq!(claims.len(), 1, "exactly one worker wins the claim");
        assert_eq!(claims[0].id, task.id);
        assert_eq!(claims[0].status, TaskStatus::Assigned);

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Assigned);
        assert_eq!(stored.client_id, claims[0].client_id);
        assert!(stored.assigned_at.is_some());
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        assert!(db.request_task(worker.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oldest_task_is_claimed_first() {
        let db = open_db().await;
        let first = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        let _second = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();

        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let claimed = db.request_task(worker.id).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    // Task lifecycle
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn create_request_complete_round_trip() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();

        let claimed = db.request_task(worker.id).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);

        let counters = TaskCounters {
            downloaded: 42,
            failed: 3,
            skipped: 5,
        };
        let completed = db
            .complete_task(task.id, worker.id, counters, Some(serde_json::json!({"pages": 7})))
            .await
            .unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.counters, counters);

        // Worker counters move with the completing transaction.
        let worker = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(worker.total_tasks_completed, 1);
        assert_eq!(worker.total_documents_downloaded, 42);
    }

    #[tokio::test]
    async fn first_report_starts_the_task() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        let reported = db
            .report_progress(
                task.id,
                worker.id,
                TaskCounters {
                    downloaded: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(reported.status, TaskStatus::InProgress);
        assert!(reported.started_at.is_some());
    }

    #[tokio::test]
    async fn counter_regression_is_rejected() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        db.report_progress(
            task.id,
            worker.id,
            TaskCounters {
                downloaded: 10,
                failed: 1,
                skipped: 0,
            },
        )
        .await
        .unwrap();

        let regression = db
            .report_progress(
                task.id,
                worker.id,
                TaskCounters {
                    downloaded: 9,
                    failed: 1,
                    skipped: 0,
                },
            )
            .await;
        assert!(matches!(regression, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn only_the_holder_may_report() {
        let db = open_db().await;
        let holder = db.register_worker("scraper-1", None, None).await.unwrap();
        let intruder = db.register_worker("scraper-2", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(holder.id).await.unwrap().unwrap();

        let rejected = db
            .report_progress(task.id, intruder.id, TaskCounters::default())
            .await;
        assert!(matches!(rejected, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn complete_on_terminal_task_conflicts() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();
        db.complete_task(task.id, worker.id, TaskCounters::default(), None)
            .await
            .unwrap();

        let again = db
            .complete_task(task.id, worker.id, TaskCounters::default(), None)
            .await;
        assert!(matches!(again, Err(DbError::Conflict(_))));

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let worker = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(worker.total_tasks_completed, 1);
    }

    #[tokio::test]
    async fn fail_records_error_and_flags_worker() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        let failed = db
            .fail_task(task.id, worker.id, "registry returned HTTP 503")
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("registry returned HTTP 503")
        );

        let worker = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Error);
        assert_eq!(worker.total_tasks_failed, 1);

        let activity = db.worker_activity(worker.id).await.unwrap();
        assert_eq!(
            activity.recent_errors,
            vec!["registry returned HTTP 503".to_owned()]
        );
    }

    #[tokio::test]
    async fn cancel_is_admin_only_terminal() {
        let db = open_db().await;
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();

        let cancelled = db.cancel_task(task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let again = db.cancel_task(task.id).await;
        assert!(matches!(again, Err(DbError::Conflict(_))));
        assert!(matches!(
            db.cancel_task(Uuid::new_v4()).await,
            Err(DbError::NotFound(_))
        ));
    }

    // Reclamation
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn stalled_task_returns_to_the_queue() {
        let db = open_db().await;
        let stalled = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(stalled.id).await.unwrap().unwrap();

        // A zero threshold makes any heartbeat stale.
        let reclaimed = db.reclaim_stalled(Duration::zero()).await.unwrap();
        assert_eq!(reclaimed, vec![task.id]);

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(stored.client_id.is_none());
        assert!(stored.assigned_at.is_none());

        // A fresh worker can claim it right away.
        let fresh = db.register_worker("scraper-2", None, None).await.unwrap();
        let claimed = db.request_task(fresh.id).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.client_id, Some(fresh.id));
    }

    #[tokio::test]
    async fn late_complete_after_reclamation_conflicts() {
        let db = open_db().await;
        let stalled = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(stalled.id).await.unwrap().unwrap();

        // The worker registered a document before going dark.
        let registered = db
            .register_document(RegisterDocument {
                meta: court_meta("101476997"),
                task_id: Some(task.id),
                worker_id: Some(stalled.id),
                search_params: None,
            })
            .await
            .unwrap();

        db.reclaim_stalled(Duration::zero()).await.unwrap();

        let late = db
            .complete_task(
                task.id,
                stalled.id,
                TaskCounters {
                    downloaded: 1,
                    ..Default::default()
                },
                None,
            )
            .await;
        assert!(matches!(late, Err(DbError::Conflict(_))));

        // The task is back in the queue and the registration survives.
        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        let document = db
            .get_document(registered.system_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.external_id, "101476997");
    }

    #[tokio::test]
    async fn live_workers_are_not_reclaimed() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        db.create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        let reclaimed = db.reclaim_stalled(Duration::hours(1)).await.unwrap();
        assert!(reclaimed.is_empty());
    }

    // Worker registry
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn registration_reuses_matching_name_and_secret() {
        let db = open_db().await;
        let first = db
            .register_worker("scraper-1", Some("10.0.0.5"), None)
            .await
            .unwrap();
        let key = first.api_key.clone().expect("generated secret");
        assert!(key.starts_with("reyestr_"));

        let again = db
            .register_worker("scraper-1", None, Some(&key))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);

        // A different secret under the same name is a different worker.
        let other = db
            .register_worker("scraper-1", None, Some("reyestr_other"))
            .await
            .unwrap();
        assert_ne!(other.id, first.id);

        // Secrets are unique across workers.
        let stolen = db.register_worker("scraper-2", None, Some(&key)).await;
        assert!(matches!(stolen, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn heartbeat_is_idempotent_and_revives_workers() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();

        for _ in 0..3 {
            db.heartbeat(worker.id).await.unwrap();
        }
        let alive = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(alive.status, WorkerStatus::Active);
        assert!(alive.last_heartbeat.is_some());

        let flipped = db.mark_inactive(Duration::zero()).await.unwrap();
        assert_eq!(flipped, vec![worker.id]);
        let idle = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(idle.status, WorkerStatus::Inactive);

        // A heartbeat revives the worker and opens a new session window.
        db.heartbeat(worker.id).await.unwrap();
        let revived = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(revived.status, WorkerStatus::Active);
        assert!(revived.session_started_at >= idle.session_started_at);

        assert!(matches!(
            db.heartbeat(Uuid::new_v4()).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_worker_by_key_resolves_identity() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let key = worker.api_key.clone().unwrap();

        let found = db.find_worker_by_key(&key).await.unwrap().unwrap();
        assert_eq!(found.id, worker.id);
        assert!(db.find_worker_by_key("reyestr_bogus").await.unwrap().is_none());
    }

    // Documents
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn registration_is_idempotent() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();

        let reg = RegisterDocument {
            meta: court_meta("101476997"),
            task_id: None,
            worker_id: Some(worker.id),
            search_params: None,
        };
        let first = db.register_document(reg.clone()).await.unwrap();
        assert!(first.created);
        let stored_first = db
            .get_document(first.system_id)
            .await
            .unwrap()
            .unwrap();

        let second = db.register_document(reg).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.system_id, first.system_id);

        let stored_second = db
            .get_document(first.system_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored_second.updated_at, stored_first.updated_at);

        // Only the first registration counts.
        let worker = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(worker.total_documents_registered, 1);
    }

    #[tokio::test]
    async fn merge_fills_missing_fields_only() {
        let db = open_db().await;
        let first = db
            .register_document(RegisterDocument {
                meta: DocumentMeta {
                    external_id: "88990011".to_owned(),
                    reg_number: Some("88990011".to_owned()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();

        db.register_document(RegisterDocument {
            meta: DocumentMeta {
                external_id: "88990011".to_owned(),
                reg_number: Some("CHANGED".to_owned()),
                judge_name: Some("Петренко О. І.".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

        let stored = db.get_document(first.system_id).await.unwrap().unwrap();
        assert_eq!(stored.reg_number.as_deref(), Some("88990011"));
        assert_eq!(stored.judge_name.as_deref(), Some("Петренко О. І."));
    }

    #[tokio::test]
    async fn classification_from_search_params() {
        let db = open_db().await;
        let registered = db
            .register_document(RegisterDocument {
                meta: DocumentMeta {
                    external_id: "55001122".to_owned(),
                    court_name: Some("Київський районний суд".to_owned()),
                    ..Default::default()
                },
                search_params: Some(SearchParams {
                    court_region: Some("11".to_owned()),
                    ins_type: Some("1".to_owned()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(registered.classified);
        let classification = registered.classification.unwrap();
        assert_eq!(classification.court_region, "11");
        assert_eq!(classification.instance_type, "1");
        assert_eq!(classification.source, ClassificationSource::SearchParams);
    }

    #[tokio::test]
    async fn classification_from_extracted_court_name() {
        let db = open_db().await;
        let registered = db
            .register_document(RegisterDocument {
                meta: court_meta("55001123"),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(registered.classified);
        let classification = registered.classification.unwrap();
        assert_eq!(classification.court_region, "14");
        assert_eq!(classification.instance_type, "2");
        assert_eq!(classification.source, ClassificationSource::Extracted);

        let stored = db
            .get_document(registered.system_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.classification_date.is_some());
    }

    #[tokio::test]
    async fn unmatched_documents_stay_unclassified() {
        let db = open_db().await;
        let registered = db
            .register_document(RegisterDocument {
                meta: DocumentMeta {
                    external_id: "55001124".to_owned(),
                    court_name: Some("Трибунал".to_owned()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!registered.classified);
        assert!(registered.classification.is_none());
        let stored = db
            .get_document(registered.system_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.classification_source, ClassificationSource::None);
        assert!(stored.classification_date.is_none());
    }

    #[tokio::test]
    async fn registration_counts_as_first_progress() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        db.register_document(RegisterDocument {
            meta: court_meta("77001122"),
            task_id: Some(task.id),
            worker_id: Some(worker.id),
            search_params: None,
        })
        .await
        .unwrap();

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert!(stored.started_at.is_some());
    }

    // Progress records
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn progress_records_feed_throughput() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        let task = db
            .create_task(new_task(SearchParams::default()))
            .await
            .unwrap();
        db.request_task(worker.id).await.unwrap().unwrap();

        db.open_progress(task.id, "900100", None, worker.id)
            .await
            .unwrap();
        db.open_progress(task.id, "900101", None, worker.id)
            .await
            .unwrap();
        // Re-opening the same pair must not create a second record.
        db.open_progress(task.id, "900100", None, worker.id)
            .await
            .unwrap();

        db.close_progress(task.id, "900100", ProgressStatus::Completed)
            .await
            .unwrap();
        db.report_progress(
            task.id,
            worker.id,
            TaskCounters {
                downloaded: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Give the elapsed-time base a measurable width.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let activity = db.worker_activity(worker.id).await.unwrap();
        let current = activity.current_task.expect("task is held");
        assert_eq!(current.task.id, task.id);
        assert!(current.throughput.is_some());
        assert!(current.eta_seconds.is_some());

        assert!(matches!(
            db.close_progress(task.id, "nonexistent", ProgressStatus::Failed)
                .await,
            Err(DbError::NotFound(_))
        ));
    }

    // Statistics and indexes
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn worker_statistics_account_for_completed_tasks() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();

        for downloaded in [10i64, 20] {
            let task = db
                .create_task(new_task(SearchParams::default()))
                .await
                .unwrap();
            db.request_task(worker.id).await.unwrap().unwrap();
            db.complete_task(
                task.id,
                worker.id,
                TaskCounters {
                    downloaded,
                    failed: 1,
                    skipped: 2,
                },
                None,
            )
            .await
            .unwrap();
        }
        db.register_document(RegisterDocument {
            meta: court_meta("31415926"),
            worker_id: Some(worker.id),
            ..Default::default()
        })
        .await
        .unwrap();

        let statistics = db.worker_statistics(worker.id).await.unwrap();
        assert_eq!(statistics.tasks.completed, 2);
        assert_eq!(statistics.documents_downloaded, 30);
        assert_eq!(statistics.documents_failed, 2);
        assert_eq!(statistics.documents_skipped, 4);
        assert!(statistics.first_task_at.is_some());
        assert!(statistics.last_task_at.is_some());
        assert_eq!(statistics.distinct_regions, 1);
        assert_eq!(statistics.distinct_instance_types, 1);
        assert_eq!(statistics.classified_documents, 1);

        // The cumulative counters agree with the per-task sums.
        let worker = db.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(worker.total_tasks_completed, 2);
        assert_eq!(worker.total_documents_downloaded, 30);
    }

    #[tokio::test]
    async fn list_tasks_filters_and_summarizes() {
        let db = open_db().await;
        let worker = db.register_worker("scraper-1", None, None).await.unwrap();
        for _ in 0..3 {
            db.create_task(new_task(SearchParams::default()))
                .await
                .unwrap();
        }
        db.request_task(worker.id).await.unwrap().unwrap();

        let (summary, all) = db.list_tasks(None, 50).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.assigned, 1);
        assert_eq!(all.len(), 3);

        let (_, pending) = db.list_tasks(Some(TaskStatus::Pending), 50).await.unwrap();
        assert_eq!(pending.len(), 2);

        let (_, limited) = db.list_tasks(None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn task_indexes_group_by_region_instance_and_dates() {
        let db = open_db().await;
        let mut rng = ChaCha8Rng::seed_from_u64(123);

        for _ in 0..5 {
            db.create_task(new_task(random_params(&mut rng)))
                .await
                .unwrap();
        }
        let lviv = SearchParams {
            court_region: Some("14".to_owned()),
            ins_type: Some("2".to_owned()),
            reg_date_begin: Some("01.03.2023".to_owned()),
            reg_date_end: Some("31.03.2023".to_owned()),
            ..Default::default()
        };
        db.create_task(new_task(lviv.clone())).await.unwrap();
        db.create_task(new_task(lviv.clone())).await.unwrap();

        let buckets = db.task_indexes().await.unwrap();
        let total: i64 = buckets.iter().map(|bucket| bucket.totals.total).sum();
        assert_eq!(total, 7);

        let bucket = buckets
            .iter()
            .find(|bucket| {
                bucket.court_region.as_deref() == Some("14")
                    && bucket.instance_type.as_deref() == Some("2")
            })
            .expect("lviv bucket");
        assert_eq!(bucket.totals.total, 2);
        assert_eq!(bucket.totals.pending, 2);

        let (start, end) = lviv.date_range().unwrap();
        let tasks = db
            .tasks_by_index(Some("14"), Some("2"), Some(start), Some(end))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
    }

    // Sweep leases
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn sweep_lease_runs_one_instance_at_a_time() {
        let db = open_db().await;
        assert!(db
            .try_sweep_lease("reclaim", Duration::seconds(30))
            .await
            .unwrap());
        assert!(!db
            .try_sweep_lease("reclaim", Duration::seconds(30))
            .await
            .unwrap());
        // An expired lease can be re-taken.
        assert!(db
            .try_sweep_lease("liveness", Duration::zero())
            .await
            .unwrap());
        assert!(db
            .try_sweep_lease("liveness", Duration::seconds(30))
            .await
            .unwrap());
    }
}
