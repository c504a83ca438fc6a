mod common;

use chrono::{Duration, Utc};
use common::{pg_store, seed_log, seed_run, setup_pg};
use estateops::activity::{action, entity, ActivityFilter, ActivityLogger};
use estateops::cron::model::JobRunFinish;
use estateops::cron::{Completion, JobExecutor, JobRunStatus, JobRunTracker};
use estateops::logs::{LogAggregator, LogFilter, LogLevel, LogStore, LogType, NewLogEntry, Recorded};
use estateops::store::{JobRunDb, SiteDb};
use estateops::Payload;
use serde_json::{json, Value};
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn log_entries_round_trip_through_postgres() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let logs = LogStore::new(store.clone());

    let outcome = logs
        .record(
            NewLogEntry::new(LogLevel::Error, LogType::ApiError, "upload failed")
                .source("/admin/properties/images")
                .metadata(Payload::from_json(&json!({"size": 12, "token": "abc"}))),
        )
        .await;
    let Recorded::Persisted(id) = outcome else {
        panic!("expected persisted, got {outcome:?}");
    };

    let page = logs
        .query(&LogFilter {
            level: Some(LogLevel::Error),
            source: Some("IMAGES".into()),
            ..LogFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    let entry = &page.entries[0];
    assert_eq!(entry.id, id);
    assert_eq!(entry.log_type, LogType::ApiError);
    let meta: Value = entry.metadata.as_ref().unwrap().decode().unwrap();
    assert_eq!(meta["size"], 12);
    assert_eq!(meta["token"], "[REDACTED]");
}

#[tokio::test]
#[serial]
async fn source_filter_treats_wildcards_literally() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let now = Utc::now();
    seed_log(&*store, LogLevel::Info, LogType::ApiRequest, Some("/promo/50%_off"), now).await;
    seed_log(&*store, LogLevel::Info, LogType::ApiRequest, Some("/promo/50-off"), now).await;

    let page = LogStore::new(store)
        .query(&LogFilter {
            source: Some("50%_".into()),
            ..LogFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
#[serial]
async fn purge_and_level_counts() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let now = Utc::now();
    let old = now - Duration::days(40);

    for level in LogLevel::ALL {
        seed_log(&*store, level, LogType::SystemError, None, old).await;
    }
    seed_log(&*store, LogLevel::Error, LogType::SystemError, None, now).await;
    seed_log(&*store, LogLevel::Error, LogType::SystemError, None, now).await;

    let agg = LogAggregator::new(store.clone());
    let counts = agg.counts_by_level(now - Duration::days(7)).await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[&LogLevel::Error], 2);

    let deleted = LogStore::new(store)
        .purge(now - Duration::days(30), Some(&[LogLevel::Info, LogLevel::Warn][..]))
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(agg.total_count().await.unwrap(), 4);
}

#[tokio::test]
#[serial]
async fn finish_applies_only_to_running_rows() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let id = seed_run(&*store, "cleanup-logs", Utc::now()).await;

    let finish = |status| JobRunFinish {
        status,
        completed_at: Utc::now(),
        duration_ms: 5,
        message: Some(format!("{status}")),
        error: None,
        records_processed: Some(1),
        metadata: None,
    };

    assert!(store.finish_job_run(id, &finish(JobRunStatus::Success)).await.unwrap());
    assert!(!store.finish_job_run(id, &finish(JobRunStatus::Failed)).await.unwrap());
    assert!(!store.finish_job_run(Uuid::new_v4(), &finish(JobRunStatus::Failed)).await.unwrap());

    let run = store.get_job_run(id).await.unwrap().unwrap();
    assert_eq!(run.status, JobRunStatus::Success);
    assert_eq!(run.message.as_deref(), Some("SUCCESS"));
    assert_eq!(run.duration, Some(5));
}

#[tokio::test]
#[serial]
async fn executor_tracks_runs_in_postgres() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let tracker = JobRunTracker::new(store);
    let executor = JobExecutor::new(tracker.clone());

    executor
        .execute("check-appointments", None, || async { Ok::<_, anyhow::Error>(4i64) })
        .await
        .unwrap();
    let _ = executor
        .execute("check-appointments", None, || async {
            Err::<i64, _>(anyhow::anyhow!("smtp timeout"))
        })
        .await;

    let stats = tracker.stats("check-appointments").await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 50.0);
    assert_eq!(stats.last_run.unwrap().status, JobRunStatus::Failed);

    let history = tracker.history("check-appointments", 10).await.unwrap();
    assert_eq!(history[1].records_processed, Some(4));
}

#[tokio::test]
#[serial]
async fn stale_runs_are_reconciled() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let tracker = JobRunTracker::new(store.clone());

    let stale = seed_run(&*store, "weekly-analytics", Utc::now() - Duration::hours(8)).await;
    let fresh = tracker.start("weekly-analytics", None).await;

    let closed = tracker.reconcile_stale(Duration::hours(6)).await.unwrap();
    assert_eq!(closed, vec![stale]);
    assert_eq!(tracker.get(stale).await.unwrap().status, JobRunStatus::Failed);

    tracker.complete(&fresh, Completion::default()).await;
    assert_eq!(tracker.get(fresh.id).await.unwrap().status, JobRunStatus::Success);
}

#[tokio::test]
#[serial]
async fn activity_queries_run_in_sql() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool);
    let logger = ActivityLogger::new(store);

    logger.log(action::CREATE, entity::PROPERTY, "p-1", "ana@example.com", None).await.unwrap();
    logger.log(action::UPDATE, entity::PROPERTY, "p-1", "ana@example.com", None).await.unwrap();
    logger.log(action::UPDATE, entity::LEAD, "l-1", "bruno@example.com", None).await.unwrap();

    let page = logger
        .query(&ActivityFilter {
            search: Some("BRUNO".into()),
            ..ActivityFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.logs[0].entity, entity::LEAD);

    assert_eq!(
        logger.unique_entities().await.unwrap(),
        vec![entity::PROPERTY, entity::LEAD]
    );
}

#[tokio::test]
#[serial]
async fn site_reads_cover_appointments_and_counts() {
    let Some(pool) = setup_pg().await else { return };
    let store = pg_store(pool.clone());
    let now = Utc::now();

    let property = Uuid::new_v4();
    sqlx::query("INSERT INTO properties (id, slug, title, is_published) VALUES ($1, 'casa-sol', 'Casa Sol', TRUE)")
        .bind(property)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO properties (id, slug, title, created_at) VALUES ($1, 'old-draft', 'Old Draft', $2)")
        .bind(Uuid::new_v4())
        .bind(now - Duration::days(30))
        .execute(&pool)
        .await
        .unwrap();

    for (status, date) in [
        ("PENDING", now - Duration::days(1)),
        ("CONFIRMED", now - Duration::hours(2)),
        ("CANCELLED", now - Duration::days(1)),
        ("PENDING", now + Duration::days(2)),
    ] {
        sqlx::query("INSERT INTO appointments (id, property_id, date, status) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(property)
            .bind(date)
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO leads (id, is_handled) VALUES ($1, TRUE), ($2, FALSE)")
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await
        .unwrap();

    let expired = store.expired_appointments(now).await.unwrap();
    let statuses: Vec<_> = expired.iter().map(|a| a.status.as_str()).collect();
    assert_eq!(statuses, ["PENDING", "CONFIRMED"]);
    assert!(expired.iter().all(|a| a.property == "Casa Sol"));

    let counts = store.site_counts(now - Duration::days(7)).await.unwrap();
    assert_eq!(counts.properties_total, 2);
    assert_eq!(counts.properties_published, 1);
    assert_eq!(counts.properties_new, 1);
    assert_eq!(counts.leads_total, 2);
    assert_eq!(counts.leads_handled, 1);
    assert_eq!(counts.appointments_total, 4);
    assert_eq!(counts.appointments_new, 4);
    assert_eq!(counts.users_total, 0);
}
