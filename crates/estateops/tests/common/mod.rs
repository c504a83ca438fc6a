#![allow(dead_code)]

use chrono::{DateTime, Utc};
use estateops::config::Config;
use estateops::cron::model::NewJobRun;
use estateops::logs::{LogEntry, LogLevel, LogType, NewLogEntry};
use estateops::api::ApiState;
use estateops::store::{JobRunDb, LogDb, MemoryOpsDb, OpsDb, PgOpsDb};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const CRON_SECRET: &str = "cron-test-secret";

pub fn memory_store() -> (Arc<MemoryOpsDb>, Arc<dyn OpsDb>) {
    let mem = Arc::new(MemoryOpsDb::new());
    let store: Arc<dyn OpsDb> = mem.clone();
    (mem, store)
}

pub fn test_config() -> Config {
    let mut cfg = Config::for_database("memory");
    cfg.admin_token = Some(ADMIN_TOKEN.to_string());
    cfg.cron_secret = Some(CRON_SECRET.to_string());
    cfg
}

pub fn test_state(store: Arc<dyn OpsDb>) -> ApiState {
    ApiState::new(store, &test_config())
}

/// Inserts an entry with an explicit timestamp, bypassing `LogStore::record`.
pub async fn seed_log<D: LogDb + ?Sized>(
    db: &D,
    level: LogLevel,
    log_type: LogType,
    source: Option<&str>,
    created_at: DateTime<Utc>,
) -> LogEntry {
    let mut input = NewLogEntry::new(level, log_type, format!("{level} from {source:?}"));
    input.source = source.map(str::to_string);
    let entry = input.into_entry(Uuid::new_v4(), created_at);
    db.insert_log(&entry).await.expect("seed log");
    entry
}

/// Inserts a RUNNING row with an explicit start time.
pub async fn seed_run<D: JobRunDb + ?Sized>(db: &D, job_name: &str, started_at: DateTime<Utc>) -> Uuid {
    let run = NewJobRun {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        metadata: None,
    };
    db.insert_job_run(&run).await.expect("seed run");
    run.id
}

/// Connects to TEST_DATABASE_URL, migrates, and empties every table.
/// Returns None when the variable is not set.
pub async fn setup_pg() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping Postgres test");
        return None;
    };

    let pool = estateops::db::make_pool(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    estateops::db::run_migrations(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            system_logs,
            cron_job_runs,
            activity_logs,
            appointments,
            leads,
            properties,
            users
        CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

pub fn pg_store(pool: PgPool) -> Arc<dyn OpsDb> {
    Arc::new(PgOpsDb::new(pool))
}
