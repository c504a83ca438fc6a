use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::{ActivityColumn, ActivityFilter, ActivityLog};
use crate::cron::model::{JobRun, JobRunFinish, NewJobRun};
use crate::cron::site::{ExpiredAppointment, SiteCounts};
use crate::error::StoreError;
use crate::logs::model::{LogEntry, LogFilter, LogLevel};

mod memory;
mod postgres;

pub use memory::MemoryOpsDb;
pub use postgres::PgOpsDb;

#[async_trait]
pub trait LogDb: Send + Sync + 'static {
    async fn insert_log(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Page of matching entries, newest first, plus the total match count.
    async fn query_logs(&self, filter: &LogFilter) -> Result<(Vec<LogEntry>, i64), StoreError>;

    /// Deletes entries created strictly before `older_than`, optionally only at `levels`.
    async fn purge_logs(
        &self,
        older_than: DateTime<Utc>,
        levels: Option<&[LogLevel]>,
    ) -> Result<u64, StoreError>;

    /// Levels with no entries are absent from the result.
    async fn count_logs_by_level(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(LogLevel, i64)>, StoreError>;

    async fn count_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait JobRunDb: Send + Sync + 'static {
    async fn insert_job_run(&self, run: &NewJobRun) -> Result<(), StoreError>;

    async fn get_job_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError>;

    /// Applies `finish` only if the row is still RUNNING.
    /// Returns false when no RUNNING row with `id` exists.
    async fn finish_job_run(&self, id: Uuid, finish: &JobRunFinish) -> Result<bool, StoreError>;

    /// Newest first by `started_at`.
    async fn list_job_runs(&self, job_name: &str, limit: i64) -> Result<Vec<JobRun>, StoreError>;

    /// RUNNING rows started before the cutoff, oldest first.
    async fn stale_job_runs(&self, started_before: DateTime<Utc>) -> Result<Vec<JobRun>, StoreError>;

    async fn purge_job_runs(&self, started_before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ActivityDb: Send + Sync + 'static {
    async fn insert_activity(&self, log: ActivityLog) -> Result<(), StoreError>;

    async fn query_activity(
        &self,
        filter: &ActivityFilter,
    ) -> Result<(Vec<ActivityLog>, i64), StoreError>;

    /// Distinct values of `column`, most frequent first.
    async fn activity_values_by_frequency(
        &self,
        column: ActivityColumn,
    ) -> Result<Vec<String>, StoreError>;

    async fn purge_activity(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SiteDb: Send + Sync + 'static {
    /// Appointments dated before `now` that are still PENDING or CONFIRMED.
    async fn expired_appointments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAppointment>, StoreError>;

    /// Totals, with `*_new` fields counting rows created at or after `since`.
    async fn site_counts(&self, since: DateTime<Utc>) -> Result<SiteCounts, StoreError>;
}

/// The complete store interface, passed around as `Arc<dyn OpsDb>`.
#[async_trait]
pub trait OpsDb: LogDb + JobRunDb + ActivityDb + SiteDb {
    /// Trivial round trip used by health probes.
    async fn ping(&self) -> Result<(), StoreError>;
}
