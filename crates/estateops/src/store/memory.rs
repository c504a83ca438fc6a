use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ActivityDb, JobRunDb, LogDb, OpsDb, SiteDb};
use crate::activity::{ActivityColumn, ActivityFilter, ActivityLog};
use crate::cron::model::{JobRun, JobRunFinish, JobRunStatus, NewJobRun};
use crate::cron::site::{ExpiredAppointment, SiteCounts, APPOINTMENT_CONFIRMED, APPOINTMENT_PENDING};
use crate::error::StoreError;
use crate::logs::model::{LogEntry, LogFilter, LogLevel};

/// Process-local store with the same semantics as [`super::PgOpsDb`].
///
/// Used by tests and by `opsctl --memory`. `set_available(false)` makes every
/// call fail with [`StoreError::Unavailable`] to simulate an outage.
#[derive(Debug, Default)]
pub struct MemoryOpsDb {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    logs: Vec<LogEntry>,
    runs: Vec<JobRun>,
    activity: Vec<ActivityLog>,
    appointments: Vec<ExpiredAppointment>,
    site_counts: SiteCounts,
}

impl MemoryOpsDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    /// Adds an appointment row (any date and status) for the appointment check.
    pub async fn add_appointment(&self, appointment: ExpiredAppointment) {
        self.state.write().await.appointments.push(appointment);
    }

    pub async fn set_site_counts(&self, counts: SiteCounts) {
        self.state.write().await.site_counts = counts;
    }

    /// Removes a job run row out from under its handle.
    pub async fn delete_job_run(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let before = state.runs.len();
        state.runs.retain(|r| r.id != id);
        state.runs.len() != before
    }

    pub async fn all_job_runs(&self) -> Vec<JobRun> {
        self.state.read().await.runs.clone()
    }

    pub async fn all_logs(&self) -> Vec<LogEntry> {
        self.state.read().await.logs.clone()
    }
}

fn newest_first_page<T: Clone>(
    mut items: Vec<T>,
    created_at: impl Fn(&T) -> (DateTime<Utc>, Uuid),
    offset: i64,
    limit: i64,
) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    let page = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (page, total)
}

#[async_trait]
impl LogDb for MemoryOpsDb {
    async fn insert_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<(Vec<LogEntry>, i64), StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let matching: Vec<LogEntry> = state
            .logs
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let p = filter.pagination;
        Ok(newest_first_page(
            matching,
            |e| (e.created_at, e.id),
            p.offset(),
            p.limit(),
        ))
    }

    async fn purge_logs(
        &self,
        older_than: DateTime<Utc>,
        levels: Option<&[LogLevel]>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.logs.len();
        state.logs.retain(|e| {
            let in_scope = levels.map_or(true, |ls| ls.contains(&e.level));
            !(e.created_at < older_than && in_scope)
        });
        Ok((before - state.logs.len()) as u64)
    }

    async fn count_logs_by_level(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(LogLevel, i64)>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts: HashMap<LogLevel, i64> = HashMap::new();
        for e in state.logs.iter().filter(|e| e.created_at >= since) {
            *counts.entry(e.level).or_insert(0) += 1;
        }
        let mut out: Vec<(LogLevel, i64)> = counts.into_iter().collect();
        out.sort_by_key(|(level, _)| *level);
        Ok(out)
    }

    async fn count_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let count = state
            .logs
            .iter()
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl JobRunDb for MemoryOpsDb {
    async fn insert_job_run(&self, run: &NewJobRun) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.runs.push(run.clone().into_run());
        Ok(())
    }

    async fn get_job_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn finish_job_run(&self, id: Uuid, finish: &JobRunFinish) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        match state
            .runs
            .iter_mut()
            .find(|r| r.id == id && r.status == JobRunStatus::Running)
        {
            Some(run) => {
                finish.apply(run);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_job_runs(&self, job_name: &str, limit: i64) -> Result<Vec<JobRun>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let matching: Vec<JobRun> = state
            .runs
            .iter()
            .filter(|r| r.job_name == job_name)
            .cloned()
            .collect();
        Ok(newest_first_page(matching, |r| (r.started_at, r.id), 0, limit).0)
    }

    async fn stale_job_runs(&self, started_before: DateTime<Utc>) -> Result<Vec<JobRun>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut stale: Vec<JobRun> = state
            .runs
            .iter()
            .filter(|r| r.status == JobRunStatus::Running && r.started_at < started_before)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.started_at);
        Ok(stale)
    }

    async fn purge_job_runs(&self, started_before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.runs.len();
        state.runs.retain(|r| r.started_at >= started_before);
        Ok((before - state.runs.len()) as u64)
    }
}

#[async_trait]
impl ActivityDb for MemoryOpsDb {
    async fn insert_activity(&self, log: ActivityLog) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.activity.push(log);
        Ok(())
    }

    async fn query_activity(
        &self,
        filter: &ActivityFilter,
    ) -> Result<(Vec<ActivityLog>, i64), StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let matching: Vec<ActivityLog> = state
            .activity
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        let p = filter.pagination;
        Ok(newest_first_page(
            matching,
            |l| (l.created_at, l.id),
            p.offset(),
            p.limit(),
        ))
    }

    async fn activity_values_by_frequency(
        &self,
        column: ActivityColumn,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for log in &state.activity {
            *counts.entry(column.value(log)).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        Ok(ranked.into_iter().map(|(v, _)| v.to_string()).collect())
    }

    async fn purge_activity(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.activity.len();
        state.activity.retain(|l| l.created_at >= older_than);
        Ok((before - state.activity.len()) as u64)
    }
}

#[async_trait]
impl SiteDb for MemoryOpsDb {
    async fn expired_appointments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAppointment>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut expired: Vec<ExpiredAppointment> = state
            .appointments
            .iter()
            .filter(|a| a.date < now)
            .filter(|a| a.status == APPOINTMENT_PENDING || a.status == APPOINTMENT_CONFIRMED)
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.date);
        Ok(expired)
    }

    async fn site_counts(&self, _since: DateTime<Utc>) -> Result<SiteCounts, StoreError> {
        self.check()?;
        Ok(self.state.read().await.site_counts.clone())
    }
}

#[async_trait]
impl OpsDb for MemoryOpsDb {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
