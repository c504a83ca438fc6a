use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::model::{JobRun, JobRunFinish, JobRunHandle, JobRunStatus, JobStats, NewJobRun};
use crate::error::StoreError;
use crate::payload::Payload;
use crate::store::OpsDb;

/// Number of most recent runs `stats` looks at.
pub const STATS_WINDOW: i64 = 30;

pub const DEFAULT_COMPLETE_MESSAGE: &str = "Completed successfully";

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub message: Option<String>,
    pub records_processed: Option<i64>,
    pub metadata: Option<Payload>,
}

#[derive(Debug, Clone, Default)]
pub struct Failure {
    pub records_processed: Option<i64>,
    pub metadata: Option<Payload>,
}

/// Start/complete/fail bookkeeping for named scheduled jobs.
///
/// Writes are best effort: a store failure is reported through tracing and
/// never surfaces to the job being tracked.
#[derive(Clone)]
pub struct JobRunTracker {
    db: Arc<dyn OpsDb>,
}

impl JobRunTracker {
    pub fn new(db: Arc<dyn OpsDb>) -> Self {
        Self { db }
    }

    /// Inserts a RUNNING row. Overlapping starts for one job produce independent rows.
    pub async fn start(&self, job_name: &str, metadata: Option<Payload>) -> JobRunHandle {
        let run = NewJobRun::now(job_name, metadata);
        let persisted = match self.db.insert_job_run(&run).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, job = job_name, run_id = %run.id, "failed to record job start");
                false
            }
        };

        JobRunHandle {
            id: run.id,
            job_name: run.job_name,
            started_at: run.started_at,
            persisted,
        }
    }

    pub async fn complete(&self, handle: &JobRunHandle, completion: Completion) {
        let completed_at = Utc::now();
        let finish = JobRunFinish {
            status: JobRunStatus::Success,
            completed_at,
            duration_ms: elapsed_ms(handle.started_at, completed_at),
            message: Some(
                completion
                    .message
                    .unwrap_or_else(|| DEFAULT_COMPLETE_MESSAGE.to_string()),
            ),
            error: None,
            records_processed: completion.records_processed,
            metadata: completion.metadata,
        };
        self.finish(handle, finish).await;
    }

    /// message is `Failed: {err}`; error holds the full cause chain.
    pub async fn fail(&self, handle: &JobRunHandle, err: &anyhow::Error, failure: Failure) {
        let completed_at = Utc::now();
        let finish = JobRunFinish {
            status: JobRunStatus::Failed,
            completed_at,
            duration_ms: elapsed_ms(handle.started_at, completed_at),
            message: Some(format!("Failed: {err}")),
            error: Some(format!("{err:?}")),
            records_processed: failure.records_processed,
            metadata: failure.metadata,
        };
        self.finish(handle, finish).await;
    }

    async fn finish(&self, handle: &JobRunHandle, finish: JobRunFinish) {
        if !handle.persisted {
            tracing::warn!(
                job = %handle.job_name,
                run_id = %handle.id,
                status = %finish.status,
                "job run was never recorded; outcome not persisted"
            );
            return;
        }

        match self.db.finish_job_run(handle.id, &finish).await {
            Ok(true) => {
                tracing::debug!(job = %handle.job_name, run_id = %handle.id, status = %finish.status, "job run finished");
            }
            Ok(false) => {
                tracing::error!(
                    job = %handle.job_name,
                    run_id = %handle.id,
                    status = %finish.status,
                    "job run missing or already finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    job = %handle.job_name,
                    run_id = %handle.id,
                    status = %finish.status,
                    "failed to record job outcome"
                );
            }
        }
    }

    /// The run with the greatest `started_at` for `job_name`.
    pub async fn last_run(&self, job_name: &str) -> Result<Option<JobRun>, StoreError> {
        let mut runs = self.db.list_job_runs(job_name, 1).await?;
        Ok(runs.pop())
    }

    pub async fn history(&self, job_name: &str, limit: i64) -> Result<Vec<JobRun>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        self.db.list_job_runs(job_name, limit).await
    }

    pub async fn stats(&self, job_name: &str) -> Result<JobStats, StoreError> {
        let runs = self.db.list_job_runs(job_name, STATS_WINDOW).await?;
        Ok(JobStats::from_runs(&runs))
    }

    pub async fn get(&self, id: Uuid) -> Result<JobRun, StoreError> {
        self.db
            .get_job_run(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                resource: "job run",
                id: id.to_string(),
            })
    }

    /// Marks RUNNING rows started more than `older_than` ago as FAILED.
    /// Returns the ids of the rows that were closed.
    pub async fn reconcile_stale(&self, older_than: Duration) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(older_than) else {
            return Ok(Vec::new());
        };
        let stale = self.db.stale_job_runs(cutoff).await?;
        let hours = older_than.num_hours();

        let mut closed = Vec::with_capacity(stale.len());
        for run in stale {
            let reason = format!("abandoned after {hours}h without completion");
            let finish = JobRunFinish {
                status: JobRunStatus::Failed,
                completed_at: now,
                duration_ms: elapsed_ms(run.started_at, now),
                message: Some(format!("Failed: {reason}")),
                error: Some(reason),
                records_processed: None,
                metadata: None,
            };
            // a concurrent finish wins; the row is then no longer RUNNING
            if self.db.finish_job_run(run.id, &finish).await? {
                tracing::warn!(job = %run.job_name, run_id = %run.id, started_at = %run.started_at, "closed stale job run");
                closed.push(run.id);
            }
        }
        Ok(closed)
    }

    /// Deletes runs started before `started_before`, whatever their status.
    pub async fn prune(&self, started_before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.db.purge_job_runs(started_before).await
    }
}

fn elapsed_ms(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> i64 {
    (completed_at - started_at).num_milliseconds().max(0)
}
