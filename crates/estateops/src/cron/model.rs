use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::logs::model::UnknownVariant;
use crate::payload::Payload;

/// RUNNING is the only non-terminal state; SUCCESS and FAILED are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunStatus {
    Running,
    Success,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "RUNNING",
            JobRunStatus::Success => "SUCCESS",
            JobRunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobRunStatus::Running)
    }
}

impl FromStr for JobRunStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

impl fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds; only set together with `completed_at`.
    pub duration: Option<i64>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub records_processed: Option<i64>,
    pub metadata: Option<Payload>,
}

#[derive(Debug, Clone)]
pub struct NewJobRun {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub metadata: Option<Payload>,
}

impl NewJobRun {
    pub fn now(job_name: impl Into<String>, metadata: Option<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            started_at: Utc::now(),
            metadata,
        }
    }

    pub fn into_run(self) -> JobRun {
        JobRun {
            id: self.id,
            job_name: self.job_name,
            status: JobRunStatus::Running,
            started_at: self.started_at,
            completed_at: None,
            duration: None,
            message: None,
            error: None,
            records_processed: None,
            metadata: self.metadata,
        }
    }
}

/// The single terminal update applied to a RUNNING row.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone)]
pub struct JobRunFinish {
    pub status: JobRunStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub records_processed: Option<i64>,
    pub metadata: Option<Payload>,
}

impl JobRunFinish {
    pub fn apply(&self, run: &mut JobRun) {
        run.status = self.status;
        run.completed_at = Some(self.completed_at);
        run.duration = Some(self.duration_ms);
        if self.message.is_some() {
            run.message = self.message.clone();
        }
        if self.error.is_some() {
            run.error = self.error.clone();
        }
        if self.records_processed.is_some() {
            run.records_processed = self.records_processed;
        }
        if self.metadata.is_some() {
            run.metadata = self.metadata.clone();
        }
    }
}

/// Identifies a started run for its later finalization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunHandle {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    /// False when the RUNNING row could not be written; finalizing is then a logged no-op.
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRunSummary {
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub running: usize,
    pub success_rate: f64,
    pub avg_duration: i64,
    pub last_run: Option<LastRunSummary>,
}

impl JobStats {
    /// `runs` must be ordered newest first.
    pub fn from_runs(runs: &[JobRun]) -> Self {
        let total = runs.len();
        let count = |status: JobRunStatus| runs.iter().filter(|r| r.status == status).count();
        let successful = count(JobRunStatus::Success);
        let failed = count(JobRunStatus::Failed);
        let running = count(JobRunStatus::Running);

        let durations: Vec<i64> = runs
            .iter()
            .filter(|r| r.status.is_terminal())
            .filter_map(|r| r.duration)
            .collect();
        let avg_duration = if durations.is_empty() {
            0
        } else {
            (durations.iter().sum::<i64>() as f64 / durations.len() as f64).round() as i64
        };

        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total,
            successful,
            failed,
            running,
            success_rate,
            avg_duration,
            last_run: runs.first().map(|r| LastRunSummary {
                status: r.status,
                started_at: r.started_at,
                completed_at: r.completed_at,
                duration: r.duration,
                message: r.message.clone(),
            }),
        }
    }
}
