use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::executor::{JobExecutor, JobOutput};
use super::site::{ExpiredAppointment, APPOINTMENT_CONFIRMED, APPOINTMENT_PENDING};
use crate::activity::ActivityLogger;
use crate::config::{self, RetentionConfig};
use crate::logs::{LogLevel, LogStore, LogType, NewLogEntry};
use crate::payload::Payload;
use crate::store::OpsDb;

pub const CLEANUP_LOGS: &str = "cleanup-logs";
pub const CHECK_APPOINTMENTS: &str = "check-appointments";
pub const WEEKLY_ANALYTICS: &str = "weekly-analytics";

/// A job triggered over HTTP by an external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub name: &'static str,
    pub display_name: &'static str,
    pub schedule: &'static str,
    #[serde(skip)]
    pub success_message: &'static str,
}

pub const SCHEDULED_JOBS: [ScheduledJob; 3] = [
    ScheduledJob {
        name: CLEANUP_LOGS,
        display_name: "Log Cleanup",
        schedule: "Daily at 2 AM UTC",
        success_message: "Log cleanup completed",
    },
    ScheduledJob {
        name: CHECK_APPOINTMENTS,
        display_name: "Appointment Check",
        schedule: "Daily at 8 AM UTC",
        success_message: "Appointment check completed",
    },
    ScheduledJob {
        name: WEEKLY_ANALYTICS,
        display_name: "Weekly Analytics",
        schedule: "Sunday at 12 AM UTC",
        success_message: "Weekly analytics snapshot generated",
    },
];

impl ScheduledJob {
    pub fn find(name: &str) -> Option<&'static ScheduledJob> {
        SCHEDULED_JOBS.iter().find(|job| job.name == name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub activity_logs: u64,
    pub system_logs: u64,
    pub cron_logs: u64,
    /// RUNNING rows closed as abandoned; not part of `total`.
    pub stale_runs: u64,
    pub total: u64,
}

impl JobOutput for CleanupReport {
    fn records_processed(&self) -> Option<i64> {
        i64::try_from(self.total).ok()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentReport {
    pub expired_pending: usize,
    pub expired_confirmed: usize,
    pub total: usize,
    pub appointments: Vec<ExpiredAppointment>,
}

impl JobOutput for AppointmentReport {
    fn records_processed(&self) -> Option<i64> {
        i64::try_from(self.total).ok()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySnapshot {
    pub week_ending: DateTime<Utc>,
    pub properties: PropertyFigures,
    pub leads: LeadFigures,
    pub appointments: AppointmentFigures,
    pub users: UserFigures,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFigures {
    pub total: i64,
    pub published: i64,
    pub new_this_week: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadFigures {
    pub total: i64,
    pub new_this_week: i64,
    pub handled: i64,
    /// Percentage with two decimals; 0 when there are no leads.
    pub handled_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFigures {
    pub total: i64,
    pub new_this_week: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserFigures {
    pub total: i64,
}

impl JobOutput for WeeklySnapshot {}

pub fn handled_rate(handled: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (handled as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Bodies of the scheduled jobs, each wrapped in one executor call.
#[derive(Clone)]
pub struct JobRunner {
    db: Arc<dyn OpsDb>,
    logs: LogStore,
    activity: ActivityLogger,
    executor: JobExecutor,
    retention: RetentionConfig,
    stale_run_hours: Option<i64>,
}

impl JobRunner {
    pub fn new(
        db: Arc<dyn OpsDb>,
        executor: JobExecutor,
        retention: RetentionConfig,
        stale_run_hours: Option<i64>,
    ) -> Self {
        Self {
            logs: LogStore::new(db.clone()),
            activity: ActivityLogger::new(db.clone()),
            db,
            executor,
            retention,
            stale_run_hours: stale_run_hours.filter(|h| *h > 0),
        }
    }

    /// Runs `job` through the executor and returns its serialized result.
    pub async fn run(&self, job: &ScheduledJob) -> anyhow::Result<Value> {
        match job.name {
            CLEANUP_LOGS => {
                let report = self
                    .executor
                    .execute(CLEANUP_LOGS, None, || self.cleanup_logs())
                    .await?;
                Ok(serde_json::to_value(report)?)
            }
            CHECK_APPOINTMENTS => {
                let report = self
                    .executor
                    .execute(CHECK_APPOINTMENTS, None, || self.check_appointments())
                    .await?;
                Ok(serde_json::to_value(report)?)
            }
            WEEKLY_ANALYTICS => {
                let snapshot = self
                    .executor
                    .execute(WEEKLY_ANALYTICS, None, || self.weekly_analytics())
                    .await?;
                Ok(serde_json::to_value(snapshot)?)
            }
            other => anyhow::bail!("no body registered for job {other}"),
        }
    }

    pub async fn cleanup_logs(&self) -> anyhow::Result<CleanupReport> {
        let now = Utc::now();
        let r = &self.retention;

        // resolve every window before deleting anything
        let activity_cutoff = config::days_before(now, r.activity_log_days)?;
        let info_cutoff = config::days_before(now, r.info_log_days)?;
        let run_cutoff = config::days_before(now, r.job_run_days)?;
        let stale_window = self.stale_run_hours.map(config::stale_window).transpose()?;

        let activity_logs = self.activity.purge(activity_cutoff).await?;

        // WARN and above are kept past the INFO horizon
        let system_logs = self
            .logs
            .purge(info_cutoff, Some(&[LogLevel::Info][..]))
            .await?;

        let cron_logs = self
            .executor
            .tracker()
            .prune(run_cutoff)
            .await?;

        let stale_runs = match stale_window {
            Some(window) => self
                .executor
                .tracker()
                .reconcile_stale(window)
                .await?
                .len() as u64,
            None => 0,
        };

        Ok(CleanupReport {
            activity_logs,
            system_logs,
            cron_logs,
            stale_runs,
            total: activity_logs + system_logs + cron_logs,
        })
    }

    pub async fn check_appointments(&self) -> anyhow::Result<AppointmentReport> {
        let appointments = self.db.expired_appointments(Utc::now()).await?;
        let with_status = |s: &str| appointments.iter().filter(|a| a.status == s).count();

        Ok(AppointmentReport {
            expired_pending: with_status(APPOINTMENT_PENDING),
            expired_confirmed: with_status(APPOINTMENT_CONFIRMED),
            total: appointments.len(),
            appointments,
        })
    }

    pub async fn weekly_analytics(&self) -> anyhow::Result<WeeklySnapshot> {
        let now = Utc::now();
        let c = self.db.site_counts(now - Duration::days(7)).await?;

        let snapshot = WeeklySnapshot {
            week_ending: now,
            properties: PropertyFigures {
                total: c.properties_total,
                published: c.properties_published,
                new_this_week: c.properties_new,
            },
            leads: LeadFigures {
                total: c.leads_total,
                new_this_week: c.leads_new,
                handled: c.leads_handled,
                handled_rate: handled_rate(c.leads_handled, c.leads_total),
            },
            appointments: AppointmentFigures {
                total: c.appointments_total,
                new_this_week: c.appointments_new,
            },
            users: UserFigures {
                total: c.users_total,
            },
        };

        let entry = NewLogEntry::new(
            LogLevel::Info,
            LogType::CronJob,
            "Weekly analytics snapshot generated",
        )
        .source(WEEKLY_ANALYTICS)
        .metadata(Payload::encode(&snapshot)?);
        self.logs.record(entry).await;

        Ok(snapshot)
    }
}
