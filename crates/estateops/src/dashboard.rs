//! Point-in-time status for the admin dashboard and the health probe.
//!
//! Nothing here writes; every call recomposes the view from the store.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;

use crate::config::{self, Config, DeploymentConfig, REQUIRED_ENV_VARS};
use crate::cron::jobs::SCHEDULED_JOBS;
use crate::cron::model::JobRun;
use crate::cron::tracker::JobRunTracker;
use crate::error::StoreError;
use crate::logs::{LogAggregator, LogEntry, LogLevel};
use crate::store::OpsDb;

const RECENT_ERROR_HOURS: i64 = 24;
const RECENT_ERROR_LIMIT: u32 = 10;
const ERROR_COUNT_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub deployment: Deployment,
    pub database: DatabaseStatus,
    pub recent_errors: Vec<LogEntry>,
    pub cron_status: Vec<CronStatus>,
    pub system_info: SystemInfo,
    pub log_stats: LogStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub version: String,
    pub commit_message: String,
    pub branch: String,
    pub deployed_at: Option<String>,
}

impl Deployment {
    pub fn from_config(d: &DeploymentConfig) -> Self {
        Self {
            version: short_version(d.commit_sha.as_deref()),
            commit_message: d
                .commit_message
                .clone()
                .unwrap_or_else(|| "Development".to_string()),
            branch: d.branch.clone().unwrap_or_else(|| "local".to_string()),
            deployed_at: d.deployed_at.clone(),
        }
    }
}

/// First seven characters of the commit sha, or `dev`.
pub fn short_version(sha: Option<&str>) -> String {
    match sha {
        Some(s) if !s.is_empty() => s.chars().take(7).collect(),
        _ => "dev".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseHealth {
    Healthy,
    Slow,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    pub status: DatabaseHealth,
    /// Milliseconds; 0 when the probe failed.
    pub response_time: i64,
    #[serde(skip)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub name: &'static str,
    pub display_name: &'static str,
    pub schedule: &'static str,
    pub last_run: Option<JobRun>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    /// Seconds since the reporter was created.
    pub uptime: f64,
    pub node_runtime_version: String,
    pub platform: &'static str,
    pub memory: MemoryUsage,
}

/// Bytes. `used` and `total` are host memory, `rss` is this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
    pub rss: u64,
}

impl MemoryUsage {
    pub fn current() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let rss = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .map(|p| p.memory())
            .unwrap_or(0);

        Self {
            used: sys.used_memory(),
            total: sys.total_memory(),
            rss,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_logs: i64,
    pub last24h: i64,
    /// Levels with no entries in the last seven days are absent.
    pub error_counts: BTreeMap<LogLevel, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub database: DatabaseCheck,
    pub environment: EnvironmentCheck,
    pub system: SystemCheck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCheck {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<RecordCounts>,
}

/// Row counts reported by the detailed health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub properties: i64,
    pub users: i64,
    pub leads: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentCheck {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemCheck {
    pub status: CheckStatus,
    pub uptime: f64,
    pub node_runtime_version: String,
    pub platform: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
}

pub fn runtime_version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[derive(Clone)]
pub struct DashboardReporter {
    db: Arc<dyn OpsDb>,
    aggregator: LogAggregator,
    tracker: JobRunTracker,
    deployment: DeploymentConfig,
    slow_db_threshold_ms: i64,
    required_env: Vec<&'static str>,
    started: Instant,
}

impl DashboardReporter {
    pub fn new(db: Arc<dyn OpsDb>, config: &Config) -> Self {
        Self {
            aggregator: LogAggregator::new(db.clone()),
            tracker: JobRunTracker::new(db.clone()),
            db,
            deployment: config.deployment.clone(),
            slow_db_threshold_ms: config.slow_db_threshold_ms,
            required_env: REQUIRED_ENV_VARS.to_vec(),
            started: Instant::now(),
        }
    }

    /// Replaces the variables the health check requires.
    pub fn with_required_env(mut self, vars: Vec<&'static str>) -> Self {
        self.required_env = vars;
        self
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Times a trivial round trip to the store.
    pub async fn probe_database(&self) -> DatabaseStatus {
        let start = Instant::now();
        match self.db.ping().await {
            Ok(()) => {
                let response_time = start.elapsed().as_millis() as i64;
                let status = if response_time > self.slow_db_threshold_ms {
                    DatabaseHealth::Slow
                } else {
                    DatabaseHealth::Healthy
                };
                DatabaseStatus {
                    status,
                    response_time,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "database probe failed");
                DatabaseStatus {
                    status: DatabaseHealth::Error,
                    response_time: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn snapshot(&self) -> Result<SystemStatus, StoreError> {
        let database = self.probe_database().await;

        let now = Utc::now();
        let recent_errors = self
            .aggregator
            .recent_errors(RECENT_ERROR_HOURS, RECENT_ERROR_LIMIT)
            .await?;

        let mut cron_status = Vec::with_capacity(SCHEDULED_JOBS.len());
        for job in &SCHEDULED_JOBS {
            cron_status.push(CronStatus {
                name: job.name,
                display_name: job.display_name,
                schedule: job.schedule,
                last_run: self.tracker.last_run(job.name).await?,
            });
        }

        let log_stats = LogStats {
            total_logs: self.aggregator.total_count().await?,
            last24h: self
                .aggregator
                .count_since(now - Duration::hours(RECENT_ERROR_HOURS))
                .await?,
            error_counts: self
                .aggregator
                .counts_by_level(now - Duration::days(ERROR_COUNT_DAYS))
                .await?,
        };

        Ok(SystemStatus {
            deployment: Deployment::from_config(&self.deployment),
            database,
            recent_errors,
            cron_status,
            system_info: SystemInfo {
                uptime: self.uptime_secs(),
                node_runtime_version: runtime_version(),
                platform: std::env::consts::OS,
                memory: MemoryUsage::current(),
            },
            log_stats,
        })
    }

    /// Unhealthy when the store is unreachable; degraded when it is slow or
    /// required variables are missing.
    pub async fn health(&self, detailed: bool) -> HealthReport {
        let probe = self.probe_database().await;
        let mut status = HealthState::Healthy;

        let database = match probe.status {
            DatabaseHealth::Error => {
                status = HealthState::Unhealthy;
                DatabaseCheck {
                    status: CheckStatus::Fail,
                    response_time: None,
                    error: probe.error,
                    records: None,
                }
            }
            DatabaseHealth::Slow | DatabaseHealth::Healthy => {
                if probe.status == DatabaseHealth::Slow {
                    status = HealthState::Degraded;
                }
                let records = if detailed {
                    self.record_counts().await
                } else {
                    None
                };
                DatabaseCheck {
                    status: CheckStatus::Pass,
                    response_time: Some(probe.response_time),
                    error: None,
                    records,
                }
            }
        };

        let missing = config::missing_from(&self.required_env);
        let environment = if missing.is_empty() {
            EnvironmentCheck {
                status: CheckStatus::Pass,
                missing,
            }
        } else {
            if status == HealthState::Healthy {
                status = HealthState::Degraded;
            }
            EnvironmentCheck {
                status: CheckStatus::Warn,
                missing,
            }
        };

        HealthReport {
            status,
            timestamp: Utc::now(),
            version: short_version(self.deployment.commit_sha.as_deref()),
            checks: HealthChecks {
                database,
                environment,
                system: SystemCheck {
                    status: CheckStatus::Pass,
                    uptime: self.uptime_secs(),
                    node_runtime_version: runtime_version(),
                    platform: std::env::consts::OS,
                    memory: detailed.then(MemoryUsage::current),
                },
            },
        }
    }

    async fn record_counts(&self) -> Option<RecordCounts> {
        match self.db.site_counts(Utc::now()).await {
            Ok(c) => Some(RecordCounts {
                properties: c.properties_total,
                users: c.users_total,
                leads: c.leads_total,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "record counts unavailable");
                None
            }
        }
    }
}
