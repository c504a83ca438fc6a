// Runtime configuration, loaded once from the environment (and `.env` when present).

use chrono::{DateTime, Duration, Utc};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    pub cron_secret: Option<String>,
    pub admin_token: Option<String>,
    pub migrate_on_startup: bool,
    pub request_logging: bool,
    pub retention: RetentionConfig,
    pub stale_run_hours: Option<i64>,
    pub slow_db_threshold_ms: i64,
    pub deployment: DeploymentConfig,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub info_log_days: i64,
    pub activity_log_days: i64,
    pub job_run_days: i64,
}

/// Longest retention window accepted, in days.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Longest stale-run threshold accepted, in hours.
pub const MAX_STALE_RUN_HOURS: i64 = MAX_RETENTION_DAYS * 24;

impl RetentionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_days("INFO_LOG_RETENTION_DAYS", self.info_log_days)?;
        check_days("ACTIVITY_LOG_RETENTION_DAYS", self.activity_log_days)?;
        check_days("JOB_RUN_RETENTION_DAYS", self.job_run_days)?;
        Ok(())
    }
}

fn check_days(name: &str, days: i64) -> anyhow::Result<()> {
    anyhow::ensure!(
        (1..=MAX_RETENTION_DAYS).contains(&days),
        "{name} must be between 1 and {MAX_RETENTION_DAYS} days, got {days}"
    );
    Ok(())
}

/// `now` minus `days`, for retention deletes. Rejects windows outside 1..=MAX_RETENTION_DAYS.
pub fn days_before(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    check_days("retention", days)?;
    Ok(now - Duration::days(days))
}

/// Stale-run threshold as a duration. Rejects values outside 1..=MAX_STALE_RUN_HOURS.
pub fn stale_window(hours: i64) -> anyhow::Result<Duration> {
    anyhow::ensure!(
        (1..=MAX_STALE_RUN_HOURS).contains(&hours),
        "stale run threshold must be between 1 and {MAX_STALE_RUN_HOURS} hours, got {hours}"
    );
    Ok(Duration::hours(hours))
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            info_log_days: 30,
            activity_log_days: 90,
            job_run_days: 60,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeploymentConfig {
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub branch: Option<String>,
    pub deployed_at: Option<String>,
}

/// Variables the health check expects to see in a deployed process.
pub const REQUIRED_ENV_VARS: &[&str] = &["DATABASE_URL", "CRON_SECRET", "ADMIN_API_TOKEN"];

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let listen_addr = env_or_fallback("ESTATEOPS_LISTEN_ADDR", "LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let cron_secret = env_nonempty("CRON_SECRET");
        let admin_token = env_or_fallback("ADMIN_API_TOKEN", "ESTATEOPS_ADMIN_TOKEN");

        let migrate_on_startup = env_bool("ESTATEOPS_MIGRATE_ON_STARTUP").unwrap_or(false);
        let request_logging = env_bool("ESTATEOPS_REQUEST_LOGGING").unwrap_or(true);

        let defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            info_log_days: env_parse("INFO_LOG_RETENTION_DAYS").unwrap_or(defaults.info_log_days),
            activity_log_days: env_parse("ACTIVITY_LOG_RETENTION_DAYS")
                .unwrap_or(defaults.activity_log_days),
            job_run_days: env_parse("JOB_RUN_RETENTION_DAYS").unwrap_or(defaults.job_run_days),
        };
        retention.validate()?;

        let stale_run_hours = match env_nonempty("STALE_RUN_HOURS") {
            Some(v) => parse_optional_hours(&v)?,
            None => Some(6),
        };

        let slow_db_threshold_ms = env_parse("SLOW_DB_THRESHOLD_MS").unwrap_or(1000);

        let deployment = DeploymentConfig {
            commit_sha: env_nonempty("DEPLOY_COMMIT_SHA"),
            commit_message: env_nonempty("DEPLOY_COMMIT_MESSAGE"),
            branch: env_nonempty("DEPLOY_BRANCH"),
            deployed_at: env_nonempty("DEPLOYED_AT"),
        };

        Ok(Self {
            database_url,
            listen_addr,
            cron_secret,
            admin_token,
            migrate_on_startup,
            request_logging,
            retention,
            stale_run_hours,
            slow_db_threshold_ms,
            deployment,
        })
    }

    /// Config for tests and offline tooling: no secrets, default retention.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            listen_addr: "127.0.0.1:0".to_string(),
            cron_secret: None,
            admin_token: None,
            migrate_on_startup: false,
            request_logging: false,
            retention: RetentionConfig::default(),
            stale_run_hours: Some(6),
            slow_db_threshold_ms: 1000,
            deployment: DeploymentConfig::default(),
        }
    }

    pub fn missing_env_vars() -> Vec<&'static str> {
        missing_from(REQUIRED_ENV_VARS)
    }
}

/// The names in `vars` that are unset or blank in the environment.
pub fn missing_from(vars: &[&'static str]) -> Vec<&'static str> {
    vars.iter()
        .copied()
        .filter(|name| env_nonempty(name).is_none())
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    env_nonempty(primary).or_else(|| env_nonempty(fallback))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|s| s.trim().parse().ok())
}

fn parse_optional_hours(value: &str) -> anyhow::Result<Option<i64>> {
    let v = value.trim();
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return Ok(None);
    }
    let hours: i64 = v
        .parse()
        .map_err(|_| anyhow::anyhow!("STALE_RUN_HOURS must be a number of hours or 'off', got {v}"))?;
    stale_window(hours)?;
    Ok(Some(hours))
}
