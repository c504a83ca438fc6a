use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::model::{LogEntry, LogFilter, LogLevel, LogPage, LogType, NewLogEntry};
use crate::cron::model::JobRunStatus;
use crate::error::StoreError;
use crate::payload::Payload;
use crate::store::OpsDb;

/// Outcome of a best-effort write. Callers may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Persisted(Uuid),
    /// The store rejected the write; the entry went to the console sink instead.
    Degraded,
    /// The entry had no message and was not written anywhere but the console sink.
    Rejected,
}

#[derive(Clone)]
pub struct LogStore {
    db: Arc<dyn OpsDb>,
}

impl LogStore {
    pub fn new(db: Arc<dyn OpsDb>) -> Self {
        Self { db }
    }

    /// Persists an entry. Never fails: on any store error the entry is
    /// written to the tracing sink and `Recorded::Degraded` is returned.
    pub async fn record(&self, mut input: NewLogEntry) -> Recorded {
        if input.message.trim().is_empty() {
            tracing::warn!(
                log_level = %input.level,
                log_type = %input.log_type,
                source = input.source.as_deref().unwrap_or(""),
                "system log entry without message was dropped"
            );
            return Recorded::Rejected;
        }

        if let Some(meta) = input.metadata.take() {
            input.metadata = Some(sanitize_payload(meta));
        }

        let entry = input.into_entry(Uuid::new_v4(), Utc::now());
        match self.db.insert_log(&entry).await {
            Ok(()) => Recorded::Persisted(entry.id),
            Err(e) => {
                fallback_sink(&entry, &e);
                Recorded::Degraded
            }
        }
    }

    pub async fn query(&self, filter: &LogFilter) -> Result<LogPage, StoreError> {
        let (entries, total) = self.db.query_logs(filter).await?;
        Ok(LogPage {
            entries,
            total,
            pagination: filter.pagination,
        })
    }

    /// Deletes entries created strictly before `older_than`; `levels` narrows the purge.
    pub async fn purge(
        &self,
        older_than: DateTime<Utc>,
        levels: Option<&[LogLevel]>,
    ) -> Result<u64, StoreError> {
        let deleted = self.db.purge_logs(older_than, levels).await?;
        tracing::debug!(deleted, %older_than, "purged system logs");
        Ok(deleted)
    }

    pub async fn api_request(&self, req: ApiRequestLog) -> Recorded {
        let level = level_for_status(req.status_code);
        let mut entry = NewLogEntry::new(
            level,
            LogType::ApiRequest,
            format!(
                "{} {} - {} ({}ms)",
                req.method, req.url, req.status_code, req.response_time_ms
            ),
        )
        .source(req.url.clone());
        entry.method = Some(req.method);
        entry.url = Some(req.url);
        entry.status_code = Some(req.status_code);
        entry.response_time = Some(req.response_time_ms);
        entry.user_email = req.user_email;
        entry.locale = req.locale;
        entry.user_agent = req.user_agent;
        entry.ip_address = req.ip_address;
        entry.metadata = req.metadata;
        self.record(entry).await
    }

    pub async fn api_error(
        &self,
        method: &str,
        url: &str,
        error: &anyhow::Error,
        status_code: Option<i32>,
    ) -> Recorded {
        let mut entry = NewLogEntry::new(LogLevel::Error, LogType::ApiError, error.to_string())
            .source(url)
            .error(error_name(error), Some(error_stack(error)));
        entry.method = Some(method.to_string());
        entry.url = Some(url.to_string());
        entry.status_code = Some(status_code.unwrap_or(500));
        self.record(entry).await
    }

    pub async fn system_error(
        &self,
        message: impl Into<String>,
        source: Option<&str>,
        error_name: &str,
        error_stack: Option<String>,
        metadata: Option<Payload>,
    ) -> Recorded {
        let mut entry = NewLogEntry::new(LogLevel::Error, LogType::SystemError, message)
            .error(error_name, error_stack);
        entry.source = source.map(str::to_string);
        entry.metadata = metadata;
        self.record(entry).await
    }

    /// A CRON_JOB entry: ERROR when the run failed, INFO otherwise.
    pub async fn cron_job(&self, run: CronLog<'_>) -> Recorded {
        let level = match run.status {
            JobRunStatus::Failed => LogLevel::Error,
            JobRunStatus::Running | JobRunStatus::Success => LogLevel::Info,
        };
        let message = run
            .message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Cron job {} - {}", run.job_name, run.status));

        let mut meta = match run.metadata {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other.clone());
                map
            }
            None => serde_json::Map::new(),
        };
        meta.insert("recordsProcessed".into(), json!(run.records_processed));
        meta.insert("status".into(), json!(run.status));

        let mut entry = NewLogEntry::new(level, LogType::CronJob, message)
            .source(run.job_name)
            .metadata(Payload::from_json(&Value::Object(meta)));
        if let Some(err) = run.error {
            entry = entry.error(error_name(err), Some(error_stack(err)));
        }
        entry.response_time = run.duration_ms;
        self.record(entry).await
    }

    /// PERFORMANCE entry; WARN above three seconds.
    pub async fn performance(
        &self,
        message: impl Into<String>,
        source: &str,
        response_time_ms: i64,
        metadata: Option<Payload>,
    ) -> Recorded {
        let level = if response_time_ms > SLOW_RESPONSE_MS {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        let mut entry = NewLogEntry::new(level, LogType::Performance, message).source(source);
        entry.response_time = Some(response_time_ms);
        entry.metadata = metadata;
        self.record(entry).await
    }

    pub async fn security(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        user_email: Option<String>,
        ip_address: Option<String>,
        metadata: Option<Payload>,
    ) -> Recorded {
        let mut entry = NewLogEntry::new(level, LogType::Security, message);
        entry.user_email = user_email;
        entry.ip_address = ip_address;
        entry.metadata = metadata;
        self.record(entry).await
    }

    pub async fn database(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        error: Option<&anyhow::Error>,
        metadata: Option<Payload>,
    ) -> Recorded {
        let mut entry = NewLogEntry::new(level, LogType::Database, message);
        if let Some(err) = error {
            entry = entry.error(error_name(err), Some(error_stack(err)));
        }
        entry.metadata = metadata;
        self.record(entry).await
    }
}

pub const SLOW_RESPONSE_MS: i64 = 3000;

#[derive(Debug, Clone, Default)]
pub struct ApiRequestLog {
    pub method: String,
    pub url: String,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub user_email: Option<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Payload>,
}

#[derive(Debug, Clone, Copy)]
pub struct CronLog<'a> {
    pub job_name: &'a str,
    pub status: JobRunStatus,
    pub message: Option<&'a str>,
    pub error: Option<&'a anyhow::Error>,
    pub duration_ms: Option<i64>,
    pub records_processed: Option<i64>,
    pub metadata: Option<&'a Value>,
}

impl<'a> CronLog<'a> {
    pub fn new(job_name: &'a str, status: JobRunStatus) -> Self {
        Self {
            job_name,
            status,
            message: None,
            error: None,
            duration_ms: None,
            records_processed: None,
            metadata: None,
        }
    }
}

pub fn level_for_status(status_code: i32) -> LogLevel {
    if status_code >= 500 {
        LogLevel::Error
    } else if status_code >= 400 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    }
}

/// Type name of the root cause, read from its `Debug` output; `Error` when unknown.
pub fn error_name(err: &anyhow::Error) -> String {
    err.chain()
        .last()
        .map(|root| {
            let dbg = format!("{root:?}");
            dbg.split(|c: char| !c.is_alphanumeric() && c != '_')
                .next()
                .filter(|s| !s.is_empty() && s.chars().next().is_some_and(char::is_uppercase))
                .unwrap_or("Error")
                .to_string()
        })
        .unwrap_or_else(|| "Error".to_string())
}

/// The full cause chain (and backtrace when captured).
pub fn error_stack(err: &anyhow::Error) -> String {
    format!("{err:?}")
}

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwordhash",
    "token",
    "secret",
    "apikey",
    "authorization",
];

pub const REDACTED: &str = "[REDACTED]";

/// Recursively replaces values stored under credential-like keys.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let lower = k.to_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, sanitize(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

fn sanitize_payload(payload: Payload) -> Payload {
    match payload.decode::<Value>() {
        Ok(v) => Payload::from_json(&sanitize(v)),
        Err(_) => payload,
    }
}

fn fallback_sink(entry: &LogEntry, err: &StoreError) {
    tracing::error!(
        error = %err,
        log_level = %entry.level,
        log_type = %entry.log_type,
        log_message = %entry.message,
        source = entry.source.as_deref().unwrap_or(""),
        url = entry.url.as_deref().unwrap_or(""),
        status_code = entry.status_code.unwrap_or_default(),
        error_name = entry.error_name.as_deref().unwrap_or(""),
        error_stack = entry.error_stack.as_deref().unwrap_or(""),
        metadata = entry.metadata.as_ref().map(Payload::as_str).unwrap_or(""),
        "failed to write system log"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_levels() {
        assert_eq!(level_for_status(200), LogLevel::Info);
        assert_eq!(level_for_status(302), LogLevel::Info);
        assert_eq!(level_for_status(401), LogLevel::Warn);
        assert_eq!(level_for_status(404), LogLevel::Warn);
        assert_eq!(level_for_status(500), LogLevel::Error);
        assert_eq!(level_for_status(503), LogLevel::Error);
    }

    #[test]
    fn sanitize_redacts_nested_credentials() {
        let input = json!({
            "email": "a@b.c",
            "Password": "hunter2",
            "nested": {"apiKey": "k", "ok": 1, "list": [{"authToken": "t"}]},
        });
        let out = sanitize(input);
        assert_eq!(out["email"], "a@b.c");
        assert_eq!(out["Password"], REDACTED);
        assert_eq!(out["nested"]["apiKey"], REDACTED);
        assert_eq!(out["nested"]["ok"], 1);
        assert_eq!(out["nested"]["list"][0]["authToken"], REDACTED);
    }

    #[test]
    fn stack_includes_cause_chain() {
        let err = anyhow::anyhow!("connection refused").context("db down");
        let stack = error_stack(&err);
        assert!(stack.contains("db down"));
        assert!(stack.contains("connection refused"));
    }
}
