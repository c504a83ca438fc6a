use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [Self::Info, Self::Warn, Self::Error, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl FromStr for LogLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(UnknownVariant::new("level", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    ApiRequest,
    ApiError,
    SystemError,
    CronJob,
    Database,
    Auth,
    Performance,
    Security,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::ApiRequest => "API_REQUEST",
            LogType::ApiError => "API_ERROR",
            LogType::SystemError => "SYSTEM_ERROR",
            LogType::CronJob => "CRON_JOB",
            LogType::Database => "DATABASE",
            LogType::Auth => "AUTH",
            LogType::Performance => "PERFORMANCE",
            LogType::Security => "SECURITY",
        }
    }
}

impl FromStr for LogType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "API_REQUEST" => Ok(Self::ApiRequest),
            "API_ERROR" => Ok(Self::ApiError),
            "SYSTEM_ERROR" => Ok(Self::SystemError),
            "CRON_JOB" => Ok(Self::CronJob),
            "DATABASE" => Ok(Self::Database),
            "AUTH" => Ok(Self::Auth),
            "PERFORMANCE" => Ok(Self::Performance),
            "SECURITY" => Ok(Self::Security),
            other => Err(UnknownVariant::new("type", other)),
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {field} value: {value}")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// A persisted system event. Never updated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub message: String,
    pub source: Option<String>,

    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<i32>,
    pub response_time: Option<i64>,

    pub error_stack: Option<String>,
    pub error_name: Option<String>,

    pub user_email: Option<String>,
    pub user_id: Option<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,

    pub metadata: Option<Payload>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::logs::LogStore::record`]. Only level, type, and message are required.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogEntry {
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub message: String,
    pub source: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<i32>,
    pub response_time: Option<i64>,
    pub error_stack: Option<String>,
    pub error_name: Option<String>,
    pub user_email: Option<String>,
    pub user_id: Option<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Payload>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            level,
            log_type,
            message: message.into(),
            source: None,
            method: None,
            url: None,
            status_code: None,
            response_time: None,
            error_stack: None,
            error_name: None,
            user_email: None,
            user_id: None,
            locale: None,
            user_agent: None,
            ip_address: None,
            metadata: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn metadata(mut self, metadata: Payload) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn error(mut self, name: impl Into<String>, stack: Option<String>) -> Self {
        self.error_name = Some(name.into());
        self.error_stack = stack;
        self
    }

    pub fn into_entry(self, id: Uuid, created_at: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id,
            level: self.level,
            log_type: self.log_type,
            message: self.message,
            source: self.source,
            method: self.method,
            url: self.url,
            status_code: self.status_code,
            response_time: self.response_time,
            error_stack: self.error_stack,
            error_name: self.error_name,
            user_email: self.user_email,
            user_id: self.user_id,
            locale: self.locale,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-indexed.
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn first(page_size: u32) -> Self {
        Self::new(1, page_size)
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }

    pub fn pages_for(&self, total: i64) -> i64 {
        if total <= 0 {
            0
        } else {
            (total + self.page_size as i64 - 1) / self.page_size as i64
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    /// Restricts to any of these levels; combined with `level` when both are set.
    pub levels: Option<Vec<LogLevel>>,
    pub log_type: Option<LogType>,
    /// Case-insensitive substring match.
    pub source: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

impl LogFilter {
    /// In-memory form of the predicate the Postgres store builds in SQL.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.level.is_some_and(|l| l != entry.level) {
            return false;
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&entry.level) {
                return false;
            }
        }
        if self.log_type.is_some_and(|t| t != entry.log_type) {
            return false;
        }
        if let Some(needle) = &self.source {
            let needle = needle.to_lowercase();
            match &entry.source {
                Some(src) if src.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        if self.created_from.is_some_and(|from| entry.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| entry.created_at > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub total: i64,
    pub pagination: Pagination,
}

impl LogPage {
    pub fn pages(&self) -> i64 {
        self.pagination.pages_for(self.total)
    }
}
