//! The system log: best-effort writes, filtered reads, retention, and summaries.

pub mod model;

mod aggregator;
mod store;

pub use aggregator::LogAggregator;
pub use model::{LogEntry, LogFilter, LogLevel, LogPage, LogType, NewLogEntry, Pagination};
pub use store::{
    error_name, error_stack, level_for_status, sanitize, ApiRequestLog, CronLog, LogStore,
    Recorded, REDACTED, SLOW_RESPONSE_MS,
};
