use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::model::{LogEntry, LogFilter, LogLevel, Pagination};
use crate::error::StoreError;
use crate::store::OpsDb;

/// Read-only summaries over the system log for dashboards.
#[derive(Clone)]
pub struct LogAggregator {
    db: Arc<dyn OpsDb>,
}

impl LogAggregator {
    pub fn new(db: Arc<dyn OpsDb>) -> Self {
        Self { db }
    }

    /// ERROR and CRITICAL entries from the last `within_hours`, newest first.
    pub async fn recent_errors(
        &self,
        within_hours: i64,
        limit: u32,
    ) -> Result<Vec<LogEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = LogFilter {
            levels: Some(vec![LogLevel::Error, LogLevel::Critical]),
            created_from: Some(Utc::now() - Duration::hours(within_hours)),
            pagination: Pagination::first(limit),
            ..LogFilter::default()
        };
        let (entries, _) = self.db.query_logs(&filter).await?;
        Ok(entries)
    }

    /// Levels without entries since `since` are absent, not zero.
    pub async fn counts_by_level(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<LogLevel, i64>, StoreError> {
        let rows = self.db.count_logs_by_level(since).await?;
        Ok(rows.into_iter().filter(|(_, n)| *n > 0).collect())
    }

    pub async fn total_count(&self) -> Result<i64, StoreError> {
        self.db.count_logs(None).await
    }

    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        self.db.count_logs(Some(since)).await
    }
}
