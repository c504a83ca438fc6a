//! Audit trail of admin actions on site content (who changed what, when).

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::logs::model::Pagination;
use crate::store::OpsDb;

pub mod action {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const UPLOAD: &str = "upload";
    pub const REORDER: &str = "reorder";
    pub const STATUS_CHANGE: &str = "status_change";
    pub const SUBMIT: &str = "submit";
}

pub mod entity {
    pub const PROPERTY: &str = "property";
    pub const PROPERTY_IMAGE: &str = "property_image";
    pub const LEAD: &str = "lead";
    pub const APPOINTMENT: &str = "appointment";
    pub const CONTACT: &str = "contact";
    pub const SETTINGS: &str = "settings";
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub user_email: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ActivityDetails {
    Text(String),
    Json(serde_json::Value),
}

impl ActivityDetails {
    fn into_text(self) -> String {
        match self {
            ActivityDetails::Text(s) => s,
            ActivityDetails::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Case-insensitive substring over action, entity, user email, and entity id.
    pub search: Option<String>,
    pub entity: Option<String>,
    pub action: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

impl ActivityFilter {
    /// Start of `start` through the last millisecond of `end`, both UTC calendar days.
    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.created_from = start.map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
        self.created_to = end
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)) - chrono::Duration::milliseconds(1));
        self
    }

    pub fn matches(&self, log: &ActivityLog) -> bool {
        if let Some(needle) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let hit = [&log.action, &log.entity, &log.user_email, &log.entity_id]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if self.entity.as_ref().is_some_and(|e| e != &log.entity) {
            return false;
        }
        if self.action.as_ref().is_some_and(|a| a != &log.action) {
            return false;
        }
        if self.created_from.is_some_and(|from| log.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| log.created_at > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPagination {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityPage {
    pub logs: Vec<ActivityLog>,
    pub pagination: ActivityPagination,
}

#[derive(Clone)]
pub struct ActivityLogger {
    db: Arc<dyn OpsDb>,
}

impl ActivityLogger {
    pub fn new(db: Arc<dyn OpsDb>) -> Self {
        Self { db }
    }

    /// Best effort: a failed write is reported through tracing and otherwise ignored.
    pub async fn log(
        &self,
        action: &str,
        entity: &str,
        entity_id: &str,
        user_email: &str,
        details: Option<ActivityDetails>,
    ) -> Option<Uuid> {
        let log = ActivityLog {
            id: Uuid::new_v4(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            user_email: user_email.to_string(),
            details: details.map(ActivityDetails::into_text),
            created_at: Utc::now(),
        };
        let id = log.id;

        match self.db.insert_activity(log).await {
            Ok(()) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, action, entity, entity_id, user_email, "failed to log activity");
                None
            }
        }
    }

    pub async fn query(&self, filter: &ActivityFilter) -> Result<ActivityPage, StoreError> {
        let (logs, total) = self.db.query_activity(filter).await?;
        let p = filter.pagination;
        Ok(ActivityPage {
            logs,
            pagination: ActivityPagination {
                page: p.page,
                per_page: p.page_size,
                total,
                total_pages: p.pages_for(total),
            },
        })
    }

    pub async fn unique_entities(&self) -> Result<Vec<String>, StoreError> {
        self.db.activity_values_by_frequency(ActivityColumn::Entity).await
    }

    pub async fn unique_actions(&self) -> Result<Vec<String>, StoreError> {
        self.db.activity_values_by_frequency(ActivityColumn::Action).await
    }

    pub async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.db.purge_activity(older_than).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityColumn {
    Entity,
    Action,
}

impl ActivityColumn {
    pub fn column(&self) -> &'static str {
        match self {
            ActivityColumn::Entity => "entity",
            ActivityColumn::Action => "action",
        }
    }

    pub fn value<'a>(&self, log: &'a ActivityLog) -> &'a str {
        match self {
            ActivityColumn::Entity => &log.entity,
            ActivityColumn::Action => &log.action,
        }
    }
}

pub const DEFAULT_PER_PAGE: u32 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_date_is_inclusive_through_the_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let f = ActivityFilter::default().with_dates(Some(day), Some(day));
        let from = f.created_from.unwrap();
        let to = f.created_to.unwrap();
        assert_eq!(from.to_rfc3339(), "2026-03-14T00:00:00+00:00");
        assert_eq!((to - from).num_milliseconds(), 24 * 3600 * 1000 - 1);
    }
}
