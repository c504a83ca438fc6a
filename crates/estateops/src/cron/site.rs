// Read models over the site's content tables, consumed by the scheduled jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const APPOINTMENT_PENDING: &str = "PENDING";
pub const APPOINTMENT_CONFIRMED: &str = "CONFIRMED";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredAppointment {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub status: String,
    pub property: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct SiteCounts {
    pub properties_total: i64,
    pub properties_published: i64,
    pub properties_new: i64,
    pub leads_total: i64,
    pub leads_new: i64,
    pub leads_handled: i64,
    pub appointments_total: i64,
    pub appointments_new: i64,
    pub users_total: i64,
}
