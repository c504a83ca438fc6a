use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ActivityDb, JobRunDb, LogDb, OpsDb, SiteDb};
use crate::activity::{ActivityColumn, ActivityFilter, ActivityLog};
use crate::cron::model::{JobRun, JobRunFinish, JobRunStatus, NewJobRun};
use crate::cron::site::{ExpiredAppointment, SiteCounts, APPOINTMENT_CONFIRMED, APPOINTMENT_PENDING};
use crate::error::StoreError;
use crate::logs::model::{LogEntry, LogFilter, LogLevel};
use crate::payload::Payload;

/// Postgres-backed store. Cheap to clone; all clones share one pool.
#[derive(Clone, Debug)]
pub struct PgOpsDb {
    pool: PgPool,
}

impl PgOpsDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    level: String,
    log_type: String,
    message: String,
    source: Option<String>,
    method: Option<String>,
    url: Option<String>,
    status_code: Option<i32>,
    response_time: Option<i64>,
    error_stack: Option<String>,
    error_name: Option<String>,
    user_email: Option<String>,
    user_id: Option<String>,
    locale: Option<String>,
    user_agent: Option<String>,
    ip_address: Option<String>,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = StoreError;

    fn try_from(r: LogRow) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            id: r.id,
            level: r.level.parse().map_err(|_| StoreError::invalid("level", &r.level))?,
            log_type: r
                .log_type
                .parse()
                .map_err(|_| StoreError::invalid("log_type", &r.log_type))?,
            message: r.message,
            source: r.source,
            method: r.method,
            url: r.url,
            status_code: r.status_code,
            response_time: r.response_time,
            error_stack: r.error_stack,
            error_name: r.error_name,
            user_email: r.user_email,
            user_id: r.user_id,
            locale: r.locale,
            user_agent: r.user_agent,
            ip_address: r.ip_address,
            metadata: r.metadata.map(Payload::from_raw),
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRunRow {
    id: Uuid,
    job_name: String,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    message: Option<String>,
    error: Option<String>,
    records_processed: Option<i64>,
    metadata: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = StoreError;

    fn try_from(r: JobRunRow) -> Result<Self, Self::Error> {
        Ok(JobRun {
            id: r.id,
            job_name: r.job_name,
            status: r.status.parse().map_err(|_| StoreError::invalid("status", &r.status))?,
            started_at: r.started_at,
            completed_at: r.completed_at,
            duration: r.duration_ms,
            message: r.message,
            error: r.error,
            records_processed: r.records_processed,
            metadata: r.metadata.map(Payload::from_raw),
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// `%needle%` for ILIKE, with LIKE wildcards in the needle escaped.
fn contains_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn level_texts(levels: &[LogLevel]) -> Vec<String> {
    levels.iter().map(|l| l.as_str().to_string()).collect()
}

fn push_log_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &LogFilter) {
    qb.push(" WHERE TRUE");
    if let Some(level) = filter.level {
        qb.push(" AND level = ").push_bind(level.as_str());
    }
    if let Some(levels) = &filter.levels {
        qb.push(" AND level = ANY(")
            .push_bind(level_texts(levels))
            .push(")");
    }
    if let Some(t) = filter.log_type {
        qb.push(" AND log_type = ").push_bind(t.as_str());
    }
    if let Some(source) = &filter.source {
        qb.push(" AND source ILIKE ")
            .push_bind(contains_pattern(source));
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

fn push_activity_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ActivityFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        qb.push(" AND (action ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR entity ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR user_email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR entity_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(entity) = &filter.entity {
        qb.push(" AND entity = ").push_bind(entity.clone());
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl LogDb for PgOpsDb {
    async fn insert_log(&self, e: &LogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO system_logs (
              id, level, log_type, message, source,
              method, url, status_code, response_time,
              error_stack, error_name,
              user_email, user_id, locale, user_agent, ip_address,
              metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(e.id)
        .bind(e.level.as_str())
        .bind(e.log_type.as_str())
        .bind(&e.message)
        .bind(&e.source)
        .bind(&e.method)
        .bind(&e.url)
        .bind(e.status_code)
        .bind(e.response_time)
        .bind(&e.error_stack)
        .bind(&e.error_name)
        .bind(&e.user_email)
        .bind(&e.user_id)
        .bind(&e.locale)
        .bind(&e.user_agent)
        .bind(&e.ip_address)
        .bind(e.metadata.as_ref().map(Payload::as_str))
        .bind(e.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<(Vec<LogEntry>, i64), StoreError> {
        let p = filter.pagination;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM system_logs");
        push_log_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(p.limit())
            .push(" OFFSET ")
            .push_bind(p.offset());
        let rows = qb.build_query_as::<LogRow>().fetch_all(&self.pool).await?;

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM system_logs");
        push_log_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok((convert_all(rows)?, total))
    }

    async fn purge_logs(
        &self,
        older_than: DateTime<Utc>,
        levels: Option<&[LogLevel]>,
    ) -> Result<u64, StoreError> {
        let deleted = match levels {
            Some(levels) => sqlx::query(
                r#"
                DELETE FROM system_logs
                WHERE created_at < $1
                  AND level = ANY($2)
                "#,
            )
            .bind(older_than)
            .bind(level_texts(levels))
            .execute(&self.pool)
            .await?
            .rows_affected(),
            None => sqlx::query("DELETE FROM system_logs WHERE created_at < $1")
                .bind(older_than)
                .execute(&self.pool)
                .await?
                .rows_affected(),
        };

        Ok(deleted)
    }

    async fn count_logs_by_level(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(LogLevel, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT level, COUNT(*)::bigint
            FROM system_logs
            WHERE created_at >= $1
            GROUP BY level
            ORDER BY level
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(level, count)| -> Result<(LogLevel, i64), StoreError> {
                let parsed: LogLevel = level
                    .parse()
                    .map_err(|_| StoreError::invalid("level", &level))?;
                Ok((parsed, count))
            })
            .collect()
    }

    async fn count_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError> {
        let count: i64 = match since {
            Some(since) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM system_logs WHERE created_at >= $1")
                    .bind(since)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM system_logs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}

#[async_trait]
impl JobRunDb for PgOpsDb {
    async fn insert_job_run(&self, run: &NewJobRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cron_job_runs (id, job_name, status, started_at, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(&run.job_name)
        .bind(JobRunStatus::Running.as_str())
        .bind(run.started_at)
        .bind(run.metadata.as_ref().map(Payload::as_str))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        let row = sqlx::query_as::<_, JobRunRow>("SELECT * FROM cron_job_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRun::try_from).transpose()
    }

    async fn finish_job_run(&self, id: Uuid, f: &JobRunFinish) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE cron_job_runs
            SET status = $2,
                completed_at = $3,
                duration_ms = $4,
                message = COALESCE($5, message),
                error = COALESCE($6, error),
                records_processed = COALESCE($7, records_processed),
                metadata = COALESCE($8, metadata)
            WHERE id = $1
              AND status = $9
            "#,
        )
        .bind(id)
        .bind(f.status.as_str())
        .bind(f.completed_at)
        .bind(f.duration_ms)
        .bind(&f.message)
        .bind(&f.error)
        .bind(f.records_processed)
        .bind(f.metadata.as_ref().map(Payload::as_str))
        .bind(JobRunStatus::Running.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn list_job_runs(&self, job_name: &str, limit: i64) -> Result<Vec<JobRun>, StoreError> {
        let rows = sqlx::query_as::<_, JobRunRow>(
            r#"
            SELECT *
            FROM cron_job_runs
            WHERE job_name = $1
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(job_name)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn stale_job_runs(&self, started_before: DateTime<Utc>) -> Result<Vec<JobRun>, StoreError> {
        let rows = sqlx::query_as::<_, JobRunRow>(
            r#"
            SELECT *
            FROM cron_job_runs
            WHERE status = $1
              AND started_at < $2
            ORDER BY started_at ASC
            "#,
        )
        .bind(JobRunStatus::Running.as_str())
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn purge_job_runs(&self, started_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM cron_job_runs WHERE started_at < $1")
            .bind(started_before)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl ActivityDb for PgOpsDb {
    async fn insert_activity(&self, log: ActivityLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (id, action, entity, entity_id, user_email, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(&log.action)
        .bind(&log.entity)
        .bind(&log.entity_id)
        .bind(&log.user_email)
        .bind(&log.details)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_activity(
        &self,
        filter: &ActivityFilter,
    ) -> Result<(Vec<ActivityLog>, i64), StoreError> {
        let p = filter.pagination;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM activity_logs");
        push_activity_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(p.limit())
            .push(" OFFSET ")
            .push_bind(p.offset());
        let logs = qb
            .build_query_as::<ActivityLog>()
            .fetch_all(&self.pool)
            .await?;

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM activity_logs");
        push_activity_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok((logs, total))
    }

    async fn activity_values_by_frequency(
        &self,
        column: ActivityColumn,
    ) -> Result<Vec<String>, StoreError> {
        // column comes from a closed enum, never from input
        let sql = format!(
            "SELECT {col} FROM activity_logs GROUP BY {col} ORDER BY COUNT(*) DESC, {col} ASC",
            col = column.column()
        );
        let values = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }

    async fn purge_activity(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM activity_logs WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl SiteDb for PgOpsDb {
    async fn expired_appointments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAppointment>, StoreError> {
        let rows = sqlx::query_as::<_, ExpiredAppointment>(
            r#"
            SELECT a.id, a.date, a.status, p.title AS property
            FROM appointments a
            JOIN properties p ON p.id = a.property_id
            WHERE a.date < $1
              AND a.status = ANY($2)
            ORDER BY a.date ASC
            "#,
        )
        .bind(now)
        .bind(vec![
            APPOINTMENT_PENDING.to_string(),
            APPOINTMENT_CONFIRMED.to_string(),
        ])
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn site_counts(&self, since: DateTime<Utc>) -> Result<SiteCounts, StoreError> {
        let counts = sqlx::query_as::<_, SiteCounts>(
            r#"
            SELECT
              (SELECT COUNT(*) FROM properties)                              AS properties_total,
              (SELECT COUNT(*) FROM properties WHERE is_published)           AS properties_published,
              (SELECT COUNT(*) FROM properties WHERE created_at >= $1)       AS properties_new,
              (SELECT COUNT(*) FROM leads)                                   AS leads_total,
              (SELECT COUNT(*) FROM leads WHERE created_at >= $1)            AS leads_new,
              (SELECT COUNT(*) FROM leads WHERE is_handled)                  AS leads_handled,
              (SELECT COUNT(*) FROM appointments)                            AS appointments_total,
              (SELECT COUNT(*) FROM appointments WHERE created_at >= $1)     AS appointments_new,
              (SELECT COUNT(*) FROM users)                                   AS users_total
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }
}

#[async_trait]
impl OpsDb for PgOpsDb {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
