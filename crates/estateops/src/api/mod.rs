use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{
        header::{CACHE_CONTROL, USER_AGENT},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::activity::{ActivityFilter, ActivityLogger, ActivityPage, DEFAULT_PER_PAGE};
use crate::config::Config;
use crate::cron::{JobExecutor, JobRun, JobRunTracker, JobRunner, JobStats, ScheduledJob};
use crate::dashboard::{DashboardReporter, HealthState, SystemStatus};
use crate::logs::{LogEntry, LogFilter, LogLevel, LogStore, LogType, Pagination};
use crate::payload::Payload;
use crate::store::OpsDb;

pub mod auth;
pub mod request_log;

const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;
const DEFAULT_HISTORY_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct ApiState {
    pub logs: LogStore,
    pub tracker: JobRunTracker,
    pub jobs: JobRunner,
    pub activity: ActivityLogger,
    pub dashboard: DashboardReporter,
    pub cron_secret: Option<String>,
    pub admin_token: Option<String>,
    pub request_logging: bool,
}

impl ApiState {
    pub fn new(db: Arc<dyn OpsDb>, config: &Config) -> Self {
        let tracker = JobRunTracker::new(db.clone());
        let executor = JobExecutor::new(tracker.clone());
        Self {
            logs: LogStore::new(db.clone()),
            jobs: JobRunner::new(
                db.clone(),
                executor,
                config.retention.clone(),
                config.stale_run_hours,
            ),
            tracker,
            activity: ActivityLogger::new(db.clone()),
            dashboard: DashboardReporter::new(db, config),
            cron_secret: config.cron_secret.clone(),
            admin_token: config.admin_token.clone(),
            request_logging: config.request_logging,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let admin = Router::new()
        .route("/admin-api/system-logs", get(system_logs))
        .route("/admin-api/system-status", get(system_status))
        .route("/admin-api/cron-jobs/:name/stats", get(cron_job_stats))
        .route("/admin-api/cron-jobs/:name/history", get(cron_job_history))
        .route("/admin-api/activity-logs", get(activity_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let cron = Router::new()
        .route("/cron/:name", get(run_cron_job))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_cron_secret,
        ));

    Router::new()
        .merge(admin)
        .merge(cron)
        .route("/system/log-error", post(log_client_error))
        .route("/health", get(health).post(health_with_body))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log::log_requests,
        ))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: msg.into() }))
}

fn internal_err(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "request failed");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

#[derive(Debug, Deserialize)]
pub struct SystemLogsQuery {
    pub level: Option<String>,
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    pub source: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsPagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct SystemLogsResponse {
    pub logs: Vec<LogEntry>,
    pub pagination: LogsPagination,
}

/// `None` for a missing, empty, or `ALL` value.
fn enum_param<T: std::str::FromStr>(raw: Option<&str>) -> Result<Option<T>, T::Err> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("ALL") => Ok(None),
        Some(v) => v.parse().map(Some),
    }
}

pub async fn system_logs(
    State(state): State<ApiState>,
    Query(q): Query<SystemLogsQuery>,
) -> Result<Json<SystemLogsResponse>, ApiError> {
    let level = enum_param::<LogLevel>(q.level.as_deref())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let log_type = enum_param::<LogType>(q.log_type.as_deref())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let pagination = Pagination::new(
        q.page.unwrap_or(1),
        q.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_PAGE_SIZE),
    );
    let filter = LogFilter {
        level,
        log_type,
        source: q.source.filter(|s| !s.is_empty()),
        pagination,
        ..LogFilter::default()
    };

    let page = state.logs.query(&filter).await.map_err(internal_err)?;
    let pages = page.pages();
    Ok(Json(SystemLogsResponse {
        logs: page.entries,
        pagination: LogsPagination {
            page: pagination.page,
            limit: pagination.page_size,
            total: page.total,
            pages,
        },
    }))
}

pub async fn system_status(State(state): State<ApiState>) -> Result<Json<SystemStatus>, ApiError> {
    state.dashboard.snapshot().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "failed to build system status");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch system status",
        )
    })
}

pub async fn cron_job_stats(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<JobStats>, ApiError> {
    let stats = state.tracker.stats(&name).await.map_err(internal_err)?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn cron_job_history(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<JobRun>>, ApiError> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_PAGE_SIZE as i64);
    let runs = state
        .tracker
        .history(&name, limit)
        .await
        .map_err(internal_err)?;
    Ok(Json(runs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub search: Option<String>,
    pub entity: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn activity_logs(
    State(state): State<ApiState>,
    Query(q): Query<ActivityQuery>,
) -> Result<Json<ActivityPage>, ApiError> {
    let not_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    let filter = ActivityFilter {
        search: not_empty(q.search),
        entity: not_empty(q.entity),
        action: not_empty(q.action),
        pagination: Pagination::new(
            q.page.unwrap_or(1),
            q.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PAGE_SIZE),
        ),
        ..ActivityFilter::default()
    }
    .with_dates(q.start_date, q.end_date);

    let page = state.activity.query(&filter).await.map_err(internal_err)?;
    Ok(Json(page))
}

pub async fn run_cron_job(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let Some(job) = ScheduledJob::find(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("unknown cron job: {name}")).into_response();
    };

    match state.jobs.run(job).await {
        Ok(result) => Json(json!({
            "success": true,
            "message": job.success_message,
            "result": result,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(job = job.name, error = ?e, "cron job failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Error report posted by browser error boundaries. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ClientErrorReport {
    pub message: Option<String>,
    pub stack: Option<String>,
    pub digest: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
}

/// Forwards a client-side error into the system log. Succeeds even when the
/// store is down; only a body that is not JSON is refused.
pub async fn log_client_error(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let report: ClientErrorReport = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": format!("invalid JSON body: {e}") })),
            )
                .into_response();
        }
    };

    let message = report.message.unwrap_or_else(|| "unknown error".to_string());
    let metadata = Payload::from_json(&json!({
        "digest": report.digest,
        "location": report.location,
        "userAgent": headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
    }));

    state
        .logs
        .system_error(
            format!("Client error: {message}"),
            Some(report.source.as_deref().unwrap_or("unknown")),
            "Error",
            report.stack,
            Some(metadata),
        )
        .await;

    Json(json!({ "success": true })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub detailed: bool,
}

pub async fn health(State(state): State<ApiState>, Query(q): Query<HealthQuery>) -> Response {
    health_response(&state, q.detailed).await
}

/// `POST /health` with an optional `{"detailed": bool}` body.
pub async fn health_with_body(
    State(state): State<ApiState>,
    body: Option<Json<HealthQuery>>,
) -> Response {
    let detailed = body.is_some_and(|Json(q)| q.detailed);
    health_response(&state, detailed).await
}

async fn health_response(state: &ApiState, detailed: bool) -> Response {
    let report = state.dashboard.health(detailed).await;
    let status = match report.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };

    let mut response = (status, Json(report)).into_response();
    response.headers_mut().insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}
