use axum::{
    extract::{Request, State},
    http::{
        header::{ACCEPT_LANGUAGE, USER_AGENT},
        HeaderMap, HeaderName,
    },
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::ApiState;
use crate::logs::ApiRequestLog;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Paths that would only add noise to the system log.
const SKIPPED_PATHS: &[&str] = &["/health"];

/// Records an API_REQUEST entry per request. The write is spawned so the
/// response never waits on the log store.
pub async fn log_requests(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if !state.request_logging || SKIPPED_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let headers = req.headers();
    let user_agent = header_string(headers, &USER_AGENT);
    let locale = header_string(headers, &ACCEPT_LANGUAGE)
        .and_then(|v| v.split([',', ';']).next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty());
    let ip_address = client_ip(headers);

    let started = Instant::now();
    let response = next.run(req).await;

    let entry = ApiRequestLog {
        method,
        url,
        status_code: i32::from(response.status().as_u16()),
        response_time_ms: started.elapsed().as_millis() as i64,
        user_agent,
        locale,
        ip_address,
        ..ApiRequestLog::default()
    };
    let logs = state.logs.clone();
    tokio::spawn(async move {
        logs.api_request(entry).await;
    });

    response
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// First hop of `x-forwarded-for`, else `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_string(headers, &X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| header_string(headers, &X_REAL_IP))
}
