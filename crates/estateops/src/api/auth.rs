use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::{ApiState, ErrorBody};

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
}

/// True only when a secret is configured and the header carries exactly it.
pub fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    match (secret, bearer_token(headers)) {
        (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
        _ => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Unauthorized".into(),
        }),
    )
        .into_response()
}

pub async fn require_admin(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if !authorized(req.headers(), state.admin_token.as_deref()) {
        return unauthorized();
    }
    next.run(req).await
}

pub async fn require_cron_secret(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Response {
    if !authorized(req.headers(), state.cron_secret.as_deref()) {
        tracing::debug!(path = %req.uri().path(), "cron trigger without valid secret");
        return unauthorized();
    }
    next.run(req).await
}
