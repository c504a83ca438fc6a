mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use common::{memory_store, seed_log, test_state, ADMIN_TOKEN, CRON_SECRET};
use estateops::api::router;
use estateops::cron::JobRunStatus;
use estateops::cron::site::SiteCounts;
use estateops::logs::{LogLevel, LogType};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn admin_routes_require_the_admin_token() {
    let (_mem, store) = memory_store();
    let app = router(test_state(store));

    for uri in [
        "/admin-api/system-logs",
        "/admin-api/system-status",
        "/admin-api/cron-jobs/cleanup-logs/stats",
        "/admin-api/activity-logs",
    ] {
        let (status, body) = send(app.clone(), get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body, json!({"error": "Unauthorized"}));

        let (status, _) = send(app.clone(), get(uri, Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");

        // the cron secret is not an admin credential
        let (status, _) = send(app.clone(), get(uri, Some(CRON_SECRET))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn unconfigured_secrets_reject_every_call() {
    let (_mem, store) = memory_store();
    let cfg = estateops::Config::for_database("memory");
    let app = router(estateops::api::ApiState::new(store, &cfg));

    let (status, _) = send(app.clone(), get("/admin-api/system-logs", Some(""))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(app, get("/cron/cleanup-logs", Some("anything"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn system_logs_filters_and_paginates() {
    let (_mem, store) = memory_store();
    let now = Utc::now();
    for i in 0..5 {
        seed_log(&*store, LogLevel::Error, LogType::ApiError, Some("/api/leads"), now - Duration::minutes(i)).await;
    }
    seed_log(&*store, LogLevel::Info, LogType::ApiRequest, Some("/api/leads"), now).await;
    let app = router(test_state(store));

    let (status, body) = send(
        app.clone(),
        get("/admin-api/system-logs?level=ERROR&type=ALL&source=LEADS&page=2&limit=2", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["logs"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"], json!({"page": 2, "limit": 2, "total": 5, "pages": 3}));
    assert_eq!(body["logs"][0]["type"], "API_ERROR");
    assert_eq!(body["logs"][0]["level"], "ERROR");

    let (_, body) = send(
        app.clone(),
        get("/admin-api/system-logs?page=10", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(body["logs"], json!([]));
    assert_eq!(body["pagination"]["total"], 6);
    assert_eq!(body["pagination"]["limit"], 50);
    assert_eq!(body["pagination"]["pages"], 1);

    let (status, _) = send(app, get("/admin-api/system-logs?level=LOUD", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn system_status_composes_the_snapshot() {
    let (_mem, store) = memory_store();
    let now = Utc::now();
    seed_log(&*store, LogLevel::Error, LogType::SystemError, Some("worker"), now).await;
    seed_log(&*store, LogLevel::Info, LogType::ApiRequest, None, now - Duration::days(3)).await;
    let app = router(test_state(store));

    let (status, body) = send(app, get("/admin-api/system-status", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["deployment"]["version"], "dev");
    assert_eq!(body["deployment"]["branch"], "local");
    assert_eq!(body["database"]["status"], "healthy");
    assert_eq!(body["recentErrors"].as_array().unwrap().len(), 1);

    let cron = body["cronStatus"].as_array().unwrap();
    let names: Vec<_> = cron.iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["cleanup-logs", "check-appointments", "weekly-analytics"]);
    assert_eq!(cron[0]["displayName"], "Log Cleanup");
    assert!(cron[0]["lastRun"].is_null());

    assert!(body["systemInfo"]["uptime"].as_f64().unwrap() >= 0.0);
    assert!(body["systemInfo"]["nodeRuntimeVersion"].is_string());
    let memory = &body["systemInfo"]["memory"];
    assert!(memory["rss"].as_u64().unwrap() > 0);
    assert!(memory["used"].as_u64().unwrap() <= memory["total"].as_u64().unwrap());

    assert_eq!(body["logStats"]["totalLogs"], 2);
    assert_eq!(body["logStats"]["last24h"], 1);
    assert_eq!(body["logStats"]["errorCounts"], json!({"INFO": 1, "ERROR": 1}));
}

#[tokio::test]
async fn system_status_fails_when_store_is_down() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));
    mem.set_available(false);

    let (status, body) = send(app, get("/admin-api/system-status", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to fetch system status");
}

#[tokio::test]
async fn cron_endpoint_runs_job_through_executor() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));

    let (status, _) = send(app.clone(), get("/cron/cleanup-logs", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(app.clone(), get("/cron/cleanup-logs", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(mem.all_job_runs().await.is_empty());

    let (status, body) = send(app.clone(), get("/cron/cleanup-logs", Some(CRON_SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Log cleanup completed");
    assert_eq!(body["result"]["total"], 0);

    let runs = mem.all_job_runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobRunStatus::Success);

    let (status, body) = send(
        app,
        get("/admin-api/cron-jobs/cleanup-logs/history?limit=5", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["status"], "SUCCESS");
}

#[tokio::test]
async fn unknown_cron_job_is_not_found() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));

    let (status, _) = send(app, get("/cron/rebuild-index", Some(CRON_SECRET))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(mem.all_job_runs().await.is_empty());
}

#[tokio::test]
async fn failing_cron_job_returns_500_with_message() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));
    mem.set_available(false);

    let (status, body) = send(app, get("/cron/check-appointments", Some(CRON_SECRET))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("store unavailable"));
}

#[tokio::test]
async fn cron_stats_report_success_rate() {
    let (_mem, store) = memory_store();
    let app = router(test_state(store));

    send(app.clone(), get("/cron/weekly-analytics", Some(CRON_SECRET))).await;

    let (status, body) = send(
        app,
        get("/admin-api/cron-jobs/weekly-analytics/stats", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["successful"], 1);
    assert_eq!(body["successRate"], 100.0);
    assert_eq!(body["lastRun"]["status"], "SUCCESS");
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "test-browser/1.0")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn client_errors_become_system_error_entries() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));

    let (status, body) = send(
        app,
        post_json(
            "/system/log-error",
            r#"{"message":"x is undefined","stack":"at render","digest":"d1","location":"/es/properties"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let logs = mem.all_logs().await;
    assert_eq!(logs.len(), 1);
    let e = &logs[0];
    assert_eq!(e.level, LogLevel::Error);
    assert_eq!(e.log_type, LogType::SystemError);
    assert_eq!(e.message, "Client error: x is undefined");
    assert_eq!(e.source.as_deref(), Some("unknown"));
    assert_eq!(e.error_stack.as_deref(), Some("at render"));
    let meta: Value = e.metadata.as_ref().unwrap().decode().unwrap();
    assert_eq!(meta["digest"], "d1");
    assert_eq!(meta["location"], "/es/properties");
    assert_eq!(meta["userAgent"], "test-browser/1.0");
}

#[tokio::test]
async fn client_error_reporting_succeeds_during_outage() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));
    mem.set_available(false);

    let (status, body) = send(
        app.clone(),
        post_json("/system/log-error", r#"{"message":"boom","source":"ErrorBoundary"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(app, post_json("/system/log-error", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn health_reports_store_outage_as_unavailable() {
    let (mem, store) = memory_store();
    let app = router(test_state(store));

    let response = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );

    mem.set_available(false);
    let (status, body) = send(app.clone(), get("/health?detailed=true", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"]["status"], "fail");
    assert!(body["checks"]["system"]["memory"].is_object());

    let (_, body) = send(app, get("/health", None)).await;
    assert!(body["checks"]["system"].get("memory").is_none());
}

#[tokio::test]
async fn detailed_health_reports_record_counts() {
    let (mem, store) = memory_store();
    mem.set_site_counts(SiteCounts {
        properties_total: 14,
        leads_total: 5,
        users_total: 2,
        ..SiteCounts::default()
    })
    .await;
    let mut state = test_state(store);
    state.dashboard = state.dashboard.clone().with_required_env(vec![]);
    let app = router(state);

    let (status, body) = send(app.clone(), get("/health?detailed=true", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["environment"]["status"], "pass");
    assert_eq!(
        body["checks"]["database"]["records"],
        json!({"properties": 14, "users": 2, "leads": 5})
    );

    let (status, body) = send(app.clone(), post_json("/health", r#"{"detailed": true}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["database"]["records"]["properties"], 14);
    assert!(body["checks"]["system"]["memory"].is_object());

    let (_, body) = send(app, get("/health", None)).await;
    assert!(body["checks"]["database"].get("records").is_none());
}

#[tokio::test]
async fn health_degrades_when_required_env_is_missing() {
    let (_mem, store) = memory_store();
    let mut state = test_state(store);
    state.dashboard = state
        .dashboard
        .clone()
        .with_required_env(vec!["ESTATEOPS_TEST_NEVER_SET"]);
    let app = router(state);

    let (status, body) = send(app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["environment"]["status"], "warn");
    assert_eq!(
        body["checks"]["environment"]["missing"],
        json!(["ESTATEOPS_TEST_NEVER_SET"])
    );
}

#[tokio::test]
async fn activity_log_route_filters_by_entity() {
    let (_mem, store) = memory_store();
    let activity = estateops::activity::ActivityLogger::new(store.clone());
    activity.log("create", "property", "p-1", "ana@example.com", None).await;
    activity.log("update", "lead", "l-1", "ana@example.com", None).await;
    let app = router(test_state(store));

    let (status, body) = send(
        app,
        get("/admin-api/activity-logs?entity=lead&perPage=10", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["logs"].as_array().unwrap().len(), 1);
    assert_eq!(body["logs"][0]["entityId"], "l-1");
    assert_eq!(
        body["pagination"],
        json!({"page": 1, "perPage": 10, "total": 1, "totalPages": 1})
    );
}
