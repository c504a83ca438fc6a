use std::sync::Arc;

use estateops::api;
use estateops::config::Config;
use estateops::db;
use estateops::store::{OpsDb, PgOpsDb};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cfg = Config::from_env()?;

    let enabled = |set: bool| if set { "enabled" } else { "disabled" };
    tracing::info!(
        listen_addr = %cfg.listen_addr,
        admin_auth = enabled(cfg.admin_token.is_some()),
        cron_auth = enabled(cfg.cron_secret.is_some()),
        migrate_on_startup = cfg.migrate_on_startup,
        request_logging = cfg.request_logging,
        stale_run_hours = ?cfg.stale_run_hours,
        "estateops server starting"
    );

    let missing = Config::missing_env_vars();
    if !missing.is_empty() {
        tracing::warn!(?missing, "required environment variables are not set");
    }

    // One pool for the whole process; connections open on first use.
    let pool = db::make_lazy_pool(&cfg.database_url)?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let store: Arc<dyn OpsDb> = Arc::new(PgOpsDb::new(pool));
    let app = api::router(api::ApiState::new(store, &cfg)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
