use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn pool_options() -> PgPoolOptions {
    let max_connections = std::env::var("ESTATEOPS_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(4)
        .clamp(1, 32);

    let acquire_timeout_secs = std::env::var("ESTATEOPS_DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5)
        .clamp(1, 60);

    let disable_jit = env_bool("ESTATEOPS_DISABLE_JIT", true);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if disable_jit {
                    sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
}

/// Opens the pool eagerly; fails if the database cannot be reached.
pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = pool_options().connect(database_url).await?;
    Ok(pool)
}

/// Builds the process-wide pool without touching the network.
///
/// Connections are established on first use, so the server still starts (and
/// degrades its logging to the console) while the database is down.
pub fn make_lazy_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = pool_options().connect_lazy(database_url)?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
