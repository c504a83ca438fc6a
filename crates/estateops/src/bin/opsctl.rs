use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use estateops::config::{self, Config};
use estateops::cron::{JobExecutor, JobRunTracker, JobRunner, ScheduledJob, SCHEDULED_JOBS};
use estateops::dashboard::DashboardReporter;
use estateops::db;
use estateops::logs::{LogFilter, LogLevel, LogStore, LogType, Pagination};
use estateops::store::{MemoryOpsDb, OpsDb, PgOpsDb};

#[derive(Debug, Parser)]
#[command(name = "opsctl", version, about = "Operator tooling for the estate site's system log and job runs")]
struct Cli {
    /// Use a throwaway in-process store instead of DATABASE_URL.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending SQL migrations.
    Migrate,
    /// Print the dashboard status snapshot.
    Status,
    /// Success rate and durations over a job's recent runs.
    Stats { job: String },
    /// Most recent runs of a job, newest first.
    History {
        job: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Page through the system log.
    Logs {
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long = "type")]
        log_type: Option<LogType>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete log entries older than the given number of days.
    PurgeLogs {
        #[arg(long)]
        days: i64,
        /// Comma-separated levels to restrict the purge to, e.g. INFO,WARN.
        #[arg(long, value_delimiter = ',')]
        levels: Vec<LogLevel>,
    },
    /// Close RUNNING job runs that never finished.
    Reconcile {
        #[arg(long)]
        hours: Option<i64>,
    },
    /// Run a scheduled job now, through the executor.
    Run { job: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (cfg, store): (Config, Arc<dyn OpsDb>) = if cli.memory {
        (Config::for_database("memory"), Arc::new(MemoryOpsDb::new()))
    } else {
        let cfg = Config::from_env()?;
        let pool = db::make_pool(&cfg.database_url).await?;
        if let Command::Migrate = cli.command {
            db::run_migrations(&pool).await?;
            println!("migrations applied");
            return Ok(());
        }
        (cfg, Arc::new(PgOpsDb::new(pool)))
    };

    let tracker = JobRunTracker::new(store.clone());

    match cli.command {
        Command::Migrate => {
            anyhow::bail!("migrate needs a database; drop --memory");
        }
        Command::Status => {
            let status = DashboardReporter::new(store, &cfg).snapshot().await?;
            print_json(&status)?;
        }
        Command::Stats { job } => {
            print_json(&tracker.stats(&job).await?)?;
        }
        Command::History { job, limit } => {
            print_json(&tracker.history(&job, limit).await?)?;
        }
        Command::Logs {
            level,
            log_type,
            source,
            page,
            limit,
        } => {
            let filter = LogFilter {
                level,
                log_type,
                source,
                pagination: Pagination::new(page, limit.clamp(1, 500)),
                ..LogFilter::default()
            };
            let page = LogStore::new(store).query(&filter).await?;
            for e in &page.entries {
                println!(
                    "{} {:<8} {:<12} {} {}",
                    e.created_at.to_rfc3339(),
                    e.level,
                    e.log_type,
                    e.source.as_deref().unwrap_or("-"),
                    e.message
                );
            }
            println!(
                "page {}/{} ({} total)",
                filter.pagination.page,
                page.pages(),
                page.total
            );
        }
        Command::PurgeLogs { days, levels } => {
            let cutoff = config::days_before(Utc::now(), days)?;
            let levels = (!levels.is_empty()).then_some(levels);
            let deleted = LogStore::new(store)
                .purge(cutoff, levels.as_deref())
                .await?;
            println!("deleted {deleted} log entries older than {cutoff}");
        }
        Command::Reconcile { hours } => {
            let hours = hours
                .or(cfg.stale_run_hours)
                .filter(|h| *h > 0)
                .ok_or_else(|| anyhow::anyhow!("stale run reconciliation is disabled; pass --hours"))?;
            let closed = tracker.reconcile_stale(config::stale_window(hours)?).await?;
            println!("closed {} stale run(s)", closed.len());
            for id in closed {
                println!("  {id}");
            }
        }
        Command::Run { job } => {
            let Some(job) = ScheduledJob::find(&job) else {
                let known: Vec<&str> = SCHEDULED_JOBS.iter().map(|j| j.name).collect();
                anyhow::bail!("unknown job {job}; known jobs: {}", known.join(", "));
            };
            let runner = JobRunner::new(
                store,
                JobExecutor::new(tracker),
                cfg.retention.clone(),
                cfg.stale_run_hours,
            );
            let result = runner.run(job).await?;
            println!("{}", job.success_message);
            print_json(&result)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
