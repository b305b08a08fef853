//! rota-scheduler
//!
//! Keeps each organization's selection periods generated, tracks which
//! rotation phase is running, and hands reminders to the dispatcher as the
//! underlying data changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rota_core::{model::parse_date, LogDispatcher, RotationStore};
use rota_id::OrgId;
use rota_scheduler::{
    config::Config,
    db::Database,
    planner::Planner,
    worker::{ChangeListener, RecomputeWorker, WorkerConfig},
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Capacity of the change notice queue between listener and worker.
const NOTICE_QUEUE: usize = 256;

/// Rotation scheduler.
#[derive(Debug, Parser)]
#[command(name = "rota-scheduler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler service (default).
    Run,

    /// Apply database migrations and exit.
    Migrate,

    /// Print the computed plan as JSON. Missing primary periods are
    /// generated as a side effect.
    Preview {
        /// Organization to plan; all organizations when omitted.
        #[arg(long, env = "ROTA_ORG")]
        org: Option<OrgId>,

        /// Evaluate at this instant (RFC 3339 or YYYY-MM-DD) instead of now.
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },
}

/// Accepts an RFC 3339 timestamp or a bare date (midnight UTC).
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    parse_date(raw)
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|e| format!("expected RFC 3339 timestamp or YYYY-MM-DD: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ROTA_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, db).await,
        Commands::Migrate => {
            db.run_migrations().await?;
            info!("Migrations applied");
            Ok(())
        }
        Commands::Preview { org, at } => preview(config, db, org, at).await,
    }
}

async fn run(config: Config, db: Database) -> Result<()> {
    info!(
        resync_secs = config.resync_interval.as_secs(),
        channel = %config.notify_channel,
        "Starting rota scheduler"
    );

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_QUEUE);

    let listener = ChangeListener::new(db.pool().clone(), config.notify_channel.clone());
    let listener_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            if let Err(e) = listener.run(notice_tx, shutdown_rx).await {
                error!(error = %e, "Change listener failed");
            }
        }
    });

    let planner = Planner::new(Arc::new(db.rotation_store()), config.reminders.clone());
    let worker = RecomputeWorker::new(
        planner,
        Arc::new(LogDispatcher),
        WorkerConfig {
            resync_interval: config.resync_interval,
            ..WorkerConfig::default()
        },
    );
    let worker_handle = tokio::spawn(worker.run(notice_rx, shutdown_rx));

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Recompute worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, listener_handle).await {
        warn!(error = %e, "Change listener did not shut down in time");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}

async fn preview(
    config: Config,
    db: Database,
    org: Option<OrgId>,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let store = Arc::new(db.rotation_store());
    let planner = Planner::new(store.clone(), config.reminders);
    let now = at.unwrap_or_else(Utc::now);

    let org_ids = match org {
        Some(org_id) => vec![org_id],
        None => store.list_org_ids().await?,
    };

    let mut plans = Vec::with_capacity(org_ids.len());
    for org_id in org_ids {
        match planner.plan(org_id, now).await? {
            Some(plan) => plans.push(plan),
            None => warn!(org_id = %org_id, "No rotation config"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&plans)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_instant() {
        assert_eq!(
            parse_instant("2026-01-05").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2026-01-05T10:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 5, 8, 30, 0).unwrap()
        );
        assert!(parse_instant("next tuesday").is_err());
    }

    #[test]
    fn test_cli_parses_preview() {
        let org_id = OrgId::new();
        let cli = Cli::try_parse_from([
            "rota-scheduler",
            "preview",
            "--org",
            &org_id.to_string(),
            "--at",
            "2025-10-02",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Preview { org, at }) => {
                assert_eq!(org, Some(org_id));
                assert!(at.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
