//! Postgres access for the scheduler.
//!
//! [`Database`] owns the pool and applies migrations at runtime;
//! [`PgRotationStore`] implements the core's persistence interface on top of
//! it. Queries are plain SQLx without compile-time checking.

mod error;
mod store;

pub use error::DbError;
pub use store::PgRotationStore;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Name reported in `pg_stat_activity`.
const APPLICATION_NAME: &str = "rota-scheduler";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/rota".to_string(),
            // One LISTEN connection plus the recompute worker and a preview.
            max_connections: 4,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`.
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_or("DATABASE_URL", defaults.database_url.clone()),
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            ..defaults
        }
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let options = PgConnectOptions::from_str(&config.database_url)
            .map_err(DbError::Connect)?
            .application_name(APPLICATION_NAME);

        info!(
            host = options.get_host(),
            database = options.get_database().unwrap_or_default(),
            max_connections = config.max_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(options)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Applies pending migrations from the first directory that loads.
    ///
    /// Looks relative to the working directory first so the binary works
    /// from both the repo root and the crate directory.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let mut last_error = None;

        for dir in migration_dirs() {
            let migrator = match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => migrator,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "No usable migrations here");
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            info!(
                dir = %dir.display(),
                count = migrator.iter().count(),
                "Applying migrations"
            );
            migrator.run(&self.pool).await.map_err(DbError::Migration)?;
            return Ok(());
        }

        Err(DbError::MigrationDirNotFound {
            tried: migration_dirs()
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    pub fn rotation_store(&self) -> PgRotationStore {
        PgRotationStore::new(self.pool.clone())
    }
}

fn migration_dirs() -> [PathBuf; 3] {
    [
        PathBuf::from("./migrations"),
        PathBuf::from("services/scheduler/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}
