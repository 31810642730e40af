//! SQLite database bootstrap
//!
//! One database file holds every store of a knowledge-base build: raw records,
//! the staging and knowledge-base graphs, merge state and the lookup cache.
//! [`Database`] owns the pool and hands out the stores that share it.

use crate::config::StorageConfig;
use crate::storage::graph::{GraphName, SqliteGraphStore};
use crate::storage::merge_state::SqliteMergeStateStore;
use crate::storage::migrations;
use crate::storage::raw::RawRecordStore;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const MEMORY_PATH: &str = ":memory:";

/// Tables reported by [`Database::table_counts`]
const DATA_TABLES: &[&str] = &[
    "raw_records",
    "vertices",
    "edges",
    "merge_groups",
    "merge_index",
    "lookup_cache",
];

/// Pool and connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// Apply pending migrations when opening
    pub auto_migrate: bool,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: 4,
            auto_migrate: true,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Database settings of the `[storage]` config section
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self::with_path(storage.database_path.clone()).max_connections(storage.max_connections)
    }

    /// A private in-memory database; a single connection keeps it alive
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
                .journal_mode(SqliteJournalMode::Memory)
        } else {
            // WAL lets `stats` and `show` read while a phase is writing
            SqliteConnectOptions::new()
                .filename(&self.path)
                .journal_mode(SqliteJournalMode::Wal)
                .create_if_missing(true)
        };
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

/// `<data dir>/softkb/softkb.db`, or `softkb.db` in the working directory
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("softkb").join("softkb.db"))
        .unwrap_or_else(|| PathBuf::from("softkb.db"))
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Open (creating when needed) the database and migrate it
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open database: {}", config.path.display()))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        tracing::debug!(path = %db.path().display(), "Database opened");
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Store of imported dump records
    pub fn raw_records(&self) -> RawRecordStore {
        RawRecordStore::new(self.pool.clone())
    }

    /// Store of one graph namespace
    pub fn graph(&self, name: GraphName) -> SqliteGraphStore {
        SqliteGraphStore::new(self.pool.clone(), name)
    }

    pub fn merge_state(&self) -> SqliteMergeStateStore {
        SqliteMergeStateStore::new(self.pool.clone())
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to run database migrations")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Row count of every data table, in a fixed order
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, u64)>> {
        let mut counts = Vec::with_capacity(DATA_TABLES.len());
        for table in DATA_TABLES {
            // table names come from the constant list above
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("Failed to count rows of {}", table))?;
            counts.push((*table, count.max(0) as u64));
        }
        Ok(counts)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
