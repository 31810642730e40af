//! Storage layer - SQLite graphs and raw dumps
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//! - `graph`: Staging and knowledge-base graphs behind
//!   [`GraphStore`](crate::domain::store::GraphStore)
//! - `merge_state`: Persisted merge groups
//! - `raw`: Raw source records imported from dumps
//! - `jsonl`: JSON Lines dump reading
//!
//! # Usage
//!
//! ```ignore
//! use softkb_core::storage::{Database, GraphName};
//!
//! let db = Database::in_memory().await?;
//! let staging = db.graph(GraphName::Staging);
//! ```

pub mod database;
pub mod graph;
pub mod jsonl;
pub mod merge_state;
pub mod migrations;
pub mod raw;

// Re-export commonly used types
pub use database::{Database, DatabaseConfig, default_database_path};
pub use graph::{GraphName, SqliteGraphStore};
pub use jsonl::{DumpSpec, JsonlReader, KNOWN_DUMPS, dumps_for};
pub use merge_state::SqliteMergeStateStore;
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
pub use raw::{ImportResult, RawRecord, RawRecordStore};
