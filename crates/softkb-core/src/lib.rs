//! softkb Core Library
//!
//! This crate provides the core functionality for softkb, including:
//! - Claim model with a per-value source ledger
//! - Aggregation of entities with and without ledger merging
//! - Staging graph builder (Wikidata, rOpenSci/CRAN, software mentions)
//! - Merge decisions recorded as union-find merge groups
//! - Canonicalization into the knowledge-base graph
//! - Storage (SQLite graph store, raw records, merge state)
//! - Cached bibliographic lookups

pub mod config;
pub mod domain;
pub mod error;
pub mod lookup;
pub mod pipeline;
pub mod staging;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::claims::{Entity, EntityKind, PropertyCode, SourceRef, Value};
    pub use crate::domain::relation::{Relation, RelationKind};
    pub use crate::domain::store::GraphStore;
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{GraphSelector, Pipeline, RunSummary};
}
