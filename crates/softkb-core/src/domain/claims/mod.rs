//! Claim-based entity model and source ledger
//!
//! Every fact about an entity is a claim: a property code mapped to an
//! ordered list of values, each value carrying the sources that assert it and
//! how many times. The ledger rule is that a value holds at most one reference
//! per source id; anything that merges value lists goes through
//! [`increment_source_count`].
//!
//! ## Data Model
//!
//! - **Entity**: a software, person, organization, document or license record
//! - **Value**: a `(value, datatype)` pair with references and qualifiers
//! - **SourceRef**: the `P248` marker naming the source and its count

mod entity;
mod normalize;
mod property;
mod source;
mod value;

pub use entity::{Claims, Entity, EntityKind, IndexFields, check_value_exists};
pub use normalize::{normalize_entity, normalize_text};
pub use property::PropertyCode;
pub use source::{SourceMarker, SourceRef, increment_source_count, merge_references};
pub use value::{Datatype, Qualifier, Value};
