//! Domain layer
//!
//! The claim model, aggregation, merge decisions and canonicalization. Storage
//! is reached only through the traits of [`store`].

pub mod aggregation;
pub mod canonical;
pub mod claims;
pub mod merging;
pub mod relation;
pub mod store;
