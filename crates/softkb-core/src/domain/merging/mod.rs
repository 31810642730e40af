//! Merge decisions
//!
//! Matchers propose pairs of staged entities believed to denote the same
//! real-world entity; [`MergeGroups`] records them as a partition whose first
//! member per group is the canonical head.

mod engine;
mod groups;
mod keys;
mod matchers;

pub use engine::{MergeEngine, MergeReport};
pub use groups::{MergeGroups, MergeOutcome, group_id};
pub use keys::{capitalized_variant, clean_software_name, reference_signature, title_author_key};
pub use matchers::{
    DocumentMatcher, MatchRule, Matcher, PersonMatcher, PlaceholderMatcher, R_LANGUAGE,
    SoftwareMatcher, matcher_for,
};
