//! Staging graph builder
//!
//! Projects raw source records into claim-based entities and typed edges of
//! the staging graph. Each source has a [`SourceProjector`]; projectors share
//! a [`StagingContext`] holding the collaborators they write through.
//!
//! Every write is check-before-write, so a projector can be rerun over the
//! same raw records without duplicating vertices or edges.

mod ids;
mod mentions;
mod references;
mod rpackages;
mod sources;
mod templates;
mod wikidata;

pub use ids::{IdGenerator, KEY_LENGTH, SequentialIdGenerator, UuidIdGenerator};
pub use mentions::MentionsProjector;
pub use references::{BibtexEntry, ReferenceBlockProcessor, parse_bibtex};
pub use rpackages::{RPackagesProjector, Relator, relator_role};
pub use sources::{SourceDescription, SourceRegistry, SourceResolver};
pub use templates::{BuiltinTemplateLoader, FileTemplateLoader, Template, TemplateLoader};
pub use wikidata::WikidataProjector;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::warn;

use crate::domain::claims::{Entity, EntityKind, SourceRef};
use crate::domain::merging::title_author_key;
use crate::domain::store::GraphStore;
use crate::error::{Error, Result};
use crate::lookup::BiblioResolver;
use crate::storage::{RawRecord, RawRecordStore};

/// Collaborators of the staging graph builder
pub struct StagingContext<'a> {
    pub store: &'a dyn GraphStore,
    pub raw: &'a RawRecordStore,
    pub templates: &'a dyn TemplateLoader,
    pub sources: &'a dyn SourceResolver,
    pub ids: &'a dyn IdGenerator,
    /// Reference resolution; reference blocks are skipped without it
    pub biblio: Option<&'a BiblioResolver>,
    pub page_size: u32,
}

impl StagingContext<'_> {
    /// Blank entity of `kind` keyed by the parts identifying its record
    pub fn entity_for(
        &self,
        kind: EntityKind,
        parts: &[&str],
        source: &SourceRef,
    ) -> Result<Entity> {
        self.templates.entity(kind, &self.ids.key_for(parts), source)
    }

    /// One page of raw records, in load order
    pub async fn raw_page(
        &self,
        source: &str,
        collection: &str,
        offset: u64,
    ) -> Result<Vec<RawRecord>> {
        let page = self.raw.page(source, collection, offset, self.page_size.max(1)).await?;
        Ok(page.records)
    }
}

/// Counters of one projection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionReport {
    /// Raw records read
    pub records: u64,
    pub entities_created: u64,
    /// Records folded into an existing entity while staging
    pub entities_merged: u64,
    pub relations_created: u64,
    /// Records or references skipped
    pub skipped: u64,
    pub warnings: Vec<String>,
}

impl ProjectionReport {
    pub fn absorb(&mut self, other: ProjectionReport) {
        self.records += other.records;
        self.entities_created += other.entities_created;
        self.entities_merged += other.entities_merged;
        self.relations_created += other.relations_created;
        self.skipped += other.skipped;
        self.warnings.extend(other.warnings);
    }

    /// Log and count a skipped record
    pub(crate) fn skip(&mut self, error: Error) {
        warn!(error = %error, code = error.code(), "Skipping record");
        self.skipped += 1;
        self.warnings.push(error.to_string());
    }

    pub(crate) fn created(&mut self, written: bool) {
        if written {
            self.entities_created += 1;
        }
    }

    pub(crate) fn linked(&mut self, written: bool) {
        if written {
            self.relations_created += 1;
        }
    }
}

/// Projection of one source into the staging graph
#[async_trait]
pub trait SourceProjector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn project(&self, ctx: &StagingContext<'_>) -> Result<ProjectionReport>;
}

/// Projectors for the enabled sources, in projection order
///
/// `rOpenSci` and `CRAN` share one projector so dependencies are resolved
/// only once every package of both registries is staged. Wikidata follows
/// them so its records can fold into the staged CRAN packages.
pub fn projectors_for(sources: &[String]) -> Vec<Box<dyn SourceProjector>> {
    let enabled = |name: &str| sources.iter().any(|s| s.eq_ignore_ascii_case(name));
    let mut projectors: Vec<Box<dyn SourceProjector>> = Vec::new();

    let registries: Vec<&'static str> =
        ["rOpenSci", "CRAN"].into_iter().filter(|r| enabled(r)).collect();
    if !registries.is_empty() {
        projectors.push(Box::new(RPackagesProjector::new(registries)));
    }
    if enabled("wikidata") {
        projectors.push(Box::new(WikidataProjector));
    }
    if enabled("mentions") {
        projectors.push(Box::new(MentionsProjector));
    }
    projectors
}

/// Fill the document index fields from bibliographic metadata
pub(crate) fn index_document(document: &mut Entity) {
    let Some(metadata) = document.metadata.as_ref() else {
        return;
    };

    // the casing of the DOI field is unreliable across sources
    let doi = ["DOI", "doi"]
        .iter()
        .filter_map(|field| metadata.get(*field).and_then(Json::as_str))
        .find(|doi| !doi.is_empty())
        .map(str::to_lowercase);
    if doi.is_some() {
        document.index.index_doi = doi;
    }

    if let (Some(title), Some(authors)) = (metadata.get("title"), metadata.get("author")) {
        if let Some(key) = title_author_key(title, authors).filter(|key| !key.is_empty()) {
            document.index.index_title_author = Some(key);
        }
    }
}

/// Text of a JSON string or of a `{"normalizedForm": ...}` object
pub(crate) fn text_of(value: &Json) -> Option<&str> {
    match value {
        Json::String(s) => Some(s.as_str()),
        Json::Object(fields) => fields.get("normalizedForm").and_then(Json::as_str),
        _ => None,
    }
    .map(str::trim)
    .filter(|s| !s.is_empty())
}
