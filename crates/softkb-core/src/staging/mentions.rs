//! Software-mention projector
//!
//! Text-mined documents become document vertices. The annotations of a
//! document describe software mentions: mentions with the same normalized
//! name inside one document denote one software entity, and every mention
//! yields a citation edge from the document to that software. Bibliographic
//! references attached to a mention become documents cited by the citing
//! document, with the software recorded on the reference edge.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ProjectionReport, SourceProjector, StagingContext, index_document, text_of};
use crate::domain::claims::{
    Datatype, Entity, EntityKind, PropertyCode, Qualifier, SourceRef, Value,
};
use crate::domain::relation::{Relation, RelationKind};
use crate::domain::store::IndexField;
use crate::error::{Error, Result};
use crate::storage::RawRecord;

const SOURCE: &str = "mentions";
const DOCUMENTS: &str = "documents";
const ANNOTATIONS: &str = "annotations";
const REFERENCES: &str = "references";

/// Text of a string or number
fn scalar(value: &Json) -> Option<String> {
    match value {
        Json::Number(n) => Some(n.to_string()),
        other => text_of(other).map(str::to_string),
    }
}

/// Bounding-box qualifier of an annotated span
fn position(boxes: Option<&Json>) -> Option<Qualifier> {
    boxes.map(|boxes| {
        Qualifier::new(PropertyCode::RelativePosition, boxes.clone(), Datatype::String)
    })
}

fn with_position(value: Value, boxes: Option<&Json>) -> Value {
    match position(boxes) {
        Some(qualifier) => value.with_qualifier(qualifier),
        None => value,
    }
}

/// A mention field holding a `normalizedForm` and optional `boundingBoxes`
struct Span<'a> {
    text: &'a str,
    boxes: Option<&'a Json>,
}

fn span<'a>(annotation: &'a Json, field: &str) -> Option<Span<'a>> {
    let value = annotation.get(field)?;
    Some(Span {
        text: text_of(value)?,
        boxes: value.get("boundingBoxes"),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MentionsProjector;

impl MentionsProjector {
    async fn project_document(
        &self,
        ctx: &StagingContext<'_>,
        record: &RawRecord,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let mut document = ctx.templates.entity(EntityKind::Document, &record.key, source)?;
        document.metadata = record.body.get("metadata").cloned();
        index_document(&mut document);

        // annotations are still visited for a document an interrupted run wrote
        if !ctx.store.has_vertex(&document.id).await? {
            report.created(ctx.store.insert_vertex(&document).await?);
        }

        let annotations = ctx.raw.children(SOURCE, ANNOTATIONS, &record.key).await?;
        let mut software_by_name: HashMap<String, Entity> = HashMap::new();
        let mut index_annot = 0usize;

        for annotation in &annotations {
            let Some(name) = span(&annotation.body, "software-name") else {
                report.skip(Error::malformed(
                    SOURCE,
                    format!("{}/{}", ANNOTATIONS, annotation.key),
                    "missing software-name",
                ));
                continue;
            };

            let body = &annotation.body;
            let software = self
                .stage_software(
                    ctx,
                    &document,
                    &mut software_by_name,
                    name.text,
                    body,
                    source,
                    report,
                )
                .await?;
            self.link_citation(ctx, &document, &software, body, index_annot, source, report)
                .await?;
            index_annot += 1;
        }
        Ok(())
    }

    /// Software entity of a mention, shared by mentions of the same name in the document
    #[allow(clippy::too_many_arguments)]
    async fn stage_software(
        &self,
        ctx: &StagingContext<'_>,
        document: &Entity,
        software_by_name: &mut HashMap<String, Entity>,
        name: &str,
        annotation: &Json,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<Entity> {
        let (mut software, is_new) = match software_by_name.remove(name) {
            Some(known) => (known, false),
            None => {
                let parts = [SOURCE, document.key(), name];
                let mut software = ctx.entity_for(EntityKind::Software, &parts, source)?;
                match ctx.store.get_vertex(&software.id).await? {
                    Some(staged) => (staged, false),
                    None => {
                        software.labels = name.to_string();
                        (software, true)
                    }
                }
            }
        };

        let mut candidates = Vec::new();
        if let Some(version) = span(annotation, "version") {
            candidates.push((PropertyCode::Version, Value::string(version.text)));
        }
        if let Some(publisher) = span(annotation, "publisher") {
            candidates.push((PropertyCode::Publisher, Value::string(publisher.text)));
        }
        if let Some(url) = span(annotation, "url") {
            candidates.push((PropertyCode::ReferenceUrl, Value::url(url.text)));
        }
        if let Some(page) = annotation.get("wikipediaExternalRef").and_then(scalar) {
            candidates.push((PropertyCode::SaidToBeTheSameAs, Value::url(page)));
        }
        let wikidata = annotation.get("wikidataId").and_then(scalar);
        if let Some(item) = &wikidata {
            candidates.push((PropertyCode::SaidToBeTheSameAs, Value::item(item)));
        }

        let mut changed = false;
        for (property, value) in candidates {
            if software.values(&property).iter().any(|v| v.same_claim(&value)) {
                continue;
            }
            software.push_value(property, value, source);
            changed = true;
        }
        if let Some(item) = wikidata {
            if software.index.index_entity.as_deref() != Some(item.as_str()) {
                software.index.index_entity = Some(item);
                changed = true;
            }
        }

        if is_new {
            report.created(ctx.store.insert_vertex(&software).await?);
        } else if changed {
            ctx.store.update_vertex(&software).await?;
        }
        software_by_name.insert(name.to_string(), software.clone());
        Ok(software)
    }

    #[allow(clippy::too_many_arguments)]
    async fn link_citation(
        &self,
        ctx: &StagingContext<'_>,
        document: &Entity,
        software: &Entity,
        annotation: &Json,
        index_annot: usize,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let key = format!("{}_{}_{}", document.key(), software.key(), index_annot);
        let mut citation = Relation::new(RelationKind::Citation, &key, &document.id, &software.id);

        let spans = [
            ("software-name", PropertyCode::QuotesWork),
            ("version", PropertyCode::Version),
            ("publisher", PropertyCode::Publisher),
        ];
        for (field, property) in spans {
            if let Some(text) = span(annotation, field) {
                let value = with_position(Value::string(text.text), text.boxes);
                citation.push_value(property, value, source);
            }
        }
        if let Some(url) = span(annotation, "url") {
            let value = with_position(Value::url(url.text), url.boxes);
            citation.push_value(PropertyCode::ReferenceUrl, value, source);
        }
        if let Some(page) = annotation.get("wikipediaExternalRef").and_then(scalar) {
            citation.push_value(PropertyCode::SaidToBeTheSameAs, Value::url(page), source);
        }
        if let Some(item) = annotation.get("wikidataId").and_then(scalar) {
            citation.push_value(PropertyCode::SaidToBeTheSameAs, Value::item(item), source);
        }
        if let Some(context) = annotation.get("context").and_then(text_of) {
            citation.push_value(
                PropertyCode::Quotation,
                with_position(Value::string(context), annotation.get("boundingBoxes")),
                source,
            );
        }

        if let Some(Json::Array(references)) = annotation.get("references") {
            for reference in references {
                let cited = Cited {
                    document,
                    software,
                    index_annot,
                };
                self.link_reference(ctx, &cited, &mut citation, reference, source, report)
                    .await?;
            }
        }

        if !ctx.store.has_edge(&citation.id).await? {
            report.linked(ctx.store.insert_edge(&citation).await?);
        }
        Ok(())
    }

    /// Document a reference of a mention points at
    ///
    /// A staged document with the reference key wins, then one sharing its
    /// DOI or title and first author. Otherwise a stub is staged from the
    /// raw reference record.
    async fn referenced_document(
        &self,
        ctx: &StagingContext<'_>,
        reference_key: &str,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<Option<Entity>> {
        let referenced_id = EntityKind::Document.id_for(reference_key);
        if let Some(existing) = ctx.store.get_vertex(&referenced_id).await? {
            return Ok(Some(existing));
        }

        let Some(raw) = ctx.raw.get(SOURCE, REFERENCES, reference_key).await? else {
            report.skip(Error::malformed(
                SOURCE,
                format!("{}/{}", REFERENCES, reference_key),
                "referenced record does not exist",
            ));
            return Ok(None);
        };
        let mut stub = ctx.templates.entity(EntityKind::Document, reference_key, source)?;
        let metadata = raw.body.get("metadata").cloned();
        stub.metadata = Some(metadata.unwrap_or_else(|| Json::Object(Default::default())));
        index_document(&mut stub);

        let lookups = [
            (IndexField::Doi, stub.index.index_doi.as_deref()),
            (IndexField::TitleAuthor, stub.index.index_title_author.as_deref()),
        ];
        for (field, value) in lookups {
            let Some(value) = value else { continue };
            let found = ctx.store.find_by_index(EntityKind::Document, field, value).await?;
            if let Some(known) = found.into_iter().next() {
                debug!(
                    reference = reference_key,
                    document_id = %known.id,
                    "Reference resolved to a staged document"
                );
                return Ok(Some(known));
            }
        }

        report.created(ctx.store.insert_vertex(&stub).await?);
        Ok(Some(stub))
    }

    /// Record a bibliographic reference of a mention on its citation edge
    /// and as a reference edge from the citing document
    async fn link_reference(
        &self,
        ctx: &StagingContext<'_>,
        cited: &Cited<'_>,
        citation: &mut Relation,
        reference: &Json,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let document = cited.document;
        let Some(reference_key) = reference.pointer("/reference_id/$oid").and_then(scalar) else {
            report.skip(Error::malformed(
                SOURCE,
                format!("{}/{}", DOCUMENTS, document.key()),
                "reference without reference_id",
            ));
            return Ok(());
        };
        let referenced = self.referenced_document(ctx, &reference_key, source, report).await?;
        let Some(referenced) = referenced else {
            return Ok(());
        };

        let boxes = reference.get("boundingBoxes");
        let mut value = with_position(Value::external_id(&reference_key), boxes);
        if let Some(refkey) = reference.get("refkey").and_then(scalar) {
            value = value.with_qualifier(Qualifier::string(PropertyCode::ReferenceKey, refkey));
        }
        if let Some(label) = reference.get("label").and_then(scalar) {
            value = value.with_qualifier(Qualifier::string(PropertyCode::ReferenceLabel, label));
        }
        citation.push_value(PropertyCode::CitesWork, value, source);

        let key = format!("{}_{}_{}", document.key(), referenced.key(), cited.index_annot);
        let mut relation =
            Relation::new(RelationKind::Reference, &key, &document.id, &referenced.id);
        let software_id = &cited.software.id;
        relation.push_value(PropertyCode::CitesWork, Value::external_id(software_id), source);
        relation.index_software = Some(cited.software.id.clone());
        if !ctx.store.has_edge(&relation.id).await? {
            report.linked(ctx.store.insert_edge(&relation).await?);
        }
        Ok(())
    }
}

/// The mention a reference is attached to
struct Cited<'a> {
    document: &'a Entity,
    software: &'a Entity,
    index_annot: usize,
}

#[async_trait]
impl SourceProjector for MentionsProjector {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn project(&self, ctx: &StagingContext<'_>) -> Result<ProjectionReport> {
        let source = ctx.sources.source(SOURCE)?;
        let mut report = ProjectionReport::default();

        let total = ctx.raw.count(SOURCE, DOCUMENTS).await?;
        info!(source = SOURCE, entries = total, "Populating staging graph");

        let mut offset = 0;
        while offset < total {
            let records = ctx.raw_page(SOURCE, DOCUMENTS, offset).await?;
            if records.is_empty() {
                break;
            }
            offset += records.len() as u64;

            for record in &records {
                report.records += 1;
                if let Err(e) = self.project_document(ctx, record, &source, &mut report).await {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    report.skip(e);
                }
            }
        }

        info!(
            source = SOURCE,
            created = report.entities_created,
            relations = report.relations_created,
            skipped = report.skipped,
            "Mention projection complete"
        );
        Ok(report)
    }
}
