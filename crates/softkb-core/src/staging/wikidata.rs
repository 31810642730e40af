//! Wikidata projector
//!
//! Wikidata records are already shaped as entities. They get the Wikidata
//! source marker on every claim value, and a record carrying a CRAN project id
//! is merged inline into the staged software with that package name.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ProjectionReport, SourceProjector, StagingContext};
use crate::domain::aggregation::aggregate_with_merge;
use crate::domain::claims::{Claims, Entity, EntityKind, IndexFields, PropertyCode, SourceRef};
use crate::domain::store::IndexField;
use crate::error::{Error, Result};
use crate::storage::RawRecord;

const SOURCE: &str = "wikidata";
const COLLECTION: &str = "software";

#[derive(Debug, Deserialize)]
struct WikidataRecord {
    #[serde(default)]
    labels: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    descriptions: Option<String>,
    #[serde(default)]
    claims: Claims,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WikidataProjector;

impl WikidataProjector {
    fn to_entity(record: &RawRecord, source: &SourceRef) -> Result<Entity> {
        let parsed: WikidataRecord = serde_json::from_value(record.body.clone())
            .map_err(|e| {
                let location = format!("{}/{}", COLLECTION, record.key);
                Error::malformed(SOURCE, location, e.to_string())
            })?;

        let mut entity = Entity {
            id: EntityKind::Software.id_for(&record.key),
            kind: EntityKind::Software,
            labels: parsed.labels,
            aliases: parsed.aliases,
            summary: parsed.summary,
            descriptions: parsed.descriptions,
            claims: parsed.claims,
            metadata: None,
            index: IndexFields::default(),
        };
        entity.add_source_everywhere(source);
        Ok(entity)
    }

    /// Whether a previous run already folded this record into `existing`
    fn already_merged(existing: &Entity, entity: &Entity, source: &SourceRef) -> bool {
        entity.values(&PropertyCode::CranProject).iter().any(|value| {
            existing
                .values(&PropertyCode::CranProject)
                .iter()
                .any(|v| v.same_claim(value) && v.count_for(source.source_id()) > 0)
        })
    }

    /// Staged package named by the first of the record's CRAN ids that matches
    async fn cran_package(ctx: &StagingContext<'_>, entity: &Entity) -> Result<Option<Entity>> {
        for package in entity.text_values(&PropertyCode::CranProject) {
            let found = ctx
                .store
                .find_by_index(EntityKind::Software, IndexField::Label, package)
                .await?;
            if let Some(existing) = found.into_iter().next() {
                return Ok(Some(existing));
            }
        }
        Ok(None)
    }

    async fn project_record(
        &self,
        ctx: &StagingContext<'_>,
        record: &RawRecord,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let entity = Self::to_entity(record, source)?;

        match Self::cran_package(ctx, &entity).await? {
            Some(existing) if Self::already_merged(&existing, &entity, source) => {
                debug!(
                    entity_id = %existing.id,
                    wikidata = %record.key,
                    "Wikidata record already merged"
                );
            }
            Some(existing) => {
                debug!(
                    entity_id = %existing.id,
                    wikidata = %record.key,
                    "Merging Wikidata record into CRAN package"
                );
                let merged = aggregate_with_merge(&existing, &entity);
                ctx.store.update_vertex(&merged).await?;
                report.entities_merged += 1;
            }
            None => {
                report.created(ctx.store.insert_vertex(&entity).await?);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceProjector for WikidataProjector {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn project(&self, ctx: &StagingContext<'_>) -> Result<ProjectionReport> {
        let source = ctx.sources.source(SOURCE)?;
        let mut report = ProjectionReport::default();

        let total = ctx.raw.count(SOURCE, COLLECTION).await?;
        info!(source = SOURCE, entries = total, "Populating staging graph");

        let mut offset = 0;
        while offset < total {
            let records = ctx.raw_page(SOURCE, COLLECTION, offset).await?;
            if records.is_empty() {
                break;
            }
            offset += records.len() as u64;

            for record in &records {
                report.records += 1;
                if let Err(e) = self.project_record(ctx, record, &source, &mut report).await {
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
            merged = report.entities_merged,
            skipped = report.skipped,
            "Wikidata projection complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_to_entity() {
        let record = RawRecord {
            key: "Q42".to_string(),
            parent: None,
            body: json!({
                "id": "Q42",
                "labels": "knitr",
                "claims": {
                    "P5565": [{"value": "knitr", "datatype": "external-id"}],
                    "P277": [{"value": "Q206904", "datatype": "wikibase-item", "references": []}]
                }
            }),
        };

        let entity = WikidataProjector::to_entity(&record, &SourceRef::item("Q2013")).unwrap();
        assert_eq!(entity.id, "software/Q42");
        assert_eq!(entity.labels, "knitr");
        assert_eq!(entity.text_values(&PropertyCode::CranProject), vec!["knitr"]);
        for values in entity.claims.values() {
            for value in values {
                assert_eq!(value.count_for("Q2013"), 1);
            }
        }
    }

    #[test]
    fn test_malformed_record() {
        let record = RawRecord {
            key: "Q1".to_string(),
            parent: None,
            body: json!({"labels": 12}),
        };
        let error = WikidataProjector::to_entity(&record, &SourceRef::item("Q2013")).unwrap_err();
        assert_eq!(error.code(), "E100");
    }
}
