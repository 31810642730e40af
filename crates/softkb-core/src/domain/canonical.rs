//! Canonicalization pass
//!
//! Folds every merge group of the staging graph into a single entity of the
//! knowledge-base graph, then copies edges with their endpoints re-pointed at
//! the canonical heads.

use serde_json::Value as Json;
use tracing::{info, warn};

use crate::domain::aggregation::aggregate_with_merge;
use crate::domain::claims::{Entity, EntityKind, PropertyCode, normalize_entity};
use crate::domain::merging::MergeGroups;
use crate::domain::relation::{Relation, RelationKind};
use crate::domain::store::GraphStore;
use crate::error::Result;

const SOFTWARE_PREFIX: &str = "software/";

/// Counters of one build phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalReport {
    /// Entities written to the knowledge base
    pub entities: u64,
    /// Staged entities folded into another head
    pub folded: u64,
    /// Claim values removed by normalization
    pub normalized_values: u64,
    /// Edges written to the knowledge base
    pub relations: u64,
    /// Edges dropped for a dangling endpoint
    pub edges_skipped: u64,
    /// Group members missing from the staging graph
    pub invariant_violations: u64,
}

pub struct Canonicalizer<'a> {
    staging: &'a dyn GraphStore,
    kb: &'a dyn GraphStore,
    groups: &'a MergeGroups,
    page_size: u32,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(
        staging: &'a dyn GraphStore,
        kb: &'a dyn GraphStore,
        groups: &'a MergeGroups,
        page_size: u32,
    ) -> Self {
        Self {
            staging,
            kb,
            groups,
            page_size: page_size.max(1),
        }
    }

    pub async fn run(&self) -> Result<CanonicalReport> {
        let mut report = CanonicalReport::default();
        for kind in EntityKind::all() {
            self.build_entities(*kind, &mut report).await?;
        }
        for kind in RelationKind::all() {
            self.build_relations(*kind, &mut report).await?;
        }
        info!(
            entities = report.entities,
            relations = report.relations,
            edges_skipped = report.edges_skipped,
            violations = report.invariant_violations,
            "Build phase complete"
        );
        Ok(report)
    }

    // ========== Vertices ==========

    async fn build_entities(&self, kind: EntityKind, report: &mut CanonicalReport) -> Result<()> {
        let total = self.staging.count_vertices(kind).await?;
        info!(kind = %kind, entries = total, "Loading canonical entities");

        let mut offset = 0;
        while offset < total {
            let page = self.staging.page_vertices(kind, offset, self.page_size).await?;
            if page.records.is_empty() {
                break;
            }
            offset += page.records.len() as u64;

            for entity in page.records {
                let Some(mut canonical) = self.canonical_entity(entity, report).await? else {
                    continue;
                };
                report.normalized_values += normalize_entity(&mut canonical) as u64;
                if self.kb.insert_vertex(&canonical).await? {
                    report.entities += 1;
                }
            }
        }
        Ok(())
    }

    /// Canonical record headed by `entity`, or `None` when another member heads its group
    async fn canonical_entity(
        &self,
        entity: Entity,
        report: &mut CanonicalReport,
    ) -> Result<Option<Entity>> {
        let Some(members) = self.groups.members(&entity.id) else {
            return Ok(Some(entity));
        };
        if members.first().map(String::as_str) != Some(entity.id.as_str()) {
            return Ok(None);
        }

        let mut merged = entity;
        for member in &members[1..] {
            match self.staging.get_vertex(member).await? {
                Some(other) => {
                    merged = aggregate_with_merge(&merged, &other);
                    report.folded += 1;
                }
                None => {
                    warn!(
                        head = %merged.id,
                        member = %member,
                        "Merge group member missing from staging graph"
                    );
                    report.invariant_violations += 1;
                }
            }
        }
        Ok(Some(merged))
    }

    // ========== Edges ==========

    async fn build_relations(
        &self,
        kind: RelationKind,
        report: &mut CanonicalReport,
    ) -> Result<()> {
        let total = self.staging.count_edges(kind).await?;
        info!(kind = %kind, entries = total, "Loading canonical relations");

        let mut offset = 0;
        while offset < total {
            let page = self.staging.page_edges(kind, offset, self.page_size).await?;
            if page.records.is_empty() {
                break;
            }
            offset += page.records.len() as u64;

            for relation in page.records {
                match self.rewrite(relation).await? {
                    Some(relation) => {
                        if self.kb.insert_edge(&relation).await? {
                            report.relations += 1;
                        }
                    }
                    None => report.edges_skipped += 1,
                }
            }
        }
        Ok(())
    }

    /// Id of the knowledge-base vertex standing for staged vertex `id`
    async fn resolve(&self, id: &str) -> Result<Option<String>> {
        if self.kb.has_vertex(id).await? {
            return Ok(Some(id.to_string()));
        }
        match self.groups.head_of(id) {
            Some(head) if self.kb.has_vertex(head).await? => Ok(Some(head.to_string())),
            _ => Ok(None),
        }
    }

    async fn rewrite(&self, mut relation: Relation) -> Result<Option<Relation>> {
        let from = self.resolve(&relation.from).await?;
        let to = self.resolve(&relation.to).await?;
        let (Some(from), Some(to)) = (from, to) else {
            warn!(
                edge_id = %relation.id,
                from = %relation.from,
                to = %relation.to,
                "Dangling edge endpoint, skipping edge"
            );
            return Ok(None);
        };
        relation.from = from;
        relation.to = to;

        self.rewrite_cited_software(&mut relation).await?;
        Ok(Some(relation))
    }

    /// Re-point the software id embedded in a reference edge's cited-work claim
    async fn rewrite_cited_software(&self, relation: &mut Relation) -> Result<()> {
        let Some(values) = relation.claims.get_mut(&PropertyCode::CitesWork) else {
            return Ok(());
        };
        for value in values.iter_mut() {
            let Some(software_id) = value
                .as_str()
                .filter(|id| id.starts_with(SOFTWARE_PREFIX))
                .map(str::to_string)
            else {
                continue;
            };
            if self.kb.has_vertex(&software_id).await? {
                continue;
            }
            if let Some(head) = self.groups.head_of(&software_id) {
                value.value = Some(Json::String(head.to_string()));
                relation.index_software = Some(head.to_string());
                // one software per reference context
                break;
            }
        }
        Ok(())
    }
}
