//! Merge-decision engine
//!
//! Visits the staging graph kind by kind in stable insertion order and
//! registers, for each entity, the first candidate its matcher proposes.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::domain::claims::{Entity, EntityKind};
use crate::domain::store::GraphStore;
use crate::error::Result;

use super::groups::{MergeGroups, MergeOutcome};
use super::matchers::{MatchRule, Matcher, matcher_for};

/// Counters of one merge phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Entities visited
    pub examined: u64,
    /// Unions that changed the groups, per rule
    pub merges: BTreeMap<MatchRule, u64>,
    /// Entities whose matching failed
    pub failures: u64,
}

impl MergeReport {
    pub fn total_merges(&self) -> u64 {
        self.merges.values().sum()
    }
}

pub struct MergeEngine<'a> {
    store: &'a dyn GraphStore,
    page_size: u32,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn GraphStore, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Run every matcher over the staging graph, registering unions in `groups`
    pub async fn run(&self, groups: &mut MergeGroups) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        for kind in EntityKind::all() {
            let matcher = matcher_for(*kind);
            self.run_kind(matcher.as_ref(), groups, &mut report).await?;
        }
        info!(
            examined = report.examined,
            merges = report.total_merges(),
            groups = groups.len(),
            failures = report.failures,
            "Merge phase complete"
        );
        Ok(report)
    }

    async fn run_kind(
        &self,
        matcher: &dyn Matcher,
        groups: &mut MergeGroups,
        report: &mut MergeReport,
    ) -> Result<()> {
        let kind = matcher.kind();
        let total = self.store.count_vertices(kind).await?;
        info!(kind = %kind, entries = total, "Merging");

        if matcher.tiers().is_empty() {
            report.examined += total;
            return Ok(());
        }

        let mut offset = 0;
        while offset < total {
            let page = self.store.page_vertices(kind, offset, self.page_size).await?;
            if page.records.is_empty() {
                break;
            }
            offset += page.records.len() as u64;

            for entity in &page.records {
                report.examined += 1;
                match self.merge_entity(matcher, groups, entity).await {
                    Ok(Some((rule, outcome))) => {
                        if outcome != MergeOutcome::AlreadyGrouped {
                            *report.merges.entry(rule).or_default() += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(entity_id = %entity.id, error = %e, "Failed merging entity");
                        report.failures += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Try each tier until one candidate is registered with the entity
    async fn merge_entity(
        &self,
        matcher: &dyn Matcher,
        groups: &mut MergeGroups,
        entity: &Entity,
    ) -> Result<Option<(MatchRule, MergeOutcome)>> {
        for rule in matcher.tiers() {
            let candidates = matcher.candidates(self.store, entity, *rule).await?;
            for candidate in &candidates {
                if candidate.id == entity.id {
                    continue;
                }
                if rule.post_validated() && !matcher.validate(entity, candidate) {
                    debug!(
                        entity_id = %entity.id,
                        candidate_id = %candidate.id,
                        rule = %rule,
                        "Candidate rejected"
                    );
                    continue;
                }
                let outcome = groups.register_merging(&candidate.id, &entity.id)?;
                return Ok(Some((*rule, outcome)));
            }
        }
        Ok(None)
    }
}
