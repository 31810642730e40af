//! R package projector (rOpenSci and CRAN)
//!
//! Each package becomes a software entity with its authors as persons (or
//! organizations for funders) linked through role edges. A second pass links
//! packages through dependency edges once every registry is staged.

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use super::references::ReferenceBlockProcessor;
use super::{ProjectionReport, SourceProjector, StagingContext};
use crate::domain::aggregation::aggregate_with_merge;
use crate::domain::claims::{
    Datatype, Entity, EntityKind, PropertyCode, Qualifier, SourceRef, Value,
};
use crate::domain::merging::R_LANGUAGE;
use crate::domain::relation::{Relation, RelationKind};
use crate::domain::store::IndexField;
use crate::error::{Error, Result};
use crate::storage::RawRecord;

const COLLECTION: &str = "packages";
const ROPENSCI: &str = "rOpenSci";
const CRAN: &str = "CRAN";

/// A MARC relator role and the property expressing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relator {
    pub code: &'static str,
    pub property: &'static str,
    pub term: &'static str,
}

const RELATORS: &[Relator] = &[
    Relator { code: "aut", property: "P50", term: "Author" },
    Relator { code: "cre", property: "P170", term: "Creator" },
    Relator { code: "ctb", property: "P767", term: "Contributor" },
    Relator { code: "cph", property: "P3931", term: "Copyright holder" },
    Relator { code: "fnd", property: "P8324", term: "Funder" },
    Relator { code: "ths", property: "P184", term: "Thesis advisor" },
    Relator { code: "rev", property: "P4032", term: "Reviewer" },
    Relator { code: "trl", property: "P655", term: "Translator" },
    Relator { code: "dtc", property: "P1640", term: "Data contributor" },
];

fn find_relator(code: &str) -> Option<Relator> {
    RELATORS.iter().copied().find(|relator| relator.code == code)
}

/// Relator of a role code
///
/// Unknown codes are cleaned of `)` and quotes; codes still unknown map to
/// the contributor role.
pub fn relator_role(code: &str) -> Relator {
    if let Some(relator) = find_relator(code) {
        return relator;
    }
    let cleaned = code.replace(')', "");
    let cleaned = cleaned.trim().trim_matches('"');
    find_relator(cleaned).unwrap_or_else(|| {
        warn!(role = code, "Unknown author role, defaulting to contributor");
        RELATORS[2]
    })
}

fn role_key(person: &Entity, software: &Entity, relator: &Relator) -> String {
    format!("{}_{}_{}", person.key(), software.key(), relator.term.replace(' ', "_"))
}

/// Actor edge of a person holding a role on a package
fn role_relation(
    person: &Entity,
    software: &Entity,
    relator: &Relator,
    source: &SourceRef,
) -> Relation {
    let key = role_key(person, software, relator);
    let mut relation = Relation::new(RelationKind::Actor, &key, &person.id, &software.id);
    relation.push_value(PropertyCode::parse(relator.property), Value::marker(), source);
    relation
}

/// Strings of a JSON string or list of strings
fn strings(value: Option<&Json>) -> Vec<String> {
    match value {
        Some(Json::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(Json::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn text(value: Option<&Json>) -> Option<String> {
    let parts = strings(value);
    if parts.is_empty() { None } else { Some(parts.join(" ")) }
}

/// Author of a package, from `Authors@R`, `Authors` or `Author`
#[derive(Debug, Clone, Default, PartialEq)]
struct Author {
    given: Option<String>,
    family: Option<String>,
    full_name: Option<String>,
    orcid: Option<String>,
    email: Option<String>,
    roles: Vec<String>,
}

impl Author {
    fn from_json(value: &Json) -> Self {
        if let Some(name) = value.as_str() {
            return Self {
                full_name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
                ..Self::default()
            };
        }
        Self {
            given: text(value.get("given")),
            family: text(value.get("family")),
            full_name: text(value.get("full_name")),
            orcid: text(value.get("orcid")),
            email: text(value.get("email")),
            roles: strings(value.get("roles")),
        }
    }

    fn has_role(&self, code: &str) -> bool {
        self.roles.iter().any(|role| role == code)
    }

    /// Relators of the roles; an author without roles is a contributor
    fn relators(&self) -> Vec<Relator> {
        if self.roles.is_empty() {
            return vec![relator_role("ctb")];
        }
        self.roles.iter().map(|role| relator_role(role)).collect()
    }

    /// Display name: full name, else given and family names, else given names
    fn label(&self) -> Option<String> {
        if let Some(full_name) = &self.full_name {
            return Some(full_name.clone());
        }
        match (&self.given, &self.family) {
            (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
            (Some(given), None) => Some(given.clone()),
            _ => None,
        }
    }

    /// Whether the package maintainer designates this author
    fn is_maintainer(&self, maintainer: &Author) -> bool {
        let Some(name) = &maintainer.full_name else {
            return false;
        };
        if self.full_name.as_ref() == Some(name) {
            return true;
        }
        match (&self.given, &self.family) {
            (Some(given), Some(family)) => {
                name.contains(given.as_str()) && name.contains(family.as_str())
            }
            (Some(given), None) => name.contains(given.as_str()),
            _ => false,
        }
    }
}

/// Projector for the R package registries
#[derive(Debug, Clone)]
pub struct RPackagesProjector {
    registries: Vec<&'static str>,
}

impl RPackagesProjector {
    /// Projector over the given registries, in order
    pub fn new(registries: Vec<&'static str>) -> Self {
        Self { registries }
    }

    async fn populate(
        &self,
        ctx: &StagingContext<'_>,
        registry: &'static str,
    ) -> Result<ProjectionReport> {
        let source = ctx.sources.source(registry)?;
        let mut report = ProjectionReport::default();

        let total = ctx.raw.count(registry, COLLECTION).await?;
        info!(source = registry, entries = total, "Populating staging graph");

        let mut offset = 0;
        while offset < total {
            let records = ctx.raw_page(registry, COLLECTION, offset).await?;
            if records.is_empty() {
                break;
            }
            offset += records.len() as u64;

            for record in &records {
                report.records += 1;
                let projected = self
                    .project_package(ctx, registry, record, &source, &mut report)
                    .await;
                if let Err(e) = projected {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    report.skip(e);
                }
            }
        }
        Ok(report)
    }

    /// Whether a previous run already staged this CRAN record into `existing`
    fn staged_from(existing: &Entity, key: &str, source: &SourceRef) -> bool {
        existing
            .values(&PropertyCode::CranProject)
            .iter()
            .any(|value| value.as_str() == Some(key) && value.count_for(source.source_id()) > 0)
    }

    fn package_entity(
        ctx: &StagingContext<'_>,
        registry: &str,
        record: &RawRecord,
        name: &str,
        source: &SourceRef,
    ) -> Result<Entity> {
        // CRAN keys are not safe as vertex keys, so they are hashed
        let key = if registry == CRAN {
            ctx.ids.key_for(&[CRAN, &record.key])
        } else {
            record.key.clone()
        };
        let mut software = ctx.templates.entity(EntityKind::Software, &key, source)?;
        let body = &record.body;

        software.labels = name.to_string();
        software.descriptions = text(body.get("Title"));
        software.summary = text(body.get("Description"));

        if let Some(repository) = text(body.get("git_repository")) {
            software.push_value(PropertyCode::SourceRepository, Value::url(repository), source);
        }
        software.push_value(PropertyCode::ProgrammingLanguage, Value::item(R_LANGUAGE), source);
        if let Some(license) = text(body.get("License")) {
            software.push_value(PropertyCode::License, Value::string(license), source);
        }
        if let Some(version) = text(body.get("Version")) {
            software.push_value(PropertyCode::Version, Value::string(version), source);
        }
        for url in strings(body.get("Manual")).into_iter().chain(strings(body.get("URL"))) {
            software.push_value(PropertyCode::UserManualUrl, Value::url(url), source);
        }

        let id_property = if registry == CRAN {
            PropertyCode::CranProject
        } else {
            PropertyCode::ROpenSciPackage
        };
        software.push_value(id_property, Value::external_id(&record.key), source);
        Ok(software)
    }

    async fn project_package(
        &self,
        ctx: &StagingContext<'_>,
        registry: &'static str,
        record: &RawRecord,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let location = format!("{}/{}", COLLECTION, record.key);
        let name = text(record.body.get("Package"))
            .ok_or_else(|| Error::malformed(registry, &location, "missing Package"))?;

        let package = Self::package_entity(ctx, registry, record, &name, source)?;
        let mut existing = None;
        if registry == CRAN {
            let found = ctx
                .store
                .find_by_index(EntityKind::Software, IndexField::Label, &name)
                .await?;
            existing = found.into_iter().next();
        }

        // authors belong to the vertex the record owns, even when a previous
        // run stopped after writing it
        let (software, owned) = match existing {
            Some(existing) if existing.id == package.id => (existing, true),
            Some(existing) if Self::staged_from(&existing, &record.key, source) => {
                debug!(entity_id = %existing.id, package = %name, "Package already folded");
                (existing, false)
            }
            Some(existing) => {
                // the package is known from another registry; authors are not reprocessed
                let merged = aggregate_with_merge(&existing, &package);
                ctx.store.update_vertex(&merged).await?;
                report.entities_merged += 1;
                debug!(
                    entity_id = %merged.id,
                    package = %name,
                    "Merged package into existing software"
                );
                (merged, false)
            }
            None => {
                report.created(ctx.store.insert_vertex(&package).await?);
                (package, true)
            }
        };
        if owned {
            self.project_authors(ctx, record, &software, source, report).await?;
        }

        if let Some(Json::Array(block)) = record.body.get("References") {
            match ctx.biblio {
                Some(_) => {
                    let processor = ReferenceBlockProcessor;
                    let references = processor.process(ctx, block, &software, source).await?;
                    report.absorb(references);
                }
                None => debug!(package = %name, "Reference lookup disabled, skipping References"),
            }
        }
        Ok(())
    }

    async fn project_authors(
        &self,
        ctx: &StagingContext<'_>,
        record: &RawRecord,
        software: &Entity,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let body = &record.body;
        let authors = ["Authors@R", "Authors", "Author"]
            .iter()
            .find_map(|field| body.get(*field).and_then(Json::as_array))
            .map(|list| list.iter().map(Author::from_json).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut maintainer = body.get("Maintainer").map(Author::from_json);
        for author in &authors {
            let consumed = self
                .project_author(ctx, author, software, source, maintainer.as_ref(), report)
                .await?;
            if consumed {
                maintainer = None;
            }
        }
        Ok(())
    }

    /// Stage one author; returns whether the author was the package maintainer
    async fn project_author(
        &self,
        ctx: &StagingContext<'_>,
        author: &Author,
        software: &Entity,
        source: &SourceRef,
        maintainer: Option<&Author>,
        report: &mut ProjectionReport,
    ) -> Result<bool> {
        if author.has_role("fnd") {
            self.project_funder(ctx, author, software, source, report).await?;
            return Ok(false);
        }

        let Some(label) = author.label() else {
            debug!(software = %software.id, "Author without a name part, skipping");
            return Ok(false);
        };

        let parts = ["person", software.key(), label.as_str()];
        let mut person = ctx.entity_for(EntityKind::Person, &parts, source)?;
        person.labels = label;
        if let Some(given) = &author.given {
            person.push_value(PropertyCode::GivenName, Value::string(given), source);
        }
        if let Some(family) = &author.family {
            person.push_value(PropertyCode::FamilyName, Value::string(family), source);
        }
        if let Some(orcid) = &author.orcid {
            person.push_value(PropertyCode::Orcid, Value::external_id(orcid), source);
            person.index.index_orcid = Some(orcid.clone());
        }
        if let Some(email) = &author.email {
            person.push_value(PropertyCode::Email, Value::url(email), source);
        }

        let mut matched = None;
        if let Some(orcid) = &author.orcid {
            let found = ctx
                .store
                .find_by_index(EntityKind::Person, IndexField::Orcid, orcid)
                .await?;
            matched = found.into_iter().next();
        }

        let roles = author.relators();
        let person = match matched {
            // the author's own record, staged by a previous run
            Some(existing) if existing.id == person.id => existing,
            // role edges follow the fold, so they mark an author folded before
            Some(existing) if self.has_roles(ctx, &existing, software, &roles).await? => existing,
            Some(existing) => {
                let merged = aggregate_with_merge(&existing, &person);
                ctx.store.update_vertex(&merged).await?;
                report.entities_merged += 1;
                merged
            }
            None => {
                report.created(ctx.store.insert_vertex(&person).await?);
                person
            }
        };

        for relator in &roles {
            let relation = role_relation(&person, software, relator, source);
            if !ctx.store.has_edge(&relation.id).await? {
                report.linked(ctx.store.insert_edge(&relation).await?);
            }
        }

        let Some(maintainer) = maintainer else {
            return Ok(false);
        };
        if !author.is_maintainer(maintainer) {
            return Ok(false);
        }

        let key = format!("{}_{}_maintainer", person.key(), software.key());
        let mut relation = Relation::new(RelationKind::Actor, &key, &person.id, &software.id);
        relation.push_value(PropertyCode::MaintainedBy, Value::marker(), source);
        if !ctx.store.has_edge(&relation.id).await? {
            report.linked(ctx.store.insert_edge(&relation).await?);
        }
        Ok(true)
    }

    /// Whether every role edge of an author to `software` exists
    async fn has_roles(
        &self,
        ctx: &StagingContext<'_>,
        person: &Entity,
        software: &Entity,
        roles: &[Relator],
    ) -> Result<bool> {
        for relator in roles {
            let key = role_key(person, software, relator);
            if !ctx.store.has_edge(&RelationKind::Actor.id_for(&key)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Funders are organizations linked by a funding edge, plus a copyright edge when also `cph`
    async fn project_funder(
        &self,
        ctx: &StagingContext<'_>,
        author: &Author,
        software: &Entity,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let Some(name) = author.given.clone().or_else(|| author.full_name.clone()) else {
            return Ok(());
        };

        let parts = ["organization", software.key(), name.as_str()];
        let mut organization = ctx.entity_for(EntityKind::Organization, &parts, source)?;
        organization.labels = name;
        report.created(ctx.store.insert_vertex(&organization).await?);

        let key = format!("{}_{}", organization.key(), software.key());
        let (from, to) = (&organization.id, &software.id);
        let mut funding = Relation::new(RelationKind::Funding, &key, from, to);
        funding.push_value(PropertyCode::Funder, Value::marker(), source);
        report.linked(ctx.store.insert_edge(&funding).await?);

        if author.has_role("cph") {
            let mut copyright = Relation::new(RelationKind::Copyright, &key, from, to);
            copyright.push_value(PropertyCode::CopyrightHolder, Value::marker(), source);
            report.linked(ctx.store.insert_edge(&copyright).await?);
        }
        Ok(())
    }

    // ========== Dependencies ==========

    async fn set_dependencies(
        &self,
        ctx: &StagingContext<'_>,
        registry: &'static str,
    ) -> Result<ProjectionReport> {
        let source = ctx.sources.source(registry)?;
        let mut report = ProjectionReport::default();
        info!(source = registry, "Linking package dependencies");

        let total = ctx.raw.count(registry, COLLECTION).await?;
        let mut offset = 0;
        while offset < total {
            let records = ctx.raw_page(registry, COLLECTION, offset).await?;
            if records.is_empty() {
                break;
            }
            offset += records.len() as u64;

            for record in &records {
                self.link_dependencies(ctx, record, &source, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn link_dependencies(
        &self,
        ctx: &StagingContext<'_>,
        record: &RawRecord,
        source: &SourceRef,
        report: &mut ProjectionReport,
    ) -> Result<()> {
        let body = &record.body;
        if body.get("_hard_deps").is_none() && body.get("_soft_deps").is_none() {
            return Ok(());
        }
        let Some(name) = text(body.get("Package")) else {
            return Ok(());
        };
        let Some(software) = self.find_package(ctx, &name).await? else {
            return Ok(());
        };

        for (field, strength) in [("_hard_deps", "hard"), ("_soft_deps", "soft")] {
            let Some(dependencies) = body.get(field).and_then(Json::as_array) else {
                continue;
            };
            for dependency in dependencies {
                let Some(package) = text(dependency.get("package")) else {
                    continue;
                };
                let Some(target) = self.find_package(ctx, &package).await? else {
                    continue;
                };

                let key = format!("{}_{}_{}", software.key(), target.key(), strength);
                let mut relation =
                    Relation::new(RelationKind::Dependency, &key, &software.id, &target.id);
                let quality = Qualifier::new(PropertyCode::HasQuality, strength, Datatype::String);
                let depends_on = Value::marker().with_qualifier(quality);
                relation.push_value(PropertyCode::DependsOn, depends_on, source);
                if let Some(version) = text(dependency.get("version")) {
                    relation.push_value(PropertyCode::Version, Value::string(version), source);
                }
                if !ctx.store.has_edge(&relation.id).await? {
                    report.linked(ctx.store.insert_edge(&relation).await?);
                }
            }
        }
        Ok(())
    }

    async fn find_package(&self, ctx: &StagingContext<'_>, name: &str) -> Result<Option<Entity>> {
        let found = ctx.store.find_by_index(EntityKind::Software, IndexField::Label, name).await?;
        Ok(found.into_iter().next())
    }
}

impl Default for RPackagesProjector {
    fn default() -> Self {
        Self::new(vec![ROPENSCI, CRAN])
    }
}

#[async_trait]
impl SourceProjector for RPackagesProjector {
    fn name(&self) -> &'static str {
        "R packages"
    }

    async fn project(&self, ctx: &StagingContext<'_>) -> Result<ProjectionReport> {
        let mut report = ProjectionReport::default();
        for registry in self.registries.iter().copied() {
            report.absorb(self.populate(ctx, registry).await?);
        }
        // every package is staged before dependencies are resolved by name
        for registry in self.registries.iter().copied() {
            report.absorb(self.set_dependencies(ctx, registry).await?);
        }
        info!(
            created = report.entities_created,
            merged = report.entities_merged,
            relations = report.relations_created,
            skipped = report.skipped,
            "R package projection complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relator_roles() {
        assert_eq!(relator_role("aut").property, "P50");
        assert_eq!(relator_role("cre").term, "Creator");
        assert_eq!(relator_role("cph)").property, "P3931");
        assert_eq!(relator_role("\"ths\"").code, "ths");
        assert_eq!(relator_role("xyz").code, "ctb");
    }

    #[test]
    fn test_author_from_json() {
        let author = Author::from_json(&json!({
            "given": ["Jean", "Paul"],
            "family": "Dupont",
            "roles": "aut",
            "orcid": "0000-0001"
        }));
        assert_eq!(author.label().as_deref(), Some("Jean Paul Dupont"));
        assert_eq!(author.roles, vec!["aut"]);
        assert!(author.has_role("aut"));

        let named = Author::from_json(&json!("Jane Doe"));
        assert_eq!(named.label().as_deref(), Some("Jane Doe"));

        assert_eq!(Author::from_json(&json!({"roles": ["ctb"]})).label(), None);
    }

    #[test]
    fn test_maintainer_match() {
        let maintainer = Author::from_json(&json!({"full_name": "Yihui Xie", "email": "x@y.org"}));
        let author = Author::from_json(&json!({"given": "Yihui", "family": "Xie"}));
        assert!(author.is_maintainer(&maintainer));

        let other = Author::from_json(&json!({"given": "Jane", "family": "Xie"}));
        assert!(!other.is_maintainer(&maintainer));

        let full = Author::from_json(&json!({"full_name": "Yihui Xie"}));
        assert!(full.is_maintainer(&maintainer));
    }

    #[test]
    fn test_strings() {
        assert_eq!(strings(Some(&json!(["a", " ", "b"]))), vec!["a", "b"]);
        assert_eq!(strings(Some(&json!("x"))), vec!["x"]);
        assert!(strings(Some(&json!(3))).is_empty());
        assert!(strings(None).is_empty());
    }
}
