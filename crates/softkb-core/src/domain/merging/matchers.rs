//! Per-kind matchers proposing merge candidates
//!
//! A matcher exposes ordered candidate tiers. The engine asks for a tier's
//! candidates only when every earlier tier failed to merge the entity, so a
//! DOI hit never pays for the title+author lookup.

use async_trait::async_trait;
use std::fmt;

use crate::domain::claims::{Entity, EntityKind, PropertyCode};
use crate::domain::store::{GraphStore, IndexField};
use crate::error::Result;

use super::keys::{capitalized_variant, clean_software_name, title_author_key};

/// Programming language item of R
pub const R_LANGUAGE: &str = "Q206904";

/// Rule that produced a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchRule {
    Doi,
    TitleAuthor,
    FullName,
    SoftwareName,
    DisambiguatedEntity,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::TitleAuthor => "title_author",
            Self::FullName => "full_name",
            Self::SoftwareName => "software_name",
            Self::DisambiguatedEntity => "disambiguated_entity",
        }
    }

    /// Whether candidates of this rule go through [`Matcher::validate`]
    pub fn post_validated(&self) -> bool {
        matches!(self, Self::SoftwareName)
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate generator for one entity kind
#[async_trait]
pub trait Matcher: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Tiers in the order they are tried
    fn tiers(&self) -> &'static [MatchRule];

    /// Candidates of one tier, in store insertion order
    ///
    /// The result may include `entity` itself; the engine skips it.
    async fn candidates(
        &self,
        store: &dyn GraphStore,
        entity: &Entity,
        rule: MatchRule,
    ) -> Result<Vec<Entity>>;

    /// Post-validation of a candidate pair for tiers that require it
    fn validate(&self, _entity: &Entity, _candidate: &Entity) -> bool {
        true
    }
}

/// Matcher for an entity kind
pub fn matcher_for(kind: EntityKind) -> Box<dyn Matcher> {
    match kind {
        EntityKind::Document => Box::new(DocumentMatcher),
        EntityKind::Person => Box::new(PersonMatcher),
        EntityKind::Software => Box::new(SoftwareMatcher),
        EntityKind::Organization | EntityKind::License => Box::new(PlaceholderMatcher(kind)),
    }
}

// ========== Documents ==========

/// Documents match on DOI, then on the title+first-author signature
pub struct DocumentMatcher;

impl DocumentMatcher {
    fn doi(entity: &Entity) -> Option<String> {
        let from_metadata = entity.metadata.as_ref().and_then(|metadata| {
            metadata
                .get("DOI")
                .or_else(|| metadata.get("doi"))
                .and_then(|doi| doi.as_str())
                .filter(|doi| !doi.is_empty())
                .map(str::to_lowercase)
        });
        from_metadata.or_else(|| entity.index.index_doi.clone())
    }

    fn title_author(entity: &Entity) -> Option<String> {
        let from_metadata = entity.metadata.as_ref().and_then(|metadata| {
            let title = metadata.get("title")?;
            let authors = metadata.get("author")?;
            title_author_key(title, authors)
        });
        from_metadata.or_else(|| entity.index.index_title_author.clone())
    }
}

#[async_trait]
impl Matcher for DocumentMatcher {
    fn kind(&self) -> EntityKind {
        EntityKind::Document
    }

    fn tiers(&self) -> &'static [MatchRule] {
        &[MatchRule::Doi, MatchRule::TitleAuthor]
    }

    async fn candidates(
        &self,
        store: &dyn GraphStore,
        entity: &Entity,
        rule: MatchRule,
    ) -> Result<Vec<Entity>> {
        let (field, key) = match rule {
            MatchRule::Doi => (IndexField::Doi, Self::doi(entity)),
            MatchRule::TitleAuthor => (IndexField::TitleAuthor, Self::title_author(entity)),
            _ => return Ok(Vec::new()),
        };
        match key {
            Some(key) => store.find_by_index(EntityKind::Document, field, &key).await,
            None => Ok(Vec::new()),
        }
    }
}

// ========== Persons ==========

/// Persons match on the exact full name
///
/// Common names collide and no post-validation exists for persons, so this
/// over-merges. ORCID matches were already merged while staging.
pub struct PersonMatcher;

#[async_trait]
impl Matcher for PersonMatcher {
    fn kind(&self) -> EntityKind {
        EntityKind::Person
    }

    fn tiers(&self) -> &'static [MatchRule] {
        &[MatchRule::FullName]
    }

    async fn candidates(
        &self,
        store: &dyn GraphStore,
        entity: &Entity,
        rule: MatchRule,
    ) -> Result<Vec<Entity>> {
        if rule != MatchRule::FullName || entity.labels.is_empty() {
            return Ok(Vec::new());
        }
        store
            .find_by_index(EntityKind::Person, IndexField::Label, &entity.labels)
            .await
    }
}

// ========== Software ==========

/// Software matches on name, then on the disambiguated entity
pub struct SoftwareMatcher;

impl SoftwareMatcher {
    fn languages(entity: &Entity) -> Vec<&str> {
        entity.text_values(&PropertyCode::ProgrammingLanguage)
    }

    fn is_r_package(entity: &Entity) -> bool {
        entity.has_value(&PropertyCode::ProgrammingLanguage, R_LANGUAGE)
    }

    async fn by_name(store: &dyn GraphStore, entity: &Entity) -> Result<Vec<Entity>> {
        let name = clean_software_name(&entity.labels);
        if name.is_empty() {
            return Ok(Vec::new());
        }

        // R package names collide with common words, so aliases are not used
        let field = if Self::is_r_package(entity) {
            IndexField::Label
        } else {
            IndexField::LabelOrAlias
        };

        let mut names = vec![name];
        if let Some(variant) = capitalized_variant(&names[0]) {
            names.push(clean_software_name(&variant));
        }

        let mut out: Vec<Entity> = Vec::new();
        for name in &names {
            for candidate in store.find_by_index(EntityKind::Software, field, name).await? {
                if !out.iter().any(|c| c.id == candidate.id) {
                    out.push(candidate);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Matcher for SoftwareMatcher {
    fn kind(&self) -> EntityKind {
        EntityKind::Software
    }

    fn tiers(&self) -> &'static [MatchRule] {
        &[MatchRule::SoftwareName, MatchRule::DisambiguatedEntity]
    }

    async fn candidates(
        &self,
        store: &dyn GraphStore,
        entity: &Entity,
        rule: MatchRule,
    ) -> Result<Vec<Entity>> {
        match rule {
            MatchRule::SoftwareName => Self::by_name(store, entity).await,
            MatchRule::DisambiguatedEntity => match entity.index.index_entity.as_deref() {
                Some(item) if item.starts_with('Q') => {
                    store
                        .find_by_index(EntityKind::Software, IndexField::Entity, item)
                        .await
                }
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }

    /// Declared programming languages must intersect when both sides declare some
    fn validate(&self, entity: &Entity, candidate: &Entity) -> bool {
        let ours = Self::languages(entity);
        let theirs = Self::languages(candidate);
        if ours.is_empty() || theirs.is_empty() {
            return true;
        }
        ours.iter().any(|language| theirs.contains(language))
    }
}

// ========== Organizations and licenses ==========

/// Matcher with no tiers, for kinds not merged automatically yet
pub struct PlaceholderMatcher(pub EntityKind);

#[async_trait]
impl Matcher for PlaceholderMatcher {
    fn kind(&self) -> EntityKind {
        self.0
    }

    fn tiers(&self) -> &'static [MatchRule] {
        &[]
    }

    async fn candidates(
        &self,
        _store: &dyn GraphStore,
        _entity: &Entity,
        _rule: MatchRule,
    ) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}
