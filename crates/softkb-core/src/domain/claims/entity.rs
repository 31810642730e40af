//! Knowledge-base entities

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

use super::property::PropertyCode;
use super::source::{SourceRef, increment_source_count};
use super::value::{Datatype, Qualifier, Value};

/// Claims of an entity or relation, keyed by property
pub type Claims = BTreeMap<PropertyCode, Vec<Value>>;

/// The five kinds of knowledge-base entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Software,
    Person,
    Organization,
    Document,
    License,
}

impl EntityKind {
    /// Kind name as used in templates and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Document => "document",
            Self::License => "license",
        }
    }

    /// Vertex collection holding entities of this kind
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Person => "persons",
            Self::Organization => "organizations",
            Self::Document => "documents",
            Self::License => "licenses",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "software" => Some(Self::Software),
            "person" | "persons" => Some(Self::Person),
            "organization" | "organizations" => Some(Self::Organization),
            "document" | "documents" => Some(Self::Document),
            "license" | "licenses" => Some(Self::License),
            _ => None,
        }
    }

    /// Kind owning an entity id of the form `<collection>/<key>`
    pub fn from_id(id: &str) -> Option<Self> {
        let (collection, _) = id.split_once('/')?;
        Self::parse(collection)
    }

    /// All kinds, in the order the merge and build phases visit them
    pub fn all() -> &'static [EntityKind] {
        &[
            Self::Document,
            Self::Organization,
            Self::License,
            Self::Person,
            Self::Software,
        ]
    }

    /// Build the full id of an entity of this kind from its key
    pub fn id_for(&self, key: &str) -> String {
        format!("{}/{}", self.collection(), key)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary-index fields carried by an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFields {
    /// Lower-cased DOI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_doi: Option<String>,
    /// Title and first-author surname signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_title_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_orcid: Option<String>,
    /// Disambiguated external entity id (a Wikidata item)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_entity: Option<String>,
}

impl IndexFields {
    /// Copy every field absent here from `other`
    pub fn fill_from(&mut self, other: &IndexFields) {
        fill(&mut self.index_doi, &other.index_doi);
        fill(&mut self.index_title_author, &other.index_title_author);
        fill(&mut self.index_orcid, &other.index_orcid);
        fill(&mut self.index_entity, &other.index_entity);
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

/// A node of the knowledge graph
///
/// Entities are created by the staging graph builder, possibly merged inline
/// when a strong identifier matches, and folded together by the
/// canonicalization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// `<collection>/<key>`
    pub id: String,
    pub kind: EntityKind,
    /// Primary display name
    #[serde(default)]
    pub labels: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions: Option<String>,
    #[serde(default)]
    pub claims: Claims,
    /// Opaque bibliographic metadata (documents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
    #[serde(flatten)]
    pub index: IndexFields,
}

impl Entity {
    /// Create an empty entity of the given kind with the given key
    pub fn new(kind: EntityKind, key: &str) -> Self {
        Self {
            id: kind.id_for(key),
            kind,
            labels: String::new(),
            aliases: Vec::new(),
            summary: None,
            descriptions: None,
            claims: Claims::new(),
            metadata: None,
            index: IndexFields::default(),
        }
    }

    /// Key part of the id
    pub fn key(&self) -> &str {
        self.id
            .split_once('/')
            .map(|(_, key)| key)
            .unwrap_or(self.id.as_str())
    }

    /// Re-key the entity, keeping its kind
    pub fn set_key(&mut self, key: &str) {
        self.id = self.kind.id_for(key);
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels = label.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    /// Append a claim value, folding it into an equal existing value
    ///
    /// Returns `true` when a new value was appended and `false` when the
    /// source was folded into an existing `(property, value, datatype)`.
    pub fn add_claim_value(
        &mut self,
        property: PropertyCode,
        value: impl Into<Json>,
        datatype: Datatype,
        source: &SourceRef,
        qualifiers: Vec<Qualifier>,
    ) -> bool {
        let mut candidate = Value::new(value, datatype);
        candidate.qualifiers = qualifiers;
        self.push_value(property, candidate, source)
    }

    /// Append a prepared value with the same folding rule as [`Entity::add_claim_value`]
    pub fn push_value(&mut self, property: PropertyCode, value: Value, source: &SourceRef) -> bool {
        let values = self.claims.entry(property).or_default();
        if let Some(existing) = values.iter_mut().find(|v| v.same_claim(&value)) {
            increment_source_count(&mut existing.references, source);
            for qualifier in value.qualifiers {
                if !existing.qualifiers.contains(&qualifier) {
                    existing.qualifiers.push(qualifier);
                }
            }
            return false;
        }
        values.push(value.with_source(source));
        true
    }

    /// Values recorded for a property
    pub fn values(&self, property: &PropertyCode) -> &[Value] {
        self.claims.get(property).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct text payloads recorded for a property, in order
    pub fn text_values(&self, property: &PropertyCode) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for text in self.values(property).iter().filter_map(Value::as_str) {
            if !out.contains(&text) {
                out.push(text);
            }
        }
        out
    }

    /// Whether the entity has a value with this payload for the property
    pub fn has_value(&self, property: &PropertyCode, value: &str) -> bool {
        check_value_exists(&self.claims, property, value)
    }

    /// Stamp `source` into every value whose reference list is empty
    pub fn stamp_source(&mut self, source: &SourceRef) {
        for values in self.claims.values_mut() {
            for value in values.iter_mut() {
                if value.references.is_empty() {
                    value.references.push(source.clone());
                }
            }
        }
    }

    /// Add `source` to every value of every claim
    pub fn add_source_everywhere(&mut self, source: &SourceRef) {
        for values in self.claims.values_mut() {
            for value in values.iter_mut() {
                increment_source_count(&mut value.references, source);
            }
        }
    }
}

/// Whether `claims` holds a value with this text payload for `property`
pub fn check_value_exists(claims: &Claims, property: &PropertyCode, value: &str) -> bool {
    claims
        .get(property)
        .is_some_and(|values| values.iter().any(|v| v.as_str() == Some(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str) -> SourceRef {
        SourceRef::named(name)
    }

    #[test]
    fn test_entity_ids() {
        let entity = Entity::new(EntityKind::Person, "abc");
        assert_eq!(entity.id, "persons/abc");
        assert_eq!(entity.key(), "abc");
        assert_eq!(EntityKind::from_id("persons/abc"), Some(EntityKind::Person));
        assert_eq!(EntityKind::from_id("merging_lists/1"), None);
    }

    #[test]
    fn test_kind_parse_and_collections() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(*kind));
            assert_eq!(EntityKind::parse(kind.collection()), Some(*kind));
        }
        assert_eq!(EntityKind::parse("repository"), None);
    }

    #[test]
    fn test_add_claim_value_is_idempotent() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        let a = source("A");

        let version = PropertyCode::Version;
        assert!(entity.add_claim_value(version.clone(), "1.0", Datatype::String, &a, vec![]));
        assert!(!entity.add_claim_value(version, "1.0", Datatype::String, &a, vec![]));

        let values = entity.values(&PropertyCode::Version);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].count_for("A"), 2);
    }

    #[test]
    fn test_add_claim_value_distinguishes_datatypes() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        let a = source("A");
        let same_as = PropertyCode::SaidToBeTheSameAs;
        entity.add_claim_value(same_as.clone(), "Q1", Datatype::WikibaseItem, &a, vec![]);
        entity.add_claim_value(same_as, "Q1", Datatype::Url, &a, vec![]);
        assert_eq!(entity.values(&PropertyCode::SaidToBeTheSameAs).len(), 2);
    }

    #[test]
    fn test_check_value_exists() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        let a = source("A");
        entity.add_claim_value(PropertyCode::Publisher, "CRAN", Datatype::String, &a, vec![]);
        assert!(entity.has_value(&PropertyCode::Publisher, "CRAN"));
        assert!(!entity.has_value(&PropertyCode::Publisher, "PyPI"));
        assert!(!entity.has_value(&PropertyCode::Version, "CRAN"));
    }

    #[test]
    fn test_stamp_source_only_fills_empty_references() {
        let mut entity = Entity::new(EntityKind::Software, "s1");
        entity.claims.insert(PropertyCode::Version, vec![Value::string("1.0")]);
        entity.claims.insert(
            PropertyCode::Publisher,
            vec![Value::string("x").with_source(&source("B"))],
        );

        entity.stamp_source(&source("A"));

        assert_eq!(entity.values(&PropertyCode::Version)[0].count_for("A"), 1);
        assert_eq!(entity.values(&PropertyCode::Publisher)[0].count_for("A"), 0);
    }

    #[test]
    fn test_serde_flattens_index_fields() {
        let mut entity = Entity::new(EntityKind::Document, "d1");
        entity.index.index_doi = Some("10.1/x".to_string());
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["index_doi"], "10.1/x");
        assert!(json.get("index_orcid").is_none());

        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }
}
