//! Typed edges between entities

use serde::{Deserialize, Serialize};
use std::fmt;

use super::claims::{Claims, PropertyCode, SourceRef, Value};

/// Edge collections of the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Document mentions software
    Citation,
    /// Document or software cites a document
    Reference,
    /// Person has a role on software
    Actor,
    /// Organization or person holds copyright on software
    Copyright,
    /// Software depends on software
    Dependency,
    /// Organization funds software
    Funding,
}

impl RelationKind {
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Citation => "citations",
            Self::Reference => "references",
            Self::Actor => "actors",
            Self::Copyright => "copyrights",
            Self::Dependency => "dependencies",
            Self::Funding => "funding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "citation" | "citations" => Some(Self::Citation),
            "reference" | "references" => Some(Self::Reference),
            "actor" | "actors" => Some(Self::Actor),
            "copyright" | "copyrights" => Some(Self::Copyright),
            "dependency" | "dependencies" => Some(Self::Dependency),
            "funding" => Some(Self::Funding),
            _ => None,
        }
    }

    pub fn all() -> &'static [RelationKind] {
        &[
            Self::Citation,
            Self::Reference,
            Self::Actor,
            Self::Copyright,
            Self::Dependency,
            Self::Funding,
        ]
    }

    pub fn id_for(&self, key: &str) -> String {
        format!("{}/{}", self.collection(), key)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// A directed, claim-carrying edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// `<collection>/<key>`
    pub id: String,
    pub kind: RelationKind,
    /// Source vertex id
    pub from: String,
    /// Target vertex id
    pub to: String,
    #[serde(default)]
    pub claims: Claims,
    /// Software id a reference edge co-occurs with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_software: Option<String>,
}

impl Relation {
    pub fn new(
        kind: RelationKind,
        key: &str,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            id: kind.id_for(key),
            kind,
            from: from.into(),
            to: to.into(),
            claims: Claims::new(),
            index_software: None,
        }
    }

    pub fn key(&self) -> &str {
        self.id
            .split_once('/')
            .map(|(_, key)| key)
            .unwrap_or(self.id.as_str())
    }

    /// Append a value to a claim of the edge, folding equal values
    pub fn push_value(&mut self, property: PropertyCode, value: Value, source: &SourceRef) {
        let values = self.claims.entry(property).or_default();
        match values.iter_mut().find(|v| v.same_claim(&value)) {
            Some(existing) => {
                super::claims::increment_source_count(&mut existing.references, source);
            }
            None => values.push(value.with_source(source)),
        }
    }

    pub fn values(&self, property: &PropertyCode) -> &[Value] {
        self.claims.get(property).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_ids() {
        let edge = Relation::new(RelationKind::Actor, "p1_s1_aut", "persons/p1", "software/s1");
        assert_eq!(edge.id, "actors/p1_s1_aut");
        assert_eq!(edge.key(), "p1_s1_aut");
    }

    #[test]
    fn test_kind_parse() {
        for kind in RelationKind::all() {
            assert_eq!(RelationKind::parse(kind.collection()), Some(*kind));
        }
        assert_eq!(RelationKind::parse("dependency"), Some(RelationKind::Dependency));
        assert_eq!(RelationKind::parse("likes"), None);
    }

    #[test]
    fn test_marker_values_fold_on_edges() {
        let mut edge =
            Relation::new(RelationKind::Funding, "o1_s1", "organizations/o1", "software/s1");
        let cran = SourceRef::named("CRAN");
        edge.push_value(PropertyCode::Funder, Value::marker(), &cran);
        edge.push_value(PropertyCode::Funder, Value::marker(), &cran);
        assert_eq!(edge.values(&PropertyCode::Funder).len(), 1);
        assert_eq!(edge.values(&PropertyCode::Funder)[0].count_for("CRAN"), 2);
    }
}
