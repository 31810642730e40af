//! Source references and the per-value count ledger

use serde::{Deserialize, Serialize};

use super::value::Datatype;

fn default_count() -> u64 {
    1
}

/// Marker identifying the source collection a claim value came from
///
/// Serialized as `{"P248": {"value": ..., "datatype": ..., "count": n}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "P248")]
    pub stated_in: SourceMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMarker {
    /// Source identifier (a Wikidata item or a plain name)
    pub value: String,
    pub datatype: Datatype,
    /// Number of independent observations of the value from this source
    #[serde(default = "default_count")]
    pub count: u64,
}

impl SourceRef {
    pub fn new(value: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            stated_in: SourceMarker {
                value: value.into(),
                datatype,
                count: 1,
            },
        }
    }

    /// Source marker identified by a Wikidata item
    pub fn item(value: impl Into<String>) -> Self {
        Self::new(value, Datatype::WikibaseItem)
    }

    /// Source marker identified by a plain name
    pub fn named(value: impl Into<String>) -> Self {
        Self::new(value, Datatype::String)
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.stated_in.count = count;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.stated_in.value
    }

    pub fn count(&self) -> u64 {
        self.stated_in.count
    }
}

/// Fold `source_to_add` into `references`
///
/// A reference with the same source id gets its count increased by the
/// added reference's count; otherwise the reference is appended as is.
pub fn increment_source_count(references: &mut Vec<SourceRef>, source_to_add: &SourceRef) {
    match references
        .iter_mut()
        .find(|existing| existing.source_id() == source_to_add.source_id())
    {
        Some(existing) => existing.stated_in.count += source_to_add.count(),
        None => references.push(source_to_add.clone()),
    }
}

/// Fold every reference of `sources` into `references`
pub fn merge_references(references: &mut Vec<SourceRef>, sources: &[SourceRef]) {
    for source in sources {
        increment_source_count(references, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_source_sums_counts() {
        let mut references = vec![SourceRef::named("A")];
        increment_source_count(&mut references, &SourceRef::named("A"));
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].count(), 2);

        increment_source_count(&mut references, &SourceRef::named("A").with_count(3));
        assert_eq!(references[0].count(), 5);
    }

    #[test]
    fn test_new_source_is_appended() {
        let mut references = vec![SourceRef::named("A")];
        increment_source_count(&mut references, &SourceRef::item("Q2013"));
        assert_eq!(references.len(), 2);
        assert_eq!(references[1].source_id(), "Q2013");
        assert_eq!(references[1].count(), 1);
    }

    #[test]
    fn test_missing_count_defaults_to_one() {
        let json = r#"{"P248": {"value": "Q2013", "datatype": "wikibase-item"}}"#;
        let source: SourceRef = serde_json::from_str(json).unwrap();
        assert_eq!(source.count(), 1);
        assert_eq!(source.stated_in.datatype, Datatype::WikibaseItem);
    }

    #[test]
    fn test_merge_references_keeps_one_entry_per_source() {
        let mut references = vec![SourceRef::named("A"), SourceRef::named("B")];
        merge_references(
            &mut references,
            &[SourceRef::named("B"), SourceRef::named("C"), SourceRef::named("A")],
        );
        let ids: Vec<_> = references.iter().map(|r| (r.source_id(), r.count())).collect();
        assert_eq!(ids, vec![("A", 2), ("B", 2), ("C", 1)]);
    }
}
