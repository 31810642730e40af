//! Claim values, datatypes and qualifiers

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use std::fmt;

use super::property::PropertyCode;
use super::source::{SourceRef, increment_source_count};

/// Datatype of a claim value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    String,
    Url,
    ExternalId,
    /// Reference to another entity (a Wikidata item or a staged entity id)
    WikibaseItem,
    Time,
    Quantity,
    Other(String),
}

impl Datatype {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Url => "url",
            Self::ExternalId => "external-id",
            Self::WikibaseItem => "wikibase-item",
            Self::Time => "time",
            Self::Quantity => "quantity",
            Self::Other(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "url" => Self::Url,
            "external-id" => Self::ExternalId,
            "wikibase-item" => Self::WikibaseItem,
            "time" => Self::Time,
            "quantity" => Self::Quantity,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether values of this type are free text eligible for normalization
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Datatype {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Datatype {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// A contextual fact attached to a single claim value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qualifier {
    pub property: PropertyCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<Datatype>,
}

impl Qualifier {
    pub fn new(property: PropertyCode, value: impl Into<Json>, datatype: Datatype) -> Self {
        Self {
            property,
            value: Some(value.into()),
            datatype: Some(datatype),
        }
    }

    /// Plain string qualifier
    pub fn string(property: PropertyCode, value: impl Into<String>) -> Self {
        Self::new(property, Json::String(value.into()), Datatype::String)
    }
}

/// A sourced value of a claim
///
/// Two values are the same claim value when their `(value, datatype)` pair is
/// equal; references and qualifiers do not take part in that identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<Datatype>,
    #[serde(default)]
    pub references: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Qualifier>,
}

impl Value {
    pub fn new(value: impl Into<Json>, datatype: Datatype) -> Self {
        Self {
            value: Some(value.into()),
            datatype: Some(datatype),
            references: Vec::new(),
            qualifiers: Vec::new(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Json::String(value.into()), Datatype::String)
    }

    pub fn url(value: impl Into<String>) -> Self {
        Self::new(Json::String(value.into()), Datatype::Url)
    }

    pub fn external_id(value: impl Into<String>) -> Self {
        Self::new(Json::String(value.into()), Datatype::ExternalId)
    }

    pub fn item(value: impl Into<String>) -> Self {
        Self::new(Json::String(value.into()), Datatype::WikibaseItem)
    }

    /// A value carrying only provenance, used for role and marker claims on edges
    pub fn marker() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: &SourceRef) -> Self {
        increment_source_count(&mut self.references, source);
        self
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    /// Payload as text when it is a JSON string
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Json::as_str)
    }

    /// Whether `other` denotes the same claim value
    pub fn same_claim(&self, other: &Value) -> bool {
        self.value == other.value && self.datatype == other.datatype
    }

    /// Whether the value holds free text
    pub fn is_textual(&self) -> bool {
        self.datatype.as_ref().is_some_and(Datatype::is_textual) && self.as_str().is_some()
    }

    /// Count recorded for a given source id, zero when absent
    pub fn count_for(&self, source_id: &str) -> u64 {
        self.references
            .iter()
            .filter(|r| r.source_id() == source_id)
            .map(SourceRef::count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_serde() {
        let json = serde_json::to_string(&Datatype::ExternalId).unwrap();
        assert_eq!(json, "\"external-id\"");
        let back: Datatype = serde_json::from_str("\"monolingualtext\"").unwrap();
        assert_eq!(back, Datatype::Other("monolingualtext".to_string()));
    }

    #[test]
    fn test_same_claim_ignores_provenance() {
        let a = Value::string("20.0").with_source(&SourceRef::named("A"));
        let b = Value::string("20.0")
            .with_source(&SourceRef::named("B"))
            .with_qualifier(Qualifier::string(PropertyCode::RelativePosition, "p1"));
        assert!(a.same_claim(&b));
        assert!(!a.same_claim(&Value::url("20.0")));
    }

    #[test]
    fn test_structured_payload_round_trips() {
        let json = r#"{"value": {"time": "+2020-01-01T00:00:00Z", "precision": 11},
                       "datatype": "time",
                       "references": []}"#;
        let value: Value = serde_json::from_str(json).unwrap();
        assert_eq!(value.datatype, Some(Datatype::Time));
        assert!(value.as_str().is_none());
        assert!(!value.is_textual());

        let again: Value = serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(again, value);
    }

    #[test]
    fn test_marker_value_has_no_payload() {
        let marker = Value::marker().with_source(&SourceRef::named("CRAN"));
        let json = serde_json::to_value(&marker).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(marker.count_for("CRAN"), 1);
    }
}
