//! Property codes for claims
//!
//! Properties follow the Wikidata numbering where one exists (`P348` for a
//! version, `P277` for a programming language, ...). Codes this crate does not
//! know are kept verbatim in [`PropertyCode::Other`] so records coming from a
//! linked-data dump round-trip without loss.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identifier of the property a claim is made about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyCode {
    /// Source marker ("stated in")
    StatedIn,
    Version,
    Publisher,
    ReferenceUrl,
    /// Predicted Wikipedia page or Wikidata item of a mention
    SaidToBeTheSameAs,
    ProgrammingLanguage,
    License,
    SourceRepository,
    UserManualUrl,
    CranProject,
    ROpenSciPackage,
    GivenName,
    FamilyName,
    Orcid,
    Email,
    /// Software name as written in the citing text
    QuotesWork,
    /// Sentence the mention was extracted from
    Quotation,
    /// Bounding boxes in the source PDF
    RelativePosition,
    CitesWork,
    /// Reference number in the citing bibliography
    ReferenceKey,
    /// Call-out label of the reference in the citing text
    ReferenceLabel,
    DependsOn,
    HasQuality,
    MaintainedBy,
    Author,
    Creator,
    Contributor,
    CopyrightHolder,
    Funder,
    ThesisAdvisor,
    Translator,
    ReviewedBy,
    DataContributor,
    /// Any other property code, kept as written
    Other(String),
}

impl PropertyCode {
    /// Stable code string for this property
    pub fn as_str(&self) -> &str {
        match self {
            Self::StatedIn => "P248",
            Self::Version => "P348",
            Self::Publisher => "P123",
            Self::ReferenceUrl => "P854",
            Self::SaidToBeTheSameAs => "P460",
            Self::ProgrammingLanguage => "P277",
            Self::License => "P275",
            Self::SourceRepository => "P1324",
            Self::UserManualUrl => "P2078",
            Self::CranProject => "P5565",
            Self::ROpenSciPackage => "PA1",
            Self::GivenName => "P735",
            Self::FamilyName => "P734",
            Self::Orcid => "P496",
            Self::Email => "P968",
            Self::QuotesWork => "P6166",
            Self::Quotation => "P7081",
            Self::RelativePosition => "P2677",
            Self::CitesWork => "P2860",
            Self::ReferenceKey => "PA02",
            Self::ReferenceLabel => "PA03",
            Self::DependsOn => "P1547",
            Self::HasQuality => "P1552",
            Self::MaintainedBy => "P126",
            Self::Author => "P50",
            Self::Creator => "P170",
            Self::Contributor => "P767",
            Self::CopyrightHolder => "P3931",
            Self::Funder => "P8324",
            Self::ThesisAdvisor => "P184",
            Self::Translator => "P655",
            Self::ReviewedBy => "P4032",
            Self::DataContributor => "P1640",
            Self::Other(code) => code,
        }
    }

    /// Parse a code string; unknown codes become [`PropertyCode::Other`]
    pub fn parse(code: &str) -> Self {
        match code {
            "P248" => Self::StatedIn,
            "P348" => Self::Version,
            "P123" => Self::Publisher,
            "P854" => Self::ReferenceUrl,
            "P460" => Self::SaidToBeTheSameAs,
            "P277" => Self::ProgrammingLanguage,
            "P275" => Self::License,
            "P1324" => Self::SourceRepository,
            "P2078" => Self::UserManualUrl,
            "P5565" => Self::CranProject,
            "PA1" => Self::ROpenSciPackage,
            "P735" => Self::GivenName,
            "P734" => Self::FamilyName,
            "P496" => Self::Orcid,
            "P968" => Self::Email,
            "P6166" => Self::QuotesWork,
            "P7081" => Self::Quotation,
            "P2677" => Self::RelativePosition,
            "P2860" => Self::CitesWork,
            "PA02" => Self::ReferenceKey,
            "PA03" => Self::ReferenceLabel,
            "P1547" => Self::DependsOn,
            "P1552" => Self::HasQuality,
            "P126" => Self::MaintainedBy,
            "P50" => Self::Author,
            "P170" => Self::Creator,
            "P767" => Self::Contributor,
            "P3931" => Self::CopyrightHolder,
            "P8324" => Self::Funder,
            "P184" => Self::ThesisAdvisor,
            "P655" => Self::Translator,
            "P4032" => Self::ReviewedBy,
            "P1640" => Self::DataContributor,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this code is one the pipeline interprets
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for PropertyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PropertyCode {
    fn from(code: &str) -> Self {
        Self::parse(code)
    }
}

impl Serialize for PropertyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PropertyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::parse(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_known_codes_round_trip() {
        for code in ["P348", "P277", "PA1", "PA02", "P2860", "P8324"] {
            let property = PropertyCode::parse(code);
            assert!(property.is_known(), "{} should be known", code);
            assert_eq!(property.as_str(), code);
        }
    }

    #[test]
    fn test_unknown_code_is_kept_verbatim() {
        let property = PropertyCode::parse("P31");
        assert_eq!(property, PropertyCode::Other("P31".to_string()));
        assert!(!property.is_known());
        assert_eq!(property.to_string(), "P31");
    }

    #[test]
    fn test_serde_as_map_key() {
        let mut claims = BTreeMap::new();
        claims.insert(PropertyCode::Version, 1);
        claims.insert(PropertyCode::Other("P9999".to_string()), 2);

        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"P348\":1"));
        assert!(json.contains("\"P9999\":2"));

        let back: BTreeMap<PropertyCode, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, claims);
    }
}
