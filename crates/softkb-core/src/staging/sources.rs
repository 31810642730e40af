//! Source markers stamped on staged claim values

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::domain::claims::SourceRef;
use crate::error::{Error, Result};

/// Resolves a source name to the marker stamped on its claim values
pub trait SourceResolver: Send + Sync {
    fn source(&self, name: &str) -> Result<SourceRef>;
}

/// Description of a source in `sources.json`
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDescription {
    /// Wikidata item of the source, preferred when present
    #[serde(default)]
    pub wikidata: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
}

impl SourceDescription {
    fn marker(&self, name: &str) -> SourceRef {
        match (&self.wikidata, &self.term) {
            (Some(item), _) => SourceRef::item(item.clone()),
            (None, Some(term)) => SourceRef::named(term.clone()),
            (None, None) => SourceRef::named(name),
        }
    }
}

/// Source markers by name
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: HashMap<String, SourceDescription>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SourceRegistry {
    /// Markers for the sources the pipeline knows about
    pub fn builtin() -> Self {
        let entries = [
            ("wikidata", Some("Q2013"), "Wikidata"),
            ("rOpenSci", None, "rOpenSci"),
            ("CRAN", None, "CRAN"),
            ("mentions", None, "software-mentions"),
        ];
        let sources = entries
            .into_iter()
            .map(|(name, item, term)| {
                (
                    name.to_string(),
                    SourceDescription {
                        wikidata: item.map(str::to_string),
                        term: Some(term.to_string()),
                    },
                )
            })
            .collect();
        Self { sources }
    }

    /// Read a `sources.json` object mapping source names to descriptions
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let sources: HashMap<String, SourceDescription> = serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("Invalid sources file {}: {}", path.display(), e)))?;
        Ok(Self { sources })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl SourceResolver for SourceRegistry {
    fn source(&self, name: &str) -> Result<SourceRef> {
        self.sources
            .get(name)
            .map(|description| description.marker(name))
            .ok_or_else(|| Error::NotFound(format!("source {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claims::Datatype;

    #[test]
    fn test_builtin_sources() {
        let registry = SourceRegistry::builtin();

        let wikidata = registry.source("wikidata").unwrap();
        assert_eq!(wikidata.source_id(), "Q2013");
        assert_eq!(wikidata.stated_in.datatype, Datatype::WikibaseItem);

        let mentions = registry.source("mentions").unwrap();
        assert_eq!(mentions.source_id(), "software-mentions");
        assert_eq!(mentions.stated_in.datatype, Datatype::String);

        assert!(matches!(registry.source("pypi"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sources_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(
            &path,
            r#"{"CRAN": {"term": "CRAN", "wikidata": "Q2007960"}, "mentions": {"term": "softcite"}}"#,
        )
        .unwrap();

        let registry = SourceRegistry::from_file(&path).unwrap();
        assert_eq!(registry.source("CRAN").unwrap().source_id(), "Q2007960");
        assert_eq!(registry.source("mentions").unwrap().source_id(), "softcite");
        assert!(registry.source("wikidata").is_err());
    }
}
