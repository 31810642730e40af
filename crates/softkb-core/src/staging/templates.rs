//! Entity templates
//!
//! A template is a blank, schema-valid entity literal for one kind. Building
//! an entity from a template stamps the source marker into every empty
//! reference list the template carries.

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::claims::{Claims, Entity, EntityKind, IndexFields, SourceRef};
use crate::error::{Error, Result};

/// Body of an entity template
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub labels: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub descriptions: Option<String>,
    #[serde(default)]
    pub claims: Claims,
    #[serde(default)]
    pub metadata: Option<Json>,
}

/// Provider of entity templates
pub trait TemplateLoader: Send + Sync {
    fn template(&self, kind: EntityKind) -> Result<Template>;

    /// Blank entity of `kind` keyed by `key`, every claim value stamped with `source`
    fn entity(&self, kind: EntityKind, key: &str, source: &SourceRef) -> Result<Entity> {
        let template = self.template(kind)?;
        let mut entity = Entity {
            id: kind.id_for(key),
            kind,
            labels: template.labels,
            aliases: template.aliases,
            summary: template.summary,
            descriptions: template.descriptions,
            claims: template.claims,
            metadata: template.metadata,
            index: IndexFields::default(),
        };
        entity.stamp_source(source);
        Ok(entity)
    }
}

/// Templates read from `<dir>/<kind>_template.json`
#[derive(Debug, Clone)]
pub struct FileTemplateLoader {
    dir: PathBuf,
    templates: HashMap<EntityKind, Template>,
}

impl FileTemplateLoader {
    /// Read every template present in `dir`
    ///
    /// Missing or unreadable templates are reported when their kind is
    /// requested, so only the projectors needing them fail.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut templates = HashMap::new();
        for kind in EntityKind::all() {
            let path = Self::template_path(&dir, *kind);
            if !path.exists() {
                continue;
            }
            let parsed = std::fs::read_to_string(&path).map_err(Error::from).and_then(|content| {
                serde_json::from_str::<Template>(&content).map_err(|e| Error::Parse(e.to_string()))
            });
            match parsed {
                Ok(template) => {
                    debug!(kind = %kind, path = %path.display(), "Loaded entity template");
                    templates.insert(*kind, template);
                }
                Err(e) => {
                    warn!(kind = %kind, path = %path.display(), error = %e, "Invalid template")
                }
            }
        }
        Self { dir, templates }
    }

    pub fn template_path(dir: &Path, kind: EntityKind) -> PathBuf {
        dir.join(format!("{}_template.json", kind.as_str()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TemplateLoader for FileTemplateLoader {
    fn template(&self, kind: EntityKind) -> Result<Template> {
        self.templates
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::TemplateMissing(kind.as_str().to_string()))
    }
}

/// Empty templates for every kind
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTemplateLoader;

impl TemplateLoader for BuiltinTemplateLoader {
    fn template(&self, _kind: EntityKind) -> Result<Template> {
        Ok(Template::default())
    }
}
