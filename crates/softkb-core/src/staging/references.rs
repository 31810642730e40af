//! Reference-block processing
//!
//! R packages list the works to cite as bibtex entries and/or raw strings.
//! Each distinct entry is resolved through the bibliographic lookup; a hit
//! becomes a document cited by the package.

use serde_json::Value as Json;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::{ProjectionReport, StagingContext, index_document};
use crate::domain::claims::{Entity, EntityKind, PropertyCode, SourceRef, Value};
use crate::domain::merging::reference_signature;
use crate::domain::relation::{Relation, RelationKind};
use crate::error::Result;
use crate::lookup::BiblioQuery;

/// A parsed bibtex entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibtexEntry {
    pub entry_type: String,
    pub key: String,
    /// Field values keyed by lower-cased field name, braces removed
    pub fields: BTreeMap<String, String>,
}

impl BibtexEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Last name of the first author
    pub fn first_author_last_name(&self) -> Option<String> {
        let authors = self.field("author")?;
        let first = authors.split(" and ").next()?.trim();
        let last = match first.split_once(',') {
            Some((last, _)) => last.trim(),
            None => first.split_whitespace().last()?,
        };
        Some(last.to_string()).filter(|l| !l.is_empty())
    }

    /// Plain-text rendering used as the raw reference string
    pub fn formatted(&self) -> String {
        let venue = self
            .field("journal")
            .or_else(|| self.field("booktitle"))
            .or_else(|| self.field("publisher"));
        let parts = [
            self.field("author").map(|a| a.replace(" and ", ", ")),
            self.field("title").map(str::to_string),
            venue.map(str::to_string),
            self.field("year").map(str::to_string),
            self.field("url").or_else(|| self.field("doi")).map(str::to_string),
        ];
        parts.into_iter().flatten().collect::<Vec<_>>().join(". ")
    }
}

/// Parse the first entry of a bibtex string
///
/// Entries without a citation key are accepted.
pub fn parse_bibtex(input: &str) -> Option<BibtexEntry> {
    let start = input.find('@')?;
    let rest = &input[start + 1..];
    let open = rest.find(['{', '('])?;
    let entry_type = rest[..open].trim().to_lowercase();
    if entry_type.is_empty() {
        return None;
    }

    let body: Vec<char> = rest[open + 1..].chars().collect();
    let mut pos = 0;

    let mut key = String::new();
    while pos < body.len() && body[pos] != ',' && body[pos] != '}' {
        key.push(body[pos]);
        pos += 1;
    }

    let mut fields = BTreeMap::new();
    loop {
        while pos < body.len() && (body[pos] == ',' || body[pos].is_whitespace()) {
            pos += 1;
        }
        if pos >= body.len() || body[pos] == '}' || body[pos] == ')' {
            break;
        }

        let mut name = String::new();
        while pos < body.len() && body[pos] != '=' && body[pos] != ',' && body[pos] != '}' {
            name.push(body[pos]);
            pos += 1;
        }
        if pos >= body.len() || body[pos] != '=' {
            break;
        }
        pos += 1;
        while pos < body.len() && body[pos].is_whitespace() {
            pos += 1;
        }

        let value = read_value(&body, &mut pos);
        let name = name.trim().to_lowercase();
        if !name.is_empty() {
            fields.insert(name, squash_whitespace(&value));
        }
    }

    Some(BibtexEntry {
        entry_type,
        key: key.trim().to_string(),
        fields,
    })
}

fn read_value(body: &[char], pos: &mut usize) -> String {
    let mut value = String::new();
    match body.get(*pos) {
        Some('{') => {
            let mut depth = 0usize;
            while *pos < body.len() {
                let c = body[*pos];
                *pos += 1;
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => value.push(c),
                }
            }
        }
        Some('"') => {
            *pos += 1;
            while *pos < body.len() && body[*pos] != '"' {
                if body[*pos] != '{' && body[*pos] != '}' {
                    value.push(body[*pos]);
                }
                *pos += 1;
            }
            *pos += 1;
        }
        _ => {
            while *pos < body.len() && body[*pos] != ',' && body[*pos] != '}' {
                value.push(body[*pos]);
                *pos += 1;
            }
        }
    }
    value
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves the entries of a reference block into cited documents
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBlockProcessor;

impl ReferenceBlockProcessor {
    /// Lookup queries of a reference block, deduplicated by signature
    ///
    /// When any bibtex entry is present, raw strings are ignored.
    pub fn queries(&self, block: &[Json]) -> Vec<BiblioQuery> {
        let has_bibtex = block.iter().any(|reference| reference.get("bibtex").is_some());
        let mut signatures = HashSet::new();
        let mut queries = Vec::new();

        for reference in block {
            if let Some(bibtex) = reference.get("bibtex").and_then(Json::as_str) {
                if !signatures.insert(reference_signature(bibtex)) {
                    continue;
                }
                match parse_bibtex(bibtex) {
                    Some(entry) => queries.push(BiblioQuery {
                        doi: entry.field("doi").map(str::to_string),
                        title: entry.field("title").map(str::to_string),
                        first_author: entry.first_author_last_name(),
                        raw: Some(entry.formatted()).filter(|raw| !raw.is_empty()),
                        ..BiblioQuery::default()
                    }),
                    None => debug!(bibtex, "Failed to parse bibtex entry"),
                }
                continue;
            }

            if has_bibtex {
                continue;
            }
            let raw = reference
                .get("raw")
                .and_then(Json::as_str)
                .or_else(|| reference.as_str())
                .map(str::trim)
                .filter(|raw| !raw.is_empty());
            if let Some(raw) = raw {
                if signatures.insert(reference_signature(raw)) {
                    queries.push(BiblioQuery {
                        raw: Some(raw.to_string()),
                        ..BiblioQuery::default()
                    });
                }
            }
        }
        queries
    }

    /// What identifies a resolved work: its DOI, its title and first author,
    /// or the signature of the query text
    fn identity(indexed: &Entity, query: &BiblioQuery) -> String {
        indexed
            .index
            .index_doi
            .clone()
            .or_else(|| indexed.index.index_title_author.clone())
            .unwrap_or_else(|| {
                let text = query.raw.as_deref().or(query.title.as_deref()).unwrap_or_default();
                reference_signature(text)
            })
    }

    /// Resolve a reference block and link `entity` to every document found
    pub async fn process(
        &self,
        ctx: &StagingContext<'_>,
        block: &[Json],
        entity: &Entity,
        source: &SourceRef,
    ) -> Result<ProjectionReport> {
        let mut report = ProjectionReport::default();
        let Some(biblio) = ctx.biblio else {
            return Ok(report);
        };

        for query in self.queries(block) {
            let Some(metadata) = biblio.lookup(&query).await else {
                debug!(entity_id = %entity.id, "Reference not resolved");
                continue;
            };

            let mut indexed = Entity::new(EntityKind::Document, "");
            indexed.metadata = Some(metadata);
            index_document(&mut indexed);
            let identity = Self::identity(&indexed, &query);

            let parts = ["reference", identity.as_str()];
            let mut document = ctx.entity_for(EntityKind::Document, &parts, source)?;
            document.metadata = indexed.metadata;
            document.index = indexed.index;
            if !ctx.store.has_vertex(&document.id).await? {
                report.created(ctx.store.insert_vertex(&document).await?);
            }

            let key = format!("{}_{}", entity.key(), document.key());
            let mut relation =
                Relation::new(RelationKind::Reference, &key, &entity.id, &document.id);
            relation.push_value(PropertyCode::CitesWork, Value::marker(), source);
            if !ctx.store.has_edge(&relation.id).await? {
                report.linked(ctx.store.insert_edge(&relation).await?);
            }
        }
        Ok(report)
    }
}
