//! Phase orchestration
//!
//! The pipeline runs four serialized phases over one SQLite database:
//! `load` imports raw dumps, `populate` projects them into the staging graph,
//! `merge` records merge groups and `build` canonicalizes into the knowledge
//! base. Each phase can be rerun on its own.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::canonical::{CanonicalReport, Canonicalizer};
use crate::domain::claims::{Entity, EntityKind};
use crate::domain::merging::{MergeEngine, MergeGroups, MergeReport};
use crate::domain::relation::RelationKind;
use crate::domain::store::{GraphStore, MergeStateStore};
use crate::error::{Error, Result};
use crate::lookup::{BiblioResolver, CachedWebApi, ReqwestWebApi, SqliteLookupCache, WebApi};
use crate::staging::{
    BuiltinTemplateLoader, FileTemplateLoader, IdGenerator, ProjectionReport, SourceRegistry,
    SourceResolver, StagingContext, TemplateLoader, UuidIdGenerator, projectors_for,
};
use crate::storage::{
    Database, DatabaseConfig, GraphName, ImportResult, RawRecordStore, SqliteGraphStore,
    SqliteMergeStateStore, dumps_for,
};

/// Counters of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub load: ImportResult,
    pub populate: ProjectionReport,
    pub merge: MergeReport,
    pub build: CanonicalReport,
}

impl RunSummary {
    /// Warnings of every phase: skipped dump lines and records, failed
    /// matches, missing group members and dropped edges
    pub fn warnings(&self) -> usize {
        let build = &self.build;
        let dropped = self.merge.failures + build.invariant_violations + build.edges_skipped;
        self.load.warnings.len() + self.populate.warnings.len() + dropped as usize
    }
}

/// Row counts of both graphs and the raw store
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    /// `(source, collection, records)`
    pub raw: Vec<(String, String, u64)>,
    pub staging_vertices: BTreeMap<EntityKind, u64>,
    pub staging_edges: BTreeMap<RelationKind, u64>,
    pub kb_vertices: BTreeMap<EntityKind, u64>,
    pub kb_edges: BTreeMap<RelationKind, u64>,
    pub merge_groups: usize,
    pub merged_entities: usize,
    pub cached_lookups: u64,
}

/// Which graph a lookup reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSelector {
    Staging,
    Kb,
}

pub struct Pipeline {
    config: Config,
    db: Database,
    raw: RawRecordStore,
    staging: SqliteGraphStore,
    kb: SqliteGraphStore,
    merge_state: SqliteMergeStateStore,
    cache: SqliteLookupCache,
    templates: Box<dyn TemplateLoader>,
    sources: Box<dyn SourceResolver>,
    ids: Box<dyn IdGenerator>,
    biblio: Option<BiblioResolver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("database", &self.db.path())
            .field("sources", &self.config.pipeline.sources)
            .field("lookup", &self.biblio.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Open the configured database and resources
    pub async fn open(config: Config) -> Result<Self> {
        let db_config = DatabaseConfig::from_storage(&config.storage);
        let db = Database::new(db_config)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("{:#}", e)))?;
        Self::with_database(config, db)
    }

    /// Build a pipeline over an already opened database
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let templates: Box<dyn TemplateLoader> = match &config.resources.templates_dir {
            Some(dir) => Box::new(FileTemplateLoader::load(dir)),
            None => Box::new(BuiltinTemplateLoader),
        };
        let sources: Box<dyn SourceResolver> = match &config.resources.sources_file {
            Some(path) => Box::new(SourceRegistry::from_file(path)?),
            None => Box::new(SourceRegistry::builtin()),
        };

        let cache = SqliteLookupCache::new(db.pool().clone());
        let biblio = if config.lookup.enabled {
            let client = ReqwestWebApi::new(config.lookup.timeout_secs)?;
            let api: Arc<dyn WebApi> = if config.lookup.use_cache {
                Arc::new(CachedWebApi::new(client, cache.clone()))
            } else {
                Arc::new(client)
            };
            Some(BiblioResolver::from_config(api, &config.lookup))
        } else {
            None
        };

        Ok(Self {
            raw: db.raw_records(),
            staging: db.graph(GraphName::Staging),
            kb: db.graph(GraphName::Kb),
            merge_state: db.merge_state(),
            cache,
            templates,
            sources,
            ids: Box::new(UuidIdGenerator),
            biblio,
            config,
            db,
        })
    }

    /// Replace the key source of generated entities
    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Replace the bibliographic resolver used for reference blocks
    pub fn with_biblio(mut self, biblio: Option<BiblioResolver>) -> Self {
        self.biblio = biblio;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn staging(&self) -> &SqliteGraphStore {
        &self.staging
    }

    pub fn kb(&self) -> &SqliteGraphStore {
        &self.kb
    }

    pub fn raw(&self) -> &RawRecordStore {
        &self.raw
    }

    fn page_size(&self) -> u32 {
        self.config.pipeline.page_size.max(1)
    }

    // ========== Phases ==========

    /// Import the dumps of every enabled source
    ///
    /// Missing dump files are reported and skipped.
    pub async fn load(&self) -> Result<ImportResult> {
        let dump_dir = &self.config.resources.dump_dir;
        info!(dump_dir = %dump_dir.display(), "Loading raw dumps");

        let mut result = ImportResult::default();
        for source in &self.config.pipeline.sources {
            for spec in dumps_for(source) {
                let path = spec.path(dump_dir);
                if !path.exists() {
                    warn!(
                        source = %spec.source,
                        path = %path.display(),
                        "Dump file not found, skipping"
                    );
                    result
                        .warnings
                        .push(format!("{}: dump file {} not found", spec.source, path.display()));
                    continue;
                }
                result.absorb(self.raw.import_jsonl(spec, &path).await?);
            }
        }

        info!(
            records = result.records,
            duplicates = result.duplicates,
            skipped = result.skipped,
            "Load phase complete"
        );
        Ok(result)
    }

    /// Project raw records of every enabled source into the staging graph
    pub async fn populate(&self) -> Result<ProjectionReport> {
        let ctx = StagingContext {
            store: &self.staging,
            raw: &self.raw,
            templates: self.templates.as_ref(),
            sources: self.sources.as_ref(),
            ids: self.ids.as_ref(),
            biblio: self.biblio.as_ref(),
            page_size: self.page_size(),
        };

        let mut report = ProjectionReport::default();
        for projector in projectors_for(&self.config.pipeline.sources) {
            info!(projector = projector.name(), "Populating");
            report.absorb(projector.project(&ctx).await?);
        }

        info!(
            records = report.records,
            entities = report.entities_created,
            merged = report.entities_merged,
            relations = report.relations_created,
            skipped = report.skipped,
            "Populate phase complete"
        );
        Ok(report)
    }

    /// Compute merge groups from scratch and persist them
    pub async fn merge(&self) -> Result<(MergeReport, MergeGroups)> {
        self.merge_state.reset().await?;
        let mut groups = MergeGroups::new();
        let report = MergeEngine::new(&self.staging, self.page_size()).run(&mut groups).await?;
        self.merge_state.save(&groups).await?;
        Ok((report, groups))
    }

    /// Rebuild the knowledge base from the staging graph and persisted groups
    pub async fn build(&self) -> Result<CanonicalReport> {
        let groups = self.merge_state.load().await?;
        self.kb.clear().await?;
        Canonicalizer::new(&self.staging, &self.kb, &groups, self.page_size())
            .run()
            .await
    }

    /// Every phase in order
    pub async fn run(&self) -> Result<RunSummary> {
        let load = self.load().await?;
        let populate = self.populate().await?;
        let (merge, _) = self.merge().await?;
        let build = self.build().await?;

        let summary = RunSummary {
            load,
            populate,
            merge,
            build,
        };
        info!(
            loaded = summary.load.records,
            staged = summary.populate.entities_created,
            merges = summary.merge.total_merges(),
            canonical = summary.build.entities,
            warnings = summary.warnings(),
            "Pipeline run complete"
        );
        Ok(summary)
    }

    /// Clear staged state
    ///
    /// Raw records are kept unless `include_raw`; the lookup cache is
    /// cleared only with `include_cache`.
    pub async fn reset(&self, include_raw: bool, include_cache: bool) -> Result<()> {
        self.staging.clear().await?;
        self.kb.clear().await?;
        self.merge_state.reset().await?;
        if include_raw {
            let removed = self.raw.clear(None).await?;
            info!(removed, "Raw records cleared");
        }
        if include_cache {
            let removed = self.cache.clear().await?;
            info!(removed, "Lookup cache cleared");
        }
        info!("Staged state reset");
        Ok(())
    }

    // ========== Inspection ==========

    pub async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats {
            raw: self.raw.stats().await?,
            cached_lookups: self.cache.count().await?,
            ..GraphStats::default()
        };
        for kind in EntityKind::all() {
            stats.staging_vertices.insert(*kind, self.staging.count_vertices(*kind).await?);
            stats.kb_vertices.insert(*kind, self.kb.count_vertices(*kind).await?);
        }
        for kind in RelationKind::all() {
            stats.staging_edges.insert(*kind, self.staging.count_edges(*kind).await?);
            stats.kb_edges.insert(*kind, self.kb.count_edges(*kind).await?);
        }

        let groups = self.merge_state.load().await?;
        stats.merge_groups = groups.len();
        stats.merged_entities = groups.member_count();
        Ok(stats)
    }

    /// A vertex by id, e.g. `software/Q42`
    pub async fn show(&self, graph: GraphSelector, id: &str) -> Result<Entity> {
        let store: &dyn GraphStore = match graph {
            GraphSelector::Staging => &self.staging,
            GraphSelector::Kb => &self.kb,
        };
        store
            .get_vertex(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("vertex {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::SequentialIdGenerator;
    use std::fs;
    use tempfile::TempDir;

    async fn pipeline_with_dumps(dumps: &[(&str, &str, &str)]) -> (Pipeline, TempDir) {
        let dir = TempDir::new().unwrap();
        for (source, collection, body) in dumps {
            let source_dir = dir.path().join(source);
            fs::create_dir_all(&source_dir).unwrap();
            fs::write(source_dir.join(format!("{}.jsonl", collection)), body).unwrap();
        }

        let mut config = Config::default();
        config.resources.dump_dir = dir.path().to_path_buf();
        let db = Database::in_memory().await.unwrap();
        let pipeline = Pipeline::with_database(config, db)
            .unwrap()
            .with_id_generator(SequentialIdGenerator::new());
        (pipeline, dir)
    }

    #[test]
    fn test_summary_counts_warnings_of_every_phase() {
        let mut summary = RunSummary::default();
        summary.load.warnings.push("missing dump".to_string());
        summary.populate.warnings.push("missing Package".to_string());
        assert_eq!(summary.warnings(), 2);

        summary.merge.failures = 1;
        summary.build.invariant_violations = 2;
        summary.build.edges_skipped = 3;
        assert_eq!(summary.warnings(), 8);
    }

    #[tokio::test]
    async fn test_load_reports_missing_dumps() {
        let (pipeline, _dir) = pipeline_with_dumps(&[(
            "wikidata",
            "software",
            "{\"id\": \"Q1\", \"labels\": \"knitr\"}\n{\"id\": \"Q2\", \"labels\": \"ggplot2\"}\n",
        )])
        .await;

        let result = pipeline.load().await.unwrap();
        assert_eq!(result.records, 2);
        // rOpenSci, CRAN and the three mention collections are absent
        assert_eq!(result.warnings.len(), 5);
        assert_eq!(pipeline.raw().count("wikidata", "software").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_and_reset() {
        let (pipeline, _dir) = pipeline_with_dumps(&[(
            "wikidata",
            "software",
            "{\"id\": \"Q1\", \"labels\": \"knitr\"}\n",
        )])
        .await;

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.populate.entities_created, 1);
        assert_eq!(summary.build.entities, 1);

        let entity = pipeline.show(GraphSelector::Kb, "software/Q1").await.unwrap();
        assert_eq!(entity.labels, "knitr");

        let stats = pipeline.stats().await.unwrap();
        assert_eq!(stats.kb_vertices[&EntityKind::Software], 1);
        assert_eq!(stats.raw, vec![("wikidata".to_string(), "software".to_string(), 1)]);

        pipeline.reset(false, false).await.unwrap();
        let stats = pipeline.stats().await.unwrap();
        assert_eq!(stats.staging_vertices[&EntityKind::Software], 0);
        assert_eq!(stats.kb_vertices[&EntityKind::Software], 0);
        assert_eq!(stats.raw.len(), 1);

        let missing = pipeline.show(GraphSelector::Staging, "software/Q1").await.unwrap_err();
        assert_eq!(missing.code(), "E700");
    }
}
