//! softkb CLI - software knowledge base builder

use clap::{Parser, Subcommand};
use softkb_core::config::Config;
use softkb_core::domain::merging::MergeReport;
use softkb_core::pipeline::{GraphSelector, GraphStats, Pipeline, RunSummary};
use softkb_core::storage::{Database, DatabaseConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "softkb")]
#[command(author, version, about = "Software knowledge base builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Import raw source dumps
    Load {
        /// Directory holding <source>/<collection>.jsonl dumps
        #[arg(short, long)]
        dump_dir: Option<PathBuf>,
    },

    /// Project raw records into the staging graph
    Populate,

    /// Compute merge groups over the staging graph
    Merge,

    /// Canonicalize the staging graph into the knowledge base
    Build,

    /// Run load, populate, merge and build in order
    Run {
        /// Directory holding <source>/<collection>.jsonl dumps
        #[arg(short, long)]
        dump_dir: Option<PathBuf>,
    },

    /// Clear the staging graph, merge groups and knowledge base
    Reset {
        /// Also remove imported raw records
        #[arg(long)]
        raw: bool,
        /// Also clear the lookup cache
        #[arg(long)]
        cache: bool,
    },

    /// Show record counts
    Stats,

    /// Show a vertex, e.g. `software/Q42`
    Show {
        id: String,
        /// Read from the staging graph instead of the knowledge base
        #[arg(long)]
        staging: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("softkb=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Load { dump_dir } => {
            let pipeline = open_pipeline(dump_dir).await?;
            cmd_load(&pipeline, cli.quiet).await
        }

        Commands::Populate => {
            let pipeline = open_pipeline(None).await?;
            cmd_populate(&pipeline, cli.quiet).await
        }

        Commands::Merge => {
            let pipeline = open_pipeline(None).await?;
            cmd_merge(&pipeline, cli.quiet).await
        }

        Commands::Build => {
            let pipeline = open_pipeline(None).await?;
            cmd_build(&pipeline, cli.quiet).await
        }

        Commands::Run { dump_dir } => {
            let pipeline = open_pipeline(dump_dir).await?;
            cmd_run(&pipeline, cli.format, cli.quiet).await
        }

        Commands::Reset { raw, cache } => {
            let pipeline = open_pipeline(None).await?;
            pipeline.reset(raw, cache).await?;
            if !cli.quiet {
                println!("Staged state cleared.");
            }
            Ok(())
        }

        Commands::Stats => {
            let pipeline = open_pipeline(None).await?;
            cmd_stats(&pipeline, cli.format).await
        }

        Commands::Show { id, staging } => {
            let pipeline = open_pipeline(None).await?;
            cmd_show(&pipeline, &id, staging, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

async fn open_pipeline(dump_dir: Option<PathBuf>) -> anyhow::Result<Pipeline> {
    let mut config = Config::load()?;
    if let Some(dir) = dump_dir {
        config.resources.dump_dir = dir;
    }
    let pipeline = Pipeline::open(config).await?;
    Ok(pipeline)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_load(pipeline: &Pipeline, quiet: bool) -> anyhow::Result<()> {
    let result = pipeline.load().await?;
    if !quiet {
        println!(
            "Loaded {} records ({} already present, {} skipped).",
            result.records, result.duplicates, result.skipped
        );
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
    }
    Ok(())
}

async fn cmd_populate(pipeline: &Pipeline, quiet: bool) -> anyhow::Result<()> {
    let report = pipeline.populate().await?;
    if !quiet {
        println!(
            "Staged {} entities and {} relations from {} records ({} folded, {} skipped).",
            report.entities_created,
            report.relations_created,
            report.records,
            report.entities_merged,
            report.skipped
        );
    }
    Ok(())
}

async fn cmd_merge(pipeline: &Pipeline, quiet: bool) -> anyhow::Result<()> {
    let (report, groups) = pipeline.merge().await?;
    if !quiet {
        println!(
            "Examined {} entities: {} merge groups covering {} entities.",
            report.examined,
            groups.len(),
            groups.member_count()
        );
        print_merges(&report);
    }
    Ok(())
}

async fn cmd_build(pipeline: &Pipeline, quiet: bool) -> anyhow::Result<()> {
    let report = pipeline.build().await?;
    if !quiet {
        println!(
            "Built {} entities ({} folded) and {} relations ({} dangling edges skipped).",
            report.entities, report.folded, report.relations, report.edges_skipped
        );
        if report.invariant_violations > 0 {
            println!(
                "  {} merge group members were missing from staging.",
                report.invariant_violations
            );
        }
    }
    Ok(())
}

async fn cmd_run(pipeline: &Pipeline, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    info!("Starting pipeline run");
    let summary = pipeline.run().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?)
        }
        OutputFormat::Text if quiet => {}
        OutputFormat::Text => {
            println!("Pipeline run complete:");
            println!(
                "  Load:     {} records ({} skipped)",
                summary.load.records, summary.load.skipped
            );
            println!(
                "  Populate: {} entities, {} relations ({} skipped)",
                summary.populate.entities_created,
                summary.populate.relations_created,
                summary.populate.skipped
            );
            println!(
                "  Merge:    {} merges ({} failures)",
                summary.merge.total_merges(),
                summary.merge.failures
            );
            println!(
                "  Build:    {} entities, {} relations ({} edges skipped)",
                summary.build.entities, summary.build.relations, summary.build.edges_skipped
            );
            if summary.warnings() > 0 {
                println!("  {} warnings, see the log for details.", summary.warnings());
            }
        }
    }
    Ok(())
}

fn print_merges(report: &MergeReport) {
    for (rule, count) in &report.merges {
        println!("  {}: {}", rule, count);
    }
    if report.failures > 0 {
        warn!(failures = report.failures, "Some entities could not be matched");
        println!("  {} entities failed matching.", report.failures);
    }
}

fn summary_json(summary: &RunSummary) -> serde_json::Value {
    let merges: serde_json::Map<String, serde_json::Value> = summary
        .merge
        .merges
        .iter()
        .map(|(rule, count)| (rule.to_string(), (*count).into()))
        .collect();
    serde_json::json!({
        "load": {
            "records": summary.load.records,
            "duplicates": summary.load.duplicates,
            "skipped": summary.load.skipped,
        },
        "populate": {
            "records": summary.populate.records,
            "entities": summary.populate.entities_created,
            "merged": summary.populate.entities_merged,
            "relations": summary.populate.relations_created,
            "skipped": summary.populate.skipped,
        },
        "merge": {
            "examined": summary.merge.examined,
            "merges": merges,
            "failures": summary.merge.failures,
        },
        "build": {
            "entities": summary.build.entities,
            "folded": summary.build.folded,
            "relations": summary.build.relations,
            "edges_skipped": summary.build.edges_skipped,
            "invariant_violations": summary.build.invariant_violations,
        },
        "warnings": summary.warnings(),
    })
}

fn stats_json(stats: &GraphStats) -> serde_json::Value {
    fn counts<K: std::fmt::Display>(map: &std::collections::BTreeMap<K, u64>) -> serde_json::Value {
        map.iter()
            .map(|(kind, count)| (kind.to_string(), serde_json::Value::from(*count)))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    let raw: Vec<serde_json::Value> = stats
        .raw
        .iter()
        .map(|(source, collection, records)| {
            serde_json::json!({"source": source, "collection": collection, "records": records})
        })
        .collect();
    serde_json::json!({
        "raw": raw,
        "staging": {
            "vertices": counts(&stats.staging_vertices),
            "edges": counts(&stats.staging_edges),
        },
        "kb": {"vertices": counts(&stats.kb_vertices), "edges": counts(&stats.kb_edges)},
        "merge_groups": stats.merge_groups,
        "merged_entities": stats.merged_entities,
        "cached_lookups": stats.cached_lookups,
    })
}

async fn cmd_stats(pipeline: &Pipeline, format: OutputFormat) -> anyhow::Result<()> {
    let stats = pipeline.stats().await?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats_json(&stats))?);
        return Ok(());
    }

    println!("Raw records:");
    if stats.raw.is_empty() {
        println!("  (none)");
    }
    for (source, collection, records) in &stats.raw {
        println!("  {}/{}: {}", source, collection, records);
    }

    println!("Staging graph:");
    for (kind, count) in &stats.staging_vertices {
        println!("  {}: {}", kind.collection(), count);
    }
    for (kind, count) in &stats.staging_edges {
        println!("  {}: {}", kind, count);
    }

    println!("Knowledge base:");
    for (kind, count) in &stats.kb_vertices {
        println!("  {}: {}", kind.collection(), count);
    }
    for (kind, count) in &stats.kb_edges {
        println!("  {}: {}", kind, count);
    }

    println!(
        "Merge groups: {} ({} entities)",
        stats.merge_groups, stats.merged_entities
    );
    println!("Cached lookups: {}", stats.cached_lookups);
    Ok(())
}

async fn cmd_show(
    pipeline: &Pipeline,
    id: &str,
    staging: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = if staging {
        GraphSelector::Staging
    } else {
        GraphSelector::Kb
    };
    let entity = pipeline.show(graph, id).await.map_err(|e| {
        anyhow::anyhow!(
            "{} Run `softkb stats` to see what has been built.",
            e
        )
    })?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entity)?);
        return Ok(());
    }

    println!("{}: {}", entity.id, entity.labels);
    if !entity.aliases.is_empty() {
        println!("  Aliases: {}", entity.aliases.join(", "));
    }
    if let Some(descriptions) = &entity.descriptions {
        println!("  Description: {}", descriptions);
    }
    for (property, values) in &entity.claims {
        for value in values {
            let payload = value
                .value
                .as_ref()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_default();
            let sources: Vec<String> = value
                .references
                .iter()
                .map(|r| format!("{}:{}", r.source_id(), r.count()))
                .collect();
            println!("  {} = {} [{}]", property, payload, sources.join(", "));
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("softkb Health Check");
        println!("===================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            Config::default()
        }
    };

    // Check config file location
    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => {
                println!("[!!] Config file: Error - {}", e);
            }
        }
    }

    // Check dump directory
    let dump_dir = &config.resources.dump_dir;
    if dump_dir.is_dir() {
        if !quiet {
            println!("[OK] Dump directory: {}", dump_dir.display());
        }
    } else if !quiet {
        println!(
            "[--] Dump directory: {} (not found, `load` will skip every source)",
            dump_dir.display()
        );
    }

    // Check resources
    for (name, path) in [
        ("Templates", &config.resources.templates_dir),
        ("Sources file", &config.resources.sources_file),
    ] {
        match path {
            Some(path) if path.exists() => {
                if !quiet {
                    println!("[OK] {}: {}", name, path.display());
                }
            }
            Some(path) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] {}: {} does not exist", name, path.display());
                }
            }
            None => {
                if !quiet {
                    println!("[OK] {}: built-in", name);
                }
            }
        }
    }

    // Check database
    match Database::new(DatabaseConfig::from_storage(&config.storage)).await {
        Ok(db) => match db.health_check().await {
            Ok(()) => {
                if !quiet {
                    println!("[OK] Database: Connected");
                    println!("     Path: {}", db.path().display());
                }
                match db.migration_status().await {
                    Ok(status) if status.needs_migration => {
                        all_ok = false;
                        if !quiet {
                            println!(
                                "[!!] Database: Migrations pending (v{} -> v{})",
                                status.current_version, status.target_version
                            );
                        }
                    }
                    Ok(status) => {
                        if !quiet {
                            println!("[OK] Database: Schema v{}", status.current_version);
                            if let Ok(counts) = db.table_counts().await {
                                let rows: Vec<String> = counts
                                    .iter()
                                    .map(|(table, n)| format!("{}={}", table, n))
                                    .collect();
                                println!("     Rows: {}", rows.join(", "));
                            }
                        }
                    }
                    Err(e) => {
                        all_ok = false;
                        if !quiet {
                            println!("[!!] Database: Migration check failed - {}", e);
                        }
                    }
                }
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Database: Health check failed - {}", e);
                }
            }
        },
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    // Lookup services are only contacted during populate
    if !quiet {
        if config.lookup.enabled {
            println!("[OK] Lookup: {}", config.lookup.biblio_glutton_url);
        } else {
            println!("[--] Lookup: disabled, reference blocks are skipped");
        }
    }

    // Summary
    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod main_tests;
