//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Sources known to the staging graph builder, in projection order
pub const KNOWN_SOURCES: &[&str] = &["wikidata", "rOpenSci", "CRAN", "mentions"];

/// softkb configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub resources: ResourcesConfig,
    pub lookup: LookupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub page_size: u32,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Directory holding `<source>/<collection>.jsonl` dumps
    pub dump_dir: PathBuf,
    /// Directory holding `<kind>_template.json` files; built-in templates when unset
    pub templates_dir: Option<PathBuf>,
    /// JSON file mapping source names to source markers; built-in markers when unset
    pub sources_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    pub enabled: bool,
    pub use_cache: bool,
    pub biblio_glutton_url: String,
    pub crossref_base: String,
    pub crossref_email: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_path: default_data_dir().join("softkb.db"),
                max_connections: 5,
            },
            pipeline: PipelineConfig {
                page_size: 1000,
                sources: KNOWN_SOURCES.iter().map(|s| s.to_string()).collect(),
            },
            resources: ResourcesConfig {
                dump_dir: PathBuf::from("data/dumps"),
                templates_dir: None,
                sources_file: None,
            },
            lookup: LookupConfig {
                enabled: false,
                use_cache: true,
                biblio_glutton_url: "http://localhost:8080/service/lookup".to_string(),
                crossref_base: "https://api.crossref.org".to_string(),
                crossref_email: None,
                timeout_secs: 30,
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("softkb"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SOFTKB_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("softkb")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.page_size == 0 {
            return Err(anyhow!("pipeline.page_size must be greater than zero"));
        }
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be greater than zero"));
        }
        for source in &self.pipeline.sources {
            if !KNOWN_SOURCES.contains(&source.as_str()) {
                return Err(anyhow!(
                    "Unknown source '{}'. Valid sources: {}",
                    source,
                    KNOWN_SOURCES.join(", ")
                ));
            }
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "storage.database_path" => Ok(self.storage.database_path.display().to_string()),
            "storage.max_connections" => Ok(self.storage.max_connections.to_string()),

            "pipeline.page_size" => Ok(self.pipeline.page_size.to_string()),
            "pipeline.sources" => Ok(self.pipeline.sources.join(", ")),

            "resources.dump_dir" => Ok(self.resources.dump_dir.display().to_string()),
            "resources.templates_dir" => Ok(display_optional_path(&self.resources.templates_dir)),
            "resources.sources_file" => Ok(display_optional_path(&self.resources.sources_file)),

            "lookup.enabled" => Ok(self.lookup.enabled.to_string()),
            "lookup.use_cache" => Ok(self.lookup.use_cache.to_string()),
            "lookup.biblio_glutton_url" => Ok(self.lookup.biblio_glutton_url.clone()),
            "lookup.crossref_base" => Ok(self.lookup.crossref_base.clone()),
            "lookup.crossref_email" => Ok(self
                .lookup
                .crossref_email
                .clone()
                .unwrap_or_else(|| "(not set)".to_string())),
            "lookup.timeout_secs" => Ok(self.lookup.timeout_secs.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `softkb config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "storage.database_path" => {
                self.storage.database_path = PathBuf::from(value);
            }
            "storage.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be greater than zero"));
                }
                self.storage.max_connections = max;
            }

            "pipeline.page_size" => {
                let size: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid page_size value: {}", value))?;
                if size == 0 {
                    return Err(anyhow!("page_size must be greater than zero"));
                }
                self.pipeline.page_size = size;
            }
            "pipeline.sources" => {
                let sources: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                for source in &sources {
                    if !KNOWN_SOURCES.contains(&source.as_str()) {
                        return Err(anyhow!(
                            "Unknown source '{}'. Valid sources: {}",
                            source,
                            KNOWN_SOURCES.join(", ")
                        ));
                    }
                }
                self.pipeline.sources = sources;
            }

            "resources.dump_dir" => {
                self.resources.dump_dir = PathBuf::from(value);
            }
            "resources.templates_dir" => {
                self.resources.templates_dir = parse_optional_path(value);
            }
            "resources.sources_file" => {
                self.resources.sources_file = parse_optional_path(value);
            }

            "lookup.enabled" => {
                self.lookup.enabled = parse_bool(key, value)?;
            }
            "lookup.use_cache" => {
                self.lookup.use_cache = parse_bool(key, value)?;
            }
            "lookup.biblio_glutton_url" => {
                self.lookup.biblio_glutton_url = value.trim_end_matches('/').to_string();
            }
            "lookup.crossref_base" => {
                self.lookup.crossref_base = value.trim_end_matches('/').to_string();
            }
            "lookup.crossref_email" => {
                self.lookup.crossref_email = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "lookup.timeout_secs" => {
                self.lookup.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `softkb config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "storage.database_path",
            "storage.max_connections",
            "pipeline.page_size",
            "pipeline.sources",
            "resources.dump_dir",
            "resources.templates_dir",
            "resources.sources_file",
            "lookup.enabled",
            "lookup.use_cache",
            "lookup.biblio_glutton_url",
            "lookup.crossref_base",
            "lookup.crossref_email",
            "lookup.timeout_secs",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn display_optional_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(built-in)".to_string())
}

fn parse_optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid boolean for {}: {}", key, value)),
    }
}
