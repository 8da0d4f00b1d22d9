//! Configuration system for simplemem.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::consolidation::ConsolidationConfig;
use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::IndexConfig;
use crate::ingestion::{AtomizerConfig, GateConfig, WindowingConfig};
use crate::retrieval::RetrievalConfig;

/// Where entries are persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; lost on exit.
    Memory,
    /// SQLite database file.
    #[default]
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the SQLite backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: default_data_dir().join("memory.db"),
        }
    }
}

/// Data directory used when no path is configured.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".simplemem"))
        .unwrap_or_else(|| PathBuf::from(".simplemem"))
}

/// Main memory configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Entropy gate.
    pub gate: GateConfig,
    /// Claim extraction.
    pub atomizer: AtomizerConfig,
    /// Tri-layer index.
    pub index: IndexConfig,
    /// Background consolidation.
    pub consolidation: ConsolidationConfig,
    /// Hybrid retrieval.
    pub retrieval: RetrievalConfig,
    /// Transcript windowing.
    pub windowing: WindowingConfig,
    /// Persistence.
    pub storage: StorageConfig,
}

impl MemoryConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> SimpleMemResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| SimpleMemError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| SimpleMemError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| SimpleMemError::Configuration(e.to_string()))?,
            _ => {
                return Err(SimpleMemError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `SIMPLEMEM_*` environment variables on top of
    /// the defaults.
    pub fn from_env() -> SimpleMemResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SIMPLEMEM_*` environment variables.
    pub fn apply_env(&mut self) -> SimpleMemResult<()> {
        if let Ok(path) = std::env::var("SIMPLEMEM_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(backend) = env_parse::<StorageBackend>("SIMPLEMEM_STORAGE")? {
            self.storage.backend = backend;
        }
        if let Some(dims) = env_parse("SIMPLEMEM_EMBEDDING_DIMS")? {
            self.index.embedding_dims = dims;
        }
        if let Some(alpha) = env_parse("SIMPLEMEM_GATE_ALPHA")? {
            self.gate.alpha = alpha;
        }
        if let Some(threshold) = env_parse("SIMPLEMEM_GATE_THRESHOLD")? {
            self.gate.redundancy_threshold = threshold;
        }
        if let Some(budget) = env_parse("SIMPLEMEM_TOKEN_BUDGET")? {
            self.retrieval.token_budget = budget;
        }
        if let Some(minutes) = env_parse("SIMPLEMEM_CONSOLIDATION_INTERVAL_MINUTES")? {
            self.consolidation.interval_minutes = minutes;
        }
        if let Some(size) = env_parse("SIMPLEMEM_WINDOW_SIZE")? {
            self.windowing.window_size = size;
        }
        Ok(())
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> SimpleMemResult<()> {
        let sections: [(&str, Result<(), &'static str>); 6] = [
            ("gate", self.gate.validate()),
            ("atomizer", self.atomizer.validate()),
            ("index", self.index.validate()),
            ("consolidation", self.consolidation.validate()),
            ("retrieval", self.retrieval.validate()),
            ("windowing", self.windowing.validate()),
        ];
        for (section, result) in sections {
            result.map_err(|msg| SimpleMemError::invalid_config(section, msg))?;
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::default()
    }
}

fn env_parse<T: FromStr>(key: &str) -> SimpleMemResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SimpleMemError::invalid_config(key, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for MemoryConfig.
#[derive(Default)]
pub struct MemoryConfigBuilder {
    config: MemoryConfig,
}

impl MemoryConfigBuilder {
    /// Set entropy gate configuration.
    pub fn gate(mut self, config: GateConfig) -> Self {
        self.config.gate = config;
        self
    }

    /// Set atomizer configuration.
    pub fn atomizer(mut self, config: AtomizerConfig) -> Self {
        self.config.atomizer = config;
        self
    }

    /// Set index configuration.
    pub fn index(mut self, config: IndexConfig) -> Self {
        self.config.index = config;
        self
    }

    /// Set consolidation configuration.
    pub fn consolidation(mut self, config: ConsolidationConfig) -> Self {
        self.config.consolidation = config;
        self
    }

    /// Set retrieval configuration.
    pub fn retrieval(mut self, config: RetrievalConfig) -> Self {
        self.config.retrieval = config;
        self
    }

    /// Set windowing configuration.
    pub fn windowing(mut self, config: WindowingConfig) -> Self {
        self.config.windowing = config;
        self
    }

    /// Keep everything in process memory.
    pub fn in_memory(mut self) -> Self {
        self.config.storage.backend = StorageBackend::Memory;
        self
    }

    /// Persist to a SQLite file.
    pub fn sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: path.into(),
        };
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SimpleMemResult<MemoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
