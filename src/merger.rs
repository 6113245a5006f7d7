/// Configuration merger: CLI args > Env vars > Config files > Defaults
///
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (`MARGIE_*`, handled by clap)
/// 3. Project config, then user config (see `config_discovery`)
/// 4. Built-in defaults (lowest priority)
///
/// The result is resolved once in `main` and passed down by reference.
use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cache::Registry;
use crate::cli::GlobalArgs;
use crate::config::{EngineConfig, MargieConfig};
use crate::config_discovery::LoadedConfig;
use crate::logging::LogFormat;
use crate::storage::{SqliteStore, StoreOptions};

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store_path: PathBuf,
    pub store_options: StoreOptions,
    pub engine: EngineConfig,
    pub log_level: String,
    pub log_format: LogFormat,
    pub registry: Registry,
    /// Config files that contributed, lowest precedence first
    pub sources: Vec<PathBuf>,
    /// File layers after merging, before CLI overrides
    pub file: MargieConfig,
}

impl ResolvedConfig {
    pub fn merge(args: &GlobalArgs, loaded: LoadedConfig) -> Result<Self> {
        let file = loaded.config;
        file.validate().context("Invalid configuration")?;

        let log_level = args
            .log_level
            .clone()
            .unwrap_or_else(|| file.observability.log_level.clone());

        Ok(Self {
            store_path: args
                .db
                .clone()
                .unwrap_or_else(|| PathBuf::from(&file.store.path)),
            store_options: file.store_options(),
            engine: file.engine.clone(),
            log_level,
            log_format: LogFormat::resolve(file.observability.log_format.as_deref()),
            registry: file.registry(),
            sources: loaded.sources,
            file,
        })
    }

    /// Open (creating if needed) the configured store
    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.store_path, self.store_options)
            .with_context(|| format!("Failed to open store {}", self.store_path.display()))
    }
}
