use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::{ComputationDescriptor, Registry};
use crate::engine::command::default_args;
use crate::logging::LogFormat;
use crate::storage::{RetryPolicy, StoreOptions, DEFAULT_STORE_FILE};

/// Complete MARGIE configuration (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MargieConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Extra or overriding computation descriptors
    #[serde(default, rename = "computation", skip_serializing_if = "Vec::is_empty")]
    pub computations: Vec<ComputationDescriptor>,
}

/// Store file settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path of the SQLite store file
    #[serde(default = "default_store_path")]
    pub path: String,

    /// SQLite busy timeout before a lock is reported
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// External engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Program to run, resolved on PATH
    #[serde(default = "default_engine_program")]
    pub program: String,

    /// Argument template (`{workflow}`, `{targets}`, `{work_dir}`)
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Workflow file handed to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// Directory the engine runs in and writes outputs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    /// Kill the engine after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: default_args(),
            workflow: None,
            work_dir: None,
            timeout_secs: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Log level (trace|debug|info|warn|error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (pretty|compact|json); unset picks by environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: None,
        }
    }
}

fn default_store_path() -> String {
    DEFAULT_STORE_FILE.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_engine_program() -> String {
    "snakemake".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MargieConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: MargieConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Example project configuration
    pub fn example() -> Result<String> {
        let config = MargieConfig {
            engine: EngineConfig {
                workflow: Some("workflow/Snakefile".to_string()),
                work_dir: Some("results".to_string()),
                timeout_secs: Some(6 * 60 * 60),
                ..Default::default()
            },
            computations: vec![ComputationDescriptor::new(
                "hmmer",
                &[("domtbl", "{stem}-hmmer.domtbl"), ("log", "logs/{stem}-hmmer.log")],
            )],
            ..Default::default()
        };

        toml::to_string_pretty(&config).context("Failed to render example config")
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            retry: self.retry,
        }
    }

    /// Built-in descriptors plus the configured ones
    pub fn registry(&self) -> Registry {
        Registry::with_overrides(&self.computations)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.path.trim().is_empty() {
            anyhow::bail!("store.path must be set");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }

        if self.engine.program.trim().is_empty() {
            anyhow::bail!("engine.program must be set");
        }

        if self.engine.timeout_secs == Some(0) {
            anyhow::bail!("engine.timeout_secs must be greater than 0 when set");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.to_lowercase().as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        if let Some(format) = &self.observability.log_format {
            if LogFormat::parse(format).is_none() {
                anyhow::bail!("observability.log_format must be one of: pretty, compact, json");
            }
        }

        let mut names = HashSet::new();
        for computation in &self.computations {
            if computation.name.trim().is_empty() {
                anyhow::bail!("computation.name must be set");
            }
            if !names.insert(computation.name.as_str()) {
                anyhow::bail!("duplicate computation name: {}", computation.name);
            }
            if computation.artifacts.is_empty() {
                anyhow::bail!("computation '{}' declares no artifacts", computation.name);
            }

            let mut artifacts = HashSet::new();
            for artifact in &computation.artifacts {
                if artifact.path.trim().is_empty() {
                    anyhow::bail!(
                        "artifact '{}' of computation '{}' has an empty path",
                        artifact.name,
                        computation.name
                    );
                }
                if !artifacts.insert(artifact.name.as_str()) {
                    anyhow::bail!(
                        "duplicate artifact name '{}' in computation '{}'",
                        artifact.name,
                        computation.name
                    );
                }
            }
        }

        Ok(())
    }
}
