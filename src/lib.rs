// Library interface for MARGIE
// The binary and the integration tests both build on these modules

pub mod cache;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod engine;
pub mod ledger;
pub mod loader;
pub mod logging;
pub mod merger;
pub mod pipeline;
pub mod storage;
pub mod xdg;

// Re-export commonly used types
pub use cache::{CacheState, Fingerprint, InvalidationPolicy, OutputCache, Registry};
pub use ledger::{Ledger, RunRecord, RunStatus};
pub use pipeline::{Pipeline, PipelineRequest, RunSummary};
pub use storage::{ArtifactStore, SqliteStore, StoreError, StoreOptions};
