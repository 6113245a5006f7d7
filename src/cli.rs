use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// MARGIE - Memoized pipeline outputs with a provenance ledger
///
/// MARGIE fingerprints an input file, restores cached outputs of the
/// requested computations before handing the rest to the workflow engine,
/// captures what the engine produced, and records every attempt.
#[derive(Parser, Debug)]
#[command(name = "margie")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Memoized pipeline output cache and provenance ledger", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration arguments shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file path (replaces project config discovery)
    #[arg(short = 'c', long, global = true, env = "MARGIE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store file
    #[arg(long, global = true, env = "MARGIE_DB")]
    pub db: Option<PathBuf>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true, env = "MARGIE_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run computations on an input, restoring and capturing outputs
    Run(RunArgs),

    /// Print the fingerprint of a file
    Fingerprint(FingerprintArgs),

    /// Inspect and manage cached outputs
    Cache(CacheArgs),

    /// Query the run log
    Runs(RunsArgs),

    /// Dump store receipts
    Receipt(ReceiptArgs),

    /// Show the invalidation state of computations for an input
    Status(StatusArgs),

    /// Load GFF annotations into the store
    Load(LoadArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

/// Input file plus the computations to apply to it
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Input file (its contents are fingerprinted)
    pub input: PathBuf,

    /// Computation name (repeatable)
    #[arg(short = 'C', long = "computation", required = true)]
    pub computations: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Workflow file handed to the engine
    #[arg(long, env = "MARGIE_WORKFLOW")]
    pub workflow: Option<PathBuf>,

    /// Directory outputs are restored to and captured from
    #[arg(long, env = "MARGIE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Engine program
    #[arg(long, env = "MARGIE_ENGINE")]
    pub engine: Option<String>,

    /// Kill the engine after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Show what would be restored without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Extra arguments passed to the engine (after --)
    #[arg(last = true)]
    pub engine_args: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// File to fingerprint
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Materialize cached outputs for an input
    Restore {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory outputs are written to
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Capture existing outputs for an input
    Store {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory outputs are read from
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// List cached artifacts
    List {
        /// Only entries for this fingerprint
        #[arg(long)]
        fingerprint: Option<String>,

        /// Only entries for this computation
        #[arg(long)]
        computation: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show cache statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete cached artifacts
    Clean {
        /// Delete entries for this fingerprint
        #[arg(long)]
        fingerprint: Option<String>,

        /// Delete entries for this computation
        #[arg(long)]
        computation: Option<String>,

        /// Delete every entry
        #[arg(long, conflicts_with_all = ["fingerprint", "computation"])]
        all: bool,
    },

    /// Store placeholder outputs for an input (smoke-tests restore)
    Seed {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Parser, Debug)]
pub struct RunsArgs {
    /// Only runs of this fingerprint
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Only runs that included this computation
    #[arg(long)]
    pub computation: Option<String>,

    /// Only runs with this status (success|failed)
    #[arg(long)]
    pub status: Option<String>,

    /// Maximum number of runs, newest first
    #[arg(long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ReceiptArgs {
    /// Only receipts of this type (created|checksum|activity)
    #[arg(long = "type")]
    pub kind: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct LoadArgs {
    /// GFF3 file to load
    pub gff: PathBuf,

    /// Tool that produced the file
    #[arg(long)]
    pub source: String,

    /// Token file written after a successful load
    #[arg(long)]
    pub token: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration (merged from all sources)
    Show,
    /// Print an example project config file
    Example,
    /// Validate a configuration file
    Validate {
        /// Path to config file (defaults to the effective configuration)
        path: Option<PathBuf>,
    },
}
