use anyhow::{Context, Result};
use clap::Parser;

use margie::cli::{Cli, Commands};
use margie::config_discovery::load_layered;
use margie::merger::ResolvedConfig;
use margie::{commands, logging};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Resolve configuration once: defaults < user < project < env < CLI
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let loaded = load_layered(cli.global.config.as_deref(), &cwd)?;
    let config = ResolvedConfig::merge(&cli.global, loaded)?;

    // Initialize structured logging
    logging::init(&config.log_level, config.log_format);
    for source in &config.sources {
        tracing::debug!("[margie] Using config: {}", source.display());
    }

    // Dispatch to appropriate command handler
    match &cli.command {
        Commands::Run(args) => commands::run::run(&config, args),
        Commands::Fingerprint(args) => commands::fingerprint::run(args),
        Commands::Cache(args) => commands::cache::cache(&config, args),
        Commands::Runs(args) => commands::runs::runs(&config, args),
        Commands::Receipt(args) => commands::runs::receipts(&config, args),
        Commands::Status(args) => commands::status::run(&config, args),
        Commands::Load(args) => commands::load::run(&config, args),
        Commands::Config(args) => commands::config::run(&config, &args.command),
    }
}
