use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::cli::ConfigCommands;
use crate::config::MargieConfig;
use crate::merger::ResolvedConfig;

pub fn run(config: &ResolvedConfig, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => show(config),
        ConfigCommands::Example => example(),
        ConfigCommands::Validate { path } => match path {
            Some(path) => validate(path),
            None => {
                println!("✓ Effective configuration is valid");
                summary(&config.file);
                Ok(())
            }
        },
    }
}

fn validate(path: &Path) -> Result<()> {
    info!("Validating config file: {}", path.display());

    let config = MargieConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path.display());
    summary(&config);

    Ok(())
}

fn summary(config: &MargieConfig) {
    println!("\nSummary:");
    println!("  - Store: {}", config.store.path);
    println!("  - Engine: {}", config.engine.program);
    println!("  - Computations: {}", config.registry().names().join(", "));
}

fn example() -> Result<()> {
    println!("{}", MargieConfig::example()?);
    Ok(())
}

fn show(config: &ResolvedConfig) -> Result<()> {
    info!("Showing effective configuration");

    let mut effective = config.file.clone();
    effective.store.path = config.store_path.display().to_string();
    effective.observability.log_level = config.log_level.clone();

    if config.sources.is_empty() {
        println!("# Sources: built-in defaults");
    } else {
        for source in &config.sources {
            println!("# Source: {}", source.display());
        }
    }
    println!("{}", toml::to_string_pretty(&effective)?);

    Ok(())
}
