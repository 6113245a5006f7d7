/// `margie load` command implementation
use anyhow::{Context, Result};

use crate::cli::LoadArgs;
use crate::cli_utils::margie_prefix;
use crate::loader::load_gff;
use crate::merger::ResolvedConfig;

pub fn run(config: &ResolvedConfig, args: &LoadArgs) -> Result<()> {
    let store = config.open_store()?;
    let report = load_gff(&store, &args.gff, &args.source, args.token.as_deref())
        .with_context(|| format!("Failed to load {}", args.gff.display()))?;

    if report.state.is_cached() {
        println!(
            "{} already loaded from {}, nothing to do",
            args.gff.display(),
            report.source
        );
    } else {
        println!(
            "Loaded {} rows from {} ({} malformed lines skipped)",
            report.rows_loaded, report.source, report.skipped_lines
        );
    }
    eprintln!(
        "{} run {} | {}",
        margie_prefix(),
        report.run.run_id,
        report.run.status
    );

    Ok(())
}
