/// `margie runs` and `margie receipt` command implementations
use anyhow::{Context, Result};

use crate::cache::Fingerprint;
use crate::cli::{ReceiptArgs, RunsArgs};
use crate::ledger::{Ledger, ReceiptKind, RunFilter, RunStatus};
use crate::merger::ResolvedConfig;

pub fn runs(config: &ResolvedConfig, args: &RunsArgs) -> Result<()> {
    let filter = RunFilter {
        fingerprint: args
            .fingerprint
            .as_deref()
            .map(Fingerprint::parse)
            .transpose()
            .context("Invalid --fingerprint")?,
        computation: args.computation.clone(),
        status: args
            .status
            .as_deref()
            .map(str::parse::<RunStatus>)
            .transpose()
            .map_err(anyhow::Error::msg)?,
        limit: args.limit,
    };

    let store = config.open_store()?;
    let runs = Ledger::new(&store)
        .runs(&filter)
        .context("Failed to query run log")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {}  {:<7}  {}  rules={} rows={}",
            run.timestamp,
            run.fingerprint,
            run.status.as_str(),
            run.computation,
            run.rules_completed,
            run.row_count
        );
        println!("    run {} on {}", run.run_id, run.input_path);
    }

    Ok(())
}

pub fn receipts(config: &ResolvedConfig, args: &ReceiptArgs) -> Result<()> {
    let kind = args.kind.as_deref().map(ReceiptKind::from);
    let store = config.open_store()?;
    let receipts = Ledger::new(&store)
        .receipts(kind.as_ref())
        .context("Failed to read receipts")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
        return Ok(());
    }

    for receipt in receipts {
        println!(
            "{}  {:<9} {}  {}",
            receipt.timestamp,
            receipt.kind,
            receipt.notes.as_deref().unwrap_or("-"),
            receipt.value.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
