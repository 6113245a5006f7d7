/// `margie cache` command implementation
///
/// Manual restore/store halves plus entry listing, stats, cleaning and
/// seeding.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cache::{Fingerprint, Invalidation, InvalidationPolicy, OutputCache};
use crate::cli::{CacheArgs, CacheCommands, TargetArgs};
use crate::cli_utils::{format_bytes, margie_prefix};
use crate::ledger::Ledger;
use crate::merger::ResolvedConfig;
use crate::storage::{ArtifactStore, EntryFilter, SqliteStore};

pub fn cache(config: &ResolvedConfig, args: &CacheArgs) -> Result<()> {
    let store = config.open_store()?;

    match &args.command {
        CacheCommands::Restore { target, work_dir } => {
            restore(config, &store, target, work_dir.as_deref())
        }
        CacheCommands::Store { target, work_dir } => {
            capture(config, &store, target, work_dir.as_deref())
        }
        CacheCommands::List {
            fingerprint,
            computation,
            json,
        } => list(&store, fingerprint.as_deref(), computation.clone(), *json),
        CacheCommands::Stats { json } => stats(&store, *json),
        CacheCommands::Clean {
            fingerprint,
            computation,
            all,
        } => clean(&store, fingerprint.as_deref(), computation.clone(), *all),
        CacheCommands::Seed { target } => seed(config, &store, target),
    }
}

fn work_dir_for(config: &ResolvedConfig, work_dir: Option<&Path>) -> PathBuf {
    work_dir
        .map(Path::to_path_buf)
        .or_else(|| config.engine.work_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_fingerprint(value: Option<&str>) -> Result<Option<Fingerprint>> {
    value
        .map(|v| Fingerprint::parse(v).with_context(|| format!("Invalid fingerprint: {v}")))
        .transpose()
}

/// Materialize cached outputs for an input
fn restore(
    config: &ResolvedConfig,
    store: &SqliteStore,
    target: &TargetArgs,
    work_dir: Option<&Path>,
) -> Result<()> {
    let computations = config.registry.resolve(&target.computations)?;
    let fingerprint = Fingerprint::of_file(&target.input)?;
    let work_dir = work_dir_for(config, work_dir);
    let cache = OutputCache::new(store);

    let mut missing = 0;
    for descriptor in &computations {
        let outputs = descriptor.expected_outputs(&work_dir, &target.input);
        let report = cache.bulk_restore(&fingerprint, &descriptor.name, &outputs)?;

        println!(
            "{}: restored {}/{}",
            descriptor.name,
            report.restored.len(),
            outputs.len()
        );
        for artifact in &report.missing {
            println!("  ✗ {artifact} not cached");
        }
        missing += report.missing.len();
    }

    eprintln!(
        "{} Fingerprint: {} | {} artifact(s) not cached",
        margie_prefix(),
        fingerprint,
        missing
    );
    Ok(())
}

/// Capture existing outputs for an input
fn capture(
    config: &ResolvedConfig,
    store: &SqliteStore,
    target: &TargetArgs,
    work_dir: Option<&Path>,
) -> Result<()> {
    let computations = config.registry.resolve(&target.computations)?;
    let fingerprint = Fingerprint::of_file(&target.input)?;
    let work_dir = work_dir_for(config, work_dir);
    let cache = OutputCache::new(store);
    let policy = InvalidationPolicy::new(store);
    let ledger = Ledger::new(store);

    for descriptor in &computations {
        let outputs = descriptor.expected_outputs(&work_dir, &target.input);
        let state = policy.evaluate(&descriptor.name, &fingerprint)?;
        let report = cache.bulk_store(&fingerprint, &descriptor.name, &outputs)?;

        if descriptor.invalidation == Invalidation::Input
            && report.is_complete()
            && !state.is_cached()
        {
            ledger.record_checksum(&descriptor.name, &fingerprint)?;
        }

        println!(
            "{}: stored {}/{} ({})",
            descriptor.name,
            report.stored.len(),
            outputs.len(),
            format_bytes(report.bytes)
        );
        for artifact in &report.missing {
            println!("  ✗ {artifact} missing");
        }
    }

    eprintln!("{} Fingerprint: {}", margie_prefix(), fingerprint);
    Ok(())
}

/// List cached artifacts
fn list(
    store: &SqliteStore,
    fingerprint: Option<&str>,
    computation: Option<String>,
    json: bool,
) -> Result<()> {
    let filter = EntryFilter {
        fingerprint: parse_fingerprint(fingerprint)?,
        computation,
    };
    let entries = store.entries(&filter).context("Failed to list cache entries")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No cached outputs.");
        return Ok(());
    }

    println!("Cached outputs ({} entries):", entries.len());
    println!();
    for entry in entries {
        println!(
            "  {} {}/{} ({})",
            entry.fingerprint,
            entry.computation,
            entry.artifact,
            format_bytes(entry.size_bytes)
        );
        println!("    Cached: {}", entry.cached_at);
    }

    Ok(())
}

/// Show cache statistics
fn stats(store: &SqliteStore, json: bool) -> Result<()> {
    let stats = store.stats().context("Failed to get cache statistics")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Output Cache Statistics");
    println!();
    println!("Store: {}", stats.store_path.display());
    println!("Total entries: {}", stats.total_entries);
    println!("Total size: {}", format_bytes(stats.total_bytes));
    println!("Fingerprints: {}", stats.distinct_fingerprints);

    if !stats.by_computation.is_empty() {
        println!();
        for computation in &stats.by_computation {
            println!(
                "  {}: {} entries, {}",
                computation.computation,
                computation.entries,
                format_bytes(computation.bytes)
            );
        }
    }

    Ok(())
}

/// Delete cached artifacts by fingerprint, computation or all of them
fn clean(
    store: &SqliteStore,
    fingerprint: Option<&str>,
    computation: Option<String>,
    all: bool,
) -> Result<()> {
    let filter = EntryFilter {
        fingerprint: parse_fingerprint(fingerprint)?,
        computation,
    };

    if filter.is_empty() && !all {
        anyhow::bail!("Specify --all to clean all entries, or --fingerprint / --computation");
    }

    let removed = store.delete(&filter).context("Failed to clean cache")?;
    println!("{} Removed {} cached output(s).", margie_prefix(), removed);

    Ok(())
}

/// Store placeholder outputs for every artifact of the computations
fn seed(config: &ResolvedConfig, store: &SqliteStore, target: &TargetArgs) -> Result<()> {
    let computations = config.registry.resolve(&target.computations)?;
    let fingerprint = Fingerprint::of_file(&target.input)?;
    let cache = OutputCache::new(store);

    for descriptor in &computations {
        let seeded = cache.seed(&fingerprint, descriptor)?;
        println!("{}: seeded {}", descriptor.name, seeded.join(", "));
    }

    eprintln!("{} Fingerprint: {}", margie_prefix(), fingerprint);
    Ok(())
}
