/// `margie status` command implementation
///
/// Shows, per computation, the invalidation state for an input and which
/// artifacts a run would restore.
use anyhow::{Context, Result};
use serde::Serialize;

use crate::cache::{CacheState, Fingerprint, Invalidation, InvalidationPolicy};
use crate::cli::StatusArgs;
use crate::cli_utils::margie_prefix;
use crate::merger::ResolvedConfig;
use crate::storage::ArtifactStore;

#[derive(Debug, Serialize)]
struct ComputationStatus {
    computation: String,
    state: String,
    /// Checksum recorded before the current one, when stale
    previous: Option<String>,
    invalidation: Invalidation,
    cached: Vec<String>,
    missing: Vec<String>,
}

pub fn run(config: &ResolvedConfig, args: &StatusArgs) -> Result<()> {
    let computations = config.registry.resolve(&args.target.computations)?;
    let fingerprint = Fingerprint::of_file(&args.target.input)
        .with_context(|| format!("Failed to fingerprint {}", args.target.input.display()))?;

    let store = config.open_store()?;
    let policy = InvalidationPolicy::new(&store);

    let mut statuses = Vec::with_capacity(computations.len());
    for descriptor in &computations {
        let state = policy.evaluate(&descriptor.name, &fingerprint)?;
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for artifact in descriptor.artifact_names() {
            if store.exists(&fingerprint, &descriptor.name, artifact)? {
                cached.push(artifact.to_string());
            } else {
                missing.push(artifact.to_string());
            }
        }

        let (state_name, previous) = match &state {
            CacheState::Stale { previous } => ("stale".to_string(), Some(previous.clone())),
            other => (other.to_string(), None),
        };

        statuses.push(ComputationStatus {
            computation: descriptor.name.clone(),
            state: state_name,
            previous,
            invalidation: descriptor.invalidation,
            cached,
            missing,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    eprintln!(
        "{} Input: {} | Fingerprint: {}",
        margie_prefix(),
        args.target.input.display(),
        fingerprint
    );
    for status in statuses {
        match &status.previous {
            Some(previous) => println!("{}: stale (was {})", status.computation, previous),
            None => println!("{}: {}", status.computation, status.state),
        }
        if status.invalidation == Invalidation::Always {
            println!("  always recomputed");
        }
        for artifact in &status.cached {
            println!("  ✓ {artifact}");
        }
        for artifact in &status.missing {
            println!("  ✗ {artifact}");
        }
    }

    Ok(())
}
