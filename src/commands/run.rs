/// `margie run` command implementation
///
/// Restores what is cached, runs the engine for the rest, captures the
/// outputs and records the attempt.
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::RunArgs;
use crate::cli_utils::margie_prefix;
use crate::engine::CommandEngine;
use crate::merger::ResolvedConfig;
use crate::pipeline::{Pipeline, PipelineRequest};

pub fn run(config: &ResolvedConfig, args: &RunArgs) -> Result<()> {
    let computations = config.registry.resolve(&args.target.computations)?;

    if !args.target.input.is_file() {
        anyhow::bail!("Input not found: {}", args.target.input.display());
    }

    let work_dir = args
        .work_dir
        .clone()
        .or_else(|| config.engine.work_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    // The engine runs inside the work dir, so the workflow path must not be relative
    let workflow = args
        .workflow
        .clone()
        .or_else(|| config.engine.workflow.as_ref().map(PathBuf::from))
        .map(|path| absolute(&path))
        .transpose()?;

    let request = PipelineRequest {
        input: args.target.input.clone(),
        computations,
        work_dir,
        workflow,
        extra_args: args.engine_args.clone(),
        timeout: args
            .timeout_secs
            .or(config.engine.timeout_secs)
            .map(Duration::from_secs),
    };

    let store = config.open_store()?;
    let program = args
        .engine
        .clone()
        .unwrap_or_else(|| config.engine.program.clone());
    let engine = CommandEngine::new(program, config.engine.args.clone());
    let pipeline = Pipeline::new(&store, &engine);

    if args.dry_run {
        let plan = pipeline.plan(&request).context("Failed to plan run")?;
        eprintln!(
            "{} Dry run - nothing will be restored or executed",
            margie_prefix()
        );
        for entry in plan {
            println!("{} [{}]", entry.name, entry.state);
            for artifact in &entry.cached {
                println!("  ✓ {artifact} (cached)");
            }
            for artifact in &entry.missing {
                println!("  ✗ {artifact} (engine)");
            }
        }
        return Ok(());
    }

    let summary = pipeline
        .execute(&request)
        .with_context(|| format!("Run of {} failed", request.computation_label()))?;

    if let Some(outcome) = &summary.engine {
        std::io::stdout()
            .write_all(outcome.stdout.as_bytes())
            .context("Failed to write stdout")?;
        std::io::stderr()
            .write_all(outcome.stderr.as_bytes())
            .context("Failed to write stderr")?;
    }

    for report in &summary.computations {
        let verdict = if report.fully_restored() {
            "HIT ✓"
        } else {
            "MISS ✗"
        };
        eprintln!(
            "{} {} | {} | restored {} | captured {}/{}",
            margie_prefix(),
            report.name,
            verdict,
            report.restore.restored.len(),
            report.capture.stored.len(),
            report.capture.stored.len() + report.capture.missing.len()
        );
    }

    eprintln!(
        "{} Fingerprint: {} | run {} | {} | rules completed: {}",
        margie_prefix(),
        summary.fingerprint,
        summary.run.run_id,
        summary.run.status,
        summary.run.rules_completed
    );

    if let Some(reason) = &summary.failure {
        anyhow::bail!("Run {} failed: {}", summary.run.run_id, reason);
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
