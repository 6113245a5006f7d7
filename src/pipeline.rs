//! One memoized pipeline run
//!
//! fingerprint → restore → engine → capture → receipts → ledger row.
//!
//! Only an unreadable input aborts before the ledger. Once a run id has been
//! minted, every exit path (including store errors) tries to leave exactly
//! one `run_log` row behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{
    CacheState, CaptureReport, ComputationDescriptor, Fingerprint, FingerprintError, Invalidation,
    InvalidationPolicy, OutputCache, RestoreReport,
};
use crate::engine::{Engine, EngineInvocation, EngineOutcome};
use crate::ledger::{receipt, Ledger, RunHandle, RunRecord, RunStatus};
use crate::logging::operations;
use crate::storage::{ArtifactStore, SqliteStore, StoreError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to prepare work directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub input: PathBuf,
    pub computations: Vec<ComputationDescriptor>,
    pub work_dir: PathBuf,
    pub workflow: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl PipelineRequest {
    /// Ledger label for the run: computation names joined by ","
    pub fn computation_label(&self) -> String {
        self.computations
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// What happened to one computation during a run
#[derive(Debug, Clone)]
pub struct ComputationReport {
    pub name: String,
    pub state: CacheState,
    pub restore: RestoreReport,
    pub capture: CaptureReport,
}

impl ComputationReport {
    /// Satisfied entirely from the cache
    pub fn fully_restored(&self) -> bool {
        self.restore.is_complete()
    }

    /// Every expected output existed after the engine ran
    pub fn complete(&self) -> bool {
        self.capture.is_complete()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fingerprint: Fingerprint,
    pub run: RunRecord,
    pub computations: Vec<ComputationReport>,
    pub engine: Option<EngineOutcome>,
    /// Why the run is `failed`, if it is
    pub failure: Option<String>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.run.status == RunStatus::Success
    }
}

/// Cache state of one computation without touching disk or ledger
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub name: String,
    pub state: CacheState,
    pub cached: Vec<String>,
    pub missing: Vec<String>,
}

pub struct Pipeline<'a, E: Engine + ?Sized> {
    store: &'a SqliteStore,
    engine: &'a E,
}

/// Everything known about a run so far; filled in step by step so an
/// error part way through still leaves the partial picture behind
#[derive(Default)]
struct Attempt {
    computations: Vec<ComputationReport>,
    engine: Option<EngineOutcome>,
    failure: Option<String>,
}

impl Attempt {
    /// Expected outputs present once the run is over, restored or built
    ///
    /// Restored files are captured again, so a cached rerun reports the same
    /// count as the run that built them. Before capture, restored files are
    /// all that is known.
    fn rules_completed(&self) -> u64 {
        self.computations
            .iter()
            .map(|c| c.capture.stored.len().max(c.restore.restored.len()) as u64)
            .sum()
    }
}

impl<'a, E: Engine + ?Sized> Pipeline<'a, E> {
    pub fn new(store: &'a SqliteStore, engine: &'a E) -> Self {
        Self { store, engine }
    }

    /// Report what a run would restore, without running anything
    pub fn plan(&self, request: &PipelineRequest) -> Result<Vec<PlanEntry>, PipelineError> {
        let fingerprint = Fingerprint::of_file(&request.input)?;
        let policy = InvalidationPolicy::new(self.store);

        request
            .computations
            .iter()
            .map(|descriptor| -> Result<PlanEntry, PipelineError> {
                let state = policy.evaluate(&descriptor.name, &fingerprint)?;
                let mut entry = PlanEntry {
                    name: descriptor.name.clone(),
                    state,
                    cached: Vec::new(),
                    missing: Vec::new(),
                };
                for artifact in descriptor.artifact_names() {
                    let cached = descriptor.invalidation == Invalidation::Input
                        && self.store.exists(&fingerprint, &descriptor.name, artifact)?;
                    if cached {
                        entry.cached.push(artifact.to_string());
                    } else {
                        entry.missing.push(artifact.to_string());
                    }
                }
                Ok(entry)
            })
            .collect()
    }

    pub fn execute(&self, request: &PipelineRequest) -> Result<RunSummary, PipelineError> {
        let fingerprint = Fingerprint::of_file(&request.input)?;
        info!(
            operation = operations::FINGERPRINT,
            fingerprint = %fingerprint,
            input = %request.input.display(),
            "fingerprinted input"
        );

        let ledger = Ledger::new(self.store);
        let handle = ledger.begin_run(&fingerprint, &request.computation_label(), &request.input);

        let mut attempt = Attempt::default();
        if let Err(e) = self.attempt(&fingerprint, request, &mut attempt) {
            self.abandon(&ledger, handle, attempt.rules_completed());
            return Err(e);
        }

        let rules_completed = attempt.rules_completed();
        if let Some(progress) = attempt.engine.as_ref().and_then(|e| e.progress()) {
            info!(
                operation = operations::ENGINE,
                steps_done = progress.done,
                steps_total = progress.total,
                "engine progress"
            );
        }
        let run_status = if attempt.failure.is_none() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        if let Err(e) = self.write_receipts(&fingerprint, request, &attempt, &handle, run_status) {
            self.abandon(&ledger, handle, rules_completed);
            return Err(e.into());
        }

        let run = ledger.complete_run(handle, run_status, 0, rules_completed)?;

        Ok(RunSummary {
            fingerprint,
            run,
            computations: attempt.computations,
            engine: attempt.engine,
            failure: attempt.failure,
        })
    }

    fn attempt(
        &self,
        fingerprint: &Fingerprint,
        request: &PipelineRequest,
        attempt: &mut Attempt,
    ) -> Result<(), PipelineError> {
        fs::create_dir_all(&request.work_dir).map_err(|source| PipelineError::WorkDir {
            path: request.work_dir.clone(),
            source,
        })?;

        let cache = OutputCache::new(self.store);
        let policy = InvalidationPolicy::new(self.store);
        let mut targets = Vec::new();

        for descriptor in &request.computations {
            let outputs = descriptor.expected_outputs(&request.work_dir, &request.input);
            let state = policy.evaluate(&descriptor.name, fingerprint)?;

            let restore = match descriptor.invalidation {
                Invalidation::Input => cache.bulk_restore(fingerprint, &descriptor.name, &outputs)?,
                Invalidation::Always => RestoreReport {
                    restored: Vec::new(),
                    missing: outputs.keys().cloned().collect(),
                },
            };

            targets.extend(
                outputs
                    .values()
                    .map(|path| relative_to(path, &request.work_dir)),
            );
            attempt.computations.push(ComputationReport {
                name: descriptor.name.clone(),
                state,
                restore,
                capture: CaptureReport::default(),
            });
        }

        let invocation = EngineInvocation {
            work_dir: request.work_dir.clone(),
            workflow: request.workflow.clone(),
            targets,
            extra_args: request.extra_args.clone(),
            timeout: request.timeout,
        };

        let (engine, failure) = match self.engine.run(&invocation) {
            Ok(outcome) if outcome.success() => (Some(outcome), None),
            Ok(outcome) => {
                let reason = if outcome.timed_out {
                    "engine timed out".to_string()
                } else {
                    match outcome.exit_code {
                        Some(code) => format!("engine exited with status {code}"),
                        None => "engine was terminated by a signal".to_string(),
                    }
                };
                (Some(outcome), Some(reason))
            }
            Err(e) => {
                error!(operation = operations::ENGINE, error = %e, "engine could not run");
                (None, Some(e.to_string()))
            }
        };

        attempt.engine = engine;
        attempt.failure = failure;

        for (descriptor, report) in request.computations.iter().zip(attempt.computations.iter_mut()) {
            let outputs = descriptor.expected_outputs(&request.work_dir, &request.input);
            report.capture = cache.bulk_store(fingerprint, &descriptor.name, &outputs)?;
        }

        // A clean exit that left expected outputs missing is still a failure
        if attempt.failure.is_none() {
            let incomplete: Vec<&str> = attempt
                .computations
                .iter()
                .filter(|r| !r.complete())
                .map(|r| r.name.as_str())
                .collect();
            if !incomplete.is_empty() {
                warn!(computations = ?incomplete, "engine succeeded but outputs are missing");
                attempt.failure = Some(format!("missing outputs for {}", incomplete.join(", ")));
            }
        }

        Ok(())
    }

    /// Checksum receipts for computations that are now fully cached, plus
    /// one activity line, in a single transaction
    fn write_receipts(
        &self,
        fingerprint: &Fingerprint,
        request: &PipelineRequest,
        attempt: &Attempt,
        handle: &RunHandle,
        run_status: RunStatus,
    ) -> Result<(), StoreError> {
        let newly_cached: Vec<&str> = request
            .computations
            .iter()
            .zip(&attempt.computations)
            .filter(|(descriptor, report)| {
                descriptor.invalidation == Invalidation::Input
                    && report.complete()
                    && !report.state.is_cached()
            })
            .map(|(descriptor, _)| descriptor.name.as_str())
            .collect();

        let restored: Vec<&str> = attempt
            .computations
            .iter()
            .filter(|c| c.fully_restored())
            .map(|c| c.name.as_str())
            .collect();

        let mut notes = format!(
            "ran {} on {} under checksum {}: {}",
            request.computation_label(),
            request.input.display(),
            fingerprint,
            run_status
        );
        if !restored.is_empty() {
            notes.push_str(&format!(" (restored: {})", restored.join(", ")));
        }
        if let Some(progress) = attempt.engine.as_ref().and_then(|e| e.progress()) {
            notes.push_str(&format!(" (engine: {} of {} steps)", progress.done, progress.total));
        }
        if let Some(reason) = &attempt.failure {
            notes.push_str(&format!(" ({reason})"));
        }

        self.store.write(|tx| {
            for computation in &newly_cached {
                receipt::record_checksum(tx, computation, fingerprint.as_str())?;
            }
            receipt::record_activity(tx, &notes, handle.run_id())
        })
    }

    /// Record a `failed` row for an attempt that hit an error, if the store
    /// still allows it
    fn abandon(&self, ledger: &Ledger<'_>, handle: RunHandle, rules_completed: u64) {
        let run_id = handle.run_id().to_string();
        if let Err(e) = ledger.complete_run(handle, RunStatus::Failed, 0, rules_completed) {
            error!(run_id = %run_id, error = %e, "could not record failed run");
        }
    }
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
