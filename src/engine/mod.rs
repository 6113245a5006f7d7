//! The external DAG engine boundary
//!
//! The engine is a black box: it is handed a work directory and a list of
//! target paths and reports back an exit status plus its captured output.
//! Whatever it leaves at the target paths is picked up by capture.

pub mod command;
pub mod progress;

pub use command::CommandEngine;
pub use progress::Progress;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while waiting for engine: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Engine arguments reference {{workflow}} but no workflow file was given")]
    MissingWorkflow,
}

/// One engine call
#[derive(Debug, Clone, Default)]
pub struct EngineInvocation {
    pub work_dir: PathBuf,
    pub workflow: Option<PathBuf>,
    /// Output paths the engine should bring up to date
    pub targets: Vec<PathBuf>,
    /// Passed through after the configured arguments
    pub extra_args: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// `None` when the process was killed by a signal or by timeout
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl EngineOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Progress reported anywhere in the captured output
    pub fn progress(&self) -> Option<Progress> {
        let out = Progress::scan(&self.stdout);
        let err = Progress::scan(&self.stderr);
        match (out, err) {
            (Some(a), Some(b)) => Some(if b.done > a.done { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// Something that can bring a set of targets up to date
///
/// A non-zero exit is an `Ok` outcome; `Err` means the engine could not be
/// run at all.
pub trait Engine {
    fn run(&self, invocation: &EngineInvocation) -> Result<EngineOutcome, EngineError>;
}
