//! Engine backed by an external program (Snakemake by default)
//!
//! Spawns the program in the work directory, captures both output streams
//! and enforces the optional timeout.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{Engine, EngineError, EngineInvocation, EngineOutcome};
use crate::logging::{operations, status};

/// Argument template used when none is configured
pub fn default_args() -> Vec<String> {
    ["-s", "{workflow}", "{targets}", "--cores", "1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// `args` is a template: an argument that is exactly `{targets}` expands
    /// to one argument per target, `{workflow}` and `{work_dir}` are
    /// substituted inside any argument.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn build_args(&self, invocation: &EngineInvocation) -> Result<Vec<String>, EngineError> {
        let mut out = Vec::with_capacity(self.args.len() + invocation.targets.len());

        for arg in &self.args {
            if arg == "{targets}" {
                out.extend(
                    invocation
                        .targets
                        .iter()
                        .map(|t| t.to_string_lossy().into_owned()),
                );
                continue;
            }

            let mut rendered = arg.replace("{work_dir}", &invocation.work_dir.to_string_lossy());
            if rendered.contains("{workflow}") {
                let workflow = invocation
                    .workflow
                    .as_ref()
                    .ok_or(EngineError::MissingWorkflow)?;
                rendered = rendered.replace("{workflow}", &workflow.to_string_lossy());
            }
            out.push(rendered);
        }

        out.extend(invocation.extra_args.iter().cloned());
        Ok(out)
    }

    fn resolve_program(&self) -> PathBuf {
        which::which(&self.program).unwrap_or_else(|e| {
            warn!(
                program = %self.program,
                error = %e,
                "engine not found in PATH, trying as-is"
            );
            PathBuf::from(&self.program)
        })
    }
}

impl Engine for CommandEngine {
    fn run(&self, invocation: &EngineInvocation) -> Result<EngineOutcome, EngineError> {
        let args = self.build_args(invocation)?;
        let program = self.resolve_program();
        let start = Instant::now();

        info!(
            operation = operations::ENGINE,
            program = %program.display(),
            targets = invocation.targets.len(),
            work_dir = %invocation.work_dir.display(),
            "starting engine"
        );
        debug!(args = ?args, "engine command line");

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (exit_status, timed_out) = match invocation.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout),
            None => child.wait().map(|s| (Some(s), false)),
        }
        .map_err(EngineError::Wait)?;

        let outcome = EngineOutcome {
            exit_code: exit_status.and_then(|s| s.code()),
            duration: start.elapsed(),
            stdout: join(stdout),
            stderr: join(stderr),
            timed_out,
        };

        if outcome.success() {
            info!(
                operation = operations::ENGINE,
                status = status::SUCCESS,
                duration_ms = outcome.duration.as_millis() as u64,
                "engine finished"
            );
        } else {
            warn!(
                operation = operations::ENGINE,
                status = status::FAILED,
                exit_code = ?outcome.exit_code,
                timed_out,
                duration_ms = outcome.duration.as_millis() as u64,
                "engine failed"
            );
            let lines: Vec<&str> = outcome.stderr.lines().collect();
            for line in &lines[lines.len().saturating_sub(10)..] {
                debug!("engine: {line}");
            }
        }

        Ok(outcome)
    }
}

/// Read a pipe to the end on its own thread so neither stream can block the
/// child
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<(Option<ExitStatus>, bool)> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if start.elapsed() >= timeout {
            child.kill()?;
            child.wait()?;
            return Ok((None, true));
        }
        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn invocation(dir: &Path) -> EngineInvocation {
        EngineInvocation {
            work_dir: dir.to_path_buf(),
            workflow: Some(PathBuf::from("Snakefile")),
            targets: vec![PathBuf::from("a.gff"), PathBuf::from("a.faa")],
            extra_args: vec!["--rerun-incomplete".to_string()],
            timeout: None,
        }
    }

    #[test]
    fn test_default_args_expand_targets() {
        let engine = CommandEngine::new("snakemake", default_args());
        let args = engine.build_args(&invocation(Path::new("/w"))).unwrap();
        assert_eq!(
            args,
            vec!["-s", "Snakefile", "a.gff", "a.faa", "--cores", "1", "--rerun-incomplete"]
        );
    }

    #[test]
    fn test_missing_workflow() {
        let engine = CommandEngine::new("snakemake", default_args());
        let mut inv = invocation(Path::new("/w"));
        inv.workflow = None;
        assert!(matches!(
            engine.build_args(&inv),
            Err(EngineError::MissingWorkflow)
        ));

        let no_workflow = CommandEngine::new("make", vec!["-C".into(), "{work_dir}".into()]);
        assert_eq!(
            no_workflow.build_args(&inv).unwrap(),
            vec!["-C", "/w", "--rerun-incomplete"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_program_and_captures_output() {
        let temp = TempDir::new().unwrap();
        let engine = CommandEngine::new(
            "sh",
            vec![
                "-c".into(),
                "echo '1 of 1 steps (100%) done' >&2; echo out > result.txt; exit 3".into(),
            ],
        );
        let inv = EngineInvocation {
            work_dir: temp.path().to_path_buf(),
            ..Default::default()
        };

        let outcome = engine.run(&inv).unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.progress().map(|p| p.done), Some(1));
        assert_eq!(fs::read_to_string(temp.path().join("result.txt")).unwrap(), "out\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_engine() {
        let temp = TempDir::new().unwrap();
        let engine = CommandEngine::new("sh", vec!["-c".into(), "exec sleep 10".into()]);
        let inv = EngineInvocation {
            work_dir: temp.path().to_path_buf(),
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        };

        let outcome = engine.run(&inv).unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[test]
    fn test_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let engine = CommandEngine::new("margie-no-such-engine", vec![]);
        let inv = EngineInvocation {
            work_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(matches!(engine.run(&inv), Err(EngineError::Spawn { .. })));
    }
}
