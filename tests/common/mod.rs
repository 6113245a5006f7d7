// Common test utilities shared across acceptance tests
//
// Each test gets its own workspace: a temp directory holding the input,
// a `margie.toml`, the store file and a shell script standing in for the
// workflow engine. `XDG_CONFIG_HOME` points inside the workspace so no
// user config leaks in, and every `MARGIE_*` variable is cleared.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds every target that does not exist yet and prints a Snakemake-style
/// progress line per built target. `FAIL_AFTER=n` exits 1 after `n` builds.
pub const FAKE_ENGINE: &str = r#"#!/bin/sh
echo invoked >> calls.log
total=$#
built=0
for target in "$@"; do
    if [ -f "$target" ]; then
        continue
    fi
    if [ -n "$FAIL_AFTER" ] && [ "$built" -ge "$FAIL_AFTER" ]; then
        echo "Error in rule for $target" >&2
        exit 1
    fi
    mkdir -p "$(dirname "$target")"
    echo "built $target" > "$target"
    built=$((built + 1))
    echo "$built of $total steps ($((built * 100 / total))%) done" >&2
done
"#;

pub const PROJECT_CONFIG: &str = r#"
[store]
path = "margie.db"

[engine]
program = "sh"
args = ["{workflow}", "{targets}"]
workflow = "engine.sh"
work_dir = "results"
"#;

const ENV_VARS: [&str; 8] = [
    "MARGIE_CONFIG",
    "MARGIE_DB",
    "MARGIE_LOG_LEVEL",
    "MARGIE_WORKFLOW",
    "MARGIE_WORK_DIR",
    "MARGIE_ENGINE",
    "RUST_LOG",
    "FAIL_AFTER",
];

pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Workspace with the fake engine and project config in place
    pub fn new() -> Self {
        let workspace = Self::bare();
        workspace.create_file("engine.sh", FAKE_ENGINE);
        workspace.create_file("margie.toml", PROJECT_CONFIG);
        workspace
    }

    /// Empty workspace, no config
    pub fn bare() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("xdg")).unwrap();
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn margie(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_margie"));
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env("MARGIE_LOG_FORMAT", "compact")
            .current_dir(self.path());
        cmd
    }

    pub fn create_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path().join(path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(&file_path, content).unwrap();
        file_path
    }

    pub fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    pub fn assert_file_exists(&self, path: &str) {
        let file_path = self.path().join(path);
        assert!(file_path.exists(), "File should exist: {}", path);
    }

    pub fn remove_file(&self, path: &str) {
        fs::remove_file(self.path().join(path)).unwrap();
    }

    /// Number of times the fake engine was invoked
    pub fn engine_calls(&self) -> usize {
        fs::read_to_string(self.path().join("results/calls.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    /// Run a command expecting success and parse its stdout as JSON
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.margie().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "margie {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }
}
