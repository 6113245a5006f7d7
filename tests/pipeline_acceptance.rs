/// Acceptance tests for memoized runs
///
/// These drive the `margie` binary end to end with a shell script standing
/// in for the workflow engine (see `common::FAKE_ENGINE`).
mod common;

use common::TestWorkspace;
use predicates::prelude::*;

const SAMPLE: &str = ">contig_1\nATGAAACGCATTAGCACCACCATTACCACCACCATCACCATTACCACAGGTAACGGTGCGGGCTGA\n";

fn setup() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    workspace.create_file("sample1.fasta", SAMPLE);
    workspace
}

#[test]
fn test_first_run_caches_then_second_run_restores() {
    let workspace = setup();

    // First run - cache miss, engine builds both outputs
    workspace
        .margie()
        .args(["run", "sample1.fasta", "--computation", "prodigal"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Cache miss for prodigal"))
        .stderr(predicate::str::contains("MISS"));

    workspace.assert_file_exists("results/sample1-prodigal.gff");
    workspace.assert_file_exists("results/sample1-prodigal.faa");

    let entries = workspace.json(&["cache", "list", "--json"]);
    assert_eq!(entries.as_array().unwrap().len(), 2);

    // Outputs are gone; the second run must bring them back from the store
    workspace.remove_file("results/sample1-prodigal.gff");
    workspace.remove_file("results/sample1-prodigal.faa");

    workspace
        .margie()
        .args(["run", "sample1.fasta", "--computation", "prodigal"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Cache HIT for prodigal"))
        .stderr(predicate::str::contains("HIT ✓"));

    assert_eq!(
        workspace.read_file("results/sample1-prodigal.gff"),
        "built sample1-prodigal.gff\n"
    );

    // Same cache rows, one ledger row per invocation
    let entries = workspace.json(&["cache", "list", "--json"]);
    assert_eq!(entries.as_array().unwrap().len(), 2);

    let runs = workspace.json(&["runs", "--json"]);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r["status"] == "success"));
    assert_eq!(runs[0]["fingerprint"], runs[1]["fingerprint"]);
    assert_ne!(runs[0]["run_id"], runs[1]["run_id"]);
    assert_eq!(workspace.engine_calls(), 2);
}

#[test]
fn test_cached_rerun_records_the_same_rules_completed() {
    let workspace = setup();

    for _ in 0..2 {
        workspace
            .margie()
            .args(["run", "sample1.fasta", "-C", "prodigal"])
            .assert()
            .success();
        workspace.remove_file("results/sample1-prodigal.gff");
    }

    let runs = workspace.json(&["runs", "--json"]);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["rules_completed"], 2);
    assert_eq!(runs[0]["rules_completed"], runs[1]["rules_completed"]);

    // Engine steps only show up in the activity notes
    let receipts = workspace.json(&["receipt", "--type", "activity", "--json"]);
    let first = receipts[0]["notes"].as_str().unwrap();
    let second = receipts[1]["notes"].as_str().unwrap();
    assert!(first.contains("engine: 2 of 2 steps"), "{first}");
    assert!(!second.contains("engine:"), "{second}");
    assert!(second.contains("restored: prodigal"), "{second}");
}

#[cfg(unix)]
#[test]
fn test_restored_output_has_the_built_mode() {
    use std::os::unix::fs::PermissionsExt;

    let workspace = setup();
    let mode = |path: &str| {
        std::fs::metadata(workspace.path().join(path))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };

    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "pfam"])
        .assert()
        .success();
    let built = mode("results/sample1-pfam.tsv");
    workspace.remove_file("results/sample1-pfam.tsv");

    workspace
        .margie()
        .args(["cache", "restore", "sample1.fasta", "-C", "pfam"])
        .assert()
        .success();
    assert_eq!(mode("results/sample1-pfam.tsv"), built);
}

#[test]
fn test_partial_failure_keeps_produced_outputs() {
    let workspace = setup();

    // prodigal (faa, gff) + pfam (tsv); the engine dies after two builds
    workspace
        .margie()
        .env("FAIL_AFTER", "2")
        .args(["run", "sample1.fasta", "-C", "prodigal", "-C", "pfam"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("engine exited with status 1"));

    let entries = workspace.json(&["cache", "list", "--json"]);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["computation"] == "prodigal"));

    let runs = workspace.json(&["runs", "--json"]);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "failed");
    assert_eq!(runs[0]["rules_completed"], 2);
    assert_eq!(runs[0]["computation"], "prodigal,pfam");

    // The retry only has the pfam output left to build
    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "prodigal", "-C", "pfam"])
        .assert()
        .success();

    let runs = workspace.json(&["runs", "--status", "success", "--json"]);
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(workspace.json(&["cache", "list", "--json"]).as_array().unwrap().len(), 3);
}

#[test]
fn test_changed_input_is_stale_and_recomputed() {
    let workspace = setup();

    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "prodigal"])
        .assert()
        .success();

    workspace
        .margie()
        .args(["status", "sample1.fasta", "-C", "prodigal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prodigal: cached"));

    workspace.create_file("sample1.fasta", ">contig_1\nATGTGA\n");

    workspace
        .margie()
        .args(["status", "sample1.fasta", "-C", "prodigal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prodigal: stale (was"));

    workspace.remove_file("results/sample1-prodigal.gff");
    workspace.remove_file("results/sample1-prodigal.faa");

    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "prodigal"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Cache miss for prodigal"));

    // Both checksums stay in the receipt history
    let receipts = workspace.json(&["receipt", "--type", "checksum", "--json"]);
    let receipts = receipts.as_array().unwrap();
    assert_eq!(receipts.len(), 2);
    assert_ne!(receipts[0]["value"], receipts[1]["value"]);

    // Outputs for the new fingerprint are cached next to the old ones
    let stats = workspace.json(&["cache", "stats", "--json"]);
    assert_eq!(stats["distinct_fingerprints"], 2);
}

#[test]
fn test_dry_run_touches_nothing() {
    let workspace = setup();

    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "cog", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cog [absent]"))
        .stdout(predicate::str::contains("✗ count_tsv (engine)"));

    assert_eq!(workspace.engine_calls(), 0);
    assert!(workspace.json(&["runs", "--json"]).as_array().unwrap().is_empty());
}

#[test]
fn test_unreadable_input_writes_no_run() {
    let workspace = setup();

    workspace
        .margie()
        .args(["run", "missing.fasta", "-C", "prodigal"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input not found"));

    assert!(workspace.json(&["runs", "--json"]).as_array().unwrap().is_empty());
}

#[test]
fn test_unknown_computation_is_rejected() {
    let workspace = setup();

    workspace
        .margie()
        .args(["run", "sample1.fasta", "-C", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bogus"));

    assert_eq!(workspace.engine_calls(), 0);
}

#[test]
fn test_missing_engine_records_failed_run() {
    let workspace = setup();

    workspace
        .margie()
        .args([
            "run",
            "sample1.fasta",
            "-C",
            "pfam",
            "--engine",
            "margie-no-such-engine",
        ])
        .assert()
        .failure();

    let runs = workspace.json(&["runs", "--json"]);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "failed");
    assert_eq!(runs[0]["rules_completed"], 0);
}
