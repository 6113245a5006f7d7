//! Restore and capture of computation outputs
//!
//! Restore writes cached artifacts to the paths the engine expects so it
//! treats that work as done. Capture reads whatever the engine produced at
//! those same paths and commits it under the input fingerprint.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{ComputationDescriptor, Fingerprint};
use crate::logging::{operations, status};
use crate::storage::{ArtifactStore, StoreError};

/// Outcome of restoring one computation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
}

impl RestoreReport {
    /// Every expected artifact was written
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && !self.restored.is_empty()
    }
}

/// Outcome of capturing one computation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub stored: Vec<String>,
    pub missing: Vec<String>,
    pub bytes: u64,
}

impl CaptureReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && !self.stored.is_empty()
    }
}

/// Artifact cache bound to a store
pub struct OutputCache<'a, S: ArtifactStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ArtifactStore + ?Sized> OutputCache<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn contains(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
    ) -> Result<bool, StoreError> {
        self.store.exists(fingerprint, computation, artifact)
    }

    /// Write every cached artifact in `targets` to its path
    ///
    /// Artifacts that are not cached are reported, not treated as errors.
    pub fn bulk_restore(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        targets: &BTreeMap<String, PathBuf>,
    ) -> Result<RestoreReport, StoreError> {
        let mut cached = self.store.get_all(fingerprint, computation)?;
        let mut report = RestoreReport::default();

        for (artifact, target) in targets {
            let Some(content) = cached.remove(artifact) else {
                info!(
                    operation = operations::RESTORE,
                    status = status::MISS,
                    computation = computation,
                    artifact = %artifact,
                    fingerprint = %fingerprint,
                    "artifact not cached"
                );
                report.missing.push(artifact.clone());
                continue;
            };

            write_atomic(target, &content)?;
            info!(
                operation = operations::RESTORE,
                status = status::HIT,
                computation = computation,
                artifact = %artifact,
                size_bytes = content.len() as u64,
                path = %target.display(),
                "restored from cache"
            );
            report.restored.push(artifact.clone());
        }

        if report.is_complete() {
            info!("Cache HIT for {computation}");
        } else if report.restored.is_empty() {
            info!("Cache miss for {computation}");
        } else {
            warn!(
                computation = computation,
                restored = report.restored.len(),
                missing = report.missing.len(),
                "partial restore, engine will rebuild the rest"
            );
        }

        Ok(report)
    }

    /// Read each existing file in `sources` and store it in one transaction
    pub fn bulk_store(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        sources: &BTreeMap<String, PathBuf>,
    ) -> Result<CaptureReport, StoreError> {
        let mut report = CaptureReport::default();
        let mut items = Vec::with_capacity(sources.len());

        for (artifact, source) in sources {
            if !source.is_file() {
                warn!(
                    operation = operations::CAPTURE,
                    status = status::MISSING,
                    computation = computation,
                    artifact = %artifact,
                    path = %source.display(),
                    "expected output missing, not cached"
                );
                report.missing.push(artifact.clone());
                continue;
            }

            let content = fs::read(source).map_err(|e| StoreError::Io {
                path: source.clone(),
                source: e,
            })?;
            report.bytes += content.len() as u64;
            report.stored.push(artifact.clone());
            items.push((artifact.clone(), content));
        }

        self.store.put_many(fingerprint, computation, &items)?;

        if !report.stored.is_empty() {
            info!(
                operation = operations::CAPTURE,
                status = status::SUCCESS,
                computation = computation,
                fingerprint = %fingerprint,
                artifacts = report.stored.len(),
                size_bytes = report.bytes,
                "cached outputs"
            );
        }

        Ok(report)
    }

    /// Store a placeholder blob for every artifact of `descriptor`
    ///
    /// Used to smoke-test restore without running any tool.
    pub fn seed(
        &self,
        fingerprint: &Fingerprint,
        descriptor: &ComputationDescriptor,
    ) -> Result<Vec<String>, StoreError> {
        let items: Vec<(String, Vec<u8>)> = descriptor
            .artifact_names()
            .map(|artifact| {
                let blob = format!("# placeholder for {}/{}\n", descriptor.name, artifact);
                (artifact.to_string(), blob.into_bytes())
            })
            .collect();

        self.store.put_many(fingerprint, &descriptor.name, &items)?;
        debug!(
            computation = %descriptor.name,
            artifacts = items.len(),
            "seeded placeholder outputs"
        );

        Ok(items.into_iter().map(|(name, _)| name).collect())
    }
}

/// Write through a sibling temp file so a reader never sees a torn file
fn write_atomic(target: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source| StoreError::Io {
        path: target.to_path_buf(),
        source,
    };

    fs::create_dir_all(&parent).map_err(io_err)?;
    let mut tmp = temp_file_in(&parent).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.persist(target).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Temp file created with the mode a plain `fs::write` would give it
///
/// `NamedTempFile` defaults to 0600 and `persist` keeps that mode, which
/// would make restored outputs owner-only.
fn temp_file_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".margie-");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // umask still applies at create
        builder.permissions(fs::Permissions::from_mode(0o666));
    }

    builder.tempfile_in(dir)
}
