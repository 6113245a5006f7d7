//! Registry of computation descriptors
//!
//! A descriptor says what a computation is called, which artifacts it
//! produces and where the engine expects them. Orchestration code only ever
//! consumes descriptors; there is no per-tool code path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown computation '{name}' (known: {})", known.join(", "))]
    Unknown { name: String, known: Vec<String> },

    #[error("No computation selected")]
    Empty,
}

/// When a cached result may be served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invalidation {
    /// Served while the input fingerprint is unchanged
    #[default]
    Input,
    /// Never served; recomputed on every run but still captured
    Always,
}

/// One named output file of a computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,

    /// Path template relative to the work directory. `{stem}` expands to the
    /// input file name without extension, `{computation}` to the descriptor
    /// name.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationDescriptor {
    pub name: String,

    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,

    #[serde(default)]
    pub invalidation: Invalidation,
}

impl ComputationDescriptor {
    pub fn new(name: &str, artifacts: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            artifacts: artifacts
                .iter()
                .map(|(name, path)| ArtifactSpec {
                    name: name.to_string(),
                    path: path.to_string(),
                })
                .collect(),
            invalidation: Invalidation::Input,
        }
    }

    /// Paths the engine will write for `input`, keyed by artifact name
    pub fn expected_outputs(&self, work_dir: &Path, input: &Path) -> BTreeMap<String, PathBuf> {
        let stem = input_stem(input);

        self.artifacts
            .iter()
            .map(|artifact| {
                let rendered = artifact
                    .path
                    .replace("{stem}", &stem)
                    .replace("{computation}", &self.name);
                (artifact.name.clone(), work_dir.join(rendered))
            })
            .collect()
    }

    pub fn artifact_names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.iter().map(|a| a.name.as_str())
    }
}

/// File name of `input` without its last extension
pub fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

#[derive(Debug, Clone)]
pub struct Registry {
    computations: BTreeMap<String, ComputationDescriptor>,
}

impl Registry {
    /// Annotation tools shipped with the default workflow
    pub fn builtin() -> Self {
        let computations = [
            ComputationDescriptor::new(
                "prodigal",
                &[("gff", "{stem}-prodigal.gff"), ("faa", "{stem}-prodigal.faa")],
            ),
            ComputationDescriptor::new("pfam", &[("tsv", "{stem}-pfam.tsv")]),
            ComputationDescriptor::new(
                "cog",
                &[("tsv", "{stem}-cog.tsv"), ("count_tsv", "{stem}-cog_count.tsv")],
            ),
        ];

        Self {
            computations: computations
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }

    /// Builtins plus user entries; a user entry replaces a builtin of the
    /// same name
    pub fn with_overrides(overrides: &[ComputationDescriptor]) -> Self {
        let mut registry = Self::builtin();
        for descriptor in overrides {
            registry
                .computations
                .insert(descriptor.name.clone(), descriptor.clone());
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ComputationDescriptor> {
        self.computations.get(name)
    }

    /// Look up several descriptors, preserving the requested order
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ComputationDescriptor>, RegistryError> {
        if names.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut resolved: Vec<ComputationDescriptor> = Vec::with_capacity(names.len());
        for name in names {
            if resolved.iter().any(|d| &d.name == name) {
                continue;
            }
            let descriptor = self.get(name).ok_or_else(|| RegistryError::Unknown {
                name: name.clone(),
                known: self.names(),
            })?;
            resolved.push(descriptor.clone());
        }
        Ok(resolved)
    }

    pub fn names(&self) -> Vec<String> {
        self.computations.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputationDescriptor> {
        self.computations.values()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
