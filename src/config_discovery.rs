use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::MargieConfig;
use crate::xdg;

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "margie.toml";

/// Find the nearest `margie.toml`, walking up from `start_dir`
pub fn discover_project_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Configuration assembled from every layer that exists
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: MargieConfig,
    /// Files that contributed, lowest precedence first
    pub sources: Vec<PathBuf>,
}

/// Load defaults < user config < project config
///
/// `explicit_path` replaces project discovery and must exist.
pub fn load_layered(explicit_path: Option<&Path>, start_dir: &Path) -> Result<LoadedConfig> {
    let user = xdg::user_config_file();
    let project = match explicit_path {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => discover_project_config(start_dir),
    };

    let mut merged = toml::Table::new();
    let mut sources = Vec::new();

    for path in [Some(user), project].into_iter().flatten() {
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let layer: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "loaded config layer");
        merge_tables(&mut merged, layer);
        sources.push(path);
    }

    let config: MargieConfig = toml::Value::Table(merged)
        .try_into()
        .context("Invalid configuration")?;

    Ok(LoadedConfig { config, sources })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; any other
/// value, arrays included, replaces what was there.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_discover_project_config_finds_nearest() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let subdir = project.join("data/raw");
        fs::create_dir_all(&subdir).unwrap();

        let config_path = project.join("margie.toml");
        fs::write(&config_path, "# test config").unwrap();

        assert_eq!(discover_project_config(&subdir), Some(config_path));
    }

    #[test]
    fn test_merge_tables() {
        let mut base: toml::Table = toml::from_str(
            "[store]\npath = \"a.db\"\nbusy_timeout_ms = 10\n[engine]\nargs = [\"x\", \"y\"]\n",
        )
        .unwrap();
        let overlay: toml::Table =
            toml::from_str("[store]\npath = \"b.db\"\n[engine]\nargs = [\"z\"]\n").unwrap();

        merge_tables(&mut base, overlay);

        assert_eq!(base["store"]["path"].as_str(), Some("b.db"));
        assert_eq!(base["store"]["busy_timeout_ms"].as_integer(), Some(10));
        assert_eq!(base["engine"]["args"].as_array().unwrap().len(), 1);
    }

    #[test]
    #[serial]
    fn test_user_then_project_layers() {
        let temp = TempDir::new().unwrap();
        let xdg_home = temp.path().join("xdg");
        fs::create_dir_all(xdg_home.join("margie")).unwrap();
        fs::write(
            xdg_home.join("margie/config.toml"),
            "[engine]\nprogram = \"/opt/snakemake\"\n[store]\nbusy_timeout_ms = 100\n",
        )
        .unwrap();

        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("margie.toml"), "[store]\npath = \"sample.db\"\n").unwrap();

        std::env::set_var("XDG_CONFIG_HOME", &xdg_home);
        let loaded = load_layered(None, &project).unwrap();
        std::env::remove_var("XDG_CONFIG_HOME");

        assert_eq!(loaded.sources.len(), 2);
        assert_eq!(loaded.config.engine.program, "/opt/snakemake");
        assert_eq!(loaded.config.store.busy_timeout_ms, 100);
        assert_eq!(loaded.config.store.path, "sample.db");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", temp.path());
        let result = load_layered(Some(&temp.path().join("nope.toml")), temp.path());
        std::env::remove_var("XDG_CONFIG_HOME");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_no_files_gives_defaults() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", temp.path().join("empty"));
        let loaded = load_layered(None, temp.path()).unwrap();
        std::env::remove_var("XDG_CONFIG_HOME");

        assert!(loaded.sources.is_empty());
        assert_eq!(loaded.config, MargieConfig::default());
    }
}
