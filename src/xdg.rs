//! XDG Base Directory support for MARGIE
//!
//! Only configuration lives outside the project; the store itself is a
//! single file next to the data it describes.
//!
//! - `$XDG_CONFIG_HOME/margie/` (default: `~/.config/margie/`) - user configuration

use std::path::PathBuf;

/// Get the MARGIE config directory
///
/// Respects XDG_CONFIG_HOME, falls back to `$HOME/.config/margie`.
pub fn config_dir() -> PathBuf {
    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg_config).join("margie")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join("margie")
    } else {
        PathBuf::from(".margie-config")
    }
}

/// User-level configuration file
pub fn user_config_file() -> PathBuf {
    config_dir().join("config.toml")
}
