//! Configuration file location and library root resolution
//!
//! Both follow the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file / user then system config directory
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TAGBOX_CONFIG";

/// Environment variable naming the library root (the "card" contents)
pub const LIBRARY_ENV_VAR: &str = "TAGBOX_LIBRARY";

const APP_DIR: &str = "tagbox";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Locate the bootstrap configuration file.
///
/// Returns `None` when no file exists anywhere; callers fall back to
/// built-in defaults (a missing config file is never fatal).
pub fn locate_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument (returned even if missing so the
    // caller can report the explicit path it was given)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config dir, then system-wide
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE_NAME);
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    debug!("No tagbox config file found, using built-in defaults");
    None
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

/// Load a TOML file if one was located, otherwise return `T::default()`.
///
/// A located-but-unreadable file is an error; an absent one is not.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) if path.exists() => load_toml(path),
        Some(path) => {
            warn!("Config file {} does not exist, using defaults", path.display());
            Ok(T::default())
        }
        None => Ok(T::default()),
    }
}

/// Resolve the library root folder.
pub fn resolve_library_root(cli_arg: Option<&Path>, config_value: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(LIBRARY_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_library_root()
}

/// Get OS-dependent default library root
pub fn default_library_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/tagbox (or /var/lib/tagbox for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tagbox"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tagbox"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tagbox"))
    } else {
        PathBuf::from("./tagbox_data")
    }
}
