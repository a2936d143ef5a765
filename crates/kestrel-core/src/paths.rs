//! Centralized path utilities for the local config directory.

use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".kestrel";

/// The kestrel config directory (`~/.kestrel`).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// The logs directory (`~/.kestrel/logs`).
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}
