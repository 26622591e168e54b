//! Configuration module
//!
//! Link settings are read from `link.toml` in the per-user config directory

mod settings;

pub use settings::{
    ConfigError, LinkSettings, MAX_PAGE_SIZE, MAX_TIMEOUT_MS, MIN_PAGE_SIZE, MIN_TIMEOUT_MS,
    SETTINGS_FILE,
};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "chisflash", "ChisFlash")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the settings file
pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(SETTINGS_FILE))
}
