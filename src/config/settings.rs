//! Link timing and page-size settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Shortest accepted timeout
pub const MIN_TIMEOUT_MS: u64 = 1000;
/// Longest accepted timeout
pub const MAX_TIMEOUT_MS: u64 = 300_000;
/// Smallest accepted page size
pub const MIN_PAGE_SIZE: u32 = 0x100;
/// Largest accepted page size
pub const MAX_PAGE_SIZE: u32 = 0x10000;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "link.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No per-user config directory on this platform
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading the file failed
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for these settings
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },
}

/// Timeouts and page sizes used by the link layer.
///
/// Read from a TOML file; never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Default timeout for `send_package` (ms)
    pub package_send_timeout_ms: u64,
    /// Default timeout for `get_package` / `get_result` (ms)
    pub package_receive_timeout_ms: u64,
    /// Timeout for long operations such as chip erase (ms)
    pub operation_timeout_ms: u64,
    /// Bytes per ROM transfer
    pub rom_page_size: u32,
    /// Bytes per RAM transfer
    pub ram_page_size: u32,
    /// Low phase of the DTR/RTS reset pulse (ms)
    pub reset_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            package_send_timeout_ms: 6000,
            package_receive_timeout_ms: 6000,
            operation_timeout_ms: 100_000,
            rom_page_size: 0x1000,
            ram_page_size: 0x800,
            reset_delay_ms: 200,
        }
    }
}

fn clamp_timeout(name: &str, value: u64) -> u64 {
    let clamped = value.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
    if clamped != value {
        warn!("{} = {}ms out of range, using {}ms", name, value, clamped);
    }
    clamped
}

fn clamp_page_size(name: &str, value: u32) -> u32 {
    let clamped = value.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    if clamped != value {
        warn!("{} = {:#x} out of range, using {:#x}", name, value, clamped);
    } else if !value.is_power_of_two() {
        warn!("{} = {:#x} is not a power of two", name, value);
    }
    clamped
}

impl LinkSettings {
    /// Load from `<config_dir>/link.toml`, falling back to defaults when the
    /// file does not exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(SETTINGS_FILE);
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse TOML text and clamp the result
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings.validated())
    }

    /// Clamp every value into its accepted range
    #[must_use]
    pub fn validated(self) -> Self {
        Self {
            package_send_timeout_ms: clamp_timeout("package_send_timeout_ms", self.package_send_timeout_ms),
            package_receive_timeout_ms: clamp_timeout(
                "package_receive_timeout_ms",
                self.package_receive_timeout_ms,
            ),
            operation_timeout_ms: clamp_timeout("operation_timeout_ms", self.operation_timeout_ms),
            rom_page_size: clamp_page_size("rom_page_size", self.rom_page_size),
            ram_page_size: clamp_page_size("ram_page_size", self.ram_page_size),
            reset_delay_ms: self.reset_delay_ms,
        }
    }

    /// Send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.package_send_timeout_ms)
    }

    /// Receive timeout
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.package_receive_timeout_ms)
    }

    /// Long-operation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Reset pulse low time
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = LinkSettings::default();
        assert_eq!(settings.send_timeout(), Duration::from_secs(6));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(100));
        assert_eq!(settings.rom_page_size, 0x1000);
        assert_eq!(settings.ram_page_size, 0x800);
        assert_eq!(settings.reset_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_clamping() {
        let settings = LinkSettings {
            package_send_timeout_ms: 10,
            package_receive_timeout_ms: 1_000_000,
            rom_page_size: 0x10,
            ram_page_size: 0x20000,
            ..LinkSettings::default()
        }
        .validated();

        assert_eq!(settings.package_send_timeout_ms, MIN_TIMEOUT_MS);
        assert_eq!(settings.package_receive_timeout_ms, MAX_TIMEOUT_MS);
        assert_eq!(settings.rom_page_size, MIN_PAGE_SIZE);
        assert_eq!(settings.ram_page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_partial_toml() {
        let settings = LinkSettings::from_toml("package_receive_timeout_ms = 2500\n").unwrap();
        assert_eq!(settings.package_receive_timeout_ms, 2500);
        assert_eq!(settings.package_send_timeout_ms, 6000);
    }

    #[test]
    fn test_toml_is_clamped() {
        let settings = LinkSettings::from_toml("operation_timeout_ms = 5").unwrap();
        assert_eq!(settings.operation_timeout_ms, MIN_TIMEOUT_MS);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rom_page_size = 0x2000").unwrap();
        writeln!(file, "reset_delay_ms = 50").unwrap();

        let settings = LinkSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.rom_page_size, 0x2000);
        assert_eq!(settings.reset_delay_ms, 50);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LinkSettings::load_from(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, LinkSettings::default());
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rom_page_size = \"big\"").unwrap();
        assert!(matches!(
            LinkSettings::load_from(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
