//! Configuration module
//!
//! Configuration is an explicit value handed to [`crate::ArchiveEngine`] and
//! [`crate::Fetcher`] at construction; nothing here is global.

use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to determine config directory")]
    NoConfigDir,

    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid size '{0}'")]
    InvalidSize(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Archive engine settings
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Fetcher settings
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Archive engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Gzip level used for `.tar.gz` output (0-9)
    pub gzip_level: u32,
    /// Bzip2 level used for `.tar.bz2` output (1-9)
    pub bzip2_level: u32,
    /// Re-apply stored mode bits on extraction
    pub preserve_permissions: bool,
    /// Re-apply stored modification times on extraction
    pub preserve_mtime: bool,
    /// Keep symlinks whose target points outside the destination
    pub allow_external_symlinks: bool,
    /// Normalize ownership and timestamps in packed tar headers
    pub deterministic: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            gzip_level: 6,
            bzip2_level: 6,
            preserve_permissions: true,
            preserve_mtime: true,
            allow_external_symlinks: true,
            deterministic: false,
        }
    }
}

/// Fetcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Prefix for temporary directories created by the fetcher
    pub temp_prefix: String,
    /// Download chunk size, e.g. "64KiB"
    pub chunk_size: String,
    /// Show a progress bar while downloading
    pub show_progress: bool,
    /// User agent sent with HTTP requests
    pub user_agent: String,
    /// Overall request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            temp_prefix: "whl_fetch_".to_string(),
            chunk_size: "64KiB".to_string(),
            show_progress: true,
            user_agent: concat!("whl-deploy/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: None,
        }
    }
}

impl FetchConfig {
    /// Chunk size in bytes, falling back to 8 KiB when the setting is unusable
    pub fn chunk_bytes(&self) -> usize {
        match parse_size(&self.chunk_size) {
            Ok(0) | Err(_) => 8 * 1024,
            Ok(bytes) => bytes as usize,
        }
    }
}

/// Parse size string like "64KiB" to bytes
pub fn parse_size(size_str: &str) -> Result<u64, ConfigError> {
    let size_str = size_str.trim();

    if let Ok(bytes) = size_str.parse::<u64>() {
        return Ok(bytes);
    }

    let split_pos = size_str
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size_str.len());

    if split_pos == 0 {
        return Err(ConfigError::InvalidSize(size_str.to_string()));
    }

    let (number_part, unit_part) = size_str.split_at(split_pos);
    let number: f64 = number_part
        .parse()
        .map_err(|_| ConfigError::InvalidSize(size_str.to_string()))?;

    let multiplier: u64 = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "ki" | "kib" => 1_024,
        "mi" | "mib" => 1_048_576,
        "gi" | "gib" => 1_073_741_824,
        _ => return Err(ConfigError::InvalidSize(size_str.to_string())),
    };

    Ok((number * multiplier as f64) as u64)
}

impl Config {
    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("whl-deploy").join("config.toml"))
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load configuration from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration or use defaults if loading fails
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default configuration: {}", e);
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.archive.gzip_level, 6);
        assert!(config.archive.preserve_permissions);
        assert!(config.archive.allow_external_symlinks);
        assert!(!config.archive.deterministic);
        assert_eq!(config.fetch.temp_prefix, "whl_fetch_");
        assert_eq!(config.fetch.chunk_bytes(), 64 * 1024);
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.archive.deterministic = true;
        config.fetch.timeout_secs = Some(30);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [archive]
            gzip_level = 9

            [fetch]
            show_progress = false
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.gzip_level, 9);
        assert_eq!(config.archive.bzip2_level, 6);
        assert!(!config.fetch.show_progress);
        assert_eq!(config.fetch.chunk_size, "64KiB");
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[archive\ngzip_level = ").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size("1KB").unwrap(), 1_000);
        assert_eq!(parse_size("64KiB").unwrap(), 65_536);
        assert_eq!(parse_size("1.5MiB").unwrap(), 1_572_864);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("12 parsecs").is_err());
    }

    #[test]
    fn test_bad_chunk_size_falls_back() {
        let config = FetchConfig {
            chunk_size: "0".to_string(),
            ..Default::default()
        };
        assert_eq!(config.chunk_bytes(), 8192);
    }
}
