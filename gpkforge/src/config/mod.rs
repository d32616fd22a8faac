//! Engine configuration.
//!
//! Configuration lives in an INI file; the CLI may override individual
//! values with flags. A missing file yields defaults, so the engine is
//! usable with nothing but a content root.
//!
//! ```ini
//! [paths]
//! content_root = /games/example/Content
//! cache_dir = /home/user/.cache/gpkforge
//!
//! [engine]
//! core_packages = Core, Engine
//! block_size = 131072
//! parallel_codec = true
//! ```

use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::compress::DEFAULT_BLOCK_SIZE;

/// Default config file name under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "gpkforge.ini";

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Typed engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Root directory scanned for package files.
    pub content_root: PathBuf,
    /// Directory for the directory cache and other sidecar files.
    pub cache_dir: PathBuf,
    /// Core packages opened by the class bootstrap, in order.
    pub core_packages: Vec<String>,
    /// Block granularity for the compression pipeline.
    pub block_size: u32,
    /// Fan block codec work out across rayon.
    pub parallel_codec: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            cache_dir: default_cache_dir(),
            core_packages: vec!["Core".to_string(), "Engine".to_string()],
            block_size: DEFAULT_BLOCK_SIZE,
            parallel_codec: true,
        }
    }
}

impl EngineConfig {
    /// Load from an INI file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(paths) = ini.section(Some("paths")) {
            if let Some(root) = paths.get("content_root") {
                config.content_root = PathBuf::from(root);
            }
            if let Some(cache) = paths.get("cache_dir") {
                config.cache_dir = PathBuf::from(cache);
            }
        }
        if let Some(engine) = ini.section(Some("engine")) {
            if let Some(cores) = engine.get("core_packages") {
                config.core_packages = cores
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            if let Some(value) = engine.get("block_size") {
                config.block_size = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "block_size",
                    value: value.to_string(),
                })?;
                if config.block_size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "block_size",
                        value: value.to_string(),
                    });
                }
            }
            if let Some(value) = engine.get("parallel_codec") {
                config.parallel_codec = match value.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            key: "parallel_codec",
                            value: value.to_string(),
                        })
                    }
                };
            }
        }

        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Load the default-location config, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write this configuration to an INI file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut ini = Ini::new();
        ini.with_section(Some("paths"))
            .set("content_root", self.content_root.display().to_string())
            .set("cache_dir", self.cache_dir.display().to_string());
        ini.with_section(Some("engine"))
            .set("core_packages", self.core_packages.join(", "))
            .set("block_size", self.block_size.to_string())
            .set("parallel_codec", self.parallel_codec.to_string());
        ini.write_to_file(path)?;
        Ok(())
    }

    /// Path of the persisted directory cache for this configuration.
    pub fn dir_cache_file(&self) -> PathBuf {
        self.cache_dir
            .join(crate::resolver::dircache::CACHE_FILE_NAME)
    }
}

/// Platform config file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpkforge")
        .join(CONFIG_FILE_NAME)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpkforge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.core_packages, vec!["Core", "Engine"]);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert!(config.parallel_codec);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpkforge.ini");
        let config = EngineConfig {
            content_root: PathBuf::from("/games/example"),
            cache_dir: dir.path().join("cache"),
            core_packages: vec!["Core".into(), "Engine".into(), "GameFramework".into()],
            block_size: 65536,
            parallel_codec: false,
        };
        config.save(&path).unwrap();
        let back = EngineConfig::load(&path).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_invalid_block_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpkforge.ini");
        std::fs::write(&path, "[engine]\nblock_size = zero\n").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "block_size",
                ..
            }
        ));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpkforge.ini");
        std::fs::write(&path, "[paths]\ncontent_root = /data\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.content_root, PathBuf::from("/data"));
        assert_eq!(config.core_packages, vec!["Core", "Engine"]);
    }
}
