//! Service configuration loaded from an optional JSON file

use anyhow::{Context, Result};
use media_meta::ReaderLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thumbnail_cache::cache::CACHE_DIR_NAME;
use thumbnail_cache::{DecoderConfig, ThumbnailConfig};

/// Everything tunable about the service. Missing fields take their defaults,
/// so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where converted HEIF images are kept; the OS temp directory when unset
    pub cache_dir: Option<PathBuf>,
    pub thumbnails: ThumbnailConfig,
    pub limits: ReaderLimits,
    pub decoders: DecoderConfig,
}

impl ServiceConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// `<config dir>/unterlumen/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("unterlumen").join("config.json"))
    }

    /// Load `explicit` if given, else the default file if it exists, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_json_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_json_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(CACHE_DIR_NAME))
    }
}
