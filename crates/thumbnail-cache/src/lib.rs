//! Thumbnail generation and HEIF conversion library for Unterlumen
//!
//! This crate turns source images into display-ready bytes: small
//! orientation-correct thumbnails for the grid and full-size JPEGs for HEIF
//! files browsers cannot show. Every conversion is a chain of strategies tried
//! in order, and HEIF results are kept in a disk cache keyed by source
//! path, mod-time and purpose.
//!
//! # Features
//!
//! - **EXIF thumbnails first**: embedded IFD1 thumbnails, aspect-validated and rotated
//! - **Full-decode fallback**: nearest-neighbour downscale to a fixed box
//! - **HEIF pipeline**: embedded JPEG stream copy, native OS decoder, ffmpeg transcode
//! - **Disk cache**: deterministic keys in the OS temp directory, no eviction
//! - **Parallel warming**: batch preview generation with rayon

pub mod cache;
pub mod chain;
pub mod decoder;
pub mod error;
pub mod generate;
pub mod heif;

pub use cache::{DiskCache, Purpose};
pub use chain::{run_chain, Strategy};
pub use decoder::{DecoderCapability, DecoderProbe};
pub use error::{Attempt, PipelineError};
pub use generate::{ImageBytes, ThumbnailGenerator};
pub use heif::HeifConverter;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Standard configuration for thumbnail and preview generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Longest side of a grid thumbnail
    pub max_dimension: u32,
    pub preview_quality: u8,
    pub full_quality: u8,
    /// Largest relative aspect-ratio difference accepted for EXIF thumbnails
    pub aspect_tolerance: f64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_dimension: 300,
            preview_quality: 80,
            full_quality: 92,
            aspect_tolerance: 0.10,
        }
    }
}

/// Native decoders used by the HEIF pipeline before the ffmpeg transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeTool {
    /// macOS `sips`
    Sips,
    /// libheif's `heif-convert`
    HeifConvert,
}

impl NativeTool {
    pub fn program(&self) -> &'static str {
        match self {
            NativeTool::Sips => "sips",
            NativeTool::HeifConvert => "heif-convert",
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            NativeTool::Sips
        } else {
            NativeTool::HeifConvert
        }
    }
}

/// External programs the HEIF pipeline shells out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg: String,
    /// `None` disables the native decoder stage
    pub native: Option<NativeTool>,
    /// Executable for the native decoder when not on `PATH` under its usual name
    pub native_program: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            native: Some(NativeTool::platform_default()),
            native_program: None,
        }
    }
}

/// Generate a cache file name for a source file and purpose.
///
/// The key covers the path as given, the source's mod-time in nanoseconds
/// (empty when the file cannot be stat'ed) and the purpose, so a modified
/// source maps to a new key and the old file is simply never read again.
pub fn generate_cache_key(file_path: &Path, purpose: &str) -> String {
    use sha2::{Digest, Sha256};

    let modified = std::fs::metadata(file_path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos().to_string())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(file_path.as_os_str().as_encoded_bytes());
    hasher.update(b"|");
    hasher.update(modified.as_bytes());
    hasher.update(b"|");
    hasher.update(purpose.as_bytes());

    let result = hasher.finalize();
    // Use first 16 bytes (32 hex chars) for a compact but collision-resistant key
    format!("{}.jpg", hex::encode(&result[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn test_cache_key_generation() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("test.heic");
        fs::write(&file_path, b"test content")?;

        let key1 = generate_cache_key(&file_path, "full");
        let key2 = generate_cache_key(&file_path, "full");

        // Same file should generate same key
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32 + ".jpg".len());
        assert!(key1.ends_with(".jpg"));

        // Purpose and path both feed the key
        assert_ne!(key1, generate_cache_key(&file_path, "preview"));
        let file2_path = temp_dir.path().join("test2.heic");
        fs::write(&file2_path, b"test content")?;
        assert_ne!(key1, generate_cache_key(&file2_path, "full"));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_key_distinguishes_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // both names decode lossily to "a\u{FFFD}.heic"
        let first = Path::new(OsStr::from_bytes(b"/photos/a\xff.heic"));
        let second = Path::new(OsStr::from_bytes(b"/photos/a\xfe.heic"));
        assert_eq!(first.to_string_lossy(), second.to_string_lossy());
        assert_ne!(generate_cache_key(first, "full"), generate_cache_key(second, "full"));
    }

    #[test]
    fn test_cache_key_changes_with_modification() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("test.heic");
        fs::write(&file_path, b"test content")?;

        let file = fs::File::options().write(true).open(&file_path)?;
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000))?;
        let key1 = generate_cache_key(&file_path, "full");

        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_001))?;
        let key2 = generate_cache_key(&file_path, "full");

        // Key should change when file is modified
        assert_ne!(key1, key2);
        Ok(())
    }

    #[test]
    fn test_cache_key_for_missing_file() {
        let key = generate_cache_key(Path::new("/missing/file.heic"), "preview");
        assert_eq!(key, generate_cache_key(Path::new("/missing/file.heic"), "preview"));
    }
}
