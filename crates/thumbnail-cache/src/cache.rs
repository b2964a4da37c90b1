//! Disk cache for converted images
//!
//! Files live flat in one directory, named by [`generate_cache_key`]. There is
//! no lock and no eviction: keys are deterministic, so concurrent writers of
//! the same key write the same bytes, and entries for modified sources are
//! orphaned rather than removed.

use crate::{generate_cache_key, ThumbnailConfig};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Name of the cache directory under the OS temp directory
pub const CACHE_DIR_NAME: &str = "unterlumen-cache";

/// What a cached conversion is for; part of the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Full-size image for the viewer
    Full,
    /// Source for grid thumbnails
    Preview,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Full => "full",
            Purpose::Preview => "preview",
        }
    }

    pub fn jpeg_quality(&self, config: &ThumbnailConfig) -> u8 {
        match self {
            Purpose::Full => config.full_quality,
            Purpose::Preview => config.preview_quality,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct DiskCache {
    cache_dir: PathBuf,
    created: OnceLock<()>,
}

impl DiskCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            created: OnceLock::new(),
        }
    }

    /// Cache under `<os temp>/unterlumen-cache`
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join(CACHE_DIR_NAME))
    }

    /// The cache directory, created on first use
    pub fn dir(&self) -> &Path {
        self.created.get_or_init(|| {
            if let Err(e) = fs::create_dir_all(&self.cache_dir) {
                warn!(dir = %self.cache_dir.display(), error = %e, "failed to create cache directory");
            }
        });
        &self.cache_dir
    }

    /// Key for `source` converted for `purpose`
    pub fn key_for(&self, source: &Path, purpose: Purpose) -> String {
        generate_cache_key(source, purpose.as_str())
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let data = fs::read(self.dir().join(key)).ok()?;
        debug!(key, bytes = data.len(), "disk cache hit");
        Some(data)
    }

    /// Store `data` under `key`, last writer wins. The bytes go to a temp file
    /// in the cache directory that is renamed into place, so readers see
    /// either the old file or the complete new one. Failures only cost a
    /// future cache miss.
    pub fn write(&self, key: &str, data: &[u8]) {
        let path = self.dir().join(key);
        if let Err(e) = self.write_atomic(&path, data) {
            warn!(path = %path.display(), error = %e, "failed to write cache file");
        }
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(self.dir())?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_directory_created_lazily() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache_dir = temp_dir.path().join("nested").join("cache");
        let cache = DiskCache::new(&cache_dir);
        assert!(!cache_dir.exists());

        assert!(cache.read("missing.jpg").is_none());
        assert!(cache_dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache = DiskCache::new(temp_dir.path());

        cache.write("a.jpg", &[1, 2, 3]);
        assert_eq!(cache.read("a.jpg"), Some(vec![1, 2, 3]));

        cache.write("a.jpg", &[4]);
        assert_eq!(cache.read("a.jpg"), Some(vec![4]));
        Ok(())
    }

    #[test]
    fn test_write_replaces_whole_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache = DiskCache::new(temp_dir.path());

        cache.write("a.jpg", &[7; 4096]);
        let held = fs::File::open(temp_dir.path().join("a.jpg"))?;
        cache.write("a.jpg", &[9; 16]);

        // An open handle keeps the old inode intact while the new file is swapped in
        assert_eq!(held.metadata()?.len(), 4096);
        assert_eq!(cache.read("a.jpg"), Some(vec![9; 16]));

        // no temp files are left behind
        let names: Vec<_> = fs::read_dir(temp_dir.path())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(names, vec![std::ffi::OsString::from("a.jpg")]);
        Ok(())
    }

    #[test]
    fn test_write_failure_is_not_fatal() -> Result<()> {
        let temp_dir = tempdir()?;
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, b"x")?;

        // The cache "directory" is a regular file, so every write fails
        let cache = DiskCache::new(&blocker);
        cache.write("a.jpg", &[1]);
        assert!(cache.read("a.jpg").is_none());
        Ok(())
    }

    #[test]
    fn test_key_for_purposes() -> Result<()> {
        let temp_dir = tempdir()?;
        let source = temp_dir.path().join("img.heic");
        fs::write(&source, b"heic")?;

        let cache = DiskCache::new(temp_dir.path().join("cache"));
        assert_ne!(cache.key_for(&source, Purpose::Full), cache.key_for(&source, Purpose::Preview));
        assert_eq!(Purpose::Full.jpeg_quality(&ThumbnailConfig::default()), 92);
        assert_eq!(Purpose::Preview.jpeg_quality(&ThumbnailConfig::default()), 80);
        Ok(())
    }
}
