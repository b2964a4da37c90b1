//! The `PhotoService` facade consumed by the HTTP layer and the CLI

use crate::config::ServiceConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use media_meta::{ExifData, MetadataReader};
use scan_cache::{
    is_heif, scan_directory, sort_entries, spawn_date_resolution, DateSource, Entry, ScanCache, SortField,
    SortOrder,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thumbnail_cache::{DecoderCapability, DecoderProbe, DiskCache, HeifConverter, ImageBytes, ThumbnailGenerator};
use tracing::{debug, info, warn};

/// Warning kind attached to listings with HEIF files that cannot be decoded
pub const HEIF_UNSUPPORTED: &str = "heif_unsupported";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<Entry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatesReady {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dates: Option<HashMap<String, DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// UTC, `YYYY-MM-DDTHH:MM:SSZ`
    pub modified: String,
    /// Lowercase extension without the dot
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifData>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmSummary {
    pub total: usize,
    pub converted: usize,
    pub failed: usize,
}

/// Capture dates from EXIF; any read failure means "unknown"
#[derive(Debug, Clone, Default)]
pub struct ExifDateSource {
    reader: MetadataReader,
}

impl ExifDateSource {
    pub fn new(reader: MetadataReader) -> Self {
        Self { reader }
    }
}

impl DateSource for ExifDateSource {
    fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        match self.reader.extract_date(path) {
            Ok(date) => date,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "capture date unavailable");
                None
            }
        }
    }
}

/// Content type for serving `path` as is
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn is_heif_path(path: &Path) -> bool {
    is_heif(&path.to_string_lossy())
}

pub struct PhotoService {
    scans: ScanCache,
    reader: MetadataReader,
    thumbnails: Arc<ThumbnailGenerator>,
    heif: Arc<HeifConverter>,
    decoders: Arc<DecoderProbe>,
    date_source: Arc<dyn DateSource>,
}

impl PhotoService {
    pub fn new(config: &ServiceConfig) -> Self {
        let probe = DecoderProbe::new(config.decoders.ffmpeg.clone());
        let date_source = Arc::new(ExifDateSource::new(MetadataReader::new(config.limits)));
        Self::with_parts(config, probe, date_source)
    }

    /// Build a service around an injected decoder probe and date source
    pub fn with_parts(config: &ServiceConfig, decoders: DecoderProbe, date_source: Arc<dyn DateSource>) -> Self {
        let reader = MetadataReader::new(config.limits);
        let heif = HeifConverter::new(
            DiskCache::new(config.resolved_cache_dir()),
            reader.clone(),
            config.thumbnails.clone(),
            &config.decoders,
        );
        Self {
            scans: ScanCache::new(),
            thumbnails: Arc::new(ThumbnailGenerator::new(reader.clone(), config.thumbnails.clone())),
            reader,
            heif: Arc::new(heif),
            decoders: Arc::new(decoders),
            date_source,
        }
    }

    /// List `dir`, serving the cached scan while the directory is unchanged.
    ///
    /// A fresh scan returns mod-time dates immediately and resolves capture
    /// dates in the background; later listings pick them up once complete.
    pub async fn browse(&self, dir: &Path, sort: SortField, order: SortOrder) -> Result<Listing> {
        let dir_mod_time = tokio::fs::metadata(dir)
            .await
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        let mut entries = match self.scans.get(dir, dir_mod_time) {
            Some(scan) => scan.entries_with_overlay(),
            None => {
                let scan_dir = dir.to_path_buf();
                let entries = tokio::task::spawn_blocking(move || scan_directory(&scan_dir))
                    .await
                    .context("Directory scan task failed")??;
                let scan = self.scans.put(dir, entries.clone(), dir_mod_time);
                spawn_date_resolution(dir.to_path_buf(), scan, Arc::clone(&self.date_source));
                entries
            }
        };
        sort_entries(&mut entries, sort, order);

        let mut warnings = Vec::new();
        if entries.iter().any(|entry| entry.is_image() && is_heif(&entry.name)) {
            let capability = self.decoder_capability().await;
            if !capability.is_fully_supported() {
                warnings.push(Warning {
                    kind: HEIF_UNSUPPORTED.to_string(),
                    message: capability.message.unwrap_or_default(),
                });
            }
        }

        Ok(Listing {
            path: dir.display().to_string(),
            entries,
            warnings,
        })
    }

    /// Capture dates of the current listing of `dir`, once resolved
    pub async fn dates_ready(&self, dir: &Path) -> DatesReady {
        let Ok(dir_mod_time) = tokio::fs::metadata(dir).await.and_then(|metadata| metadata.modified()) else {
            return DatesReady::default();
        };
        match self.scans.get(dir, dir_mod_time).and_then(|scan| scan.dates_snapshot()) {
            Some(dates) => DatesReady {
                ready: true,
                dates: Some(dates),
            },
            None => DatesReady::default(),
        }
    }

    /// The image for the viewer: HEIF converted to JPEG, everything else raw
    pub async fn full_image(&self, path: &Path) -> Result<ImageBytes> {
        if is_heif_path(path) {
            let heif = Arc::clone(&self.heif);
            let source = path.to_path_buf();
            let bytes = tokio::task::spawn_blocking(move || heif.convert_full(&source))
                .await
                .context("HEIF conversion task failed")?
                .with_context(|| format!("Failed to convert HEIF {}", path.display()))?;
            return Ok(ImageBytes::jpeg(bytes));
        }

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(ImageBytes {
            bytes,
            content_type: content_type_for(path),
        })
    }

    pub async fn thumbnail(&self, path: &Path) -> Result<ImageBytes> {
        let source = path.to_path_buf();
        let task = if is_heif_path(path) {
            let heif = Arc::clone(&self.heif);
            tokio::task::spawn_blocking(move || heif.thumbnail(&source).map(ImageBytes::jpeg))
        } else {
            let thumbnails = Arc::clone(&self.thumbnails);
            tokio::task::spawn_blocking(move || thumbnails.generate(&source))
        };
        let thumb = task
            .await
            .context("Thumbnail task failed")?
            .with_context(|| format!("Failed to generate thumbnail for {}", path.display()))?;
        Ok(thumb)
    }

    /// Every EXIF field of `path`; `None` when the file carries no metadata
    pub async fn all_metadata(&self, path: &Path) -> Result<Option<ExifData>> {
        let reader = self.reader.clone();
        let source = path.to_path_buf();
        let data = tokio::task::spawn_blocking(move || reader.extract_all(&source))
            .await
            .context("Metadata task failed")??;
        Ok(data)
    }

    /// File facts for the info panel, with EXIF when it can be read
    pub async fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("File not found: {}", path.display()))?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .with_context(|| format!("No modification time for {}", path.display()))?
            .into();

        let exif = match self.all_metadata(path).await {
            Ok(exif) => exif,
            Err(e) => {
                debug!(path = %path.display(), error = %format!("{e:#}"), "no EXIF for info");
                None
            }
        };

        Ok(FileInfo {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.display().to_string(),
            size: metadata.len(),
            modified: modified.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            format: path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default(),
            exif,
        })
    }

    /// HEIF decoding support, probed once per service
    pub async fn decoder_capability(&self) -> DecoderCapability {
        let probe = Arc::clone(&self.decoders);
        match tokio::task::spawn_blocking(move || probe.capability().clone()).await {
            Ok(capability) => capability,
            Err(e) => {
                warn!(error = %e, "decoder probe task failed");
                DecoderCapability {
                    available: false,
                    full_support: false,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Drop the cached listing of `dir` after files were added, moved or deleted
    pub fn invalidate(&self, dir: &Path) {
        self.scans.invalidate(dir);
    }

    /// Convert the previews of every HEIF image in `dir` ahead of browsing
    pub async fn warm_previews(&self, dir: &Path) -> Result<WarmSummary> {
        let scan_dir = dir.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || scan_directory(&scan_dir))
            .await
            .context("Directory scan task failed")??;

        let paths: Vec<PathBuf> = entries
            .iter()
            .filter(|entry| entry.is_image() && is_heif(&entry.name))
            .map(|entry| dir.join(&entry.name))
            .collect();
        if paths.is_empty() {
            return Ok(WarmSummary::default());
        }

        let heif = Arc::clone(&self.heif);
        let results = tokio::task::spawn_blocking(move || {
            heif.generate_batch(&paths, |done, total| {
                debug!(done, total, "warming previews");
            })
        })
        .await
        .context("Preview warming task failed")?;

        let failed = results.values().filter(|result| result.is_err()).count();
        let summary = WarmSummary {
            total: results.len(),
            converted: results.len() - failed,
            failed,
        };
        info!(dir = %dir.display(), total = summary.total, failed, "warmed previews");
        Ok(summary)
    }
}
