//! HEIF/HEIC/HIF to JPEG conversion
//!
//! Browsers cannot display HEIF, so every HEIF request goes through a chain
//! of external tools:
//!
//! 1. the largest embedded JPEG preview stream, copied out by ffmpeg without
//!    re-encoding
//! 2. the platform's native decoder (`sips` or `heif-convert`), which
//!    assembles multi-tile images correctly
//! 3. a full ffmpeg transcode of the primary image
//!
//! The container's `irot` rotation is applied afterwards and the result is
//! kept in the disk cache.

use crate::cache::{DiskCache, Purpose};
use crate::chain::{run_chain, Strategy};
use crate::error::PipelineError;
use crate::generate::{orient_jpeg_bytes, resize_jpeg_bytes};
use crate::{DecoderConfig, NativeTool, ThumbnailConfig};
use anyhow::{bail, Context, Result};
use media_meta::MetadataReader;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Width of the fixed-size thumbnail stream HEIF writers embed next to the
/// real preview
const SMALL_THUMBNAIL_WIDTH: u32 = 160;

/// An MJPEG stream reported by `ffmpeg -i`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedStream {
    pub index: u32,
    /// 0 when ffmpeg did not report a size
    pub width: u32,
    pub height: u32,
}

impl ProbedStream {
    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Extract the MJPEG streams from the stderr of `ffmpeg -i <file>`
pub fn parse_probe(output: &str) -> Vec<ProbedStream> {
    const STREAM_PREFIX: &str = "Stream #0:";

    output
        .lines()
        .filter(|line| line.contains("mjpeg"))
        .filter_map(|line| {
            let rest = &line[line.find(STREAM_PREFIX)? + STREAM_PREFIX.len()..];
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            let index = digits.parse().ok()?;
            let (width, height) = parse_dimensions(line).unwrap_or((0, 0));
            Some(ProbedStream { index, width, height })
        })
        .collect()
}

/// First `WxH` token of a probe line
fn parse_dimensions(line: &str) -> Option<(u32, u32)> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| {
            let (w, h) = token.split_once('x')?;
            let w = w.parse::<u32>().ok()?;
            let h = h.parse::<u32>().ok()?;
            (w > 0 && h > 0).then_some((w, h))
        })
        .next()
}

/// The largest stream that is not a 160-wide thumbnail; lower index wins ties
pub fn select_preview_stream(streams: &[ProbedStream]) -> Option<ProbedStream> {
    streams
        .iter()
        .filter(|stream| stream.width != SMALL_THUMBNAIL_WIDTH)
        .max_by(|a, b| a.area().cmp(&b.area()).then(b.index.cmp(&a.index)))
        .copied()
}

/// Run ffmpeg on `input` and return its stdout
fn run_ffmpeg(ffmpeg: &str, input: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new(ffmpeg)
        .arg("-i")
        .arg(input)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {} on {}", ffmpeg, input.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} failed for {}: {}", ffmpeg, input.display(), stderr.trim());
    }

    if output.stdout.is_empty() {
        bail!("{} produced no output for {}", ffmpeg, input.display());
    }

    Ok(output.stdout)
}

/// Stream-copy the best embedded JPEG preview
struct EmbeddedStream {
    ffmpeg: String,
}

impl Strategy<Vec<u8>> for EmbeddedStream {
    fn name(&self) -> &'static str {
        "embedded-stream"
    }

    fn attempt(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        // The probe always exits non-zero since no output file is given
        let probe = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;

        let streams = parse_probe(&String::from_utf8_lossy(&probe.stderr));
        let Some(stream) = select_preview_stream(&streams) else {
            return Ok(None);
        };
        debug!(path = %path.display(), stream = stream.index, width = stream.width, height = stream.height, "selected preview stream");

        let map = format!("0:{}", stream.index);
        run_ffmpeg(&self.ffmpeg, path, &["-map", map.as_str(), "-c", "copy", "-f", "image2pipe", "pipe:1"]).map(Some)
    }
}

/// The operating system's own HEIF decoder, writing to a temporary JPEG
struct NativeDecoder {
    tool: NativeTool,
    program: String,
    quality: u8,
}

impl Strategy<Vec<u8>> for NativeDecoder {
    fn name(&self) -> &'static str {
        self.tool.program()
    }

    fn attempt(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let output_file = tempfile::Builder::new()
            .prefix("unterlumen-native-")
            .suffix(".jpg")
            .tempfile()
            .context("Failed to create temporary output file")?;
        let out_path = output_file.path();
        let quality = self.quality.to_string();

        let mut command = Command::new(&self.program);
        match self.tool {
            NativeTool::Sips => command
                .args(["-s", "format", "jpeg", "-s", "formatOptions", quality.as_str()])
                .arg(path)
                .arg("--out")
                .arg(out_path),
            NativeTool::HeifConvert => command.args(["-q", quality.as_str()]).arg(path).arg(out_path),
        };

        let output = command
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed for {}: {}", self.program, path.display(), stderr.trim());
        }

        let data = fs::read(out_path)
            .with_context(|| format!("Failed to read {} output", self.program))?;
        if data.is_empty() {
            bail!("{} produced an empty file", self.program);
        }
        Ok(Some(data))
    }
}

/// Decode the primary image with ffmpeg and encode one MJPEG frame
struct FfmpegTranscode {
    ffmpeg: String,
}

impl Strategy<Vec<u8>> for FfmpegTranscode {
    fn name(&self) -> &'static str {
        "ffmpeg-transcode"
    }

    fn attempt(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        run_ffmpeg(
            &self.ffmpeg,
            path,
            &["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "2", "-frames:v", "1", "pipe:1"],
        )
        .map(Some)
    }
}

/// The default strategy order for `decoders`
pub fn default_strategies(decoders: &DecoderConfig, config: &ThumbnailConfig) -> Vec<Box<dyn Strategy<Vec<u8>>>> {
    let mut strategies: Vec<Box<dyn Strategy<Vec<u8>>>> = vec![Box::new(EmbeddedStream {
        ffmpeg: decoders.ffmpeg.clone(),
    })];
    if let Some(tool) = decoders.native {
        strategies.push(Box::new(NativeDecoder {
            tool,
            program: decoders
                .native_program
                .clone()
                .unwrap_or_else(|| tool.program().to_string()),
            quality: config.full_quality,
        }));
    }
    strategies.push(Box::new(FfmpegTranscode {
        ffmpeg: decoders.ffmpeg.clone(),
    }));
    strategies
}

pub struct HeifConverter {
    cache: DiskCache,
    reader: MetadataReader,
    config: ThumbnailConfig,
    strategies: Vec<Box<dyn Strategy<Vec<u8>>>>,
}

impl HeifConverter {
    pub fn new(cache: DiskCache, reader: MetadataReader, config: ThumbnailConfig, decoders: &DecoderConfig) -> Self {
        let strategies = default_strategies(decoders, &config);
        Self::with_strategies(cache, reader, config, strategies)
    }

    pub fn with_strategies(
        cache: DiskCache,
        reader: MetadataReader,
        config: ThumbnailConfig,
        strategies: Vec<Box<dyn Strategy<Vec<u8>>>>,
    ) -> Self {
        Self {
            cache,
            reader,
            config,
            strategies,
        }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Full-size upright JPEG for the viewer
    pub fn convert_full(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        self.convert(path, Purpose::Full)
    }

    /// Upright JPEG preview used as the thumbnail source
    pub fn extract_preview(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        self.convert(path, Purpose::Preview)
    }

    /// Grid thumbnail: the preview shrunk to the thumbnail box, or the
    /// preview itself when it cannot be resized
    pub fn thumbnail(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        let preview = self.extract_preview(path)?;
        match resize_jpeg_bytes(&preview, self.config.max_dimension, self.config.preview_quality) {
            Ok(thumb) => Ok(thumb),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "serving preview unresized");
                Ok(preview)
            }
        }
    }

    fn convert(&self, path: &Path, purpose: Purpose) -> Result<Vec<u8>, PipelineError> {
        fs::metadata(path).map_err(|source| PipelineError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        let key = self.cache.key_for(path, purpose);
        if let Some(cached) = self.cache.read(&key) {
            return Ok(cached);
        }

        let data = run_chain(path, &self.strategies)?;

        let orientation = self.reader.heif_orientation(path);
        let data = match orient_jpeg_bytes(&data, orientation, purpose.jpeg_quality(&self.config)) {
            Ok(oriented) => oriented,
            Err(e) => {
                debug!(path = %path.display(), orientation, error = %e, "keeping unrotated image");
                data
            }
        };

        self.cache.write(&key, &data);
        info!(path = %path.display(), purpose = %purpose, bytes = data.len(), "converted HEIF image");
        Ok(data)
    }

    /// Warm the preview cache for many files in parallel
    pub fn generate_batch<F>(
        &self,
        file_paths: &[PathBuf],
        progress_callback: F,
    ) -> HashMap<PathBuf, Result<usize, PipelineError>>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = file_paths.len();
        let completed = AtomicUsize::new(0);

        file_paths
            .par_iter()
            .map(|file_path| {
                let result = self.extract_preview(file_path).map(|data| data.len());

                // Update progress
                let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress_callback(current, total);

                (file_path.clone(), result)
            })
            .collect()
    }
}
