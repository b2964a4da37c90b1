//! Thumbnail generation for raster images
//!
//! Two stages, tried in order: the EXIF-embedded thumbnail (cheap, but only
//! trusted when its aspect ratio matches the image), then a full decode with a
//! nearest-neighbour downscale. Both apply the EXIF orientation so thumbnails
//! are always displayed upright.

use crate::chain::{run_chain, Strategy};
use crate::error::PipelineError;
use crate::ThumbnailConfig;
use anyhow::{bail, Context};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, RgbaImage};
use media_meta::MetadataReader;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Encoded image plus the MIME type to serve it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

impl ImageBytes {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: JPEG_CONTENT_TYPE,
        }
    }
}

/// Transform `img` so an image stored with EXIF `orientation` displays upright.
/// Codes 5 to 8 swap width and height; 1 and unknown codes are the identity.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// The orientation that undoes `orientation`
pub fn inverse_orientation(orientation: u16) -> u16 {
    match orientation {
        6 => 8,
        8 => 6,
        other => other,
    }
}

/// Dimensions that fit `width`x`height` inside a `max` square, keeping the
/// aspect ratio with integer arithmetic. Never upscales, never returns 0.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = |side: u32, long: u32| ((u64::from(side) * u64::from(max) / u64::from(long)) as u32).max(1);
    if width > height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

/// Nearest-neighbour resample: destination pixel (x, y) takes source pixel
/// (x * src_w / width, y * src_h / height)
pub fn resize_nearest(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let src = img.to_rgba8();
    let out = RgbaImage::from_fn(width, height, |x, y| {
        let sx = u64::from(x) * u64::from(src_w) / u64::from(width);
        let sy = u64::from(y) * u64::from(src_h) / u64::from(height);
        *src.get_pixel(sx as u32, sy as u32)
    });
    DynamicImage::ImageRgba8(out)
}

/// Decode any supported format, reporting what the bytes turned out to be
pub fn decode(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>), PipelineError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format();
    let img = reader.decode().map_err(PipelineError::Decode)?;
    Ok((img, format))
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(PipelineError::Encode)?;
    Ok(buffer)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(PipelineError::Encode)?;
    Ok(buffer)
}

/// Rotate/flip JPEG bytes per `orientation`, re-encoding at `quality`.
/// Orientation 1 (or anything outside 2..=8) returns the input untouched.
pub fn orient_jpeg_bytes(bytes: &[u8], orientation: u16, quality: u8) -> Result<Vec<u8>, PipelineError> {
    if !(2..=8).contains(&orientation) {
        return Ok(bytes.to_vec());
    }
    let (img, _) = decode(bytes)?;
    encode_jpeg(&apply_orientation(img, orientation), quality)
}

/// Downscale JPEG bytes into a `max` square; input that already fits is
/// returned untouched.
pub fn resize_jpeg_bytes(bytes: &[u8], max: u32, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let (img, _) = decode(bytes)?;
    let (width, height) = img.dimensions();
    if width <= max && height <= max {
        return Ok(bytes.to_vec());
    }
    let (new_width, new_height) = fit_within(width, height, max);
    encode_jpeg(&resize_nearest(&img, new_width, new_height), quality)
}

/// Whether a thumbnail's aspect ratio strays from the image's by more than
/// `tolerance` (relative). Unknown dimensions never mismatch.
pub fn aspect_mismatch(image: (u32, u32), thumb: (u32, u32), tolerance: f64) -> bool {
    if image.0 == 0 || image.1 == 0 || thumb.0 == 0 || thumb.1 == 0 {
        return false;
    }
    let image_ratio = f64::from(image.0) / f64::from(image.1);
    let thumb_ratio = f64::from(thumb.0) / f64::from(thumb.1);
    (image_ratio - thumb_ratio).abs() / image_ratio > tolerance
}

fn encoded_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// The IFD1 thumbnail carried in the EXIF block
struct ExifThumbnail {
    reader: MetadataReader,
    config: ThumbnailConfig,
}

impl Strategy<ImageBytes> for ExifThumbnail {
    fn name(&self) -> &'static str {
        "exif-thumbnail"
    }

    fn attempt(&self, path: &Path) -> anyhow::Result<Option<ImageBytes>> {
        let Some(thumb) = self.reader.embedded_thumbnail(path)? else {
            return Ok(None);
        };

        // Cameras may keep a full-sensor thumbnail for an in-camera crop
        if let Some(thumb_dims) = encoded_dimensions(&thumb.jpeg) {
            let image_dims = (thumb.image_width, thumb.image_height);
            if aspect_mismatch(image_dims, thumb_dims, self.config.aspect_tolerance) {
                bail!(
                    "thumbnail aspect ratio mismatch: {}x{} for a {}x{} image",
                    thumb_dims.0,
                    thumb_dims.1,
                    image_dims.0,
                    image_dims.1
                );
            }
        }

        let orientation = self.reader.extract_orientation(path);
        let bytes = match orient_jpeg_bytes(&thumb.jpeg, orientation, self.config.preview_quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "serving thumbnail unrotated");
                thumb.jpeg
            }
        };
        Ok(Some(ImageBytes::jpeg(bytes)))
    }
}

/// Decode the whole file and shrink it
struct FullDecode {
    reader: MetadataReader,
    config: ThumbnailConfig,
}

impl Strategy<ImageBytes> for FullDecode {
    fn name(&self) -> &'static str {
        "full-decode"
    }

    fn attempt(&self, path: &Path) -> anyhow::Result<Option<ImageBytes>> {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let (img, format) =
            decode(&data).with_context(|| format!("Failed to decode {}", path.display()))?;

        let orientation = self.reader.extract_orientation(path);
        let rotated = (2..=8).contains(&orientation);
        let img = apply_orientation(img, orientation);

        let (width, height) = img.dimensions();
        let max = self.config.max_dimension;
        if width <= max && height <= max && !rotated {
            let content_type = format.map_or(JPEG_CONTENT_TYPE, |f| f.to_mime_type());
            return Ok(Some(ImageBytes {
                bytes: data,
                content_type,
            }));
        }

        let (new_width, new_height) = fit_within(width, height, max);
        let img = if (new_width, new_height) == (width, height) {
            img
        } else {
            resize_nearest(&img, new_width, new_height)
        };

        if format == Some(ImageFormat::Png) {
            Ok(Some(ImageBytes {
                bytes: encode_png(&img)?,
                content_type: PNG_CONTENT_TYPE,
            }))
        } else {
            Ok(Some(ImageBytes::jpeg(encode_jpeg(&img, self.config.preview_quality)?)))
        }
    }
}

/// Grid thumbnails for non-HEIF sources
pub struct ThumbnailGenerator {
    stages: Vec<Box<dyn Strategy<ImageBytes>>>,
}

impl ThumbnailGenerator {
    pub fn new(reader: MetadataReader, config: ThumbnailConfig) -> Self {
        Self {
            stages: vec![
                Box::new(ExifThumbnail {
                    reader: reader.clone(),
                    config: config.clone(),
                }),
                Box::new(FullDecode { reader, config }),
            ],
        }
    }

    pub fn generate(&self, path: &Path) -> Result<ImageBytes, PipelineError> {
        fs::metadata(path).map_err(|source| PipelineError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        run_chain(path, &self.stages)
    }
}
