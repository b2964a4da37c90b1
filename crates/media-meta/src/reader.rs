//! Metadata extraction on top of `kamadak-exif`
//!
//! Every entry point first tries the standard container decode and, for the
//! calls that need it, falls back to scanning the file prefix for an embedded
//! TIFF block. Absence of metadata is a normal outcome (`Ok(None)`); only an
//! unreadable source is an error.

use crate::container::{exif_tiff_offsets, find_rotation_angle, rotation_to_orientation};
use crate::{MetaError, ReaderLimits};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use exif::{Exif, In, Tag, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::debug;

/// Everything extracted from an image's EXIF block for the info panel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// The IFD1 JPEG thumbnail plus the dimensions of the full image it stands for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedThumbnail {
    pub jpeg: Vec<u8>,
    /// Full image width from EXIF, 0 when unknown
    pub image_width: u32,
    /// Full image height from EXIF, 0 when unknown
    pub image_height: u32,
}

/// Pointer and blob tags that carry no information for a reader
const SKIPPED_TAGS: &[Tag] = &[
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
    Tag::MakerNote,
];

/// Date tags in order of preference, each with its sub-second and offset companions
const DATE_TAGS: [(Tag, Tag, Tag); 3] = [
    (Tag::DateTimeOriginal, Tag::SubSecTimeOriginal, Tag::OffsetTimeOriginal),
    (Tag::DateTimeDigitized, Tag::SubSecTimeDigitized, Tag::OffsetTimeDigitized),
    (Tag::DateTime, Tag::SubSecTime, Tag::OffsetTime),
];

/// Stateless metadata reader; cheap to clone and share between threads
#[derive(Debug, Clone, Default)]
pub struct MetadataReader {
    limits: ReaderLimits,
}

impl MetadataReader {
    pub fn new(limits: ReaderLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ReaderLimits {
        self.limits
    }

    /// Decode the EXIF block of `path`, scanning for an embedded block when the
    /// standard container decode fails.
    pub fn read_exif(&self, path: &Path) -> Result<Option<Exif>, MetaError> {
        let file = File::open(path).map_err(|e| MetaError::io(path, e))?;
        let mut reader = BufReader::new(file);

        match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => return Ok(Some(exif)),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "standard EXIF decode failed, scanning for embedded block");
            }
        }

        reader.rewind().map_err(|e| MetaError::io(path, e))?;
        let mut prefix = Vec::new();
        reader
            .take(self.limits.exif_scan_limit)
            .read_to_end(&mut prefix)
            .map_err(|e| MetaError::io(path, e))?;

        Ok(decode_embedded(&prefix))
    }

    /// Capture date of the image, `Ok(None)` when there is no usable date tag
    pub fn extract_date(&self, path: &Path) -> Result<Option<DateTime<Utc>>, MetaError> {
        Ok(self.read_exif(path)?.as_ref().and_then(capture_time))
    }

    /// EXIF orientation (1..=8). Never fails: anything unreadable is upright.
    ///
    /// Only the standard decode is consulted; HEIF rotation lives in the
    /// container and is read by [`MetadataReader::heif_orientation`].
    pub fn extract_orientation(&self, path: &Path) -> u16 {
        let exif = File::open(path)
            .ok()
            .and_then(|file| exif::Reader::new().read_from_container(&mut BufReader::new(file)).ok());
        exif.as_ref().map_or(1, orientation)
    }

    /// All primary-IFD tags, dimensions and GPS position
    pub fn extract_all(&self, path: &Path) -> Result<Option<ExifData>, MetaError> {
        Ok(self.read_exif(path)?.map(|exif| collect_exif_data(&exif)))
    }

    /// The embedded JPEG thumbnail, if the file carries one
    pub fn embedded_thumbnail(&self, path: &Path) -> Result<Option<EmbeddedThumbnail>, MetaError> {
        let Some(exif) = self.read_exif(path)? else {
            return Ok(None);
        };

        let offset = uint_value_in(&exif, Tag::JPEGInterchangeFormat, In::THUMBNAIL);
        let length = uint_value_in(&exif, Tag::JPEGInterchangeFormatLength, In::THUMBNAIL);
        let (Some(offset), Some(length)) = (offset, length) else {
            return Ok(None);
        };

        let start = offset as usize;
        let jpeg = start
            .checked_add(length as usize)
            .and_then(|end| exif.buf().get(start..end))
            .filter(|bytes| bytes.starts_with(&[0xff, 0xd8]));
        let Some(jpeg) = jpeg else {
            debug!(path = %path.display(), offset, length, "thumbnail pointer out of bounds");
            return Ok(None);
        };

        let (image_width, image_height) = image_dimensions(&exif);
        Ok(Some(EmbeddedThumbnail {
            jpeg: jpeg.to_vec(),
            image_width,
            image_height,
        }))
    }

    /// Orientation encoded by the HEIF `irot` box (1, 3, 6 or 8), 1 on any failure
    pub fn heif_orientation(&self, path: &Path) -> u16 {
        let Ok(file) = File::open(path) else {
            return 1;
        };
        let mut prefix = Vec::new();
        if file.take(self.limits.rotation_scan_limit).read_to_end(&mut prefix).is_err() {
            return 1;
        }
        find_rotation_angle(&prefix).map_or(1, rotation_to_orientation)
    }
}

/// Try every candidate TIFF block in `buf`; the first one that decodes wins
pub fn decode_embedded(buf: &[u8]) -> Option<Exif> {
    for start in exif_tiff_offsets(buf) {
        match exif::Reader::new().read_raw(buf[start..].to_vec()) {
            Ok(exif) => {
                debug!(offset = start, "decoded embedded EXIF block");
                return Some(exif);
            }
            Err(err) => debug!(offset = start, error = %err, "rejected TIFF candidate"),
        }
    }
    None
}

/// Orientation tag clamped to 1..=8
pub fn orientation(exif: &Exif) -> u16 {
    match uint_value(exif, Tag::Orientation) {
        Some(v @ 1..=8) => v as u16,
        _ => 1,
    }
}

/// Capture time from the first date tag that parses
pub fn capture_time(exif: &Exif) -> Option<DateTime<Utc>> {
    DATE_TAGS.iter().find_map(|&(date_tag, subsec_tag, offset_tag)| {
        let raw = ascii_value(exif, date_tag)?;
        parse_capture_time(
            &raw,
            ascii_value(exif, subsec_tag).as_deref(),
            ascii_value(exif, offset_tag).as_deref(),
        )
    })
}

/// Decoded pixel dimensions, falling back to the raw image dimensions, else (0, 0)
pub fn image_dimensions(exif: &Exif) -> (u32, u32) {
    let pair = |x: Tag, y: Tag| Some((uint_value(exif, x)?, uint_value(exif, y)?));
    pair(Tag::PixelXDimension, Tag::PixelYDimension)
        .or_else(|| pair(Tag::ImageWidth, Tag::ImageLength))
        .unwrap_or((0, 0))
}

/// GPS position in signed decimal degrees
pub fn gps_coordinates(exif: &Exif) -> Option<(f64, f64)> {
    let lat = dms_value(exif, Tag::GPSLatitude)?;
    let lon = dms_value(exif, Tag::GPSLongitude)?;

    let south = ascii_value(exif, Tag::GPSLatitudeRef).is_some_and(|r| r.eq_ignore_ascii_case("S"));
    let west = ascii_value(exif, Tag::GPSLongitudeRef).is_some_and(|r| r.eq_ignore_ascii_case("W"));

    Some((if south { -lat } else { lat }, if west { -lon } else { lon }))
}

fn collect_exif_data(exif: &Exif) -> ExifData {
    let tags = exif
        .fields()
        .filter(|field| field.ifd_num == In::PRIMARY && !SKIPPED_TAGS.contains(&field.tag))
        .map(|field| {
            (
                field.tag.to_string(),
                field.display_value().with_unit(exif).to_string(),
            )
        })
        .collect();

    let (width, height) = image_dimensions(exif);
    let gps = gps_coordinates(exif);

    ExifData {
        tags,
        width,
        height,
        latitude: gps.map(|(lat, _)| lat),
        longitude: gps.map(|(_, lon)| lon),
    }
}

fn uint_value(exif: &Exif, tag: Tag) -> Option<u32> {
    uint_value_in(exif, tag, In::PRIMARY)
}

fn uint_value_in(exif: &Exif, tag: Tag, ifd: In) -> Option<u32> {
    exif.get_field(tag, ifd)?.value.get_uint(0)
}

fn ascii_value(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .iter()
            .map(|part| {
                String::from_utf8_lossy(part)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string()
            })
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

/// Degrees/minutes/seconds rationals to a positive decimal value
fn dms_value(exif: &Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(parts) if parts.len() >= 3 => {
            if parts[..3].iter().any(|r| r.denom == 0) {
                return None;
            }
            Some(parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0)
        }
        _ => None,
    }
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` stamp with optional sub-second digits
/// and `±HH:MM` offset. Without an offset the stamp is taken as local time.
fn parse_capture_time(date_time: &str, subsec: Option<&str>, offset: Option<&str>) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(date_time.trim(), "%Y:%m:%d %H:%M:%S").ok()?;

    let subsec = subsec
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 9 && s.bytes().all(|b| b.is_ascii_digit()));
    let naive = match subsec {
        Some(digits) => {
            let nanos = digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32);
            naive.with_nanosecond(nanos).unwrap_or(naive)
        }
        None => naive,
    };

    match offset.and_then(parse_offset) {
        Some(offset) => Some(offset.from_local_datetime(&naive).single()?.with_timezone(&Utc)),
        None => Some(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| naive.and_utc()),
        ),
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours = hours.parse::<u8>().ok().filter(|h| *h <= 23)?;
    let minutes = minutes.parse::<u8>().ok().filter(|m| *m <= 59)?;
    FixedOffset::east_opt(sign * (i32::from(hours) * 3600 + i32::from(minutes) * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ExifFixture;
    use anyhow::Result;
    use chrono::{Datelike, NaiveDate};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        buf
    }

    fn local_naive(date: DateTime<Utc>) -> NaiveDateTime {
        date.with_timezone(&Local).naive_local()
    }

    #[test]
    fn test_jpeg_date_orientation_and_tags() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("a.jpg");
        let fixture = ExifFixture::new()
            .orientation(6)
            .date_time_original("2021:06:01 12:34:56")
            .pixel_dimensions(4000, 3000);
        fs::write(&path, fixture.embed_in_jpeg(&jpeg_bytes(8, 6)))?;

        let reader = MetadataReader::default();
        let date = reader.extract_date(&path)?.expect("capture date");
        let expected = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap().and_hms_opt(12, 34, 56).unwrap();
        assert_eq!(local_naive(date), expected);

        assert_eq!(reader.extract_orientation(&path), 6);

        let data = reader.extract_all(&path)?.expect("exif data");
        assert_eq!((data.width, data.height), (4000, 3000));
        assert!(data.tags.contains_key("DateTimeOriginal"));
        assert!(data.tags.contains_key("Orientation"));
        assert!(!data.tags.contains_key("ExifIFDPointer"));
        assert!(data.latitude.is_none());
        Ok(())
    }

    #[test]
    fn test_image_without_exif_is_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("plain.jpg");
        fs::write(&path, jpeg_bytes(8, 8))?;

        let reader = MetadataReader::default();
        assert!(reader.extract_date(&path)?.is_none());
        assert!(reader.extract_all(&path)?.is_none());
        assert!(reader.embedded_thumbnail(&path)?.is_none());
        assert_eq!(reader.extract_orientation(&path), 1);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let reader = MetadataReader::default();
        let path = Path::new("/definitely/not/here.jpg");
        assert!(matches!(reader.extract_date(path), Err(MetaError::Io { .. })));
        assert_eq!(reader.extract_orientation(path), 1);
        assert_eq!(reader.heif_orientation(path), 1);
    }

    #[test]
    fn test_out_of_range_orientation_defaults_to_upright() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("odd.jpg");
        fs::write(&path, ExifFixture::new().orientation(9).embed_in_jpeg(&jpeg_bytes(4, 4)))?;
        assert_eq!(MetadataReader::default().extract_orientation(&path), 1);
        Ok(())
    }

    #[test]
    fn test_heif_marker_fallback() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("b.heic");
        let fixture = ExifFixture::new()
            .date_time_original("2023:02:03 04:05:06")
            .offset_time_original("+00:00");
        fs::write(&path, fixture.heif_like(Some(1), false))?;

        let reader = MetadataReader::default();
        let date = reader.extract_date(&path)?.expect("embedded date");
        assert_eq!(date, Utc.with_ymd_and_hms(2023, 2, 3, 4, 5, 6).unwrap());
        assert_eq!(reader.heif_orientation(&path), 8);
        Ok(())
    }

    #[test]
    fn test_heif_bare_tiff_fallback() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("c.hif");
        let fixture = ExifFixture::new().date_time("2020:01:02 03:04:05").offset_time_original("+01:00");
        fs::write(&path, fixture.heif_like(None, true))?;

        let reader = MetadataReader::default();
        assert!(reader.extract_date(&path)?.is_some());
        assert_eq!(reader.heif_orientation(&path), 1);
        Ok(())
    }

    #[test]
    fn test_embedded_scan_respects_limit() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("late.heic");
        let mut bytes = vec![0u8; 4096];
        bytes.extend(ExifFixture::new().date_time_original("2020:01:01 00:00:00").heif_like(None, false));
        fs::write(&path, bytes)?;

        let limited = MetadataReader::new(ReaderLimits {
            exif_scan_limit: 1024,
            ..ReaderLimits::default()
        });
        assert!(limited.extract_date(&path)?.is_none());
        assert!(MetadataReader::default().extract_date(&path)?.is_some());
        Ok(())
    }

    #[test]
    fn test_dimension_fallback() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dims.jpg");
        fs::write(&path, ExifFixture::new().image_dimensions(640, 480).embed_in_jpeg(&jpeg_bytes(4, 3)))?;

        let data = MetadataReader::default().extract_all(&path)?.expect("exif data");
        assert_eq!((data.width, data.height), (640, 480));

        let path = dir.path().join("nodims.jpg");
        fs::write(&path, ExifFixture::new().orientation(1).embed_in_jpeg(&jpeg_bytes(4, 3)))?;
        let data = MetadataReader::default().extract_all(&path)?.expect("exif data");
        assert_eq!((data.width, data.height), (0, 0));
        Ok(())
    }

    #[test]
    fn test_gps_coordinates() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("gps.jpg");
        fs::write(&path, ExifFixture::new().gps(48.5, -122.25).embed_in_jpeg(&jpeg_bytes(4, 4)))?;

        let data = MetadataReader::default().extract_all(&path)?.expect("exif data");
        assert!((data.latitude.unwrap() - 48.5).abs() < 1e-4);
        assert!((data.longitude.unwrap() + 122.25).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_embedded_thumbnail() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("thumb.jpg");
        let thumb = jpeg_bytes(16, 12);
        let fixture = ExifFixture::new().pixel_dimensions(400, 300).thumbnail(thumb.clone());
        fs::write(&path, fixture.embed_in_jpeg(&jpeg_bytes(40, 30)))?;

        let found = MetadataReader::default().embedded_thumbnail(&path)?.expect("thumbnail");
        assert_eq!(found.jpeg, thumb);
        assert_eq!((found.image_width, found.image_height), (400, 300));
        Ok(())
    }

    #[test]
    fn test_parse_capture_time_with_subseconds() {
        let dt = parse_capture_time("2024:01:15 14:30:25", Some("50"), Some("+00:00")).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 25);
        assert_eq!(dt.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_parse_capture_time_with_offset() {
        let dt = parse_capture_time("2021:06:01 12:00:00", None, Some("+02:00")).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap());

        let dt = parse_capture_time("2021:06:01 12:00:00", Some("abc"), Some("-05:30")).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2021, 6, 1, 17, 30, 0).unwrap());

        assert!(parse_capture_time("0000:00:00 00:00:00", None, None).is_none());
        assert!(parse_capture_time("garbage", None, None).is_none());
    }

    #[test]
    fn test_out_of_range_offset_is_ignored() {
        assert_eq!(parse_offset("+23:59"), FixedOffset::east_opt(23 * 3600 + 59 * 60));
        assert!(parse_offset("+999999:00").is_none());
        assert!(parse_offset("+24:00").is_none());
        assert!(parse_offset("-05:60").is_none());
        assert!(parse_offset("+-5:00").is_none());

        // falls back to local time like a missing offset
        let local = parse_capture_time("2021:06:01 12:00:00", None, None);
        assert_eq!(parse_capture_time("2021:06:01 12:00:00", None, Some("+999999:00")), local);
        assert!(local.is_some());
    }
}
