//! Synthetic EXIF fixtures for tests
//!
//! Builds little-endian TIFF blocks with just the tags the reader cares about,
//! and wraps them into JPEG APP1 segments or minimal HEIF-like byte soups.

use crate::container::{EXIF_MARKER, ROTATION_BOX};

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;

const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_LENGTH: u16 = 0x0101;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_THUMB_OFFSET: u16 = 0x0201;
const TAG_THUMB_LENGTH: u16 = 0x0202;
const TAG_EXIF_POINTER: u16 = 0x8769;
const TAG_GPS_POINTER: u16 = 0x8825;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_OFFSET_TIME_ORIGINAL: u16 = 0x9011;
const TAG_PIXEL_X: u16 = 0xa002;
const TAG_PIXEL_Y: u16 = 0xa003;
const TAG_GPS_LAT_REF: u16 = 0x0001;
const TAG_GPS_LAT: u16 = 0x0002;
const TAG_GPS_LON_REF: u16 = 0x0003;
const TAG_GPS_LON: u16 = 0x0004;

struct Field {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

impl Field {
    fn short(tag: u16, value: u16) -> Self {
        Self { tag, kind: TYPE_SHORT, count: 1, data: value.to_le_bytes().to_vec() }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self { tag, kind: TYPE_LONG, count: 1, data: value.to_le_bytes().to_vec() }
    }

    fn ascii(tag: u16, value: &str) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        Self { tag, kind: TYPE_ASCII, count: data.len() as u32, data }
    }

    fn rationals(tag: u16, values: &[(u32, u32)]) -> Self {
        let data = values
            .iter()
            .flat_map(|(num, denom)| num.to_le_bytes().into_iter().chain(denom.to_le_bytes()))
            .collect();
        Self { tag, kind: TYPE_RATIONAL, count: values.len() as u32, data }
    }

    fn external_len(&self) -> usize {
        if self.data.len() > 4 {
            self.data.len() + self.data.len() % 2
        } else {
            0
        }
    }
}

/// A single IFD; values larger than four bytes are laid out right after it
struct Ifd {
    fields: Vec<Field>,
}

impl Ifd {
    fn encoded_len(&self) -> usize {
        2 + 12 * self.fields.len() + 4 + self.fields.iter().map(Field::external_len).sum::<usize>()
    }

    fn set_long(&mut self, tag: u16, value: u32) {
        if let Some(field) = self.fields.iter_mut().find(|f| f.tag == tag) {
            field.data = value.to_le_bytes().to_vec();
        }
    }

    fn encode(&mut self, at: usize, next: u32) -> Vec<u8> {
        self.fields.sort_by_key(|f| f.tag);
        let mut table = Vec::new();
        let mut external = Vec::new();
        let mut data_at = at + 2 + 12 * self.fields.len() + 4;

        table.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for field in &self.fields {
            table.extend_from_slice(&field.tag.to_le_bytes());
            table.extend_from_slice(&field.kind.to_le_bytes());
            table.extend_from_slice(&field.count.to_le_bytes());
            if field.data.len() <= 4 {
                let mut inline = field.data.clone();
                inline.resize(4, 0);
                table.extend_from_slice(&inline);
            } else {
                table.extend_from_slice(&(data_at as u32).to_le_bytes());
                external.extend_from_slice(&field.data);
                if field.data.len() % 2 == 1 {
                    external.push(0);
                }
                data_at += field.external_len();
            }
        }
        table.extend_from_slice(&next.to_le_bytes());
        table.extend_from_slice(&external);
        table
    }
}

/// Declarative description of an EXIF block
#[derive(Debug, Clone, Default)]
pub struct ExifFixture {
    pub orientation: Option<u16>,
    pub date_time_original: Option<String>,
    pub offset_time_original: Option<String>,
    pub date_time: Option<String>,
    pub pixel_dimensions: Option<(u32, u32)>,
    pub image_dimensions: Option<(u32, u32)>,
    /// Signed decimal degrees (latitude, longitude)
    pub gps: Option<(f64, f64)>,
    /// JPEG bytes stored as the IFD1 thumbnail
    pub thumbnail: Option<Vec<u8>>,
}

impl ExifFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orientation(mut self, value: u16) -> Self {
        self.orientation = Some(value);
        self
    }

    /// `value` uses the EXIF layout `YYYY:MM:DD HH:MM:SS`
    pub fn date_time_original(mut self, value: &str) -> Self {
        self.date_time_original = Some(value.to_string());
        self
    }

    pub fn offset_time_original(mut self, value: &str) -> Self {
        self.offset_time_original = Some(value.to_string());
        self
    }

    pub fn date_time(mut self, value: &str) -> Self {
        self.date_time = Some(value.to_string());
        self
    }

    pub fn pixel_dimensions(mut self, width: u32, height: u32) -> Self {
        self.pixel_dimensions = Some((width, height));
        self
    }

    pub fn image_dimensions(mut self, width: u32, height: u32) -> Self {
        self.image_dimensions = Some((width, height));
        self
    }

    pub fn gps(mut self, latitude: f64, longitude: f64) -> Self {
        self.gps = Some((latitude, longitude));
        self
    }

    pub fn thumbnail(mut self, jpeg: Vec<u8>) -> Self {
        self.thumbnail = Some(jpeg);
        self
    }

    /// Encode as a little-endian TIFF block
    pub fn tiff(&self) -> Vec<u8> {
        let mut ifd0 = Ifd { fields: Vec::new() };
        if let Some((w, h)) = self.image_dimensions {
            ifd0.fields.push(Field::long(TAG_IMAGE_WIDTH, w));
            ifd0.fields.push(Field::long(TAG_IMAGE_LENGTH, h));
        }
        if let Some(o) = self.orientation {
            ifd0.fields.push(Field::short(TAG_ORIENTATION, o));
        }
        if let Some(dt) = &self.date_time {
            ifd0.fields.push(Field::ascii(TAG_DATE_TIME, dt));
        }

        let mut exif_ifd = Ifd { fields: Vec::new() };
        if let Some(dt) = &self.date_time_original {
            exif_ifd.fields.push(Field::ascii(TAG_DATE_TIME_ORIGINAL, dt));
        }
        if let Some(offset) = &self.offset_time_original {
            exif_ifd.fields.push(Field::ascii(TAG_OFFSET_TIME_ORIGINAL, offset));
        }
        if let Some((w, h)) = self.pixel_dimensions {
            exif_ifd.fields.push(Field::long(TAG_PIXEL_X, w));
            exif_ifd.fields.push(Field::long(TAG_PIXEL_Y, h));
        }

        let mut gps_ifd = Ifd { fields: Vec::new() };
        if let Some((lat, lon)) = self.gps {
            let lat_ref = if lat < 0.0 { "S" } else { "N" };
            let lon_ref = if lon < 0.0 { "W" } else { "E" };
            gps_ifd.fields.push(Field::ascii(TAG_GPS_LAT_REF, lat_ref));
            gps_ifd.fields.push(Field::rationals(TAG_GPS_LAT, &to_dms(lat.abs())));
            gps_ifd.fields.push(Field::ascii(TAG_GPS_LON_REF, lon_ref));
            gps_ifd.fields.push(Field::rationals(TAG_GPS_LON, &to_dms(lon.abs())));
        }

        let has_exif = !exif_ifd.fields.is_empty();
        let has_gps = !gps_ifd.fields.is_empty();
        if has_exif {
            ifd0.fields.push(Field::long(TAG_EXIF_POINTER, 0));
        }
        if has_gps {
            ifd0.fields.push(Field::long(TAG_GPS_POINTER, 0));
        }

        let mut ifd1 = self.thumbnail.as_ref().map(|thumb| Ifd {
            fields: vec![
                Field::long(TAG_THUMB_OFFSET, 0),
                Field::long(TAG_THUMB_LENGTH, thumb.len() as u32),
            ],
        });

        // Lay out: header, IFD0, Exif IFD, GPS IFD, IFD1, thumbnail bytes
        let ifd0_at = 8;
        let exif_at = ifd0_at + ifd0.encoded_len();
        let gps_at = exif_at + if has_exif { exif_ifd.encoded_len() } else { 0 };
        let ifd1_at = gps_at + if has_gps { gps_ifd.encoded_len() } else { 0 };
        let thumb_at = ifd1_at + ifd1.as_ref().map_or(0, Ifd::encoded_len);

        ifd0.set_long(TAG_EXIF_POINTER, exif_at as u32);
        ifd0.set_long(TAG_GPS_POINTER, gps_at as u32);
        if let Some(ifd1) = ifd1.as_mut() {
            ifd1.set_long(TAG_THUMB_OFFSET, thumb_at as u32);
        }

        let mut out = b"II\x2a\x00".to_vec();
        out.extend_from_slice(&(ifd0_at as u32).to_le_bytes());
        let next = if ifd1.is_some() { ifd1_at as u32 } else { 0 };
        out.extend(ifd0.encode(ifd0_at, next));
        if has_exif {
            out.extend(exif_ifd.encode(exif_at, 0));
        }
        if has_gps {
            out.extend(gps_ifd.encode(gps_at, 0));
        }
        if let Some(mut ifd1) = ifd1 {
            out.extend(ifd1.encode(ifd1_at, 0));
        }
        if let Some(thumb) = &self.thumbnail {
            out.extend_from_slice(thumb);
        }
        out
    }

    /// Insert the block as an APP1 segment right after the SOI marker of `jpeg`
    pub fn embed_in_jpeg(&self, jpeg: &[u8]) -> Vec<u8> {
        assert!(jpeg.starts_with(&[0xff, 0xd8]), "not a JPEG stream");
        let mut payload = EXIF_MARKER.to_vec();
        payload.extend(self.tiff());

        let mut out = vec![0xff, 0xd8, 0xff, 0xe1];
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend(payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// A byte soup shaped like the head of a HEIF file: an `ftyp` box, an item
    /// info entry naming the `Exif` item type, an optional `irot` box, and the
    /// EXIF item itself (marker-prefixed unless `bare`).
    pub fn heif_like(&self, rotation: Option<u8>, bare: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&24u32.to_be_bytes());
        out.extend_from_slice(b"ftypheic\x00\x00\x00\x00mif1heic");
        out.extend_from_slice(&21u32.to_be_bytes());
        out.extend_from_slice(b"infe\x02\x00\x00\x00\x00\x01\x00\x00Exif\x00");
        if let Some(angle) = rotation {
            out.extend_from_slice(&9u32.to_be_bytes());
            out.extend_from_slice(ROTATION_BOX);
            out.push(angle);
        }
        out.extend_from_slice(b"\x00\x00\x00\x00mdat");
        if bare {
            out.extend_from_slice(&[0, 0, 0, 0]);
        } else {
            out.extend_from_slice(&[0, 0, 0, 6]);
            out.extend_from_slice(EXIF_MARKER);
        }
        out.extend(self.tiff());
        out.extend_from_slice(&[0u8; 64]);
        out
    }
}

fn to_dms(value: f64) -> [(u32, u32); 3] {
    let degrees = value.trunc();
    let minutes_full = (value - degrees) * 60.0;
    let minutes = minutes_full.trunc();
    let seconds = (minutes_full - minutes) * 60.0;
    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        ((seconds * 10_000.0).round() as u32, 10_000),
    ]
}
