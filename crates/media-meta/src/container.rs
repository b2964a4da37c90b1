//! Byte-level scanning of ISOBMFF (HEIF/HEIC/HIF) containers
//!
//! HEIF files keep their EXIF block inside the container's `meta` box and their
//! rotation in an `irot` property box. Rather than walking the full box tree,
//! these functions scan a bounded prefix of the file for the markers directly.
//! Everything here is pure over `&[u8]` so it can be exercised against crafted
//! fixtures without touching the filesystem.

/// Marker preceding an EXIF TIFF block in JPEG APP1 segments and most HEIF files
pub const EXIF_MARKER: &[u8] = b"Exif\x00\x00";

/// Little-endian TIFF header
pub const TIFF_LE: &[u8] = b"II\x2a\x00";

/// Big-endian TIFF header
pub const TIFF_BE: &[u8] = b"MM\x00\x2a";

/// Box type of the HEIF image rotation property
pub const ROTATION_BOX: &[u8] = b"irot";

/// An `irot` box is always 4 bytes size + 4 bytes type + 1 byte payload
const ROTATION_BOX_SIZE: u32 = 9;

/// Smallest span that can hold a TIFF header plus the first IFD offset
const MIN_TIFF_LEN: usize = 8;

/// Iterate over every (possibly overlapping) offset where `needle` occurs
pub fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let windows = if needle.is_empty() {
        None
    } else {
        Some(haystack.windows(needle.len()))
    };
    windows
        .into_iter()
        .flatten()
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(idx, _)| idx)
}

/// Check whether `data` starts with a TIFF byte-order header
pub fn is_tiff_header(data: &[u8]) -> bool {
    data.starts_with(TIFF_LE) || data.starts_with(TIFF_BE)
}

/// Offsets of TIFF blocks announced by an `Exif\0\0` marker.
///
/// HEIF item-info boxes also carry the string `Exif` as an item type name, so a
/// match only counts when a TIFF header follows the marker immediately.
pub fn marker_tiff_offsets(buf: &[u8]) -> Vec<usize> {
    find_all(buf, EXIF_MARKER)
        .map(|idx| idx + EXIF_MARKER.len())
        .filter(|&start| start + MIN_TIFF_LEN <= buf.len() && is_tiff_header(&buf[start..]))
        .collect()
}

/// Offsets of bare TIFF headers, little-endian ones first.
///
/// Some HEIF writers store the EXIF item with a 4-byte offset prefix and no
/// `Exif\0\0` marker at all.
pub fn bare_tiff_offsets(buf: &[u8]) -> Vec<usize> {
    [TIFF_LE, TIFF_BE]
        .into_iter()
        .flat_map(|header| find_all(buf, header))
        .filter(|&start| start + MIN_TIFF_LEN <= buf.len())
        .collect()
}

/// All candidate TIFF start offsets in decode order: marker-validated matches
/// first, then bare headers that were not already covered.
pub fn exif_tiff_offsets(buf: &[u8]) -> Vec<usize> {
    let mut offsets = marker_tiff_offsets(buf);
    let marked = offsets.len();
    for start in bare_tiff_offsets(buf) {
        if !offsets[..marked].contains(&start) {
            offsets.push(start);
        }
    }
    offsets
}

/// Find the first well-formed `irot` box and return its angle
/// (anti-clockwise quarter turns, 0..=3).
pub fn find_rotation_angle(buf: &[u8]) -> Option<u8> {
    find_all(buf, ROTATION_BOX)
        .filter(|&tag_at| tag_at >= 4 && tag_at + 5 <= buf.len())
        .find_map(|tag_at| {
            let size_bytes: [u8; 4] = buf[tag_at - 4..tag_at].try_into().ok()?;
            (u32::from_be_bytes(size_bytes) == ROTATION_BOX_SIZE).then(|| buf[tag_at + 4] & 0x03)
        })
}

/// Map an `irot` angle onto the EXIF orientation numbering (1..=8)
pub fn rotation_to_orientation(angle: u8) -> u16 {
    match angle & 0x03 {
        0 => 1,
        // 90° anti-clockwise is displayed by rotating 270° clockwise
        1 => 8,
        2 => 3,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiff_stub(header: &[u8]) -> Vec<u8> {
        let mut out = header.to_vec();
        out.extend_from_slice(&[8, 0, 0, 0, 0, 0]);
        out
    }

    #[test]
    fn test_find_all_overlapping() {
        let hits: Vec<usize> = find_all(b"aaaa", b"aa").collect();
        assert_eq!(hits, vec![0, 1, 2]);
        assert_eq!(find_all(b"abc", b"").count(), 0);
        assert_eq!(find_all(b"ab", b"abc").count(), 0);
    }

    #[test]
    fn test_tiff_header_detection() {
        assert!(is_tiff_header(b"II*\x00rest"));
        assert!(is_tiff_header(b"MM\x00*rest"));
        assert!(!is_tiff_header(b"II\x00*"));
        assert!(!is_tiff_header(b"MM"));
    }

    #[test]
    fn test_marker_requires_tiff_header() {
        // An infe box naming the item type "Exif" followed by unrelated bytes
        let mut buf = b"....infe\x00\x00\x00\x00Exif\x00\x00mime".to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        assert!(marker_tiff_offsets(&buf).is_empty());

        let real_at = buf.len() + EXIF_MARKER.len();
        buf.extend_from_slice(EXIF_MARKER);
        buf.extend_from_slice(&tiff_stub(TIFF_BE));
        assert_eq!(marker_tiff_offsets(&buf), vec![real_at]);
    }

    #[test]
    fn test_marker_at_end_of_buffer_is_ignored() {
        let mut buf = vec![0u8; 10];
        buf.extend_from_slice(EXIF_MARKER);
        buf.extend_from_slice(b"II*\x00");
        assert!(marker_tiff_offsets(&buf).is_empty());
    }

    #[test]
    fn test_bare_headers_little_endian_first() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&tiff_stub(TIFF_BE));
        buf.extend_from_slice(&tiff_stub(TIFF_LE));
        let offsets = bare_tiff_offsets(&buf);
        assert_eq!(offsets, vec![14, 4]);
    }

    #[test]
    fn test_combined_offsets_skip_duplicates() {
        let mut buf = vec![0u8; 3];
        buf.extend_from_slice(EXIF_MARKER);
        buf.extend_from_slice(&tiff_stub(TIFF_LE));
        buf.extend_from_slice(&tiff_stub(TIFF_BE));
        let offsets = exif_tiff_offsets(&buf);
        assert_eq!(offsets, vec![9, 19]);
    }

    #[test]
    fn test_rotation_box() {
        let mut buf = vec![0u8; 32];
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(ROTATION_BOX);
        buf.push(0x03);
        assert_eq!(find_rotation_angle(&buf), Some(3));
        assert_eq!(rotation_to_orientation(3), 6);
    }

    #[test]
    fn test_rotation_box_with_wrong_size_is_skipped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&12u32.to_be_bytes());
        buf.extend_from_slice(ROTATION_BOX);
        buf.push(0x01);
        assert_eq!(find_rotation_angle(&buf), None);

        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(ROTATION_BOX);
        buf.push(0x05);
        // Only the low two bits carry the angle
        assert_eq!(find_rotation_angle(&buf), Some(1));
    }

    #[test]
    fn test_truncated_rotation_box() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        buf.extend_from_slice(ROTATION_BOX);
        assert_eq!(find_rotation_angle(&buf), None);
        assert_eq!(find_rotation_angle(b"irot\x01"), None);
    }

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(rotation_to_orientation(0), 1);
        assert_eq!(rotation_to_orientation(1), 8);
        assert_eq!(rotation_to_orientation(2), 3);
        assert_eq!(rotation_to_orientation(3), 6);
    }
}
