//! EXIF and container metadata reader for Unterlumen
//!
//! Reads capture dates, orientation, dimensions, GPS and the full tag set from
//! standard image containers, and digs the EXIF/TIFF block out of HEIF-family
//! files whose metadata the standard decoder cannot reach.
//!
//! # Features
//!
//! - **Standard decode**: JPEG, TIFF, PNG, WebP and HEIF via `kamadak-exif`
//! - **Embedded fallback**: bounded prefix scan for `Exif\0\0` markers and bare
//!   TIFF headers, validated before decoding
//! - **Container rotation**: `irot` box angle mapped to EXIF orientation codes
//! - **Graceful absence**: missing metadata is `Ok(None)`, orientation defaults to 1

pub mod container;
pub mod error;
pub mod reader;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use error::MetaError;
pub use reader::{EmbeddedThumbnail, ExifData, MetadataReader};

use serde::{Deserialize, Serialize};

/// How much of a file the byte scanners are allowed to look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderLimits {
    /// Prefix searched for embedded EXIF blocks; covers the HEIF `meta` box
    pub exif_scan_limit: u64,
    /// Prefix searched for the `irot` rotation box
    pub rotation_scan_limit: u64,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            exif_scan_limit: 1024 * 1024, // 1MB
            rotation_scan_limit: 16 * 1024, // 16KB
        }
    }
}
