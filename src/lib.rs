//! Unterlumen media core
//!
//! Browsable views of a local photo collection: fast directory listings with
//! capture dates resolved in the background, orientation-correct thumbnails,
//! and on-the-fly HEIF conversion. The HTTP layer and the CLI both drive the
//! [`PhotoService`] facade.

pub mod config;
pub mod service;

pub use config::ServiceConfig;
pub use service::{DatesReady, ExifDateSource, FileInfo, Listing, PhotoService, WarmSummary, Warning};

pub use media_meta::{ExifData, MetadataReader};
pub use scan_cache::{Entry, EntryKind, SortField, SortOrder};
pub use thumbnail_cache::{DecoderCapability, ImageBytes};
