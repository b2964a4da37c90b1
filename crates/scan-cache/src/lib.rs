//! Directory listings for Unterlumen
//!
//! Scans a directory without touching file contents, caches the result against
//! the directory's mod-time, and resolves capture dates in the background so a
//! listing is served immediately and refined once the dates are known.

pub mod cache;
pub mod error;
pub mod resolver;
pub mod scanner;

pub use cache::{CachedScan, ScanCache};
pub use error::ScanError;
pub use resolver::{spawn_date_resolution, DateSource};
pub use scanner::{is_heif, is_supported_image, scan_directory, sort_entries, Entry, EntryKind, SortField, SortOrder};
