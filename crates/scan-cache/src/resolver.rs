//! Background capture-date resolution for a freshly cached listing

use crate::cache::CachedScan;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Source of capture dates, typically an EXIF reader
pub trait DateSource: Send + Sync {
    /// Capture date of the file at `path`, `None` when unknown or unreadable
    fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>>;
}

impl<F> DateSource for F
where
    F: Fn(&Path) -> Option<DateTime<Utc>> + Send + Sync,
{
    fn capture_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        self(path)
    }
}

/// Resolve capture dates for every image of `scan` on the blocking pool.
///
/// A date is recorded only when it differs from the entry's mod-time date.
/// The scan is marked complete once the pass is over, whatever the per-entry
/// outcomes. Callers may drop the handle; it is returned for tests.
pub fn spawn_date_resolution(
    dir: PathBuf,
    scan: Arc<CachedScan>,
    source: Arc<dyn DateSource>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || resolve_dates(&dir, &scan, source.as_ref()))
}

/// Marks the scan complete when dropped, so a panicking source still ends the pass
struct CompletionGuard<'a>(&'a CachedScan);

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_complete();
    }
}

/// The synchronous body of [`spawn_date_resolution`]
pub fn resolve_dates(dir: &Path, scan: &CachedScan, source: &dyn DateSource) {
    let guard = CompletionGuard(scan);
    let mut resolved = 0usize;
    for entry in scan.entries().iter().filter(|e| e.is_image()) {
        match source.capture_date(&dir.join(&entry.name)) {
            Some(date) if date != entry.date => {
                scan.set_date(entry.name.clone(), date);
                resolved += 1;
            }
            Some(_) => {}
            None => debug!(name = %entry.name, "no capture date"),
        }
    }
    drop(guard);
    info!(dir = %dir.display(), resolved, "capture dates resolved");
}
