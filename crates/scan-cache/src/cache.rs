//! In-memory listing cache keyed by directory path and validated by mod-time

use crate::scanner::Entry;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// One cached listing plus its capture-date overlay.
///
/// The overlay only grows and the completion flag only goes from false to
/// true. Readers never see the overlay before it is complete.
#[derive(Debug)]
pub struct CachedScan {
    entries: Vec<Entry>,
    dir_mod_time: SystemTime,
    dates: Mutex<HashMap<String, DateTime<Utc>>>,
    complete: AtomicBool,
}

impl CachedScan {
    pub fn new(entries: Vec<Entry>, dir_mod_time: SystemTime) -> Self {
        Self {
            entries,
            dir_mod_time,
            dates: Mutex::new(HashMap::new()),
            complete: AtomicBool::new(false),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn dir_mod_time(&self) -> SystemTime {
        self.dir_mod_time
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn set_date(&self, name: impl Into<String>, date: DateTime<Utc>) {
        self.dates.lock().insert(name.into(), date);
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    /// Copy of the overlay, `None` until the resolver has finished
    pub fn dates_snapshot(&self) -> Option<HashMap<String, DateTime<Utc>>> {
        self.is_complete().then(|| self.dates.lock().clone())
    }

    /// A private copy of the entries with capture dates applied once the
    /// overlay is complete; before that the mod-time dates are returned.
    pub fn entries_with_overlay(&self) -> Vec<Entry> {
        let mut entries = self.entries.clone();
        if let Some(dates) = self.dates_snapshot() {
            for entry in entries.iter_mut().filter(|e| e.is_image()) {
                if let Some(date) = dates.get(&entry.name) {
                    entry.date = *date;
                }
            }
        }
        entries
    }
}

/// Directory path → cached listing, safe to share across request handlers
#[derive(Debug, Default)]
pub struct ScanCache {
    scans: RwLock<HashMap<PathBuf, Arc<CachedScan>>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached scan if it was taken at `current_mod_time`; a stale
    /// entry is evicted.
    pub fn get(&self, dir: &Path, current_mod_time: SystemTime) -> Option<Arc<CachedScan>> {
        let stale = {
            let scans = self.scans.read();
            let scan = scans.get(dir)?;
            if scan.dir_mod_time == current_mod_time {
                return Some(Arc::clone(scan));
            }
            Arc::clone(scan)
        };

        let mut scans = self.scans.write();
        // Another request may already have replaced the stale scan
        if scans.get(dir).is_some_and(|current| Arc::ptr_eq(current, &stale)) {
            scans.remove(dir);
            debug!(dir = %dir.display(), "evicted stale listing");
        }
        None
    }

    /// Store a fresh listing, replacing any previous one, and return it
    pub fn put(&self, dir: &Path, entries: Vec<Entry>, dir_mod_time: SystemTime) -> Arc<CachedScan> {
        let scan = Arc::new(CachedScan::new(entries, dir_mod_time));
        self.scans.write().insert(dir.to_path_buf(), Arc::clone(&scan));
        info!(dir = %dir.display(), entries = scan.entries.len(), "cached listing");
        scan
    }

    pub fn invalidate(&self, dir: &Path) {
        if self.scans.write().remove(dir).is_some() {
            debug!(dir = %dir.display(), "invalidated listing");
        }
    }

    pub fn len(&self) -> usize {
        self.scans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::EntryKind;
    use chrono::TimeZone;
    use std::time::Duration;

    fn image(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            kind: EntryKind::Image,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            size: 1,
        }
    }

    #[test]
    fn test_hit_returns_same_instance() {
        let cache = ScanCache::new();
        let dir = Path::new("/photos");
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        let stored = cache.put(dir, vec![image("a.jpg")], t1);
        let hit = cache.get(dir, t1).expect("cache hit");
        assert!(Arc::ptr_eq(&stored, &hit));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mod_time_change_evicts() {
        let cache = ScanCache::new();
        let dir = Path::new("/photos");
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t2 = t1 + Duration::from_secs(1);

        cache.put(dir, vec![image("a.jpg")], t1);
        assert!(cache.get(dir, t2).is_none());
        assert!(cache.is_empty());
        assert!(cache.get(dir, t1).is_none());
    }

    #[test]
    fn test_put_replaces() {
        let cache = ScanCache::new();
        let dir = Path::new("/photos");
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t2 = t1 + Duration::from_secs(5);

        let first = cache.put(dir, vec![image("a.jpg")], t1);
        let second = cache.put(dir, vec![image("a.jpg"), image("b.jpg")], t2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.get(dir, t2).unwrap().entries().len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = ScanCache::new();
        let dir = Path::new("/photos");
        let t1 = SystemTime::UNIX_EPOCH;
        cache.put(dir, Vec::new(), t1);
        cache.invalidate(dir);
        assert!(cache.get(dir, t1).is_none());
        cache.invalidate(dir);
    }

    #[test]
    fn test_overlay_hidden_until_complete() {
        let scan = CachedScan::new(vec![image("a.jpg"), image("b.jpg")], SystemTime::UNIX_EPOCH);
        let capture = Utc.with_ymd_and_hms(2019, 7, 4, 9, 0, 0).unwrap();

        scan.set_date("a.jpg", capture);
        assert!(!scan.is_complete());
        assert!(scan.dates_snapshot().is_none());
        assert_ne!(scan.entries_with_overlay()[0].date, capture);

        scan.mark_complete();
        let entries = scan.entries_with_overlay();
        assert_eq!(entries[0].date, capture);
        assert_ne!(entries[1].date, capture);
        // The cached slice itself is never rewritten
        assert_ne!(scan.entries()[0].date, capture);
        assert_eq!(scan.dates_snapshot().unwrap().len(), 1);
    }
}
