//! Engine telemetry.
//!
//! Lock-free atomic counters recording what the engine has done since the
//! registry was created, with point-in-time snapshots for display:
//!
//! ```text
//! Engine paths ─────► EngineMetrics ─────► MetricsSnapshot ─────► Views
//!                     (atomic counters)    (point-in-time copy)   (CLI)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free engine counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    packages_opened: AtomicU64,
    objects_loaded: AtomicU64,
    bytes_decompressed: AtomicU64,
    bytes_compressed: AtomicU64,
    import_cache_hits: AtomicU64,
    resolve_misses: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_opened(&self) {
        self.packages_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_loaded(&self) {
        self.objects_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_decompressed(&self, bytes: u64) {
        self.bytes_decompressed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_compressed(&self, bytes: u64) {
        self.bytes_compressed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn import_cache_hit(&self) {
        self.import_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolve_miss(&self) {
        self.resolve_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packages_opened: self.packages_opened.load(Ordering::Relaxed),
            objects_loaded: self.objects_loaded.load(Ordering::Relaxed),
            bytes_decompressed: self.bytes_decompressed.load(Ordering::Relaxed),
            bytes_compressed: self.bytes_compressed.load(Ordering::Relaxed),
            import_cache_hits: self.import_cache_hits.load(Ordering::Relaxed),
            resolve_misses: self.resolve_misses.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packages_opened: u64,
    pub objects_loaded: u64,
    pub bytes_decompressed: u64,
    pub bytes_compressed: u64,
    pub import_cache_hits: u64,
    pub resolve_misses: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packages, {} objects, {} bytes decompressed, {} bytes compressed, {} import cache hits, {} resolve misses",
            self.packages_opened,
            self.objects_loaded,
            self.bytes_decompressed,
            self.bytes_compressed,
            self.import_cache_hits,
            self.resolve_misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.package_opened();
        metrics.package_opened();
        metrics.object_loaded();
        metrics.add_bytes_decompressed(1024);
        metrics.import_cache_hit();
        metrics.resolve_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packages_opened, 2);
        assert_eq!(snapshot.objects_loaded, 1);
        assert_eq!(snapshot.bytes_decompressed, 1024);
        assert_eq!(snapshot.bytes_compressed, 0);
        assert_eq!(snapshot.import_cache_hits, 1);
        assert_eq!(snapshot.resolve_misses, 1);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = EngineMetrics::new();
        metrics.package_opened();
        let text = metrics.snapshot().to_string();
        assert!(text.contains("1 packages"));
    }
}
