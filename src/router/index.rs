//! Segment-count bucketed route index.
//!
//! Entries are partitioned by `min(segment_count, bucket_cap)`. A lookup
//! computes the request's bucket the same way and scans only that bucket, in
//! registration order, returning the first pattern that matches. Lookup cost
//! therefore depends on how many routes share the request's path shape, never
//! on the total number of registered routes.
//!
//! Paths with `bucket_cap` or more segments share the last bucket; the exact
//! segment-count check in [`PathPattern::matches`](super::PathPattern::matches)
//! keeps them apart.

use std::sync::Arc;

use super::core::RouteEntry;
use super::pattern::count_segments;

/// Default bucket cap. All paths with five or more segments share one bucket.
pub const DEFAULT_BUCKET_CAP: usize = 5;

/// Insertion-ordered buckets of route entries for a single HTTP method.
#[derive(Debug, Clone)]
pub struct RouteIndex {
    buckets: Vec<Vec<Arc<RouteEntry>>>,
}

impl Default for RouteIndex {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_CAP)
    }
}

impl RouteIndex {
    /// Create an empty index with buckets `0..=bucket_cap`.
    ///
    /// A cap of zero collapses everything into a single bucket.
    #[must_use]
    pub fn new(bucket_cap: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); bucket_cap + 1],
        }
    }

    #[inline]
    fn cap(&self) -> usize {
        self.buckets.len() - 1
    }

    /// Bucket slot for a given segment count.
    #[inline]
    #[must_use]
    pub fn bucket_for(&self, segment_count: usize) -> usize {
        segment_count.min(self.cap())
    }

    /// Append an entry to its bucket. Registration order is preserved.
    pub fn add(&mut self, entry: Arc<RouteEntry>) {
        let slot = self.bucket_for(entry.pattern.segment_count());
        self.buckets[slot].push(entry);
    }

    /// First-registered entry in the request's bucket whose pattern matches.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Arc<RouteEntry>> {
        let slot = self.bucket_for(count_segments(path));
        self.buckets[slot].iter().find(|e| e.pattern.matches(path))
    }

    /// Entries a lookup for `path` would scan.
    #[must_use]
    pub fn candidates(&self, path: &str) -> &[Arc<RouteEntry>] {
        &self.buckets[self.bucket_for(count_segments(path))]
    }

    /// Total number of entries across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    /// All entries, bucket by bucket, each bucket in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteEntry>> {
        self.buckets.iter().flatten()
    }
}
