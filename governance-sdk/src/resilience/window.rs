//! Sliding time window of call statistics
//!
//! A fixed-size ring of time-bucketed success/failure counters. Counters
//! are lock-free atomic increments; only bucket rotation takes a lock, and
//! a full-ring reset and a pointer advance are guarded separately so they
//! never serialize unrelated paths. Some under/over-count during a reset
//! race is tolerated; the window is statistics, not a ledger.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Fixed width of one bucket
pub const BUCKET_WIDTH_MS: u64 = 1_000;

/// Minimum number of buckets in a window
pub const MIN_BUCKETS: usize = 2;

/// One fixed-width time slot of call statistics
#[derive(Debug)]
struct Bucket {
    /// Start of the covered interval; the end is start + BUCKET_WIDTH_MS
    window_start: AtomicU64,

    /// Calls recorded in this slot
    total: AtomicU64,

    /// Failures recorded in this slot
    failed: AtomicU64,
}

impl Bucket {
    fn new(window_start: u64) -> Self {
        Self {
            window_start: AtomicU64::new(window_start),
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn reset(&self, window_start: u64) {
        self.window_start.store(window_start, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }

    fn window_end(&self) -> u64 {
        self.window_start.load(Ordering::SeqCst) + BUCKET_WIDTH_MS
    }

    fn covers(&self, now_ms: u64) -> bool {
        let start = self.window_start.load(Ordering::SeqCst);
        now_ms >= start && now_ms < start + BUCKET_WIDTH_MS
    }
}

/// Fixed-size ring of time buckets
#[derive(Debug)]
pub struct SlidingWindow {
    buckets: Vec<Bucket>,

    /// Index of the bucket covering the most recent time slot
    current: AtomicUsize,

    /// Guards whole-ring resets after long idle gaps
    reset_lock: Mutex<()>,

    /// Guards bucket-by-bucket pointer advancement
    advance_lock: Mutex<()>,
}

impl SlidingWindow {
    /// Create a window of `bucket_count` buckets anchored at `now_ms`.
    ///
    /// Fewer than two buckets cannot form a sliding window; the count is
    /// raised to the minimum.
    pub fn new(bucket_count: usize, now_ms: u64) -> Self {
        let count = bucket_count.max(MIN_BUCKETS);
        let buckets = (0..count)
            .map(|i| Bucket::new(now_ms + i as u64 * BUCKET_WIDTH_MS))
            .collect();
        Self {
            buckets,
            current: AtomicUsize::new(0),
            reset_lock: Mutex::new(()),
            advance_lock: Mutex::new(()),
        }
    }

    /// Number of buckets in the ring
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total time span the ring can represent
    pub fn span_ms(&self) -> u64 {
        self.buckets.len() as u64 * BUCKET_WIDTH_MS
    }

    /// Record one call attempt at `now_ms`
    pub fn record_call(&self, now_ms: u64) {
        self.bucket_for(now_ms).total.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one failed call at `now_ms`
    pub fn record_failure(&self, now_ms: u64) {
        self.bucket_for(now_ms)
            .failed
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Calls across all buckets in the ring
    pub fn total_requests(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| b.total.load(Ordering::SeqCst))
            .sum()
    }

    /// Failures across all buckets in the ring
    pub fn failed_requests(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| b.failed.load(Ordering::SeqCst))
            .sum()
    }

    /// Error rate over the whole ring, as a percentage.
    ///
    /// 0 when no calls were recorded; clamped to 100 when failures
    /// transiently exceed totals under a concurrent reset.
    pub fn error_rate(&self) -> u64 {
        let total = self.total_requests();
        if total == 0 {
            return 0;
        }
        (self.failed_requests() * 100 / total).min(100)
    }

    /// Locate the bucket covering `now_ms`, rotating the ring as needed
    fn bucket_for(&self, now_ms: u64) -> &Bucket {
        loop {
            let index = self.current.load(Ordering::SeqCst);
            let bucket = &self.buckets[index];
            if bucket.covers(now_ms) {
                return bucket;
            }

            let end = bucket.window_end();
            if now_ms < end {
                // Clock went backwards past the current slot; count against
                // the current bucket rather than rotating the ring
                return bucket;
            }

            if now_ms - end >= self.span_ms() {
                self.reset_all(now_ms);
            } else {
                self.advance(now_ms);
            }
        }
    }

    /// Whole-ring reset anchored at `now_ms`, after the ring has gone
    /// stale by more than its own span
    fn reset_all(&self, now_ms: u64) {
        let _guard = self.reset_lock.lock();
        let current = &self.buckets[self.current.load(Ordering::SeqCst)];
        // Another caller may have reset while this one waited on the lock
        if now_ms >= current.window_end() && now_ms - current.window_end() >= self.span_ms() {
            for (i, bucket) in self.buckets.iter().enumerate() {
                bucket.reset(now_ms + i as u64 * BUCKET_WIDTH_MS);
            }
            self.current.store(0, Ordering::SeqCst);
        }
    }

    /// Advance the pointer bucket-by-bucket until it covers `now_ms`,
    /// resetting each skipped slot's boundaries
    fn advance(&self, now_ms: u64) {
        let _guard = self.advance_lock.lock();
        let mut steps = 0;
        loop {
            let index = self.current.load(Ordering::SeqCst);
            let bucket = &self.buckets[index];
            if bucket.covers(now_ms) || now_ms < bucket.window_end() {
                return;
            }
            // Bounded: after a full lap the ring would have been reset instead
            if steps > self.buckets.len() {
                return;
            }
            let next = (index + 1) % self.buckets.len();
            self.buckets[next].reset(bucket.window_end());
            self.current.store(next, Ordering::SeqCst);
            steps += 1;
        }
    }
}
