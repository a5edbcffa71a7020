//! Windowed per-second counters.
//!
//! A fixed ring of buckets, one second each, updated with plain atomic adds.
//! Buckets are reclaimed lazily: the first writer to touch a bucket whose
//! epoch is stale wins a CAS on the epoch and zeroes the counters. A recorder
//! racing that reset at a second boundary can lose an increment; the data is
//! observational, threshold checks do not depend on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const BUCKET_COUNT: usize = 16;

/// Longest span (in seconds) a totals query can cover.
pub const MAX_SPAN_SECS: u64 = BUCKET_COUNT as u64;

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct Bucket {
    epoch: AtomicU64,
    attempts: AtomicU64,
    pass: AtomicU64,
    block: AtomicU64,
    done: AtomicU64,
    error: AtomicU64,
    rt_sum_ms: AtomicU64,
}

impl Bucket {
    fn reset_counters(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.pass.store(0, Ordering::Relaxed);
        self.block.store(0, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.error.store(0, Ordering::Relaxed);
        self.rt_sum_ms.store(0, Ordering::Relaxed);
    }
}

/// Aggregated counters over a span of recent seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowTotals {
    pub attempts: u64,
    pub pass: u64,
    pub block: u64,
    pub done: u64,
    pub error: u64,
    pub rt_sum_ms: u64,
}

impl WindowTotals {
    /// Errors per completed call, in 0.0..=1.0. Zero when nothing completed.
    pub fn error_ratio(&self) -> f64 {
        if self.done == 0 {
            0.0
        } else {
            self.error as f64 / self.done as f64
        }
    }

    pub fn avg_rt_ms(&self) -> f64 {
        if self.done == 0 {
            0.0
        } else {
            self.rt_sum_ms as f64 / self.done as f64
        }
    }
}

/// Ring of per-second counter buckets. All methods take the current epoch
/// second explicitly so tests drive the clock by hand.
#[derive(Debug)]
pub struct MetricsWindow {
    buckets: [Bucket; BUCKET_COUNT],
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self { buckets: Default::default() }
    }
}

impl MetricsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, now_sec: u64) -> &Bucket {
        let bucket = &self.buckets[(now_sec % MAX_SPAN_SECS) as usize];
        let epoch = bucket.epoch.load(Ordering::Acquire);
        if epoch != now_sec
            && bucket
                .epoch
                .compare_exchange(epoch, now_sec, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            bucket.reset_counters();
        }
        bucket
    }

    /// Counts one entry attempt and returns how many this second, including
    /// this one. Distinct callers in the same second see distinct values.
    pub fn record_attempt(&self, now_sec: u64) -> u64 {
        self.bucket(now_sec).attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_pass(&self, now_sec: u64) {
        self.bucket(now_sec).pass.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self, now_sec: u64) {
        self.bucket(now_sec).block.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed (admitted, then exited) call.
    pub fn record_done(&self, now_sec: u64, erred: bool, rt_ms: u64) {
        let bucket = self.bucket(now_sec);
        bucket.done.fetch_add(1, Ordering::Relaxed);
        if erred {
            bucket.error.fetch_add(1, Ordering::Relaxed);
        }
        bucket.rt_sum_ms.fetch_add(rt_ms, Ordering::Relaxed);
    }

    /// Sums the buckets covering `(now_sec - span_secs, now_sec]`. Spans are
    /// clamped to [`MAX_SPAN_SECS`].
    pub fn totals(&self, now_sec: u64, span_secs: u64) -> WindowTotals {
        let span = span_secs.clamp(1, MAX_SPAN_SECS);
        let mut totals = WindowTotals::default();
        for bucket in &self.buckets {
            let epoch = bucket.epoch.load(Ordering::Acquire);
            if epoch <= now_sec && now_sec - epoch < span {
                totals.attempts += bucket.attempts.load(Ordering::Relaxed);
                totals.pass += bucket.pass.load(Ordering::Relaxed);
                totals.block += bucket.block.load(Ordering::Relaxed);
                totals.done += bucket.done.load(Ordering::Relaxed);
                totals.error += bucket.error.load(Ordering::Relaxed);
                totals.rt_sum_ms += bucket.rt_sum_ms.load(Ordering::Relaxed);
            }
        }
        totals
    }
}
