//! # Sharded cache statistics
//!
//! Counters are spread across [`CachePadded`] shards chosen by a per-thread
//! id, so threads recording hits on unrelated keys do not contend on one
//! cache line. Recording is wait-free with `Relaxed` ordering; a
//! [`CacheStatistics`] snapshot sums the shards and is only eventually
//! consistent with in-flight operations.
//!
//! Latencies are kept in a lossy ring buffer per shard and folded into an
//! `hdrhistogram` when a snapshot is taken.
use crossbeam::utils::CachePadded;
use hdrhistogram::Histogram;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicU64, AtomicUsize};

/// Default number of shards if not specified.
pub const DEFAULT_SHARDS: usize = 4;

/// Default capacity of each shard's latency ring buffer.
pub const DEFAULT_LATENCY_SAMPLES: usize = 256;

/// Largest latency the histogram tracks, in microseconds (one minute).
const MAX_TRACKED_LATENCY_MICROS: u64 = 60_000_000;

/// Low 48 bits of a sample hold the value, high 16 bits the lap.
const VALUE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_ID: usize = NEXT_ID.fetch_add(1, Relaxed);
}

#[inline]
fn shard_index(shards: usize) -> usize {
    THREAD_ID.with(|id| *id) & (shards - 1)
}

/// Sizing for the statistics collector of each cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    shards: usize,
    latency_samples: usize,
}

impl MetricsConfig {
    /// Both arguments are rounded up to the next power of two.
    #[inline]
    pub fn new(shards: usize, latency_samples: usize) -> Self {
        Self {
            shards: shards.max(1).next_power_of_two(),
            latency_samples: latency_samples.max(1).next_power_of_two(),
        }
    }

    #[inline]
    pub fn shards(&self) -> usize {
        self.shards
    }

    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.latency_samples
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS, DEFAULT_LATENCY_SAMPLES)
    }
}

/// Kinds of event counted per cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    Hit = 0,
    Miss = 1,
    Put = 2,
    Removal = 3,
    Expiration = 4,
}

const COUNTERS: usize = 5;

/// The statistics sink owned by a cache.
///
/// Shared by reference across every thread using the cache; all recording
/// goes through `&self`.
#[derive(Debug)]
pub struct Metrics {
    shards: Vec<CachePadded<MetricsStorage>>,
    config: MetricsConfig,
}

impl Metrics {
    pub fn new(config: MetricsConfig) -> Self {
        let shards = (0..config.shards)
            .map(|_| CachePadded::new(MetricsStorage::new(&config)))
            .collect::<Vec<_>>();

        Self { shards, config }
    }

    #[inline]
    fn shard(&self) -> &MetricsStorage {
        &self.shards[shard_index(self.config.shards)]
    }

    #[inline]
    pub fn record_hit(&self) {
        self.shard().increment(Counter::Hit);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.shard().increment(Counter::Miss);
    }

    #[inline]
    pub fn record_put(&self) {
        self.shard().increment(Counter::Put);
    }

    #[inline]
    pub fn record_removal(&self) {
        self.shard().increment(Counter::Removal);
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.shard().increment(Counter::Expiration);
    }

    /// Records an operation latency in microseconds. Zero is ignored.
    #[inline]
    pub fn record_latency(&self, micros: u64) {
        self.shard().latency_sampler.record(micros);
    }

    /// Zeroes every counter and forgets all latency samples.
    pub fn reset(&self) {
        for shard in &self.shards {
            shard.reset();
        }
    }

    /// Sums all shards into a point-in-time view.
    ///
    /// Linear in shard count and sampler capacity; meant for reporting, not
    /// for the hot path.
    pub fn snapshot(&self) -> CacheStatistics {
        let mut counts = [0u64; COUNTERS];
        let mut latency_histogram = Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_MICROS, 2)
            .expect("histogram bounds are constant and valid");

        for shard in &self.shards {
            for (total, counter) in counts.iter_mut().zip(shard.counters.iter()) {
                *total = total.saturating_add(counter.load(Relaxed));
            }
            shard.latency_sampler.write_samples(&mut latency_histogram);
        }

        CacheStatistics {
            hits: counts[Counter::Hit as usize],
            misses: counts[Counter::Miss as usize],
            puts: counts[Counter::Put as usize],
            removals: counts[Counter::Removal as usize],
            expirations: counts[Counter::Expiration as usize],
            latency_histogram,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new(MetricsConfig::default())
    }
}

/// Common latency percentiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyPercentile {
    P50,
    P90,
    P99,
    P999,
}

impl LatencyPercentile {
    fn as_quantile(&self) -> f64 {
        match self {
            Self::P50 => 0.50,
            Self::P90 => 0.90,
            Self::P99 => 0.99,
            Self::P999 => 0.999,
        }
    }
}

/// A read-only, point-in-time view of a cache's statistics.
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    hits: u64,
    misses: u64,
    puts: u64,
    removals: u64,
    expirations: u64,
    latency_histogram: Histogram<u64>,
}

impl CacheStatistics {
    /// Reads that found a live value.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Reads that found nothing, before any read-through load.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[inline]
    pub fn puts(&self) -> u64 {
        self.puts
    }

    #[inline]
    pub fn removals(&self) -> u64 {
        self.removals
    }

    /// Values dropped because their time-to-live elapsed.
    #[inline]
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// `hits / (hits + misses)`, or `0.0` when nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// `misses / (hits + misses)`, or `0.0` when nothing was read.
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Latency at `percentile`, in microseconds.
    #[inline]
    pub fn latency(&self, percentile: LatencyPercentile) -> u64 {
        self.latency_histogram
            .value_at_quantile(percentile.as_quantile())
    }
}

impl From<&Metrics> for CacheStatistics {
    fn from(metrics: &Metrics) -> Self {
        metrics.snapshot()
    }
}

/// One shard: a padded counter per [`Counter`] kind and a latency sampler.
#[derive(Debug)]
struct MetricsStorage {
    counters: [CachePadded<AtomicU64>; COUNTERS],
    latency_sampler: Sampler,
}

impl MetricsStorage {
    fn new(config: &MetricsConfig) -> Self {
        Self {
            counters: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
            latency_sampler: Sampler::new(config.latency_samples),
        }
    }

    #[inline]
    fn increment(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Relaxed);
    }

    fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Relaxed);
        }
        self.latency_sampler.reset();
    }
}

/// A wait-free, lossy ring buffer of latency samples.
///
/// Each stored word packs the lap number (high 16 bits) with the value
/// (low 48 bits). Snapshots only keep samples written during the current
/// lap or, for slots the current lap has not reached yet, the previous one;
/// anything older is stale.
#[derive(Debug)]
pub struct Sampler {
    samples: Vec<AtomicU64>,
    head: CachePadded<AtomicUsize>,
    mask: usize,
}

impl Sampler {
    /// Capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let len = capacity.max(1).next_power_of_two();
        let samples = (0..len).map(|_| AtomicU64::new(0)).collect();

        Self {
            samples,
            head: CachePadded::new(AtomicUsize::new(0)),
            mask: len - 1,
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        if value == 0 {
            return;
        }

        let head = self.head.fetch_add(1, Relaxed);
        let index = head & self.mask;
        let lap = (head / self.samples.len()) as u64 & 0xFFFF;

        self.samples[index].store((lap << 48) | (value & VALUE_MASK), Relaxed);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    fn reset(&self) {
        for sample in &self.samples {
            sample.store(0, Relaxed);
        }
        self.head.store(0, Relaxed);
    }

    pub fn write_samples(&self, histogram: &mut Histogram<u64>) {
        let head = self.head.load(Relaxed);
        let len = self.samples.len();
        let current_lap = (head / len) as u64 & 0xFFFF;
        let reached = head & self.mask;

        for (index, sample) in self.samples.iter().enumerate() {
            let packed = sample.load(Relaxed);
            let value = packed & VALUE_MASK;
            if value == 0 {
                continue;
            }

            let lap = packed >> 48;
            let fresh = lap == current_lap
                || (index >= reached && lap == current_lap.wrapping_sub(1) & 0xFFFF);

            if fresh {
                let _ = histogram.record(value.min(MAX_TRACKED_LATENCY_MICROS));
            }
        }
    }
}
