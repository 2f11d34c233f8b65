//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Reporting swaps the periodic counters; totals are monotonic.
//!
//! NOTE: All atomics use Relaxed ordering - these are statistical counters
//! only. Do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for frame latency (microseconds)
/// Buckets: ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, ≤256000, >256000
const BUCKET_BOUNDS: [u64; 10] = [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000, 512000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    frames_total: AtomicU64,
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in microseconds (reset on report)
    frame_latency_sum_us: AtomicU64,
    frame_latency_max_us: AtomicU64,
    frame_latency_buckets: [AtomicU64; NUM_BUCKETS],
    detections_total: AtomicU64,
    tracks_created_total: AtomicU64,
    tracks_expired_total: AtomicU64,
    speeding_events_total: AtomicU64,
    damage_events_total: AtomicU64,
    commands_sent_total: AtomicU64,
    commands_suppressed_total: AtomicU64,
    /// Commands computed while no actuator link was available, or failed to write
    commands_dropped_total: AtomicU64,
    ocr_enqueued_total: AtomicU64,
    ocr_dropped_total: AtomicU64,
    ocr_completed_total: AtomicU64,
    remote_push_ok_total: AtomicU64,
    remote_push_failed_total: AtomicU64,
    /// Bump health in whole units (gauge)
    health: AtomicU64,
    /// Live tracks after the latest frame (gauge)
    active_tracks: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            frame_latency_sum_us: AtomicU64::new(0),
            frame_latency_max_us: AtomicU64::new(0),
            frame_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detections_total: AtomicU64::new(0),
            tracks_created_total: AtomicU64::new(0),
            tracks_expired_total: AtomicU64::new(0),
            speeding_events_total: AtomicU64::new(0),
            damage_events_total: AtomicU64::new(0),
            commands_sent_total: AtomicU64::new(0),
            commands_suppressed_total: AtomicU64::new(0),
            commands_dropped_total: AtomicU64::new(0),
            ocr_enqueued_total: AtomicU64::new(0),
            ocr_dropped_total: AtomicU64::new(0),
            ocr_completed_total: AtomicU64::new(0),
            remote_push_ok_total: AtomicU64::new(0),
            remote_push_failed_total: AtomicU64::new(0),
            health: AtomicU64::new(0),
            active_tracks: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a processed frame with its loop latency
    #[inline]
    pub fn record_frame(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.frame_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.frame_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.frame_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_detections(&self, count: usize) {
        self.detections_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_track_created(&self) {
        self.tracks_created_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_track_expired(&self) {
        self.tracks_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_speeding_event(&self) {
        self.speeding_events_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_damage_event(&self) {
        self.damage_events_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_sent(&self) {
        self.commands_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_suppressed(&self) {
        self.commands_suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_dropped(&self) {
        self.commands_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ocr_enqueued(&self) {
        self.ocr_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ocr_dropped(&self) {
        self.ocr_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ocr_completed(&self) {
        self.ocr_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_remote_push(&self, ok: bool) {
        if ok {
            self.remote_push_ok_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.remote_push_failed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_health(&self, health_units: u32) {
        self.health.store(health_units as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_active_tracks(&self, count: usize) {
        self.active_tracks.store(count as u64, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn tracks_created_total(&self) -> u64 {
        self.tracks_created_total.load(Ordering::Relaxed)
    }

    pub fn tracks_expired_total(&self) -> u64 {
        self.tracks_expired_total.load(Ordering::Relaxed)
    }

    pub fn commands_sent_total(&self) -> u64 {
        self.commands_sent_total.load(Ordering::Relaxed)
    }

    pub fn commands_dropped_total(&self) -> u64 {
        self.commands_dropped_total.load(Ordering::Relaxed)
    }

    pub fn ocr_dropped_total(&self) -> u64 {
        self.ocr_dropped_total.load(Ordering::Relaxed)
    }

    pub fn ocr_completed_total(&self) -> u64 {
        self.ocr_completed_total.load(Ordering::Relaxed)
    }

    pub fn remote_push_failed_total(&self) -> u64 {
        self.remote_push_failed_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Summary without resetting anything (scrapes must not disturb the periodic log)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let (frames_count, latency_sum, max_latency, lat_buckets) = if reset {
            (
                self.frames_since_report.swap(0, Ordering::Relaxed),
                self.frame_latency_sum_us.swap(0, Ordering::Relaxed),
                self.frame_latency_max_us.swap(0, Ordering::Relaxed),
                swap_buckets(&self.frame_latency_buckets),
            )
        } else {
            (
                self.frames_since_report.load(Ordering::Relaxed),
                self.frame_latency_sum_us.load(Ordering::Relaxed),
                self.frame_latency_max_us.load(Ordering::Relaxed),
                load_buckets(&self.frame_latency_buckets),
            )
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            detections_total: self.detections_total.load(Ordering::Relaxed),
            tracks_created_total: self.tracks_created_total.load(Ordering::Relaxed),
            tracks_expired_total: self.tracks_expired_total.load(Ordering::Relaxed),
            speeding_events_total: self.speeding_events_total.load(Ordering::Relaxed),
            damage_events_total: self.damage_events_total.load(Ordering::Relaxed),
            commands_sent_total: self.commands_sent_total.load(Ordering::Relaxed),
            commands_suppressed_total: self.commands_suppressed_total.load(Ordering::Relaxed),
            commands_dropped_total: self.commands_dropped_total.load(Ordering::Relaxed),
            ocr_enqueued_total: self.ocr_enqueued_total.load(Ordering::Relaxed),
            ocr_dropped_total: self.ocr_dropped_total.load(Ordering::Relaxed),
            ocr_completed_total: self.ocr_completed_total.load(Ordering::Relaxed),
            remote_push_ok_total: self.remote_push_ok_total.load(Ordering::Relaxed),
            remote_push_failed_total: self.remote_push_failed_total.load(Ordering::Relaxed),
            health: self.health.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the Prometheus endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Frame latency histogram buckets since the last report
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub detections_total: u64,
    pub tracks_created_total: u64,
    pub tracks_expired_total: u64,
    pub speeding_events_total: u64,
    pub damage_events_total: u64,
    pub commands_sent_total: u64,
    pub commands_suppressed_total: u64,
    pub commands_dropped_total: u64,
    pub ocr_enqueued_total: u64,
    pub ocr_dropped_total: u64,
    pub ocr_completed_total: u64,
    pub remote_push_ok_total: u64,
    pub remote_push_failed_total: u64,
    pub health: u64,
    pub active_tracks: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            fps = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p50_us = %self.lat_p50_us,
            p99_us = %self.lat_p99_us,
            active_tracks = %self.active_tracks,
            tracks_created = %self.tracks_created_total,
            speeding = %self.speeding_events_total,
            damage = %self.damage_events_total,
            health = %self.health,
            cmds = %self.commands_sent_total,
            ocr_dropped = %self.ocr_dropped_total,
            remote_failed = %self.remote_push_failed_total,
            "metrics"
        );
    }
}
