//! Atomic counters for connection metrics
//!
//! Lock-free counters that can be safely updated from any manager task.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Lifecycle
    pub connect_attempts: AtomicU64,
    pub connections_opened: AtomicU64,
    pub disconnects: AtomicU64,
    pub reconnects_scheduled: AtomicU64,
    pub retries_exhausted: AtomicU64,

    // Failure detection
    pub connect_timeouts: AtomicU64,
    pub stale_closes: AtomicU64,
    pub errors_total: AtomicU64,

    // Frames
    pub frames_received: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub malformed_frames: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            retries_exhausted: AtomicU64::new(0),
            connect_timeouts: AtomicU64::new(0),
            stale_closes: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_timeout(&self) {
        self.connect_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stale_close(&self) {
        self.stale_closes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            connect_timeouts: self.connect_timeouts.load(Ordering::Relaxed),
            stale_closes: self.stale_closes.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub connections_opened: u64,
    pub disconnects: u64,
    pub reconnects_scheduled: u64,
    pub retries_exhausted: u64,
    pub connect_timeouts: u64,
    pub stale_closes: u64,
    pub errors_total: u64,
    pub frames_received: u64,
    pub frames_delivered: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub malformed_frames: u64,
}

impl MetricsSnapshot {
    /// Named values, in a stable order, for exporters
    pub fn counters(&self) -> [(&'static str, u64); 13] {
        [
            ("execstream_connect_attempts_total", self.connect_attempts),
            ("execstream_connections_opened_total", self.connections_opened),
            ("execstream_disconnects_total", self.disconnects),
            ("execstream_reconnects_scheduled_total", self.reconnects_scheduled),
            ("execstream_retries_exhausted_total", self.retries_exhausted),
            ("execstream_connect_timeouts_total", self.connect_timeouts),
            ("execstream_stale_closes_total", self.stale_closes),
            ("execstream_errors_total", self.errors_total),
            ("execstream_frames_received_total", self.frames_received),
            ("execstream_frames_delivered_total", self.frames_delivered),
            ("execstream_frames_sent_total", self.frames_sent),
            ("execstream_frames_dropped_total", self.frames_dropped),
            ("execstream_malformed_frames_total", self.malformed_frames),
        ]
    }
}
