use std::sync::atomic::{AtomicU64, Ordering};

/// Per-ring counters for monitoring staging behavior.
///
/// Uses atomic counters with `Relaxed` ordering since these are purely
/// statistical - no control flow depends on exact values, and eventual
/// visibility is acceptable for observability.
#[derive(Debug, Default)]
pub struct RingMetrics {
    reservations: AtomicU64,
    bytes_committed: AtomicU64,
    bytes_consumed: AtomicU64,
    blocked_waits: AtomicU64,
    discarded: AtomicU64,
}

impl RingMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Count one reservation attempt (fast or slow path).
    #[inline]
    pub(crate) fn add_reservation(&self) {
        self.reservations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes published to the consumer.
    #[inline]
    pub(crate) fn add_bytes_committed(&self, n: u64) {
        self.bytes_committed.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes released back to the producer.
    #[inline]
    pub(crate) fn add_bytes_consumed(&self, n: u64) {
        self.bytes_consumed.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one backoff round spent waiting for the consumer.
    #[inline]
    pub(crate) fn add_blocked_wait(&self) {
        self.blocked_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one discarded reservation (discard-on-full builds only).
    #[cfg(feature = "discard-on-full")]
    #[inline]
    pub(crate) fn add_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self) -> RingMetricsSnapshot {
        RingMetricsSnapshot {
            reservations: self.reservations.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            blocked_waits: self.blocked_waits.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of [`RingMetrics`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingMetricsSnapshot {
    pub reservations: u64,
    pub bytes_committed: u64,
    pub bytes_consumed: u64,
    pub blocked_waits: u64,
    pub discarded: u64,
}
