use crate::{Reservation, RingConfig, RingMetricsSnapshot, StagingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Error types for registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has been closed for new producers (shutdown underway).
    #[error("registry is closed")]
    Closed,
}

struct Inner {
    buffers: Vec<Arc<StagingBuffer>>,
    next_id: u32,
}

/// Owns every live staging ring and coordinates their lifecycle.
///
/// Producer threads call [`register`] once (at first use) and keep the
/// returned [`RingWriter`]; the single consumer thread snapshots the live
/// list, drains rings, and reclaims the ones whose producers are gone. The
/// internal mutex is only taken at thread birth and death and for brief
/// list snapshots - never on the logging hot path.
///
/// [`register`]: Registry::register
pub struct Registry {
    inner: Mutex<Inner>,
    /// Parking spot for the consumer when every ring is empty.
    parker: Mutex<()>,
    work_available: Condvar,
    closed: AtomicBool,
    config: RingConfig,
}

impl Registry {
    /// Creates an empty registry; rings are allocated lazily per producer.
    pub fn new(config: RingConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers: Vec::new(),
                next_id: 0,
            }),
            parker: Mutex::new(()),
            work_available: Condvar::new(),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Allocate and register a staging ring for the calling thread.
    ///
    /// The ring stays in the registry after the writer is dropped, until
    /// the consumer has drained it and observes [`StagingBuffer::can_reclaim`].
    pub fn register(&self) -> Result<RingWriter, RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }

        let ring = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = inner.next_id;
            inner.next_id += 1;
            let ring = Arc::new(StagingBuffer::new(self.config, id));
            inner.buffers.push(Arc::clone(&ring));
            ring
        };

        // Wake the consumer so a parked drain notices the newcomer.
        self.notify();

        Ok(RingWriter { ring })
    }

    /// Copy the live ring list into `out` (cleared first). Consumer-side.
    pub fn snapshot_into(&self, out: &mut Vec<Arc<StagingBuffer>>) {
        out.clear();
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        out.extend(inner.buffers.iter().cloned());
    }

    /// Drop every ring whose producer is gone and whose bytes are drained.
    /// Returns how many were reclaimed.
    pub fn reclaim_retired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.buffers.len();
        inner.buffers.retain(|ring| !ring.can_reclaim());
        before - inner.buffers.len()
    }

    /// True when every live ring has no pending bytes.
    pub fn all_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.buffers.iter().all(|ring| ring.is_empty())
    }

    /// Number of rings currently registered (drained-but-live included).
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .buffers
            .len()
    }

    /// Refuse any further registrations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Registry::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Park the consumer for up to `timeout` or until [`notify`] is called.
    ///
    /// Spurious wakeups are fine: the caller re-scans the rings regardless.
    ///
    /// [`notify`]: Registry::notify
    pub fn park(&self, timeout: Duration) {
        let guard = self.parker.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .work_available
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wake a parked consumer.
    pub fn notify(&self) {
        self.work_available.notify_all();
    }
}

/// Producer handle for one thread's staging ring.
///
/// Deliberately not `Clone`: a second handle would break the
/// single-producer invariant that makes the ring lock-free. Dropping the
/// writer retires the ring; the consumer reclaims it once drained.
pub struct RingWriter {
    ring: Arc<StagingBuffer>,
}

impl RingWriter {
    /// The underlying ring's registry-assigned id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.ring.id()
    }

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Reserve contiguous space, waiting for the consumer if the ring is
    /// full. See [`StagingBuffer`] for the full discipline.
    #[inline]
    pub fn reserve(&self, nbytes: usize) -> Reservation<'_> {
        self.ring.reserve(nbytes)
    }

    /// Non-blocking reserve; `None` when the ring is full.
    #[inline]
    pub fn try_reserve(&self, nbytes: usize) -> Option<Reservation<'_>> {
        self.ring.try_reserve(nbytes)
    }

    /// Snapshot of the ring's counters.
    pub fn metrics(&self) -> RingMetricsSnapshot {
        self.ring.metrics()
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        // Do not deregister: committed bytes may still be pending. The
        // consumer drops the ring once it is drained.
        self.ring.mark_retired();
    }
}
