#[cfg(debug_assertions)]
use crate::invariants::debug_assert_consume_bounded;
use crate::invariants::{
    debug_assert_commit_bounded, debug_assert_offset_in_bounds, debug_assert_wrap_marker,
};
use crate::{Backoff, Reservation, RingConfig, RingMetrics, RingMetricsSnapshot};
use std::cell::UnsafeCell;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The staging ring is a byte-granular SPSC queue over a fixed storage slab.
// Positions are plain byte offsets, not monotonic sequence numbers: records
// must be handed to the consumer as contiguous spans, so the producer never
// lets a reservation straddle the end of storage. When the tail is too short
// it publishes the wrap marker (`end_of_recorded_space`) and restarts at
// offset 0.
//
// ## Position Discipline
//
// All comparisons between `producer_pos` and `consumer_pos` are strict:
// equal positions always mean "empty", never "full". The producer therefore
// only accepts a reservation when strictly MORE than the requested bytes are
// free, and it refuses to wrap onto a consumer sitting at offset 0 (doing so
// would produce the ambiguous equal-and-full state).
//
// ## Memory Ordering Protocol
//
// **Producer (reserve/commit path):**
// 1. Check `min_free_space` (UnsafeCell, producer-only) - fast path
// 2. Slow path: load `consumer_pos` with Acquire (synchronizes with the
//    consumer's Release in `consume`, making the freed bytes writable)
// 3. On wrap: store `end_of_recorded_space` with Release BEFORE storing
//    `producer_pos = 0` with Release, so a consumer that observes the
//    wrapped position also observes the marker
// 4. Write payload bytes into storage (no ordering - owned until commit)
// 5. `commit`: store advanced `producer_pos` with Release (publishes the
//    payload bytes to the consumer)
//
// **Consumer (peek/consume path):**
// 1. Load `producer_pos` with Acquire (pairs with commit's Release)
// 2. If the producer is behind us a wrap is in flight: load the marker with
//    Acquire and drain `[consumer_pos, end_of_recorded_space)` first, then
//    roll `consumer_pos` back to 0
// 3. Read payload bytes (no ordering - published by step 1)
// 4. `consume`: store advanced `consumer_pos` with Release (returns the
//    bytes to the producer)
//
// ## Single-Writer Invariants
//
// `min_free_space` is accessed through an UnsafeCell without atomics because
// it has exactly one writer and one reader: the producer. It is a cached
// LOWER BOUND on the free space, refreshed from `consumer_pos` only on the
// slow path, so the fast path costs one comparison and zero cross-core
// traffic.
//
// The single-producer side is enforced by the non-clonable `RingWriter`
// handle; the single-consumer side is a contract with the drain thread that
// owns `peek`/`consume` (see `Registry`).
//
// =============================================================================

/// Cache-aligned wrapper that keeps producer and consumer state on separate
/// cache lines (128 bytes covers adjacent-line prefetching on x86).
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Per-thread staging ring: a circular FIFO byte queue that buffers encoded
/// records between one producer thread and the single drain thread.
#[repr(C)]
pub struct StagingBuffer {
    // === PRODUCER HOT ===
    /// Offset where the producer will place new bytes. Read by the consumer.
    producer_pos: CacheAligned<AtomicUsize>,
    /// Producer's cached lower bound on contiguous free bytes.
    ///
    /// Only the producer reads or writes this; see the protocol notes above.
    min_free_space: UnsafeCell<usize>,
    /// End of valid data for the consumer, published by the producer on a
    /// wrap. Only meaningful while `producer_pos < consumer_pos`.
    end_of_recorded_space: AtomicUsize,

    // === CONSUMER HOT ===
    /// Offset of the next unread byte. Read by the producer's slow path.
    consumer_pos: CacheAligned<AtomicUsize>,

    // === COLD STATE ===
    /// Set when the owning producer thread is gone; the drain frees the
    /// ring once it is also empty.
    retired: AtomicBool,
    metrics: RingMetrics,
    id: u32,
    capacity: usize,

    // === STORAGE ===
    storage: Box<[UnsafeCell<u8>]>,
}

// SAFETY: StagingBuffer is Send + Sync because:
// - producer_pos / consumer_pos / end_of_recorded_space are atomics with the
//   release/acquire pairing documented above
// - min_free_space is only touched by the single producer (RingWriter is not
//   Clone, so there is exactly one)
// - storage bytes are only written between reserve and commit (producer
//   exclusive) and only read between peek and consume (consumer exclusive),
//   with commit's Release / peek's Acquire ordering the handoff
unsafe impl Send for StagingBuffer {}
unsafe impl Sync for StagingBuffer {}

impl StagingBuffer {
    pub(crate) fn new(config: RingConfig, id: u32) -> Self {
        let capacity = config.capacity();
        let mut storage = Vec::with_capacity(capacity);
        storage.resize_with(capacity, || UnsafeCell::new(0));

        Self {
            producer_pos: CacheAligned::new(AtomicUsize::new(0)),
            min_free_space: UnsafeCell::new(capacity),
            end_of_recorded_space: AtomicUsize::new(capacity),
            consumer_pos: CacheAligned::new(AtomicUsize::new(0)),
            retired: AtomicBool::new(false),
            metrics: RingMetrics::new(),
            id,
            capacity,
            storage: storage.into_boxed_slice(),
        }
    }

    /// Registry-assigned identifier, unique for the life of the process.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true when no committed bytes are pending.
    ///
    /// Strict position discipline makes this exact: equal offsets can only
    /// mean an empty ring, never a full one.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer_pos.load(Ordering::Acquire) == self.consumer_pos.load(Ordering::Acquire)
    }

    /// True once the producer thread is gone and everything it committed has
    /// been drained; the registry may then drop the ring.
    #[inline]
    pub fn can_reclaim(&self) -> bool {
        self.retired.load(Ordering::Acquire) && self.is_empty()
    }

    /// Whether the owning producer handle has been dropped.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn mark_retired(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Snapshot of this ring's counters.
    pub fn metrics(&self) -> RingMetricsSnapshot {
        self.metrics.snapshot()
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    #[inline]
    fn min_free(&self) -> usize {
        // SAFETY: min_free_space has a single writer and a single reader,
        // both the producer thread (see protocol notes above).
        unsafe { *self.min_free_space.get() }
    }

    #[inline]
    fn set_min_free(&self, free: usize) {
        // SAFETY: as above; only the producer calls this.
        unsafe { *self.min_free_space.get() = free }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API (reached through RingWriter)
    // ---------------------------------------------------------------------

    /// Reserve `nbytes` of contiguous space, waiting for the consumer if the
    /// ring is full. The reservation is invisible to the consumer until
    /// [`Reservation::commit`].
    ///
    /// # Panics
    ///
    /// Panics if `nbytes >= capacity`; a record that large can never fit
    /// because one byte of slack always separates the two positions.
    pub(crate) fn reserve(&self, nbytes: usize) -> Reservation<'_> {
        assert!(
            nbytes < self.capacity,
            "record of {} bytes cannot fit a ring of {} bytes",
            nbytes,
            self.capacity
        );
        self.metrics.add_reservation();

        // Fast in-line path: strictly less, so a commit of nbytes still
        // leaves the positions unequal.
        if nbytes < self.min_free() {
            let pos = self.producer_pos.load(Ordering::Relaxed);
            // SAFETY: [pos, pos + nbytes) is unpublished free space wholly
            // inside storage: min_free_space lower-bounds the contiguous
            // free bytes at pos.
            let ptr = unsafe { self.data_ptr().add(pos) };
            return Reservation::new(self, ptr, nbytes);
        }

        match self.reserve_internal(nbytes, true) {
            Some(ptr) => Reservation::new(self, ptr, nbytes),
            // reserve_internal only reports exhaustion when non-blocking
            None => unreachable!("blocking reserve returned without space"),
        }
    }

    /// Non-blocking variant of [`reserve`](Self::reserve): returns `None`
    /// instead of waiting when the ring is full.
    pub(crate) fn try_reserve(&self, nbytes: usize) -> Option<Reservation<'_>> {
        assert!(
            nbytes < self.capacity,
            "record of {} bytes cannot fit a ring of {} bytes",
            nbytes,
            self.capacity
        );
        self.metrics.add_reservation();

        if nbytes < self.min_free() {
            let pos = self.producer_pos.load(Ordering::Relaxed);
            // SAFETY: as in `reserve`.
            let ptr = unsafe { self.data_ptr().add(pos) };
            return Some(Reservation::new(self, ptr, nbytes));
        }

        self.reserve_internal(nbytes, false)
            .map(|ptr| Reservation::new(self, ptr, nbytes))
    }

    /// Slow path: refresh the free-space bound from the consumer position,
    /// wrapping to offset 0 when the storage tail is too short.
    ///
    /// All remaining-space checks are strict (`>` not `>=`): letting the
    /// positions touch would make a completely full ring indistinguishable
    /// from a completely empty one.
    fn reserve_internal(&self, nbytes: usize, blocking: bool) -> Option<*mut u8> {
        let mut backoff = Backoff::new();

        while self.min_free() <= nbytes {
            // A consistent snapshot: the consumer may advance concurrently,
            // which only ever grows the real free space beyond this bound.
            let cached_consumer = self.consumer_pos.load(Ordering::Acquire);
            let pos = self.producer_pos.load(Ordering::Relaxed);

            if cached_consumer <= pos {
                // Free region is the storage tail.
                self.set_min_free(self.capacity - pos);
                if self.min_free() > nbytes {
                    break;
                }

                // Not enough space at the end of storage: publish the wrap
                // marker and restart at offset 0. The marker must be
                // visible before the wrapped producer position is.
                self.end_of_recorded_space.store(pos, Ordering::Release);

                // Never wrap onto a consumer at offset 0 - that would leave
                // the positions equal with the ring full, not empty.
                if cached_consumer != 0 {
                    self.producer_pos.store(0, Ordering::Release);
                    self.set_min_free(cached_consumer);
                }
            } else {
                // Consumer is ahead in storage order after a wrap.
                self.set_min_free(cached_consumer - pos);
            }

            #[cfg(feature = "discard-on-full")]
            {
                if self.min_free() <= nbytes {
                    // Benchmark-only overflow policy: restart the producer
                    // at offset 0 instead of waiting. Loses (and may
                    // corrupt) unconsumed entries.
                    self.producer_pos.store(0, Ordering::Release);
                    self.set_min_free(self.capacity);
                    self.metrics.add_discarded();
                    continue;
                }
            }

            if self.min_free() <= nbytes {
                if !blocking {
                    return None;
                }
                self.metrics.add_blocked_wait();
                backoff.snooze();
            }
        }

        let pos = self.producer_pos.load(Ordering::Relaxed);
        debug_assert_offset_in_bounds!("producer", pos + nbytes, self.capacity);
        // SAFETY: the loop above established min_free_space > nbytes, i.e.
        // [pos, pos + nbytes) is free and inside storage.
        Some(unsafe { self.data_ptr().add(pos) })
    }

    /// Publish `nbytes` starting at the last reservation. Called by
    /// [`Reservation::commit`].
    pub(crate) fn commit(&self, nbytes: usize) {
        let min_free = self.min_free();
        debug_assert_commit_bounded!(nbytes, min_free);

        let pos = self.producer_pos.load(Ordering::Relaxed);
        debug_assert_offset_in_bounds!("producer", pos + nbytes, self.capacity);

        self.set_min_free(min_free - nbytes);
        // Release: the payload bytes written into the reservation become
        // visible before the advanced position does.
        self.producer_pos.store(pos + nbytes, Ordering::Release);
        self.metrics.add_bytes_committed(nbytes as u64);
    }

    // ---------------------------------------------------------------------
    // CONSUMER API (single drain thread)
    // ---------------------------------------------------------------------

    /// Returns the contiguous span of committed, unread bytes (possibly
    /// empty).
    ///
    /// During a wrap the span ends at the recorded tail marker; once that
    /// region is drained the consumer rolls over to offset 0 and the next
    /// call returns the wrapped data.
    pub fn peek(&self) -> &[u8] {
        // Pairs with commit's Release store.
        let cached_producer = self.producer_pos.load(Ordering::Acquire);
        let mut consumer = self.consumer_pos.load(Ordering::Relaxed);

        if cached_producer < consumer {
            // Wrap in flight: drain up to the marker first.
            let end_of_recorded = self.end_of_recorded_space.load(Ordering::Acquire);
            debug_assert_wrap_marker!(end_of_recorded, consumer);

            let readable = end_of_recorded - consumer;
            if readable > 0 {
                // SAFETY: [consumer, end_of_recorded) was committed before
                // the producer wrapped; the Acquire loads above order those
                // writes before this read.
                return unsafe {
                    slice::from_raw_parts(self.data_ptr().add(consumer) as *const u8, readable)
                };
            }

            // Tail fully drained: roll over. Release returns the tail bytes
            // to the producer.
            self.consumer_pos.store(0, Ordering::Release);
            consumer = 0;
        }

        let readable = cached_producer - consumer;
        // SAFETY: [consumer, cached_producer) holds committed bytes,
        // published by the Acquire load of producer_pos.
        unsafe { slice::from_raw_parts(self.data_ptr().add(consumer) as *const u8, readable) }
    }

    /// Release the first `nbytes` of the last [`peek`](Self::peek) back to
    /// the producer. `nbytes` must not exceed what `peek` returned.
    pub fn consume(&self, nbytes: usize) {
        let consumer = self.consumer_pos.load(Ordering::Relaxed);
        #[cfg(debug_assertions)]
        {
            let producer = self.producer_pos.load(Ordering::Acquire);
            let limit = if producer < consumer {
                self.end_of_recorded_space.load(Ordering::Acquire)
            } else {
                producer
            };
            debug_assert_consume_bounded!(nbytes, limit - consumer);
        }

        // Release: the consumed bytes become reusable before the producer
        // observes the advanced position.
        self.consumer_pos.store(consumer + nbytes, Ordering::Release);
        self.metrics.add_bytes_consumed(nbytes as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, RingConfig};
    use std::sync::Arc;

    fn ring_pair() -> (crate::RingWriter, Arc<StagingBuffer>) {
        let registry = Registry::new(RingConfig::with_capacity(4096));
        let writer = registry.register().unwrap();
        let mut live = Vec::new();
        registry.snapshot_into(&mut live);
        (writer, live.remove(0))
    }

    fn write_bytes(writer: &crate::RingWriter, bytes: &[u8]) {
        let mut r = writer.reserve(bytes.len());
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), r.as_mut_ptr(), bytes.len());
        }
        r.commit();
    }

    #[test]
    fn test_basic_reserve_commit_peek_consume() {
        let (writer, ring) = ring_pair();

        write_bytes(&writer, b"hello");
        write_bytes(&writer, b"world");

        let readable = ring.peek();
        assert_eq!(readable, b"helloworld");
        ring.consume(5);
        assert_eq!(ring.peek(), b"world");
        ring.consume(5);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_uncommitted_reservation_is_invisible() {
        let (writer, ring) = ring_pair();

        {
            let _r = writer.reserve(64);
            // dropped without commit
        }
        assert!(ring.is_empty());
        assert_eq!(ring.peek().len(), 0);
    }

    #[test]
    fn test_wrap_preserves_order_and_content() {
        let (writer, ring) = ring_pair();
        let record = [0xABu8; 1000];

        // Walk the producer around the ring several times.
        for round in 0..20u8 {
            let mut payload = record;
            payload[0] = round;

            write_bytes(&writer, &payload);
            let readable = ring.peek();
            assert_eq!(readable.len(), 1000, "round {round}");
            assert_eq!(readable[0], round);
            assert!(readable[1..].iter().all(|&b| b == 0xAB));
            ring.consume(1000);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_ring_try_reserve_fails() {
        let (writer, ring) = ring_pair();

        // Capacity 4096, strict discipline: at most 4095 bytes outstanding.
        assert!(writer.try_reserve(4095).is_some_and(|r| {
            r.commit();
            true
        }));
        assert!(writer.try_reserve(1).is_none());

        ring.consume(ring.peek().len());
        assert!(writer.try_reserve(1).is_some());
    }

    #[test]
    fn test_wrap_refused_when_consumer_at_origin() {
        let (writer, ring) = ring_pair();

        // Fill most of the tail, drain nothing: the consumer still sits at
        // offset 0, so the producer must refuse to wrap.
        let mut r = writer.reserve(3000);
        unsafe { std::ptr::write_bytes(r.as_mut_ptr(), 1, 3000) };
        r.commit();

        assert!(writer.try_reserve(2000).is_none());

        // Once the consumer moves off the origin the wrap can proceed.
        ring.peek();
        ring.consume(3000);
        let r = writer.try_reserve(2000).unwrap();
        r.commit();
        assert_eq!(ring.peek().len(), 2000);
    }

    #[test]
    fn test_reclaim_after_retire_and_drain() {
        let (writer, ring) = ring_pair();

        write_bytes(&writer, b"tail");
        drop(writer);

        assert!(ring.is_retired());
        assert!(!ring.can_reclaim(), "undrained ring must not be reclaimed");

        ring.consume(ring.peek().len());
        assert!(ring.can_reclaim());
    }

    #[test]
    fn test_metrics_track_bytes() {
        let (writer, ring) = ring_pair();

        write_bytes(&writer, &[7u8; 128]);
        ring.consume(ring.peek().len());

        let m = ring.metrics();
        assert_eq!(m.reservations, 1);
        assert_eq!(m.bytes_committed, 128);
        assert_eq!(m.bytes_consumed, 128);
    }

    #[test]
    #[should_panic]
    fn test_oversized_reservation_panics() {
        let (writer, _ring) = ring_pair();
        let _ = writer.reserve(4096);
    }

    #[test]
    fn test_spsc_threads_exactly_once() {
        let (writer, ring) = ring_pair();
        const RECORDS: usize = 50_000;
        const LEN: usize = 24;

        let producer = std::thread::spawn(move || {
            let mut pattern = [0u8; LEN];
            for i in 0..RECORDS {
                for (k, b) in pattern.iter_mut().enumerate() {
                    *b = (i + k) as u8;
                }
                let mut r = writer.reserve(LEN);
                unsafe {
                    std::ptr::copy_nonoverlapping(pattern.as_ptr(), r.as_mut_ptr(), LEN);
                }
                r.commit();
            }
        });

        let mut seen = 0usize;
        while seen < RECORDS {
            let readable = ring.peek();
            let complete = readable.len() / LEN * LEN;
            if complete == 0 {
                std::hint::spin_loop();
                continue;
            }
            for chunk in readable[..complete].chunks_exact(LEN) {
                for (k, &b) in chunk.iter().enumerate() {
                    assert_eq!(b, (seen + k) as u8, "corrupt byte in record {seen}");
                }
                seen += 1;
            }
            ring.consume(complete);
        }

        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
