//! Miri-compatible tests for detecting undefined behavior.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! These exercise the unsafe paths of the staging ring - raw reservation
//! pointers, in-place peeks, the wrap roll-over, and reclamation - with
//! small rings so Miri finishes quickly.

use bytering::{Registry, RingConfig, RingWriter, StagingBuffer};
use std::sync::Arc;

fn ring_pair() -> (RingWriter, Arc<StagingBuffer>) {
    let registry = Registry::new(RingConfig::with_capacity(4096));
    let writer = registry.register().unwrap();
    let mut live = Vec::new();
    registry.snapshot_into(&mut live);
    (writer, live.remove(0))
}

fn push(writer: &RingWriter, bytes: &[u8]) {
    let mut r = writer.reserve(bytes.len());
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), r.as_mut_ptr(), bytes.len());
    }
    r.commit();
}

/// Basic reserve/fill/commit/peek/consume cycle.
#[test]
fn miri_basic_cycle() {
    let (writer, ring) = ring_pair();

    push(&writer, b"abc");
    push(&writer, b"defg");

    assert_eq!(ring.peek(), b"abcdefg");
    ring.consume(3);
    assert_eq!(ring.peek(), b"defg");
    ring.consume(4);
    assert!(ring.is_empty());
}

/// Wrap roll-over with live data on both sides of the marker.
#[test]
fn miri_wrap_roll_over() {
    let (writer, ring) = ring_pair();

    // Leave a short tail, drain it, then force the wrap.
    push(&writer, &[1u8; 3000]);
    assert_eq!(ring.peek().len(), 3000);
    ring.consume(3000);

    push(&writer, &[2u8; 2000]); // tail is 1096 bytes: must wrap to offset 0
    let readable = ring.peek();
    assert_eq!(readable.len(), 2000);
    assert!(readable.iter().all(|&b| b == 2));
    ring.consume(2000);
    assert!(ring.is_empty());
}

/// A reservation dropped without commit publishes nothing and the space is
/// handed out again.
#[test]
fn miri_abandoned_reservation() {
    let (writer, ring) = ring_pair();

    {
        let mut r = writer.reserve(16);
        unsafe { std::ptr::write_bytes(r.as_mut_ptr(), 0xEE, 16) };
        // dropped, not committed
    }
    assert!(ring.is_empty());

    push(&writer, b"after");
    assert_eq!(ring.peek(), b"after");
    ring.consume(5);
}

/// Partial writes through write_at land at the right offsets.
#[test]
fn miri_write_at_offsets() {
    let (writer, ring) = ring_pair();

    let mut r = writer.reserve(8);
    r.write_at(0, &[0xAA; 4]);
    r.write_at(4, &[0xBB; 4]);
    r.commit();

    let readable = ring.peek();
    assert_eq!(&readable[..4], &[0xAA; 4]);
    assert_eq!(&readable[4..], &[0xBB; 4]);
    ring.consume(8);
}

/// Retire-then-reclaim drops the ring storage exactly once.
#[test]
fn miri_reclaim() {
    let registry = Registry::new(RingConfig::with_capacity(4096));
    let writer = registry.register().unwrap();
    push(&writer, b"last words");
    drop(writer);

    let mut live = Vec::new();
    registry.snapshot_into(&mut live);
    let readable = live[0].peek();
    assert_eq!(readable, b"last words");
    live[0].consume(readable.len());
    drop(live);

    assert_eq!(registry.reclaim_retired(), 1);
    assert_eq!(registry.live_count(), 0);
}

/// Concurrent SPSC traffic under Miri's data-race detector (small volume).
#[test]
fn miri_spsc_threads() {
    let (writer, ring) = ring_pair();

    let producer = std::thread::spawn(move || {
        for i in 0..64u8 {
            push(&writer, &[i; 7]);
        }
    });

    let mut seen = 0usize;
    while seen < 64 * 7 {
        let readable = ring.peek();
        if readable.is_empty() {
            std::thread::yield_now();
            continue;
        }
        for &b in readable {
            assert_eq!(b as usize, (seen / 7) % 256);
            seen += 1;
        }
        let n = readable.len();
        ring.consume(n);
    }
    producer.join().unwrap();
}
