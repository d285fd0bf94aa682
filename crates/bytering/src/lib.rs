//! bytering - Per-Thread SPSC Staging Byte Rings
//!
//! A staging ring is a fixed-capacity byte queue with exactly one producer
//! thread and one consumer thread. Producers reserve a contiguous span of
//! bytes, fill it in place, and commit; the consumer peeks at committed
//! spans, processes them, and releases the bytes back to the producer.
//!
//! The design decouples many logging (or telemetry) threads from a single
//! background drain: every producer thread owns a dedicated ring, so the
//! hot path never contends with another thread, never allocates, and never
//! enters the kernel. All cross-ring coordination lives in the [`Registry`],
//! whose mutex is touched only when a thread starts or stops logging.
//!
//! # Key Features
//!
//! - Contiguous reservations: a committed span never straddles the wrap
//!   point, so consumers can decode records in place
//! - Cache-aligned producer/consumer state (no false sharing)
//! - Adaptive backoff when the ring is full (spin, then yield)
//! - Retire-on-drop producer handles; the consumer reclaims drained rings
//!
//! # Example
//!
//! ```
//! use bytering::{Registry, RingConfig};
//!
//! let registry = Registry::new(RingConfig::default());
//! let writer = registry.register().unwrap();
//!
//! let mut reservation = writer.reserve(4);
//! unsafe {
//!     std::ptr::copy_nonoverlapping(b"ping".as_ptr(), reservation.as_mut_ptr(), 4);
//! }
//! reservation.commit();
//!
//! let mut live = Vec::new();
//! registry.snapshot_into(&mut live);
//! let readable = live[0].peek();
//! assert_eq!(readable, b"ping");
//! live[0].consume(readable.len());
//! ```

mod backoff;
mod config;
mod invariants;
mod metrics;
mod registry;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use config::RingConfig;
pub use metrics::{RingMetrics, RingMetricsSnapshot};
pub use registry::{Registry, RegistryError, RingWriter};
pub use reservation::Reservation;
pub use ring::StagingBuffer;
