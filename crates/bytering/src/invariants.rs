//! Debug assertion macros for staging-ring invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero overhead
//! on release hot paths. Each macro names the discipline it guards so a
//! failure message points straight at the broken protocol step.

/// Assert that a byte offset stays within the ring's storage.
///
/// Both positions and the wrap marker are plain offsets into the backing
/// storage; nothing may ever point past the end.
macro_rules! debug_assert_offset_in_bounds {
    ($name:literal, $offset:expr, $capacity:expr) => {
        debug_assert!(
            $offset <= $capacity,
            "{} offset {} escapes ring of {} bytes",
            $name,
            $offset,
            $capacity
        )
    };
}

/// Assert that a commit stays strictly inside the reserved slack.
///
/// The reserve fast path requires `nbytes < min_free_space`; a commit of
/// exactly the free space would let the producer collide with the consumer
/// position, which must always mean "empty".
macro_rules! debug_assert_commit_bounded {
    ($nbytes:expr, $min_free:expr) => {
        debug_assert!(
            $nbytes < $min_free,
            "committing {} bytes with only {} bytes of reserved slack",
            $nbytes,
            $min_free
        )
    };
}

/// Assert that the consumer releases no more than it could have read.
macro_rules! debug_assert_consume_bounded {
    ($nbytes:expr, $readable:expr) => {
        debug_assert!(
            $nbytes <= $readable,
            "consuming {} bytes but only {} are readable",
            $nbytes,
            $readable
        )
    };
}

/// Assert that the wrap marker never falls behind the consumer.
///
/// While a wrap is in flight the consumer drains `[consumer_pos,
/// end_of_recorded_space)`; a marker behind the consumer would make that
/// range negative.
macro_rules! debug_assert_wrap_marker {
    ($end_of_recorded:expr, $consumer:expr) => {
        debug_assert!(
            $end_of_recorded >= $consumer,
            "wrap marker {} behind consumer position {}",
            $end_of_recorded,
            $consumer
        )
    };
}

pub(crate) use debug_assert_commit_bounded;
pub(crate) use debug_assert_consume_bounded;
pub(crate) use debug_assert_offset_in_bounds;
pub(crate) use debug_assert_wrap_marker;
