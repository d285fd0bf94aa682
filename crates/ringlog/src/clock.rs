use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds since the Unix epoch.
///
/// Entry timestamps double as the cross-thread ordering key on the drain
/// side, so they come from the realtime clock rather than a monotonic one.
#[inline]
pub(crate) fn now_nanos() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as u64,
        // Clock before the epoch: clamp rather than poison the ordering.
        Err(_) => 0,
    }
}
