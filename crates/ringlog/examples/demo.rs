//! Minimal end-to-end demo: a few statements, a level change, a sync.
//!
//! Run with `cargo run --example demo`, then inspect `demo.log`.

use ringlog::{Level, LoggerConfig};

fn main() {
    ringlog::init(LoggerConfig::default().with_log_file("demo.log")).expect("backend");
    ringlog::preallocate();

    ringlog::notice!("%s", "hello world");
    ringlog::notice!("pi to three places is %.3f", 3.141592657);
    ringlog::warn!("%d of %d buffers in use (%.1f%%)", 3, 8, 37.5);

    ringlog::set_level(Level::Notice);
    ringlog::debug!("%s", "this one is filtered out");

    ringlog::sync();
    println!("wrote demo.log");
}
