//! ringlog - Low-Latency Asynchronous printf-Style Logging
//!
//! A logging call copies raw argument bytes plus a small header into the
//! calling thread's staging ring and returns: no allocation, no
//! formatting, no syscall, no contention with other threads. A single
//! background thread merges all rings by timestamp, formats entries into
//! text, and writes them to a file.
//!
//! Format strings must be literals: each call site's conversions are
//! analyzed at compile time (see [`log!`]), so malformed specifiers, `%n`,
//! and argument-count mismatches fail the build instead of the log line.
//!
//! # Example
//!
//! ```ignore
//! use ringlog::{Level, LoggerConfig};
//!
//! ringlog::init(LoggerConfig::default().with_log_file("app.log")).unwrap();
//! ringlog::preallocate();
//!
//! ringlog::notice!("%s connected from %s:%d", "carol", "10.0.0.7", 4411);
//! ringlog::debug!("retry %d of %d in %.3f s", 2, 5, 0.25);
//!
//! ringlog::sync(); // block until everything above is on disk
//! ```
//!
//! Each output line is
//! `[YYYY-MM-DD-HH:MM:SS.NNNNNNNNN][level][function][line]<message>`.
//!
//! Supported conversions: flags `- + space # 0`; width (including `*`);
//! precision (including `.N` and `.*`); length modifiers `h hh l ll j z t
//! L` (accepted and inferred from the argument's actual width); terminals
//! `d i u o x X f F e E g G a A c s p %`.

mod backend;
mod clock;
mod config;
mod encode;
mod error;
mod format;
mod level;
mod macros;
mod render;

pub use backend::{init, preallocate, set_log_file, shutdown, stats, sync, BackendStats};
pub use config::LoggerConfig;
pub use error::LogError;
pub use level::{get_level, set_level, Level, ParseLevelError};

pub use bytering::RingConfig;

/// Implementation details referenced by the `log!` macro expansion. Not
/// part of the public API.
#[doc(hidden)]
pub mod __private {
    pub use crate::backend::log_entry;
    pub use crate::encode::{fn_name_of, CallSite, EncodeCursor, LogArg, LogArgs, HEADER_SIZE};
    pub use crate::format::{analyze, count_params, param_info, ParamType};
    pub use crate::level::enabled;
    pub use core::sync::atomic::AtomicU8;
}
