use std::sync::atomic::{AtomicU8, Ordering};

/// Severity of a log statement.
///
/// `Silent` is a threshold, not a real severity: call sites tagged with it
/// never produce output, and `set_level(Silent)` suppresses everything.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Silent = 0,
    /// The system broke a contract or a major assumption was violated.
    Error = 1,
    /// Something unexpected happened but it was transient and recoverable.
    Warn = 2,
    /// Noteworthy but not wrong.
    Notice = 3,
    /// Diagnostic detail.
    Debug = 4,
}

pub(crate) const NUM_LEVELS: u8 = 5;

impl Level {
    /// Lowercase name used in the output prefix.
    pub const fn name(self) -> &'static str {
        match self {
            Level::Silent => "silent",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Notice => "notice",
            Level::Debug => "debug",
        }
    }

    /// Convert a raw value, clamping into the valid range.
    pub const fn from_raw(raw: u8) -> Level {
        match raw {
            0 => Level::Silent,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Notice,
            _ => Level::Debug,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silent" => Ok(Level::Silent),
            "error" => Ok(Level::Error),
            "warn" => Ok(Level::Warn),
            "notice" => Ok(Level::Notice),
            "debug" => Ok(Level::Debug),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// A string that names no known level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level {0:?}")]
pub struct ParseLevelError(String);

// Everything enabled by default; matches the traditional "debug build logs
// everything until told otherwise" behavior.
static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

/// Set the minimum severity that produces output. Statements with a higher
/// (less severe) level are dropped before touching the ring.
pub fn set_level(level: Level) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The current minimum severity.
pub fn get_level() -> Level {
    Level::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Hot-path gate: one relaxed load, no branches beyond the comparison.
#[doc(hidden)]
#[inline]
pub fn enabled(site_level: Level) -> bool {
    let severity = site_level as u8;
    severity != 0 && severity <= CURRENT_LEVEL.load(Ordering::Relaxed)
}
