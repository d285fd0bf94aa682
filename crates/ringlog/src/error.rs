//! Error types for the logging facade.
//!
//! Only control operations can fail; the logging hot path has no return
//! value and reports nothing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from backend control operations (`init`, `set_log_file`).
#[derive(Debug, Error)]
pub enum LogError {
    /// `init` was called after the backend already started.
    #[error("logging backend is already running")]
    AlreadyInitialized,

    /// The requested log file could not be opened or created. The previous
    /// output file, if any, stays in effect.
    #[error("failed to open log file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The drain thread could not be spawned.
    #[error("failed to spawn drain thread: {0}")]
    SpawnDrain(#[source] io::Error),
}
