//! The logging backend: one lazily-started drain thread plus the per-thread
//! producer plumbing.
//!
//! Producers interact with the backend exactly twice per log statement: a
//! relaxed stop check and a thread-local lookup of their ring writer. All
//! file handling, decoding, formatting and cross-ring ordering happens on
//! the drain thread.

use crate::clock;
use crate::config::LoggerConfig;
use crate::encode::{CallSite, EncodeCursor, EntryHeader, HEADER_SIZE};
use crate::error::LogError;
use crate::render::{DecodeError, Renderer};
use bytering::{Registry, RingWriter, StagingBuffer};
use std::cell::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Retries before a failing write drops the entry.
const WRITE_RETRIES: u32 = 64;

struct Shared {
    registry: Registry,
    out: Mutex<File>,
    stop: AtomicBool,
    /// Drain pass counter; bumped so `sync` waiters can re-check progress.
    pass: Mutex<u64>,
    pass_cv: Condvar,
    poll_interval: Duration,
    consumer_core: Option<usize>,
    dropped_writes: AtomicU64,
    decode_failures: AtomicU64,
}

pub(crate) struct Backend {
    shared: Arc<Shared>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

static BACKEND: OnceLock<Backend> = OnceLock::new();

thread_local! {
    /// The calling thread's ring writer, registered on first use and
    /// retired (not freed) when the thread exits.
    static WRITER: OnceCell<Option<RingWriter>> = const { OnceCell::new() };
}

fn open_log_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    options.open(path)
}

impl Backend {
    fn start(config: LoggerConfig) -> Result<Backend, LogError> {
        let file = open_log_file(&config.path).map_err(|source| LogError::OpenFile {
            path: config.path.clone(),
            source,
        })?;

        let shared = Arc::new(Shared {
            registry: Registry::new(config.ring),
            out: Mutex::new(file),
            stop: AtomicBool::new(false),
            pass: Mutex::new(0),
            pass_cv: Condvar::new(),
            poll_interval: config.poll_interval,
            consumer_core: config.consumer_core,
            dropped_writes: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        });

        let drain_shared = Arc::clone(&shared);
        let drain = thread::Builder::new()
            .name("ringlog-drain".into())
            .spawn(move || drain_loop(drain_shared))
            .map_err(LogError::SpawnDrain)?;

        Ok(Backend {
            shared,
            drain: Mutex::new(Some(drain)),
        })
    }

    fn stop_and_join(&self) {
        self.shared.registry.close();
        self.shared.stop.store(true, Ordering::Release);
        self.shared.registry.notify();
        let handle = self
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn backend() -> &'static Backend {
    BACKEND.get_or_init(|| match Backend::start(LoggerConfig::default()) {
        Ok(backend) => backend,
        // Matches the reference behavior of treating an unusable default
        // log file as unrecoverable at startup.
        Err(err) => panic!("ringlog: cannot start logging backend: {err}"),
    })
}

/// Start the backend with an explicit configuration.
///
/// Must run before the first log statement (or `preallocate`/`sync` call),
/// which would otherwise start the backend with `LoggerConfig::default()`.
pub fn init(config: LoggerConfig) -> Result<(), LogError> {
    if BACKEND.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let backend = Backend::start(config)?;
    match BACKEND.set(backend) {
        Ok(()) => Ok(()),
        Err(raced) => {
            // Another thread won the lazy init race; tear ours down.
            raced.stop_and_join();
            Err(LogError::AlreadyInitialized)
        }
    }
}

/// Create the calling thread's staging ring ahead of its first log
/// statement, so first-log latency matches steady state.
pub fn preallocate() {
    let be = backend();
    WRITER.with(|cell| {
        cell.get_or_init(|| be.shared.registry.register().ok());
    });
}

/// Hot path: reserve, encode, commit one entry into the calling thread's
/// ring. `payload` is the argument byte total; the header is added here.
#[doc(hidden)]
pub fn log_entry(
    site: &'static CallSite,
    widths: &'static [std::sync::atomic::AtomicU8],
    payload: usize,
    encode: impl FnOnce(&mut EncodeCursor),
) {
    let be = backend();
    // Logging past shutdown would commit bytes nobody will ever drain.
    if be.shared.stop.load(Ordering::Acquire) {
        return;
    }

    WRITER.with(|cell| {
        let writer = cell.get_or_init(|| be.shared.registry.register().ok());
        let Some(writer) = writer.as_ref() else {
            return;
        };

        let total = HEADER_SIZE + payload;
        let mut reservation = writer.reserve(total);
        let mut cursor = EncodeCursor::new(reservation.as_mut_ptr(), total);
        cursor.put_header(EntryHeader {
            timestamp: clock::now_nanos(),
            entry_size: total as u32,
            _reserved: 0,
            site,
            param_widths: widths.as_ptr(),
        });
        encode(&mut cursor);
        debug_assert_eq!(cursor.remaining(), 0, "sizing and encoding disagree");
        reservation.commit();
    });
}

/// Block until every entry committed before this call has been written to
/// the output file.
///
/// Entries committed by other threads while `sync` is in flight may or may
/// not be covered.
pub fn sync() {
    let be = backend();
    let shared = &be.shared;

    let mut pass = shared.pass.lock().unwrap_or_else(PoisonError::into_inner);
    while !shared.registry.all_empty() {
        shared.registry.notify();
        let (guard, _) = shared
            .pass_cv
            .wait_timeout(pass, Duration::from_micros(200))
            .unwrap_or_else(PoisonError::into_inner);
        pass = guard;
    }
}

/// Redirect output to `path`.
///
/// The new file is opened first; on failure the previous file stays in
/// effect and the error is returned. On success everything already
/// committed is drained to the old file, then the descriptor is swapped
/// between entries - each entry lands in exactly one file.
pub fn set_log_file<P: AsRef<Path>>(path: P) -> Result<(), LogError> {
    let path = path.as_ref();
    let be = backend();

    let file = open_log_file(path).map_err(|source| LogError::OpenFile {
        path: path.to_path_buf(),
        source,
    })?;

    sync();
    *be.shared.out.lock().unwrap_or_else(PoisonError::into_inner) = file;
    Ok(())
}

/// Aggregate counters for the backend and every live staging ring.
///
/// Counters of rings already reclaimed (producer gone, fully drained) are
/// not included; treat the totals as a live view, not an eternal ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Rings currently registered, drained-but-live included.
    pub live_rings: usize,
    /// Reservation attempts across live rings.
    pub reservations: u64,
    /// Bytes committed by producers across live rings.
    pub bytes_committed: u64,
    /// Bytes drained by the consumer across live rings.
    pub bytes_consumed: u64,
    /// Backoff rounds producers spent stalled on a full ring.
    pub producer_blocked_waits: u64,
    /// Entries discarded by the overflow policy (discard-on-full builds).
    pub entries_discarded: u64,
    /// Entries dropped after repeated write failures.
    pub dropped_writes: u64,
    /// Entries skipped because they failed to decode.
    pub decode_failures: u64,
}

/// Snapshot of [`BackendStats`], aggregated under the registry lock.
pub fn stats() -> BackendStats {
    let be = backend();
    let mut totals = BackendStats {
        dropped_writes: be.shared.dropped_writes.load(Ordering::Relaxed),
        decode_failures: be.shared.decode_failures.load(Ordering::Relaxed),
        ..BackendStats::default()
    };

    let mut live = Vec::new();
    be.shared.registry.snapshot_into(&mut live);
    totals.live_rings = live.len();
    for ring in &live {
        let metrics = ring.metrics();
        totals.reservations += metrics.reservations;
        totals.bytes_committed += metrics.bytes_committed;
        totals.bytes_consumed += metrics.bytes_consumed;
        totals.producer_blocked_waits += metrics.blocked_waits;
        totals.entries_discarded += metrics.discarded;
    }
    totals
}

/// Flush everything, stop the drain thread and join it.
///
/// Further log statements become no-ops; threads that never logged before
/// cannot register anymore. Idempotent.
pub fn shutdown() {
    let Some(be) = BACKEND.get() else {
        return;
    };
    be.stop_and_join();
}

// ---------------------------------------------------------------------
// Drain thread
// ---------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpus = CpuSet::new();
    match cpus.set(core) {
        Ok(()) => {
            if let Err(err) = sched_setaffinity(Pid::from_raw(0), &cpus) {
                eprintln!("ringlog: failed to pin drain thread to core {core}: {err}");
            }
        }
        Err(err) => eprintln!("ringlog: invalid drain core {core}: {err}"),
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) {}

/// Timestamp of the entry at the head of `readable`.
fn peek_timestamp(readable: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&readable[..8]);
    u64::from_ne_bytes(bytes)
}

fn drain_loop(shared: Arc<Shared>) {
    if let Some(core) = shared.consumer_core {
        pin_to_core(core);
    }

    let mut renderer = Renderer::new();
    let mut live: Vec<Arc<StagingBuffer>> = Vec::new();

    loop {
        shared.registry.reclaim_retired();
        shared.registry.snapshot_into(&mut live);

        // Pick the ring whose head entry is globally oldest. This yields
        // an output order that approximates wall-clock order across
        // threads while staying strictly FIFO within each thread.
        let mut oldest: Option<(usize, u64)> = None;
        for (index, ring) in live.iter().enumerate() {
            let readable = ring.peek();
            if readable.len() >= HEADER_SIZE {
                let timestamp = peek_timestamp(readable);
                if oldest.map_or(true, |(_, best)| timestamp < best) {
                    oldest = Some((index, timestamp));
                }
            }
        }

        match oldest {
            Some((index, _)) => process_one_entry(&shared, &mut renderer, &live[index]),
            None => {
                bump_pass(&shared);
                if shared.stop.load(Ordering::Acquire) && shared.registry.all_empty() {
                    break;
                }
                shared.registry.park(shared.poll_interval);
            }
        }
        bump_pass(&shared);
    }

    bump_pass(&shared);
}

fn bump_pass(shared: &Shared) {
    let mut pass = shared.pass.lock().unwrap_or_else(PoisonError::into_inner);
    *pass += 1;
    shared.pass_cv.notify_all();
}

/// Decode, format and write the head entry of `ring`, then release its
/// bytes. Undecodable entries are skipped, never fatal.
fn process_one_entry(shared: &Shared, renderer: &mut Renderer, ring: &StagingBuffer) {
    let readable = ring.peek();
    debug_assert!(readable.len() >= HEADER_SIZE);

    match renderer.render_entry(readable) {
        Ok(entry_size) => {
            write_line(shared, renderer.line());
            ring.consume(entry_size);
        }
        Err(err) => {
            shared.decode_failures.fetch_add(1, Ordering::Relaxed);
            eprintln!("ringlog: skipping undecodable entry: {err}");
            ring.consume(skip_bytes(&err, readable));
        }
    }
}

/// How far to advance past an entry that failed to decode: its own size
/// when the header is trustworthy, the whole readable span otherwise.
fn skip_bytes(err: &DecodeError, readable: &[u8]) -> usize {
    if readable.len() >= HEADER_SIZE {
        if let DecodeError::BadSize { .. } = err {
            return readable.len();
        }
        let size = peek_entry_size(readable);
        if size >= HEADER_SIZE && size <= readable.len() {
            return size;
        }
    }
    readable.len()
}

fn peek_entry_size(readable: &[u8]) -> usize {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&readable[8..12]);
    u32::from_ne_bytes(bytes) as usize
}

/// One write per entry, retried on transient errors; after that the entry
/// is dropped and counted rather than wedging the drain.
fn write_line(shared: &Shared, line: &[u8]) {
    let mut attempts = 0;
    loop {
        let mut out = shared.out.lock().unwrap_or_else(PoisonError::into_inner);
        match out.write_all(line) {
            Ok(()) => return,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) && attempts < WRITE_RETRIES =>
            {
                drop(out);
                attempts += 1;
                thread::yield_now();
            }
            Err(err) => {
                shared.dropped_writes.fetch_add(1, Ordering::Relaxed);
                eprintln!("ringlog: dropping entry after failed write: {err}");
                return;
            }
        }
    }
}
