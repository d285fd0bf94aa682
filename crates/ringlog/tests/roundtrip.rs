//! End-to-end round trips: log statements through the staging rings and
//! the drain thread, asserted against the bytes that land in the file.
//!
//! The backend is a process-wide singleton, so every test serializes on a
//! lock, points the backend at a fresh file, and syncs before reading.

use ringlog::{Level, LoggerConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static SCRATCH: OnceLock<tempfile::TempDir> = OnceLock::new();
static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
static NEXT_FILE: AtomicU32 = AtomicU32::new(0);

fn scratch() -> &'static tempfile::TempDir {
    SCRATCH.get_or_init(|| tempfile::tempdir().expect("tempdir"))
}

/// Serialize tests and hand each a fresh output file.
fn fresh_log() -> (MutexGuard<'static, ()>, PathBuf) {
    let guard = GUARD
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    // First caller boots the backend against a scratch file; every test
    // then swaps in its own.
    let _ = ringlog::init(
        LoggerConfig::default().with_log_file(scratch().path().join("boot.log")),
    );

    let path = scratch()
        .path()
        .join(format!("out-{}.log", NEXT_FILE.fetch_add(1, Ordering::Relaxed)));
    ringlog::set_log_file(&path).expect("set_log_file");
    ringlog::set_level(Level::Debug);
    (guard, path)
}

fn read_lines(path: &PathBuf) -> Vec<String> {
    let contents = fs::read_to_string(path).expect("log file readable");
    contents.lines().map(str::to_string).collect()
}

/// Strip `[timestamp][level][function][line]` and return the message.
fn message_of(line: &str) -> &str {
    let mut rest = line;
    for _ in 0..4 {
        let close = rest.find(']').expect("prefix bracket");
        rest = &rest[close + 1..];
    }
    rest
}

#[test]
fn s1_single_string_entry() {
    let (_guard, path) = fresh_log();

    ringlog::notice!("%s", "hello world");
    ringlog::sync();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("]hello world"), "got: {}", lines[0]);
    assert!(lines[0].contains("[notice]"));
    assert!(lines[0].contains("[s1_single_string_entry]"));
}

#[test]
fn s2_thousand_multi_arg_entries() {
    let (_guard, path) = fresh_log();

    for _ in 0..1000 {
        ringlog::notice!(
            "%s %i %i %i %i %i %i %i %i %i %i",
            "hello world",
            0, 1, 2, 3, 4, 5, 6, 7, 8, 9
        );
    }
    ringlog::sync();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1000);
    for line in &lines {
        assert_eq!(message_of(line), "hello world 0 1 2 3 4 5 6 7 8 9");
    }
}

#[test]
fn s3_float_widths_match_printf() {
    let (_guard, path) = fresh_log();

    ringlog::notice!(
        "%f %+010.3f %E %g",
        3.141592657,
        3.141592657,
        3.14,
        3.14
    );
    ringlog::notice!("%a", 3.14);
    ringlog::sync();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 2);
    assert_eq!(message_of(&lines[0]), "3.141593 +00003.142 3.140000E+00 3.14");
    let hex_float = message_of(&lines[1]);
    assert!(hex_float.starts_with("0x1."), "got: {hex_float}");
    assert!(hex_float.ends_with("p+1"), "got: {hex_float}");
}

#[test]
fn s4_dynamic_precision_truncates() {
    let (_guard, path) = fresh_log();

    ringlog::notice!("%.*s", 5, "hello world");
    ringlog::sync();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(message_of(&lines[0]), "hello");
}

#[test]
fn p4_level_gate_produces_no_output() {
    let (_guard, path) = fresh_log();

    ringlog::set_level(Level::Error);
    ringlog::notice!("%s", "must not appear");
    ringlog::debug!("%d", 13);
    ringlog::sync();
    assert!(read_lines(&path).is_empty());

    ringlog::set_level(Level::Debug);
    ringlog::debug!("%s", "back on");
    ringlog::sync();
    assert_eq!(read_lines(&path).len(), 1);
}

#[test]
fn prefix_has_timestamp_level_function_line() {
    let (_guard, path) = fresh_log();

    ringlog::warn!("%s", "shape check");
    ringlog::sync();

    let lines = read_lines(&path);
    let line = &lines[0];

    // "[YYYY-MM-DD-HH:MM:SS.NNNNNNNNN]" with exactly nine nanosecond digits.
    let stamp = &line[..31];
    assert_eq!(stamp.as_bytes()[0], b'[');
    assert_eq!(stamp.as_bytes()[30], b']');
    assert_eq!(&stamp[5..6], "-");
    assert_eq!(&stamp[8..9], "-");
    assert_eq!(&stamp[11..12], "-");
    assert_eq!(&stamp[14..15], ":");
    assert_eq!(&stamp[17..18], ":");
    assert_eq!(&stamp[20..21], ".");
    assert!(stamp[21..30].bytes().all(|b| b.is_ascii_digit()));

    let rest = &line[31..];
    assert!(rest.starts_with("[warn][prefix_has_timestamp_level_function_line]["));
    let line_no: String = rest
        .trim_start_matches("[warn][prefix_has_timestamp_level_function_line][")
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    assert!(!line_no.is_empty(), "line number missing: {rest}");
}

#[test]
fn mixed_conversions_round_trip() {
    let (_guard, path) = fresh_log();

    ringlog::notice!(
        "%c %5.2s %-4d| %#x %020.10f %%",
        'Q',
        "hello",
        7,
        255u32,
        1.5,
    );
    ringlog::sync();

    let lines = read_lines(&path);
    assert_eq!(
        message_of(&lines[0]),
        "Q    he 7   | 0xff 000000001.5000000000 %"
    );
}

#[test]
fn switching_files_splits_cleanly() {
    let (_guard, first) = fresh_log();

    ringlog::notice!("%s %d", "first file", 1);
    let second = scratch().path().join("switched.log");
    ringlog::set_log_file(&second).expect("switch");
    ringlog::notice!("%s %d", "second file", 2);
    ringlog::sync();

    let first_lines = read_lines(&first);
    assert_eq!(first_lines.len(), 1);
    assert_eq!(message_of(&first_lines[0]), "first file 1");

    let second_lines = read_lines(&second);
    assert_eq!(second_lines.len(), 1);
    assert_eq!(message_of(&second_lines[0]), "second file 2");
}

#[test]
fn stats_balance_after_sync() {
    let (_guard, _path) = fresh_log();

    for i in 0..50 {
        ringlog::notice!("stat line %d", i);
    }
    ringlog::sync();

    let stats = ringlog::stats();
    assert!(stats.live_rings >= 1);
    assert!(stats.reservations >= 50);
    assert_eq!(stats.bytes_committed, stats.bytes_consumed);
    assert_eq!(stats.decode_failures, 0);
    assert_eq!(stats.dropped_writes, 0);
}

#[test]
fn exited_thread_ring_is_reclaimed() {
    let (_guard, _path) = fresh_log();
    ringlog::preallocate();
    let before = ringlog::stats().live_rings;

    std::thread::spawn(|| {
        ringlog::notice!("%s", "ephemeral thread");
    })
    .join()
    .expect("thread panicked");
    ringlog::sync();

    // The drain reclaims retired rings on its next passes.
    let mut live = ringlog::stats().live_rings;
    for _ in 0..200 {
        if live <= before {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
        live = ringlog::stats().live_rings;
    }
    assert!(live <= before, "exited thread's ring was never reclaimed");
}

#[test]
fn open_failure_keeps_previous_file() {
    let (_guard, path) = fresh_log();

    let bogus = scratch().path().join("no-such-dir").join("x.log");
    assert!(ringlog::set_log_file(&bogus).is_err());

    ringlog::notice!("%s", "still routed to the old file");
    ringlog::sync();
    assert_eq!(read_lines(&path).len(), 1);
}
