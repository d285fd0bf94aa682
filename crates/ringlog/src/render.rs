//! Drain-side rendering: decode one staged entry and format it as text.
//!
//! The producer stored raw argument bytes plus a pointer to the call
//! site's static metadata; this module walks the format string again, in
//! lockstep with the recorded [`ParamType`] stream, and reconstructs each
//! conversion through `libc::snprintf` so the output is byte-for-byte what
//! printf would have produced at the call site.
//!
//! One reusable line buffer backs all entries; any conversion that does
//! not fit grows it geometrically and retries. Undecodable entries are
//! reported to the caller, which skips them and keeps the drain alive.

use crate::encode::{CallSite, EntryHeader, HEADER_SIZE};
use crate::format::ParamType;
use chrono::{DateTime, Datelike, Local, Timelike};
use libc::{c_char, c_int, c_void, size_t};
use std::fmt::Write as _;
use std::io::Write as _;
use std::slice;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Why an entry could not be decoded. The drain skips such entries with a
/// one-line stderr diagnostic and moves on.
#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("entry of {size} bytes is implausible ({available} readable)")]
    BadSize { size: usize, available: usize },

    #[error("implausible parameter count {0}")]
    TooManyParams(usize),

    #[error("argument payload exhausted mid-entry")]
    Truncated,

    #[error("conversion %{terminal} does not match its recorded parameter")]
    Mismatch { terminal: char },

    #[error("unsupported argument width {0}")]
    BadWidth(u8),

    #[error("snprintf failed with {0}")]
    Formatter(i32),
}

/// Byte reader over one entry's argument payload.
struct PayloadCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.offset + n > self.data.len() {
            return Err(DecodeError::Truncated);
        }
        let bytes = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }
}

fn read_signed(bytes: &[u8]) -> Result<i64, DecodeError> {
    Ok(match bytes.len() {
        1 => i8::from_ne_bytes([bytes[0]]) as i64,
        2 => i16::from_ne_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        n => return Err(DecodeError::BadWidth(n as u8)),
    })
}

fn read_unsigned(bytes: &[u8]) -> Result<u64, DecodeError> {
    Ok(match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        8 => u64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        n => return Err(DecodeError::BadWidth(n as u8)),
    })
}

fn read_double(bytes: &[u8]) -> Result<f64, DecodeError> {
    Ok(match bytes.len() {
        4 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        8 => f64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        n => return Err(DecodeError::BadWidth(n as u8)),
    })
}

/// A width or precision field of a conversion.
#[derive(Clone, Copy)]
enum Field<'a> {
    Absent,
    Static(&'a [u8]),
    Dynamic,
}

/// One parsed `%...` conversion inside the format string.
struct Conversion<'a> {
    flags: &'a [u8],
    width: Field<'a>,
    precision: Field<'a>,
    terminal: u8,
    /// Index just past the terminal character.
    end: usize,
}

/// Re-parse the conversion starting at `fmt[start] == b'%'`.
///
/// The analyzer already validated every conversion at compile time, so a
/// parse failure here means the payload and the format string no longer
/// agree and the entry is skipped.
fn parse_conversion(fmt: &[u8], start: usize) -> Result<Conversion<'_>, DecodeError> {
    let mut pos = start + 1; // past '%'

    let flags_start = pos;
    while pos < fmt.len() && matches!(fmt[pos], b'-' | b'+' | b' ' | b'#' | b'0') {
        pos += 1;
    }
    let flags = &fmt[flags_start..pos];

    let width = if pos < fmt.len() && fmt[pos] == b'*' {
        pos += 1;
        Field::Dynamic
    } else {
        let digits_start = pos;
        while pos < fmt.len() && fmt[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos > digits_start {
            Field::Static(&fmt[digits_start..pos])
        } else {
            Field::Absent
        }
    };

    let precision = if pos < fmt.len() && fmt[pos] == b'.' {
        pos += 1;
        if pos < fmt.len() && fmt[pos] == b'*' {
            pos += 1;
            Field::Dynamic
        } else {
            let digits_start = pos;
            while pos < fmt.len() && fmt[pos].is_ascii_digit() {
                pos += 1;
            }
            // A bare '.' is an explicit zero precision.
            Field::Static(&fmt[digits_start..pos])
        }
    } else {
        Field::Absent
    };

    // Length modifiers are consumed and discarded: the recorded argument
    // width decides the reconstructed modifier.
    while pos < fmt.len() && matches!(fmt[pos], b'h' | b'l' | b'j' | b'z' | b't' | b'L') {
        pos += 1;
    }

    if pos >= fmt.len() {
        return Err(DecodeError::Truncated);
    }
    let terminal = fmt[pos];
    Ok(Conversion {
        flags,
        width,
        precision,
        terminal,
        end: pos + 1,
    })
}

/// The typed value handed to snprintf for one conversion.
enum Argument {
    Signed(i64),
    Unsigned(u64),
    Double(f64),
    Character(c_int),
    Pointer(*const c_void),
    Str { ptr: *const c_char, len: c_int },
}

/// Renders decoded entries into a reused line buffer.
pub(crate) struct Renderer {
    line: Vec<u8>,
    cfmt: Vec<u8>,
    prefix: String,
    prefix_second: i64,
}

impl Renderer {
    pub(crate) fn new() -> Self {
        Self {
            line: Vec::with_capacity(512),
            cfmt: Vec::with_capacity(32),
            prefix: String::new(),
            prefix_second: i64::MIN,
        }
    }

    /// The rendered bytes of the last successful [`render_entry`], newline
    /// included.
    ///
    /// [`render_entry`]: Renderer::render_entry
    pub(crate) fn line(&self) -> &[u8] {
        &self.line
    }

    /// Decode and render the entry at the head of `readable`.
    ///
    /// Returns the entry's total size so the caller can consume it.
    pub(crate) fn render_entry(&mut self, readable: &[u8]) -> Result<usize, DecodeError> {
        if readable.len() < HEADER_SIZE {
            return Err(DecodeError::BadSize {
                size: HEADER_SIZE,
                available: readable.len(),
            });
        }
        // SAFETY: at least HEADER_SIZE bytes are readable; the producer
        // wrote a header there with the same unaligned layout.
        let header = unsafe { std::ptr::read_unaligned(readable.as_ptr() as *const EntryHeader) };

        let entry_size = header.entry_size as usize;
        if entry_size < HEADER_SIZE || entry_size > readable.len() {
            return Err(DecodeError::BadSize {
                size: entry_size,
                available: readable.len(),
            });
        }

        // SAFETY: the producer stored a pointer to a 'static CallSite.
        let site = unsafe { &*header.site };
        if site.num_params > 64 {
            return Err(DecodeError::TooManyParams(site.num_params));
        }
        // SAFETY: the width table is a 'static [AtomicU8; num_params]
        // belonging to the same call site.
        let widths = unsafe { slice::from_raw_parts(header.param_widths, site.num_params) };

        self.line.clear();
        self.push_time_prefix(header.timestamp);
        let _ = write!(
            self.line,
            "[{}][{}][{}]",
            site.level.name(),
            (site.function)(),
            site.line
        );

        self.render_message(site, widths, &readable[HEADER_SIZE..entry_size])?;
        self.line.push(b'\n');
        Ok(entry_size)
    }

    /// `[YYYY-MM-DD-HH:MM:SS.NNNNNNNNN]` in local time. The date-and-second
    /// part is cached and only re-rendered when the second changes.
    fn push_time_prefix(&mut self, timestamp: u64) {
        let seconds = (timestamp / NANOS_PER_SEC) as i64;
        let nanos = timestamp % NANOS_PER_SEC;

        if seconds != self.prefix_second {
            self.prefix_second = seconds;
            self.prefix.clear();
            match DateTime::from_timestamp(seconds, 0) {
                Some(utc) => {
                    let local = utc.with_timezone(&Local);
                    let _ = write!(
                        self.prefix,
                        "[{:04}-{:02}-{:02}-{:02}:{:02}:{:02}.",
                        local.year(),
                        local.month(),
                        local.day(),
                        local.hour(),
                        local.minute(),
                        local.second()
                    );
                }
                // Timestamp outside chrono's range: fall back to raw seconds.
                None => {
                    let _ = write!(self.prefix, "[{seconds}.");
                }
            }
        }

        self.line.extend_from_slice(self.prefix.as_bytes());
        let _ = write!(self.line, "{nanos:09}");
        self.line.push(b']');
    }

    /// Walk the format string and interleave literal text with rendered
    /// conversions, consuming payload bytes in [`ParamType`] order.
    fn render_message(
        &mut self,
        site: &CallSite,
        widths: &[AtomicU8],
        payload: &[u8],
    ) -> Result<(), DecodeError> {
        let fmt = site.format.as_bytes();
        let mut cursor = PayloadCursor::new(payload);
        let mut param = 0usize;
        let mut pos = 0usize;

        while pos < fmt.len() {
            // Copy the literal run up to the next '%'.
            match fmt[pos..].iter().position(|&b| b == b'%') {
                None => {
                    self.line.extend_from_slice(&fmt[pos..]);
                    break;
                }
                Some(run) => {
                    self.line.extend_from_slice(&fmt[pos..pos + run]);
                    pos += run;
                }
            }

            if pos + 1 >= fmt.len() {
                // Trailing lone '%': emit as-is.
                self.line.push(b'%');
                break;
            }
            if fmt[pos + 1] == b'%' {
                self.line.push(b'%');
                pos += 2;
                continue;
            }

            let conversion = parse_conversion(fmt, pos)?;
            pos = conversion.end;

            // '*' fields consume leading integer parameters.
            let dynamic_width = match conversion.width {
                Field::Dynamic => Some(self.read_dynamic_field(
                    site,
                    widths,
                    &mut cursor,
                    &mut param,
                    ParamType::DynamicWidth,
                    conversion.terminal,
                )?),
                _ => None,
            };
            let dynamic_precision = match conversion.precision {
                Field::Dynamic => Some(self.read_dynamic_field(
                    site,
                    widths,
                    &mut cursor,
                    &mut param,
                    ParamType::DynamicPrecision,
                    conversion.terminal,
                )?),
                _ => None,
            };

            let ty = *site
                .param_types
                .get(param)
                .ok_or(DecodeError::Truncated)?;
            let width = widths
                .get(param)
                .map(|w| w.load(Ordering::Relaxed))
                .ok_or(DecodeError::Truncated)?;
            param += 1;

            let argument = match conversion.terminal {
                b's' => {
                    if !matches!(
                        ty,
                        ParamType::StringFixed(_)
                            | ParamType::StringDynPrecision
                            | ParamType::StringNoPrecision
                    ) {
                        return Err(DecodeError::Mismatch { terminal: 's' });
                    }
                    let len_bytes = cursor.take(4)?;
                    let len = u32::from_ne_bytes([
                        len_bytes[0],
                        len_bytes[1],
                        len_bytes[2],
                        len_bytes[3],
                    ]) as usize;
                    let bytes = cursor.take(len)?;
                    Argument::Str {
                        ptr: bytes.as_ptr() as *const c_char,
                        len: len as c_int,
                    }
                }
                b'c' => {
                    Self::expect_non_string(ty, conversion.terminal)?;
                    let value = read_signed(cursor.take(width as usize)?)?;
                    Argument::Character(value as c_int)
                }
                b'd' | b'i' => {
                    Self::expect_non_string(ty, conversion.terminal)?;
                    Argument::Signed(read_signed(cursor.take(width as usize)?)?)
                }
                b'u' | b'o' | b'x' | b'X' => {
                    Self::expect_non_string(ty, conversion.terminal)?;
                    Argument::Unsigned(read_unsigned(cursor.take(width as usize)?)?)
                }
                b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => {
                    Self::expect_non_string(ty, conversion.terminal)?;
                    Argument::Double(read_double(cursor.take(width as usize)?)?)
                }
                b'p' => {
                    Self::expect_non_string(ty, conversion.terminal)?;
                    let address = read_unsigned(cursor.take(width as usize)?)?;
                    Argument::Pointer(address as usize as *const c_void)
                }
                b'%' => {
                    // Degenerate "%<stuff>%": printf renders a literal '%';
                    // the analyzer still accounted a parameter, so skip it.
                    let _ = cursor.take(width as usize)?;
                    self.line.push(b'%');
                    continue;
                }
                other => {
                    return Err(DecodeError::Mismatch {
                        terminal: other as char,
                    })
                }
            };

            self.emit_conversion(&conversion, dynamic_width, dynamic_precision, argument)?;
        }

        Ok(())
    }

    fn expect_non_string(ty: ParamType, terminal: u8) -> Result<(), DecodeError> {
        match ty {
            ParamType::NonString => Ok(()),
            _ => Err(DecodeError::Mismatch {
                terminal: terminal as char,
            }),
        }
    }

    /// Consume one `*` parameter (width or precision) from the payload.
    fn read_dynamic_field(
        &mut self,
        site: &CallSite,
        widths: &[AtomicU8],
        cursor: &mut PayloadCursor<'_>,
        param: &mut usize,
        expected: ParamType,
        terminal: u8,
    ) -> Result<c_int, DecodeError> {
        let ty = *site
            .param_types
            .get(*param)
            .ok_or(DecodeError::Truncated)?;
        if ty != expected {
            return Err(DecodeError::Mismatch {
                terminal: terminal as char,
            });
        }
        let width = widths
            .get(*param)
            .map(|w| w.load(Ordering::Relaxed))
            .ok_or(DecodeError::Truncated)?;
        *param += 1;
        let value = read_signed(cursor.take(width as usize)?)?;
        Ok(value as c_int)
    }

    /// Rebuild the conversion spec and let snprintf render it into the
    /// line buffer, growing the buffer on overflow.
    fn emit_conversion(
        &mut self,
        conversion: &Conversion<'_>,
        dynamic_width: Option<c_int>,
        dynamic_precision: Option<c_int>,
        argument: Argument,
    ) -> Result<(), DecodeError> {
        self.cfmt.clear();
        self.cfmt.push(b'%');
        self.cfmt.extend_from_slice(conversion.flags);

        match conversion.width {
            Field::Absent => {}
            Field::Static(digits) => self.cfmt.extend_from_slice(digits),
            Field::Dynamic => self.cfmt.push(b'*'),
        }

        if let Argument::Str { .. } = argument {
            // Strings are stored without a terminator; a forced '.*'
            // precision caps snprintf at the recorded length. Any original
            // precision already truncated the bytes at encode time.
            self.cfmt.extend_from_slice(b".*s");
        } else {
            match conversion.precision {
                Field::Absent => {}
                Field::Static(digits) => {
                    self.cfmt.push(b'.');
                    self.cfmt.extend_from_slice(digits);
                }
                Field::Dynamic => self.cfmt.extend_from_slice(b".*"),
            }
            // Canonical length modifier for the widened value.
            match argument {
                Argument::Signed(_) | Argument::Unsigned(_) => {
                    self.cfmt.extend_from_slice(b"ll");
                }
                _ => {}
            }
            self.cfmt.push(conversion.terminal);
        }
        self.cfmt.push(0);

        loop {
            let used = self.line.len();
            if self.line.capacity() - used < 64 {
                self.line.reserve(64);
            }
            let available = self.line.capacity() - used;

            // SAFETY: `destination` points at `available` spare bytes of the
            // line buffer; cfmt is NUL-terminated; each match arm passes
            // exactly the arguments its reconstructed spec consumes.
            let written = unsafe {
                let destination = self.line.as_mut_ptr().add(used) as *mut c_char;
                let spec = self.cfmt.as_ptr() as *const c_char;
                let n = available as size_t;
                match (dynamic_width, dynamic_precision, &argument) {
                    (None, None, Argument::Signed(v)) => libc::snprintf(destination, n, spec, *v),
                    (Some(w), None, Argument::Signed(v)) => {
                        libc::snprintf(destination, n, spec, w, *v)
                    }
                    (None, Some(p), Argument::Signed(v)) => {
                        libc::snprintf(destination, n, spec, p, *v)
                    }
                    (Some(w), Some(p), Argument::Signed(v)) => {
                        libc::snprintf(destination, n, spec, w, p, *v)
                    }

                    (None, None, Argument::Unsigned(v)) => libc::snprintf(destination, n, spec, *v),
                    (Some(w), None, Argument::Unsigned(v)) => {
                        libc::snprintf(destination, n, spec, w, *v)
                    }
                    (None, Some(p), Argument::Unsigned(v)) => {
                        libc::snprintf(destination, n, spec, p, *v)
                    }
                    (Some(w), Some(p), Argument::Unsigned(v)) => {
                        libc::snprintf(destination, n, spec, w, p, *v)
                    }

                    (None, None, Argument::Double(v)) => libc::snprintf(destination, n, spec, *v),
                    (Some(w), None, Argument::Double(v)) => {
                        libc::snprintf(destination, n, spec, w, *v)
                    }
                    (None, Some(p), Argument::Double(v)) => {
                        libc::snprintf(destination, n, spec, p, *v)
                    }
                    (Some(w), Some(p), Argument::Double(v)) => {
                        libc::snprintf(destination, n, spec, w, p, *v)
                    }

                    (None, None, Argument::Character(v)) => {
                        libc::snprintf(destination, n, spec, *v)
                    }
                    (Some(w), None, Argument::Character(v)) => {
                        libc::snprintf(destination, n, spec, w, *v)
                    }
                    (None, Some(p), Argument::Character(v)) => {
                        libc::snprintf(destination, n, spec, p, *v)
                    }
                    (Some(w), Some(p), Argument::Character(v)) => {
                        libc::snprintf(destination, n, spec, w, p, *v)
                    }

                    (None, None, Argument::Pointer(v)) => libc::snprintf(destination, n, spec, *v),
                    (Some(w), None, Argument::Pointer(v)) => {
                        libc::snprintf(destination, n, spec, w, *v)
                    }
                    (None, Some(p), Argument::Pointer(v)) => {
                        libc::snprintf(destination, n, spec, p, *v)
                    }
                    (Some(w), Some(p), Argument::Pointer(v)) => {
                        libc::snprintf(destination, n, spec, w, p, *v)
                    }

                    // The recorded length always rides as the '.*' argument.
                    (None, _, Argument::Str { ptr, len }) => {
                        libc::snprintf(destination, n, spec, *len, *ptr)
                    }
                    (Some(w), _, Argument::Str { ptr, len }) => {
                        libc::snprintf(destination, n, spec, w, *len, *ptr)
                    }
                }
            };

            if written < 0 {
                return Err(DecodeError::Formatter(written));
            }
            let written = written as usize;
            if written < available {
                // SAFETY: snprintf initialized `written` bytes past `used`.
                unsafe { self.line.set_len(used + written) };
                return Ok(());
            }
            // Doubling growth: reserve() at least doubles, and the exact
            // bound guarantees the retry fits.
            self.line.reserve(written + 1);
        }
    }
}
