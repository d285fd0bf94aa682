//! Hot-path record encoding: exact byte sizing and raw serialization.
//!
//! A log statement reserves `HEADER_SIZE + Σ arg sizes` bytes in the
//! calling thread's staging ring, writes an [`EntryHeader`] followed by the
//! raw argument bytes, and commits. No allocation, no formatting, no
//! syscall: non-string arguments are copied at native width, strings as a
//! `u32` length plus their bytes.
//!
//! The drain thread re-synchronizes with the payload through the call
//! site's [`ParamType`] table and its width table (see [`CallSite`]).

use crate::format::ParamType;
use crate::level::Level;
use std::mem::size_of;
use std::sync::atomic::{AtomicU8, Ordering};

/// Program-static metadata for one log call site.
///
/// One `CallSite` is materialized per `log!` expansion, in a `static`, so
/// every encoded entry can reference it by pointer instead of copying any
/// of this into the ring.
pub struct CallSite {
    /// Number of parameters the format string consumes.
    pub num_params: usize,
    /// Classification of each parameter, computed at compile time.
    pub param_types: &'static [ParamType],
    /// The original format string literal.
    pub format: &'static str,
    /// Severity of this statement.
    pub level: Level,
    /// Resolves the enclosing function's name. Rust has no const
    /// `__FUNCTION__`; the macro plants a site-local type and this thunk
    /// recovers the surrounding path from `core::any::type_name` when the
    /// drain first renders the site.
    pub function: fn() -> &'static str,
    /// Source line of the call.
    pub line: u32,
}

/// Fixed-size header at the front of every ring entry. The argument
/// payload follows immediately.
///
/// Written with unaligned copies; both pointers target program-static data
/// (`CallSite` and its width table), so they remain valid for however long
/// the entry sits in the ring.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct EntryHeader {
    /// Wall-clock nanoseconds; the drain's cross-thread ordering key.
    pub timestamp: u64,
    /// Total entry size in bytes, header included.
    pub entry_size: u32,
    pub _reserved: u32,
    pub site: *const CallSite,
    /// Per-parameter native widths, republished by the producer before
    /// every commit. Strings publish their pointer width; their real
    /// length travels in the payload.
    pub param_widths: *const AtomicU8,
}

/// Bytes occupied by [`EntryHeader`] inside the ring.
pub const HEADER_SIZE: usize = size_of::<EntryHeader>();

/// Raw write cursor over a reservation.
pub struct EncodeCursor {
    ptr: *mut u8,
    remaining: usize,
}

impl EncodeCursor {
    pub(crate) fn new(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, remaining: len }
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining, "encode cursor overrun");
        // SAFETY: the caller wrote exactly n bytes at self.ptr; staying
        // within `remaining` keeps us inside the reservation.
        self.ptr = unsafe { self.ptr.add(n) };
        self.remaining -= n;
    }

    /// Unaligned copy of a plain value's native bytes.
    #[inline]
    fn put_value<T: Copy>(&mut self, value: T) {
        let n = size_of::<T>();
        debug_assert!(n <= self.remaining, "encode cursor overrun");
        // SAFETY: n bytes fit per the debug bound; the reservation gave us
        // exclusive ownership of this span and T is plain data.
        unsafe {
            std::ptr::copy_nonoverlapping(&value as *const T as *const u8, self.ptr, n);
        }
        self.advance(n);
    }

    /// Raw byte copy.
    #[inline]
    fn put_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining, "encode cursor overrun");
        // SAFETY: as above.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, bytes.len());
        }
        self.advance(bytes.len());
    }

    pub(crate) fn put_header(&mut self, header: EntryHeader) {
        self.put_value(header);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }
}

/// A value loggable as a printf argument.
///
/// `size` and `encode` are driven by the same [`ParamType`] and must agree
/// byte-for-byte: the macro sizes every argument first (computing the
/// reservation), then serializes into it.
pub trait LogArg {
    /// Bytes this argument occupies in the payload. For a
    /// [`ParamType::DynamicPrecision`] parameter, also records the value as
    /// the precision for the next string argument.
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize;

    /// Serialize exactly the bytes `size` accounted for. `size` is the
    /// value returned by the earlier sizing pass.
    fn encode(&self, ty: ParamType, size: usize, cursor: &mut EncodeCursor);

    /// Native width published to the drain's dispatch table.
    fn width(&self) -> u8;
}

macro_rules! impl_log_arg_for_int {
    ($($t:ty),* $(,)?) => {$(
        impl LogArg for $t {
            #[inline]
            fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
                if matches!(ty, ParamType::DynamicPrecision) {
                    *prev_precision = *self as u64;
                }
                size_of::<$t>()
            }

            #[inline]
            fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
                cursor.put_value(*self);
            }

            #[inline]
            fn width(&self) -> u8 {
                size_of::<$t>() as u8
            }
        }
    )*};
}

impl_log_arg_for_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_log_arg_for_float {
    ($($t:ty),* $(,)?) => {$(
        impl LogArg for $t {
            #[inline]
            fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
                if matches!(ty, ParamType::DynamicPrecision) {
                    // A float makes no sense as a precision; printf-family
                    // behavior here is to treat it as zero.
                    *prev_precision = 0;
                }
                size_of::<$t>()
            }

            #[inline]
            fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
                cursor.put_value(*self);
            }

            #[inline]
            fn width(&self) -> u8 {
                size_of::<$t>() as u8
            }
        }
    )*};
}

impl_log_arg_for_float!(f32, f64);

impl LogArg for bool {
    #[inline]
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
        if matches!(ty, ParamType::DynamicPrecision) {
            *prev_precision = *self as u64;
        }
        1
    }

    #[inline]
    fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
        cursor.put_value(*self as u8);
    }

    #[inline]
    fn width(&self) -> u8 {
        1
    }
}

impl LogArg for char {
    #[inline]
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
        if matches!(ty, ParamType::DynamicPrecision) {
            *prev_precision = *self as u64;
        }
        size_of::<u32>()
    }

    #[inline]
    fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
        cursor.put_value(*self as u32);
    }

    #[inline]
    fn width(&self) -> u8 {
        size_of::<u32>() as u8
    }
}

/// Truncated byte length of `s` under the precision rules of `ty`.
fn truncated_len(s: &str, ty: ParamType, prev_precision: u64) -> usize {
    let mut len = s.len();
    match ty {
        ParamType::StringFixed(precision) => {
            if len > precision as usize {
                len = precision as usize;
            }
        }
        ParamType::StringDynPrecision => {
            if len as u64 > prev_precision {
                len = prev_precision as usize;
            }
        }
        _ => {}
    }
    len
}

impl LogArg for str {
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
        match ty {
            // A string used with a non-string conversion (%p) is stored as
            // its address.
            ParamType::Invalid
            | ParamType::DynamicWidth
            | ParamType::DynamicPrecision
            | ParamType::NonString => size_of::<usize>(),
            _ => {
                let len = truncated_len(self, ty, *prev_precision);
                assert!(
                    len <= u32::MAX as usize,
                    "string arguments longer than u32::MAX bytes are unsupported"
                );
                len + size_of::<u32>()
            }
        }
    }

    fn encode(&self, ty: ParamType, size: usize, cursor: &mut EncodeCursor) {
        match ty {
            ParamType::Invalid
            | ParamType::DynamicWidth
            | ParamType::DynamicPrecision
            | ParamType::NonString => cursor.put_value(self.as_ptr() as usize),
            _ => {
                let len = size - size_of::<u32>();
                cursor.put_value(len as u32);
                cursor.put_bytes(&self.as_bytes()[..len]);
            }
        }
    }

    #[inline]
    fn width(&self) -> u8 {
        size_of::<usize>() as u8
    }
}

impl LogArg for String {
    #[inline]
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
        self.as_str().size(ty, prev_precision)
    }

    #[inline]
    fn encode(&self, ty: ParamType, size: usize, cursor: &mut EncodeCursor) {
        self.as_str().encode(ty, size, cursor)
    }

    #[inline]
    fn width(&self) -> u8 {
        self.as_str().width()
    }
}

impl<T> LogArg for *const T {
    #[inline]
    fn size(&self, _ty: ParamType, _prev_precision: &mut u64) -> usize {
        size_of::<usize>()
    }

    #[inline]
    fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
        cursor.put_value(*self as usize);
    }

    #[inline]
    fn width(&self) -> u8 {
        size_of::<usize>() as u8
    }
}

impl<T> LogArg for *mut T {
    #[inline]
    fn size(&self, _ty: ParamType, _prev_precision: &mut u64) -> usize {
        size_of::<usize>()
    }

    #[inline]
    fn encode(&self, _ty: ParamType, _size: usize, cursor: &mut EncodeCursor) {
        cursor.put_value(*self as usize);
    }

    #[inline]
    fn width(&self) -> u8 {
        size_of::<usize>() as u8
    }
}

impl<T: LogArg + ?Sized> LogArg for &T {
    #[inline]
    fn size(&self, ty: ParamType, prev_precision: &mut u64) -> usize {
        (**self).size(ty, prev_precision)
    }

    #[inline]
    fn encode(&self, ty: ParamType, size: usize, cursor: &mut EncodeCursor) {
        (**self).encode(ty, size, cursor)
    }

    #[inline]
    fn width(&self) -> u8 {
        (**self).width()
    }
}

/// Argument-pack fan-out: lets the macro evaluate each argument expression
/// exactly once and still run both the sizing and the serialization pass
/// over it.
///
/// Implemented for tuples of references up to 16 parameters, which covers
/// the widest realistic call sites (`%*.*f` style conversions consume three
/// parameters each).
pub trait LogArgs {
    /// Compute every argument's size into `sizes`, publish native widths,
    /// and return the total payload length.
    fn total_size(
        &self,
        types: &[ParamType],
        widths: &[AtomicU8],
        sizes: &mut [usize],
        prev_precision: &mut u64,
    ) -> usize;

    /// Serialize all arguments using the sizes from the sizing pass.
    fn encode_args(&self, types: &[ParamType], sizes: &[usize], cursor: &mut EncodeCursor);
}

impl LogArgs for () {
    #[inline]
    fn total_size(
        &self,
        _types: &[ParamType],
        _widths: &[AtomicU8],
        _sizes: &mut [usize],
        _prev_precision: &mut u64,
    ) -> usize {
        0
    }

    #[inline]
    fn encode_args(&self, _types: &[ParamType], _sizes: &[usize], _cursor: &mut EncodeCursor) {}
}

macro_rules! impl_log_args_for_tuple {
    ($(($($idx:tt $name:ident),+))+) => {$(
        impl<$($name: LogArg),+> LogArgs for ($($name,)+) {
            #[inline]
            fn total_size(
                &self,
                types: &[ParamType],
                widths: &[AtomicU8],
                sizes: &mut [usize],
                prev_precision: &mut u64,
            ) -> usize {
                let mut total = 0;
                $(
                    sizes[$idx] = self.$idx.size(types[$idx], prev_precision);
                    widths[$idx].store(self.$idx.width(), Ordering::Relaxed);
                    total += sizes[$idx];
                )+
                total
            }

            #[inline]
            fn encode_args(
                &self,
                types: &[ParamType],
                sizes: &[usize],
                cursor: &mut EncodeCursor,
            ) {
                $(
                    self.$idx.encode(types[$idx], sizes[$idx], cursor);
                )+
            }
        }
    )+};
}

impl_log_args_for_tuple! {
    (0 A)
    (0 A, 1 B)
    (0 A, 1 B, 2 C)
    (0 A, 1 B, 2 C, 3 D)
    (0 A, 1 B, 2 C, 3 D, 4 E)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L, 12 M)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L, 12 M, 13 N)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L, 12 M, 13 N, 14 O)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L, 12 M, 13 N, 14 O, 15 P)
}

/// Trim a `type_name` path like `app::worker::run::__Loc` (possibly with
/// `::{{closure}}` segments) down to the bare enclosing function name.
#[doc(hidden)]
pub fn fn_name_of(raw: &'static str) -> &'static str {
    let mut path = raw.strip_suffix("::__Loc").unwrap_or(raw);
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    match path.rsplit("::").next() {
        Some(last) if !last.is_empty() => last,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{analyze, ParamType};

    fn size_all<A: LogArgs, const N: usize>(
        args: &A,
        types: &[ParamType; N],
    ) -> ([usize; N], usize) {
        let widths: [AtomicU8; N] = [0u8; N].map(AtomicU8::new);
        let mut sizes = [0usize; N];
        let mut prev = u64::MAX;
        let total = args.total_size(types, &widths, &mut sizes, &mut prev);
        (sizes, total)
    }

    fn encode_all<A: LogArgs, const N: usize>(
        args: &A,
        types: &[ParamType; N],
        sizes: &[usize; N],
        total: usize,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; total];
        let mut cursor = EncodeCursor::new(buf.as_mut_ptr(), total);
        args.encode_args(types, sizes, &mut cursor);
        assert_eq!(cursor.remaining(), 0);
        buf
    }

    #[test]
    fn test_integer_sizes_are_native_widths() {
        const TYPES: [ParamType; 4] = analyze::<4>("%hhd %hd %d %lld");
        let args = (1i8, 2i16, 3i32, 4i64);
        let (sizes, total) = size_all(&args, &TYPES);
        assert_eq!(sizes, [1, 2, 4, 8]);
        assert_eq!(total, 15);
    }

    #[test]
    fn test_string_size_includes_length_prefix() {
        const TYPES: [ParamType; 1] = analyze::<1>("%s");
        let (sizes, total) = size_all(&("hello",), &TYPES);
        assert_eq!(sizes, [9]);
        assert_eq!(total, 9);
    }

    #[test]
    fn test_static_precision_truncates_string() {
        const TYPES: [ParamType; 1] = analyze::<1>("%.3s");
        let (_, total) = size_all(&("hello world",), &TYPES);
        assert_eq!(total, 3 + 4);
    }

    #[test]
    fn test_dynamic_precision_truncates_following_string() {
        const TYPES: [ParamType; 2] = analyze::<2>("%.*s");
        let (sizes, total) = size_all(&(5i32, "hello world"), &TYPES);
        assert_eq!(sizes, [4, 5 + 4]);
        assert_eq!(total, 13);
    }

    #[test]
    fn test_negative_dynamic_precision_means_no_truncation() {
        const TYPES: [ParamType; 2] = analyze::<2>("%.*s");
        let (sizes, _) = size_all(&(-1i32, "hello world"), &TYPES);
        assert_eq!(sizes[1], 11 + 4);
    }

    #[test]
    fn test_string_payload_round_trip() {
        const TYPES: [ParamType; 1] = analyze::<1>("%s");
        let args = ("abc",);
        let (sizes, total) = size_all(&args, &TYPES);
        let buf = encode_all(&args, &TYPES, &sizes, total);
        assert_eq!(&buf[..4], &3u32.to_ne_bytes());
        assert_eq!(&buf[4..], b"abc");
    }

    #[test]
    fn test_integer_payload_round_trip() {
        const TYPES: [ParamType; 2] = analyze::<2>("%d %lld");
        let args = (-7i32, 1_000_000_007i64);
        let (sizes, total) = size_all(&args, &TYPES);
        let buf = encode_all(&args, &TYPES, &sizes, total);
        assert_eq!(&buf[..4], &(-7i32).to_ne_bytes());
        assert_eq!(&buf[4..], &1_000_000_007i64.to_ne_bytes());
    }

    #[test]
    fn test_widths_published_per_parameter() {
        const TYPES: [ParamType; 3] = analyze::<3>("%d %s %f");
        let widths: [AtomicU8; 3] = [0u8; 3].map(AtomicU8::new);
        let mut sizes = [0usize; 3];
        let mut prev = u64::MAX;
        let args = (42i32, "s", 1.5f64);
        args.total_size(&TYPES, &widths, &mut sizes, &mut prev);

        assert_eq!(widths[0].load(Ordering::Relaxed), 4);
        assert_eq!(widths[1].load(Ordering::Relaxed), size_of::<usize>() as u8);
        assert_eq!(widths[2].load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_fn_name_trimming() {
        assert_eq!(fn_name_of("app::module::my_fn::__Loc"), "my_fn");
        assert_eq!(fn_name_of("app::run::{{closure}}::__Loc"), "run");
        assert_eq!(fn_name_of("lone::__Loc"), "lone");
    }
}
