//! The `log!` macro and its per-level shorthands.
//!
//! Each expansion materializes the call site's static metadata once - the
//! parameter classification (computed at compile time from the literal
//! format string), the width table, and the `CallSite` - then gates on the
//! global level before evaluating any argument. The argument expressions
//! are evaluated exactly once, into a tuple of references, which both the
//! sizing and the serialization pass walk.

/// Log a printf-style statement at an explicit [`Level`](crate::Level).
///
/// The format string must be a literal; its conversions are checked at
/// compile time and `%n` or malformed specifiers fail the build, as does an
/// argument count that disagrees with the format string.
///
/// ```ignore
/// ringlog::log!(ringlog::Level::Notice, "%s scored %d points", "carol", 41);
/// ```
#[macro_export]
macro_rules! log {
    ($level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const __NUM_PARAMS: usize = $crate::__private::count_params($fmt);
        const __NUM_ARGS: usize = <[()]>::len(&[$({ let _ = stringify!($arg); }),*]);
        const _: () = assert!(
            __NUM_ARGS == __NUM_PARAMS,
            "argument count does not match the format string"
        );

        static __TYPES: [$crate::__private::ParamType; __NUM_PARAMS] =
            $crate::__private::analyze::<{ __NUM_PARAMS }>($fmt);
        static __WIDTHS: [$crate::__private::AtomicU8; __NUM_PARAMS] =
            [const { $crate::__private::AtomicU8::new(0) }; __NUM_PARAMS];

        struct __Loc;
        fn __site_function() -> &'static str {
            $crate::__private::fn_name_of(::core::any::type_name::<__Loc>())
        }

        static __SITE: $crate::__private::CallSite = $crate::__private::CallSite {
            num_params: __NUM_PARAMS,
            param_types: &__TYPES,
            format: $fmt,
            level: $level,
            function: __site_function,
            line: ::core::line!(),
        };

        if $crate::__private::enabled(__SITE.level) {
            let __args = ($(&$arg,)*);
            let mut __sizes = [0usize; __NUM_PARAMS];
            let mut __prev_precision = u64::MAX;
            let __payload = $crate::__private::LogArgs::total_size(
                &__args,
                &__TYPES,
                &__WIDTHS,
                &mut __sizes,
                &mut __prev_precision,
            );
            $crate::__private::log_entry(&__SITE, &__WIDTHS, __payload, |__cursor| {
                $crate::__private::LogArgs::encode_args(&__args, &__TYPES, &__sizes, __cursor);
            });
        }
    }};
}

/// Log at [`Level::Error`](crate::Level::Error).
#[macro_export]
macro_rules! error {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Error, $fmt $(, $arg)*)
    };
}

/// Log at [`Level::Warn`](crate::Level::Warn).
#[macro_export]
macro_rules! warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Warn, $fmt $(, $arg)*)
    };
}

/// Log at [`Level::Notice`](crate::Level::Notice).
#[macro_export]
macro_rules! notice {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Notice, $fmt $(, $arg)*)
    };
}

/// Log at [`Level::Debug`](crate::Level::Debug).
#[macro_export]
macro_rules! debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Debug, $fmt $(, $arg)*)
    };
}
