//! Compile-time analysis of printf-style format strings.
//!
//! Every `log!` expansion runs these const fns inside `const`/`static`
//! items, so each call site's parameter layout is a build-time constant and
//! the hot path never parses a format string. Malformed specifiers and the
//! unsupported `%n` fail the build.

/// Classification of a single conversion parameter, derived from the format
/// string alone.
///
/// The classification answers the three questions the encoder and the
/// formatter need without looking at the format string again:
/// (a) is a `&str` argument a string (`%s`) or a pointer (`%p`),
/// (b) does a string need truncating to a static precision, and
/// (c) is this parameter a `*` width/precision rather than a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Not a parameter: running off the end of the string mid-conversion.
    Invalid,
    /// The `*` in `%*d`: a runtime field width.
    DynamicWidth,
    /// The `*` in `%.*s`: a runtime precision.
    DynamicPrecision,
    /// Any non-`%s` conversion value (`%d`, `%f`, `%p`, ...).
    NonString,
    /// A `%.*s` string, truncated to the preceding dynamic precision.
    StringDynPrecision,
    /// A `%s` string with no precision.
    StringNoPrecision,
    /// A `%.Ns` string, truncated to the static precision `N`.
    StringFixed(u32),
}

const fn is_flag(c: u8) -> bool {
    matches!(c, b'-' | b'+' | b' ' | b'#' | b'0')
}

const fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

const fn is_length(c: u8) -> bool {
    matches!(c, b'h' | b'l' | b'j' | b'z' | b't' | b'L')
}

const fn is_terminal(c: u8) -> bool {
    matches!(
        c,
        b'd' | b'i'
            | b'u' | b'o'
            | b'x' | b'X'
            | b'f' | b'F'
            | b'e' | b'E'
            | b'g' | b'G'
            | b'a' | b'A'
            | b'c' | b'p'
            | b'%' | b's'
            | b'n'
    )
}

/// Classify the `param_num`-th parameter of `fmt` (zero-based).
///
/// Scans conversions of the shape
/// `%<flags><width>.<precision><length><terminal>`. Only precision and the
/// terminal matter for the classification; everything else is validated and
/// skipped. Returns [`ParamType::Invalid`] once `param_num` runs past the
/// last parameter, which is how [`count_params`] terminates.
///
/// # Panics (at compile time, when evaluated in const context)
///
/// Panics on an unrecognized character in terminal position and on `%n`,
/// whose store-the-offset semantics would require formatting on the hot
/// path.
pub const fn param_info(fmt: &str, param_num: usize) -> ParamType {
    let f = fmt.as_bytes();
    let n = f.len();
    let mut remaining = param_num;
    let mut pos = 0;

    while pos < n {
        if f[pos] != b'%' {
            pos += 1;
            continue;
        }
        pos += 1;
        if pos >= n {
            return ParamType::Invalid;
        }

        // Two %'s in a row: a literal percent, no parameter.
        if f[pos] == b'%' {
            pos += 1;
            continue;
        }

        // Consume flags.
        while pos < n && is_flag(f[pos]) {
            pos += 1;
        }

        // Consume width.
        if pos < n && f[pos] == b'*' {
            if remaining == 0 {
                return ParamType::DynamicWidth;
            }
            remaining -= 1;
            pos += 1;
        } else {
            while pos < n && is_digit(f[pos]) {
                pos += 1;
            }
        }

        // Consume precision.
        let mut has_dynamic_precision = false;
        let mut precision: i64 = -1;
        if pos < n && f[pos] == b'.' {
            pos += 1;
            if pos < n && f[pos] == b'*' {
                if remaining == 0 {
                    return ParamType::DynamicPrecision;
                }
                has_dynamic_precision = true;
                remaining -= 1;
                pos += 1;
            } else {
                precision = 0;
                while pos < n && is_digit(f[pos]) {
                    precision = 10 * precision + (f[pos] - b'0') as i64;
                    pos += 1;
                }
            }
        }

        // Consume length modifiers.
        while pos < n && is_length(f[pos]) {
            pos += 1;
        }

        if pos >= n {
            return ParamType::Invalid;
        }
        if !is_terminal(f[pos]) {
            panic!("unrecognized conversion specifier after %");
        }
        // %n would require the formatted byte count at log time.
        if f[pos] == b'n' {
            panic!("%n conversions are not supported");
        }

        if remaining != 0 {
            remaining -= 1;
            pos += 1;
            continue;
        }

        if f[pos] != b's' {
            return ParamType::NonString;
        }
        if has_dynamic_precision {
            return ParamType::StringDynPrecision;
        }
        if precision < 0 {
            return ParamType::StringNoPrecision;
        }
        return ParamType::StringFixed(precision as u32);
    }

    ParamType::Invalid
}

/// Number of parameters `fmt` consumes.
///
/// Counts parameters, not specifiers: `%*.*d` counts as 3 because the two
/// `*`s each take an argument.
pub const fn count_params(fmt: &str) -> usize {
    let mut count = 0;
    while !matches!(param_info(fmt, count), ParamType::Invalid) {
        count += 1;
    }
    count
}

/// The full parameter classification for `fmt`; `N` must equal
/// [`count_params`]`(fmt)`.
pub const fn analyze<const N: usize>(fmt: &str) -> [ParamType; N] {
    let mut types = [ParamType::Invalid; N];
    let mut i = 0;
    while i < N {
        types[i] = param_info(fmt, i);
        i += 1;
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_has_no_params() {
        assert_eq!(count_params("hello world"), 0);
        assert_eq!(count_params("100%% done"), 0);
    }

    #[test]
    fn test_counts_star_parameters() {
        assert_eq!(count_params("%s"), 1);
        assert_eq!(count_params("%d %s"), 2);
        assert_eq!(count_params("%*.*f"), 3);
        assert_eq!(count_params("%-+ #010.7llx"), 1);
    }

    #[test]
    fn test_string_classifications() {
        assert_eq!(param_info("%s", 0), ParamType::StringNoPrecision);
        assert_eq!(param_info("%.5s", 0), ParamType::StringFixed(5));
        assert_eq!(param_info("%.0s", 0), ParamType::StringFixed(0));
        assert_eq!(param_info("%.*s", 0), ParamType::DynamicPrecision);
        assert_eq!(param_info("%.*s", 1), ParamType::StringDynPrecision);
    }

    #[test]
    fn test_non_string_classifications() {
        assert_eq!(param_info("%d", 0), ParamType::NonString);
        assert_eq!(param_info("%p", 0), ParamType::NonString);
        assert_eq!(param_info("%10.3f", 0), ParamType::NonString);
        assert_eq!(param_info("%*d", 0), ParamType::DynamicWidth);
        assert_eq!(param_info("%*d", 1), ParamType::NonString);
    }

    #[test]
    fn test_analyze_orders_parameters() {
        const TYPES: [ParamType; 3] = analyze::<3>("%*.*s");
        assert_eq!(
            TYPES,
            [
                ParamType::DynamicWidth,
                ParamType::DynamicPrecision,
                ParamType::StringDynPrecision
            ]
        );
    }

    #[test]
    fn test_trailing_percent_is_not_a_parameter() {
        assert_eq!(count_params("50%"), 0);
        assert_eq!(count_params("%d %"), 1);
    }

    #[test]
    #[should_panic(expected = "%n conversions")]
    fn test_rejects_percent_n() {
        let _ = param_info("%n", 0);
    }

    #[test]
    #[should_panic(expected = "unrecognized conversion")]
    fn test_rejects_unknown_terminal() {
        let _ = param_info("%q", 0);
    }
}
