//! Provides helpers to parse and render memory sizes.
//!
//! Memory limits of groups are given in the config as human readable strings like "64m". These
//! are parsed via [parse_size](parse_size) and rendered back (e.g. by the stats endpoint of the
//! server) via [format_size](format_size).
use std::fmt::Write;

/// Renders a given size in bytes into the given writer, using the largest fitting binary unit.
///
/// Note that [format_size](format_size) provides a shortcut which returns a String.
pub fn format_bytes(size_in_bytes: i64, f: &mut dyn Write) -> std::fmt::Result {
    if size_in_bytes == 1 {
        return write!(f, "1 byte");
    } else if size_in_bytes < 1024 {
        return write!(f, "{} bytes", size_in_bytes);
    }

    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut unit = 0;
    let mut size = size_in_bytes as f64 / 1024.;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size < 10. {
        write!(f, "{:.2} {}", size, UNITS[unit])
    } else if size < 100. {
        write!(f, "{:.1} {}", size, UNITS[unit])
    } else {
        write!(f, "{:.0} {}", size, UNITS[unit])
    }
}

/// Renders a given size in bytes.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::format_size(0), "0 bytes");
/// assert_eq!(peercache::fmt::format_size(1), "1 byte");
/// assert_eq!(peercache::fmt::format_size(100), "100 bytes");
/// assert_eq!(peercache::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(peercache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(peercache::fmt::format_size(64 * 1024 * 1024), "64.0 MiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: i64) -> String {
    let mut result = String::new();
    let _ = format_bytes(size_in_bytes, &mut result);

    result
}

/// Parses a memory size like "64m" into a number of bytes.
///
/// The number can be followed by one of these (case insensitive) suffixes:
/// * **b**: bytes (same as no suffix)
/// * **k**: KiB (1024 bytes)
/// * **m**: MiB
/// * **g**: GiB
/// * **t**: TiB
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(peercache::fmt::parse_size("64 M").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(peercache::fmt::parse_size("3 T").unwrap(), 3 * 1024 * 1024 * 1024 * 1024);
///
/// // Unknown suffixes, decimals and negative numbers are rejected...
/// assert_eq!(peercache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<i64> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([bBkKmMgGtT]?) *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size. \
             Expected a positive number and optionally 'b', 'k', 'm', 'g' or 't' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<i64>()?;
    let factor: i64 = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => 1,
    };

    number
        .checked_mul(factor)
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", str.as_ref()))
}
