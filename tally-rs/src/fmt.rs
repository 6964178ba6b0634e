//! Provides formatting helpers for durations as shown by the diagnostics.
use std::fmt::Write;

/// Formats a duration given in microseconds.
///
/// This function determines the ideal unit (ranging from microseconds to seconds) to provide
/// a concise representation.
pub fn format_micros(micros: i32, f: &mut dyn Write) -> std::fmt::Result {
    if micros < 1_000 {
        write!(f, "{} us", micros)
    } else if micros < 10_000 {
        write!(f, "{:.2} ms", micros as f32 / 1_000.)
    } else if micros < 100_000 {
        write!(f, "{:.1} ms", micros as f32 / 1_000.)
    } else if micros < 1_000_000 {
        write!(f, "{} ms", micros / 1_000)
    } else if micros < 10_000_000 {
        write!(f, "{:.2} s", micros as f32 / 1_000_000.)
    } else {
        write!(f, "{:.1} s", micros as f32 / 1_000_000.)
    }
}

/// Formats a duration given in microseconds and returns a String representation.
///
/// # Examples
///
/// ```
/// assert_eq!(tally::fmt::format_short_duration(100), "100 us");
/// assert_eq!(tally::fmt::format_short_duration(8_192), "8.19 ms");
/// assert_eq!(tally::fmt::format_short_duration(128_123), "128 ms");
/// assert_eq!(tally::fmt::format_short_duration(1_128_123), "1.13 s");
/// ```
pub fn format_short_duration(duration_in_micros: i32) -> String {
    let mut result = String::new();
    let _ = format_micros(duration_in_micros, &mut result);
    result
}
