/// Utility functions for formatting and rounding
use time::{format_description, OffsetDateTime};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]")
        .expect("Failed to create format description");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Convert a time::Duration to seconds as u64, negative durations become 0
pub fn duration_to_seconds(duration: time::Duration) -> u64 {
    duration.whole_seconds().max(0) as u64
}

/// Round to a fixed number of decimal places, halves to even
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_timestamps() {
        let dt = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format_datetime(&dt), "14.11.2023 - 22:13:20");
    }

    #[test]
    fn clamps_negative_durations() {
        assert_eq!(duration_to_seconds(time::Duration::seconds(-5)), 0);
        assert_eq!(duration_to_seconds(time::Duration::seconds(90)), 90);
    }

    #[test]
    fn rounds_halves_to_even() {
        assert_eq!(round_to(21.25, 1), 21.2);
        assert_eq!(round_to(21.35, 1), 21.4);
        assert_eq!(round_to(-3.46, 1), -3.5);
        assert_eq!(round_to(40.5, 0), 40.0);
        assert_eq!(round_to(41.5, 0), 42.0);
    }
}
