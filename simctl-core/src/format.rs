//! Formatting helpers for CLI output.

use chrono::Duration;

/// Split whole seconds into (hours, minutes, seconds).
pub fn split_hms(seconds: u64) -> (u64, u64, u64) {
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    (minutes / 60, minutes % 60, seconds)
}

/// Format an elapsed run time as `H:MM:SS`. Negative durations show as zero.
pub fn format_runtime(elapsed: Duration) -> String {
    let (h, m, s) = split_hms(elapsed.num_seconds().max(0) as u64);
    format!("{h}:{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_hms() {
        assert_eq!(split_hms(33), (0, 0, 33));
        assert_eq!(split_hms(120), (0, 2, 0));
        assert_eq!(split_hms(7200), (2, 0, 0));
        assert_eq!(split_hms(72 * 3600 + 45 * 60 + 15), (72, 45, 15));
    }

    #[test]
    fn test_format_runtime() {
        assert_eq!(format_runtime(Duration::seconds(3725)), "1:02:05");
        assert_eq!(format_runtime(Duration::seconds(-5)), "0:00:00");
    }
}
