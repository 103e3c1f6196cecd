//! Derive a [`TimeRange`] from an input-data profile.
//!
//! A profile is a CSV file with a header row and one row per sample; the first
//! column holds the sample timestamp. Only the first column is read.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::types::TimeRange;

/// Timestamp layouts accepted in the first column.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M",
];

impl TimeRange {
    /// Read the profile at `path`.
    pub fn from_profile_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::Profile(format!("failed to open profile {}: {}", path.display(), e))
        })?;
        Self::from_profile_reader(file)
    }

    /// Derive start, end and sampling frequency from profile rows.
    ///
    /// Frequency is the spacing of the first two samples; every later pair
    /// must be spaced the same.
    pub fn from_profile_reader<R: Read>(reader: R) -> Result<Self> {
        let mut samples = Vec::new();
        for (line_no, line) in BufReader::new(reader).lines().enumerate().skip(1) {
            let line = line?;
            let first = line.split(',').next().unwrap_or("").trim();
            if first.is_empty() {
                continue;
            }
            let ts = parse_sample_timestamp(first).ok_or_else(|| {
                Error::Profile(format!(
                    "line {}: unrecognised timestamp '{}'",
                    line_no + 1,
                    first
                ))
            })?;
            samples.push(ts);
        }

        if samples.len() < 2 {
            return Err(Error::Profile(format!(
                "need at least two samples to infer frequency, found {}",
                samples.len()
            )));
        }

        let frequency = samples[1] - samples[0];
        if let Some(pair) = samples.windows(2).find(|w| w[1] - w[0] != frequency) {
            return Err(Error::Profile(format!(
                "irregular sampling between {} and {}",
                pair[0], pair[1]
            )));
        }

        let range = TimeRange::new(samples[0], samples[samples.len() - 1], frequency)?;
        tracing::debug!(
            start = %range.start(),
            end = %range.end(),
            frequency_secs = frequency.num_seconds(),
            samples = samples.len(),
            "Derived time range from profile"
        );
        Ok(range)
    }
}

fn parse_sample_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_short_us_dates() {
        let csv = "UTC, 301, 302, 303
1/1/16 0:00, 2965.29, 1184.90, 1676.76
1/1/16 1:00, 3010.51, 1215.34, 1731.23
1/1/16 2:00, 3002.10, 1192.11, 1709.06
";
        let range = TimeRange::from_profile_reader(csv.as_bytes()).unwrap();
        assert_eq!(range.start().to_string(), "2016-01-01 00:00:00");
        assert_eq!(range.end().to_string(), "2016-01-01 02:00:00");
        assert_eq!(range.frequency(), Duration::hours(1));
    }

    #[test]
    fn test_iso_dates() {
        let csv = "UTC,zone
2016-01-01 00:00:00,1
2016-01-01 03:00:00,2
2016-01-01 06:00:00,3
";
        let range = TimeRange::from_profile_reader(csv.as_bytes()).unwrap();
        assert_eq!(range.frequency(), Duration::hours(3));
        assert_eq!(range.end().to_string(), "2016-01-01 06:00:00");
    }

    #[test]
    fn test_irregular_sampling() {
        let csv = "UTC,zone
2016-01-01 00:00,1
2016-01-01 01:00,2
2016-01-01 03:00,3
";
        let err = TimeRange::from_profile_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Profile(msg) if msg.contains("irregular")));
    }

    #[test]
    fn test_too_few_samples() {
        let csv = "UTC,zone\n2016-01-01 00:00,1\n";
        assert!(matches!(
            TimeRange::from_profile_reader(csv.as_bytes()),
            Err(Error::Profile(_))
        ));
    }

    #[test]
    fn test_bad_timestamp() {
        let csv = "UTC,zone\nnot-a-date,1\n2016-01-01 00:00,1\n";
        let err = TimeRange::from_profile_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Profile(msg) if msg.contains("line 2")));
    }
}
