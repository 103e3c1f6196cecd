//! Range validation
//!
//! Turns a human-specified date range and interval into the 1-based step
//! selection the engine runs. Pure arithmetic: no I/O, no shared state.
//!
//! A bare end date (no time component) is widened to the last sample of that
//! day, so `--end 2016-01-02` on hourly data means `2016-01-02 23:00:00`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::ValidationError;
use crate::types::{TimeRange, ValidatedPlan};

/// A timestamp parsed from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub value: NaiveDateTime,
    /// Whether an hour component was given
    pub has_time: bool,
}

/// Validates requested ranges against one [`TimeRange`].
#[derive(Debug, Clone, Copy)]
pub struct RangeValidator {
    range: TimeRange,
}

impl RangeValidator {
    pub fn new(range: TimeRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    /// See [`validate_range`].
    pub fn validate(
        &self,
        start: &str,
        end: &str,
        interval: u32,
    ) -> Result<ValidatedPlan, ValidationError> {
        validate_range(&self.range, start, end, interval)
    }
}

/// Compute the plan for `[start, end]` at `interval` steps per unit of work.
///
/// Checks, in order: interval is positive, both dates parse, start is not
/// after end, both dates lie inside `range`, both fall on a sample boundary,
/// and the interval evenly divides the inclusive step count.
///
/// Order is checked before bounds so a reversed pair always reports
/// [`ValidationError::InvalidDateArgument`], even when a date is out of range.
pub fn validate_range(
    range: &TimeRange,
    start: &str,
    end: &str,
    interval: u32,
) -> Result<ValidatedPlan, ValidationError> {
    if interval == 0 {
        return Err(ValidationError::InvalidInterval);
    }

    let start_ts = parse_timestamp(start)?.value;
    let end_ts = widen_end(range, parse_timestamp(end)?);

    if start_ts > end_ts {
        return Err(ValidationError::InvalidDateArgument {
            start: start_ts.to_string(),
            end: end_ts.to_string(),
        });
    }

    for ts in [start_ts, end_ts] {
        if !range.contains(ts) {
            return Err(ValidationError::DateOutOfRange {
                date: ts.to_string(),
                start: range.start().to_string(),
                end: range.end().to_string(),
            });
        }
    }

    let start_index = range
        .step_index(start_ts)
        .ok_or_else(|| ValidationError::TimestampNotOnGrid(start_ts.to_string()))?;
    let end_index = range
        .step_index(end_ts)
        .ok_or_else(|| ValidationError::TimestampNotOnGrid(end_ts.to_string()))?;

    let steps = end_index - start_index + 1;
    if steps % u64::from(interval) != 0 {
        return Err(ValidationError::IntervalDoesNotDivide { interval, steps });
    }

    let plan = ValidatedPlan {
        start_index,
        step_count: steps / u64::from(interval),
        interval,
    };
    tracing::debug!(
        start_index = plan.start_index,
        step_count = plan.step_count,
        interval = plan.interval,
        "Validated range"
    );
    Ok(plan)
}

/// Parse `YYYY-MM-DD[ HH[:MM[:SS]]]`.
///
/// Structural problems yield `InvalidDateFormat`; impossible dates or times
/// such as `2016-02-30` or `2016-01-01 25` yield `InvalidDateValue`.
pub fn parse_timestamp(input: &str) -> Result<ParsedTimestamp, ValidationError> {
    let format_err = || ValidationError::InvalidDateFormat(input.to_string());
    let value_err = || ValidationError::InvalidDateValue(input.to_string());

    let trimmed = input.trim();
    let (date_part, time_part) = match trimmed.split_once(' ') {
        Some((d, t)) => (d, Some(t.trim_start())),
        None => (trimmed, None),
    };

    let date_fields = split_numeric(date_part, '-', &[4, 2, 2]).ok_or_else(format_err)?;
    let date = NaiveDate::from_ymd_opt(date_fields[0] as i32, date_fields[1], date_fields[2])
        .ok_or_else(value_err)?;

    let Some(time_part) = time_part else {
        return Ok(ParsedTimestamp {
            value: date.and_time(NaiveTime::MIN),
            has_time: false,
        });
    };

    let mut hms = [0u32; 3];
    let fields: Vec<&str> = time_part.split(':').collect();
    if fields.len() > 3 {
        return Err(format_err());
    }
    for (slot, field) in hms.iter_mut().zip(&fields) {
        if field.is_empty() || field.len() > 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format_err());
        }
        *slot = field.parse().map_err(|_| format_err())?;
    }
    let time = NaiveTime::from_hms_opt(hms[0], hms[1], hms[2]).ok_or_else(value_err)?;

    Ok(ParsedTimestamp {
        value: date.and_time(time),
        has_time: true,
    })
}

/// Move a time-less end date to the last sample of its day.
fn widen_end(range: &TimeRange, end: ParsedTimestamp) -> NaiveDateTime {
    if end.has_time {
        return end.value;
    }
    end.value + range.frequency() * ((range.steps_per_day() - 1) as i32)
}

/// Split `s` on `sep` into all-digit fields of exactly the given widths.
fn split_numeric(s: &str, sep: char, widths: &[usize]) -> Option<Vec<u32>> {
    let fields: Vec<&str> = s.split(sep).collect();
    if fields.len() != widths.len() {
        return None;
    }
    fields
        .iter()
        .zip(widths)
        .map(|(field, &width)| {
            if field.len() == width && field.bytes().all(|b| b.is_ascii_digit()) {
                field.parse().ok()
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn hourly_range() -> TimeRange {
        TimeRange::new(
            ts("2016-01-01 00:00:00"),
            ts("2016-01-03 23:00:00"),
            Duration::hours(1),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_day_only() {
        let parsed = parse_timestamp("2016-01-01").unwrap();
        assert_eq!(parsed.value, ts("2016-01-01 00:00:00"));
        assert!(!parsed.has_time);
    }

    #[test]
    fn test_parse_hour_minute_second() {
        assert_eq!(
            parse_timestamp("2016-01-01 12").unwrap().value,
            ts("2016-01-01 12:00:00")
        );
        assert_eq!(
            parse_timestamp("2016-01-01 12:30").unwrap().value,
            ts("2016-01-01 12:30:00")
        );
        assert_eq!(
            parse_timestamp("2016-01-01 12:30:30").unwrap().value,
            ts("2016-01-01 12:30:30")
        );
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        for input in ["2016/01/01", "16-01-01", "2016-1-01", "2016-01-01 12:30:30:00", "", "yesterday"] {
            assert!(
                matches!(
                    parse_timestamp(input),
                    Err(ValidationError::InvalidDateFormat(_))
                ),
                "expected format error for {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_impossible_values() {
        for input in ["2016-02-30", "2015-13-01", "2016-01-01 24", "2016-01-01 10:61"] {
            assert!(
                matches!(
                    parse_timestamp(input),
                    Err(ValidationError::InvalidDateValue(_))
                ),
                "expected value error for {input:?}"
            );
        }
    }

    #[test]
    fn test_single_day_widened_to_last_hour() {
        let plan = validate_range(&hourly_range(), "2016-01-02", "2016-01-02", 24).unwrap();
        assert_eq!(
            plan,
            ValidatedPlan {
                start_index: 25,
                step_count: 1,
                interval: 24,
            }
        );
    }

    #[test]
    fn test_explicit_end_time_is_not_widened() {
        let plan =
            validate_range(&hourly_range(), "2016-01-01", "2016-01-01 11", 12).unwrap();
        assert_eq!(plan.start_index, 1);
        assert_eq!(plan.step_count, 1);
    }

    #[test]
    fn test_full_range() {
        let plan = validate_range(&hourly_range(), "2016-01-01", "2016-01-03", 6).unwrap();
        assert_eq!(plan.start_index, 1);
        assert_eq!(plan.step_count, 12);
        assert_eq!(plan.total_steps(), 72);
        assert_eq!(plan.end_index(), 72);
    }

    #[test]
    fn test_step_count_times_interval_matches_range() {
        let range = hourly_range();
        for interval in [1u32, 2, 3, 4, 6, 8, 12, 24, 48] {
            let plan = validate_range(&range, "2016-01-02", "2016-01-03", interval).unwrap();
            assert_eq!(plan.total_steps(), 48);
            assert_eq!(plan.start_index, 25);
        }
    }

    #[test]
    fn test_interval_does_not_divide() {
        let err = validate_range(&hourly_range(), "2016-01-01", "2016-01-01", 5).unwrap_err();
        assert_eq!(
            err,
            ValidationError::IntervalDoesNotDivide {
                interval: 5,
                steps: 24
            }
        );
    }

    #[test]
    fn test_zero_interval() {
        let err = validate_range(&hourly_range(), "2016-01-01", "2016-01-01", 0).unwrap_err();
        assert_eq!(err, ValidationError::InvalidInterval);
    }

    #[test]
    fn test_end_before_start() {
        let err = validate_range(&hourly_range(), "2016-01-01", "2015-12-31", 1).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDateArgument { .. }));

        let err = validate_range(&hourly_range(), "2016-01-03", "2016-01-02", 1).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDateArgument { .. }));
    }

    #[test]
    fn test_out_of_range() {
        let err = validate_range(&hourly_range(), "2020-06-01", "2020-06-02", 1).unwrap_err();
        assert!(matches!(err, ValidationError::DateOutOfRange { .. }));

        let err = validate_range(&hourly_range(), "2016-01-01", "2016-01-04", 1).unwrap_err();
        assert!(matches!(err, ValidationError::DateOutOfRange { .. }));
    }

    #[test]
    fn test_off_grid_start() {
        let err =
            validate_range(&hourly_range(), "2016-01-01 00:30", "2016-01-01 05", 1).unwrap_err();
        assert!(matches!(err, ValidationError::TimestampNotOnGrid(_)));
    }

    #[test]
    fn test_validator_wraps_range() {
        let validator = RangeValidator::new(hourly_range());
        let plan = validator.validate("2016-01-03", "2016-01-03", 24).unwrap();
        assert_eq!(plan.start_index, 49);
        assert_eq!(validator.range().frequency(), Duration::hours(1));
    }

    #[test]
    fn test_three_hourly_widening() {
        let range = TimeRange::new(
            ts("2016-01-01 00:00:00"),
            ts("2016-01-02 21:00:00"),
            Duration::hours(3),
        )
        .unwrap();
        // Last 3-hourly sample of the day is 21:00.
        let plan = validate_range(&range, "2016-01-02", "2016-01-02", 8).unwrap();
        assert_eq!(plan.start_index, 9);
        assert_eq!(plan.step_count, 1);
    }
}
