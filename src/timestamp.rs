//! Composing timestamps from the leading columns of a record.
//!
//! The layout uses chrono's strftime syntax. Each comma separated part of the
//! layout consumes one column, so `%m/%d/%Y,%H:%M` reads `01/17/2020,03:03`
//! from the first two cells.

use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Timelike,
};
use chrono_tz::Tz;

use crate::error::IngestError;
use crate::record::{RawRecord, DELIMITER};

/// Layout, column count and source timezone, fixed for a whole run.
#[derive(Debug, Clone)]
pub struct TimestampSpec {
    layout: String,
    columns: usize,
    timezone: Tz,
}

impl TimestampSpec {
    pub fn new(layout: &str, timezone: &str) -> Result<Self, IngestError> {
        if layout.trim().is_empty() {
            return Err(IngestError::EmptyLayout);
        }
        let timezone = timezone.parse::<Tz>().map_err(|e| IngestError::UnknownTimezone {
            name: timezone.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            layout: layout.to_string(),
            columns: layout.split(DELIMITER).count(),
            timezone,
        })
    }

    /// Number of leading cells the timestamp is built from.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Join the leading cells of `record` and parse them in the source timezone.
    pub fn compose(&self, record: &RawRecord<'_>) -> Result<DateTime<FixedOffset>, IngestError> {
        let cells = record.cells();
        if cells.len() < self.columns {
            return Err(IngestError::MissingTimestampColumns {
                needed: self.columns,
                found: cells.len(),
            });
        }
        let value = cells[..self.columns].join(",");
        let naive = self.parse_naive(&value)?;

        Ok(match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.fixed_offset(),
            // DST fall-back: the repeated hour resolves to standard time
            LocalResult::Ambiguous(_, standard) => standard.fixed_offset(),
            // DST gap: keep the wall clock time with the offset in force before the jump
            LocalResult::None => {
                let before = naive.checked_sub_signed(Duration::hours(6)).unwrap_or(naive);
                let offset = self.timezone.offset_from_utc_datetime(&before).fix();
                DateTime::from_naive_utc_and_offset(naive - offset, offset)
            }
        })
    }

    fn parse_naive(&self, value: &str) -> Result<NaiveDateTime, IngestError> {
        match NaiveDateTime::parse_from_str(value, &self.layout) {
            Ok(naive) => Ok(naive),
            Err(source) => match NaiveDate::parse_from_str(value, &self.layout) {
                Ok(date) => Ok(date.and_time(NaiveTime::default())),
                Err(_) => Err(IngestError::Timestamp {
                    value: value.to_string(),
                    layout: self.layout.clone(),
                    source,
                }),
            },
        }
    }
}

/// Render `ts` as `YYYY-MM-DDTHH:MM:SS[.fraction]+HH:MM`.
///
/// The same string goes into write payload logs and duplicate-check queries,
/// so it must never contain a space.
pub fn render_timestamp(ts: &DateTime<FixedOffset>) -> String {
    let nanos = ts.nanosecond() % 1_000_000_000;
    let pattern = if nanos == 0 {
        "%Y-%m-%dT%H:%M:%S%:z"
    } else if nanos % 1_000 == 0 {
        "%Y-%m-%dT%H:%M:%S%.6f%:z"
    } else {
        "%Y-%m-%dT%H:%M:%S%.9f%:z"
    };
    ts.format(pattern).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(layout: &str, tz: &str, line: &str) -> Result<DateTime<FixedOffset>, IngestError> {
        let spec = TimestampSpec::new(layout, tz)?;
        let record = RawRecord::parse(line).expect("data line");
        spec.compose(&record)
    }

    #[test]
    fn column_count_follows_layout() {
        assert_eq!(TimestampSpec::new("%m/%d/%Y,%H:%M", "UTC").unwrap().columns(), 2);
        assert_eq!(TimestampSpec::new("%Y-%m-%d %H:%M:%S", "UTC").unwrap().columns(), 1);
        assert_eq!(TimestampSpec::new("%Y,%m,%d,%H", "UTC").unwrap().columns(), 4);
    }

    #[test]
    fn two_columns_in_utc() {
        let ts = compose("%m/%d/%Y,%H:%M", "UTC", "01/17/2020,03:03,10.5").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-01-17T03:03:00+00:00");
    }

    #[test]
    fn source_timezone_offset_is_kept() {
        let winter = compose("%m/%d/%Y,%H:%M", "Europe/Zurich", "01/17/2020,03:03,1").unwrap();
        assert_eq!(render_timestamp(&winter), "2020-01-17T03:03:00+01:00");

        let summer = compose("%m/%d/%Y,%H:%M", "Europe/Zurich", "07/17/2020,03:03,1").unwrap();
        assert_eq!(render_timestamp(&summer), "2020-07-17T03:03:00+02:00");
    }

    #[test]
    fn subsecond_precision() {
        let ts = compose("%Y-%m-%d %H:%M:%S%.f", "UTC", "2020-01-17 03:03:01.250,1").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-01-17T03:03:01.250000+00:00");
    }

    #[test]
    fn date_only_layout_is_midnight() {
        let ts = compose("%Y-%m-%d", "UTC", "2020-01-17,1").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-01-17T00:00:00+00:00");
    }

    #[test]
    fn ambiguous_time_resolves_to_standard_time() {
        // 2020-10-25 02:30 occurs twice in Zurich
        let ts = compose("%Y-%m-%d %H:%M", "Europe/Zurich", "2020-10-25 02:30,1").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-10-25T02:30:00+01:00");
    }

    #[test]
    fn gap_time_keeps_standard_offset() {
        // 2020-03-29 02:30 is skipped in Zurich
        let ts = compose("%Y-%m-%d %H:%M", "Europe/Zurich", "2020-03-29 02:30,1").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-03-29T02:30:00+01:00");

        let ts = compose("%Y-%m-%d %H:%M", "America/New_York", "2020-03-08 02:15,1").unwrap();
        assert_eq!(render_timestamp(&ts), "2020-03-08T02:15:00-05:00");
    }

    #[test]
    fn unknown_timezone() {
        let err = TimestampSpec::new("%Y", "Mars/Olympus").unwrap_err();
        assert!(matches!(
            err,
            IngestError::UnknownTimezone { ref name, .. } if name == "Mars/Olympus"
        ));
    }

    #[test]
    fn empty_layout() {
        assert!(matches!(TimestampSpec::new("  ", "UTC"), Err(IngestError::EmptyLayout)));
    }

    #[test]
    fn value_not_matching_layout() {
        let err = compose("%m/%d/%Y,%H:%M", "UTC", "2020-01-17,03:03,1").unwrap_err();
        match err {
            IngestError::Timestamp { value, layout, .. } => {
                assert_eq!(value, "2020-01-17,03:03");
                assert_eq!(layout, "%m/%d/%Y,%H:%M");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn too_few_columns() {
        let err = compose("%Y,%m,%d", "UTC", "2020,01").unwrap_err();
        assert!(matches!(err, IngestError::MissingTimestampColumns { needed: 3, found: 2 }));
    }
}
