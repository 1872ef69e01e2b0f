use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};

use crate::config::ImportConfig;
use crate::error::IngestError;
use crate::timestamp::render_timestamp;

/// Cell separator. Cells are never quoted.
pub const DELIMITER: char = ',';

/// True if `line` holds data: not blank and starting with a digit.
///
/// Headers, comments and empty lines all fail this test.
pub fn is_data_line(line: &str) -> bool {
    line.trim_start().chars().next().map_or(false, |c| c.is_ascii_digit())
}

/// The cells of one data line, borrowed from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<'a> {
    cells: Vec<&'a str>,
}

impl<'a> RawRecord<'a> {
    /// Split `line` into cells, or `None` if it is not a data line.
    pub fn parse(line: &'a str) -> Option<Self> {
        if !is_data_line(line) {
            return None;
        }
        Some(Self {
            cells: line.split(DELIMITER).collect(),
        })
    }

    pub fn cells(&self) -> &[&'a str] {
        &self.cells
    }

    pub fn get(&self, column: usize) -> Option<&'a str> {
        self.cells.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// One measurement sample as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub measurement: String,
    #[serde(serialize_with = "serialize_time")]
    pub time: DateTime<FixedOffset>,
    pub fields: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl DataPoint {
    /// The timestamp as used in queries, e.g. `2020-01-17T03:03:00+01:00`.
    pub fn time_string(&self) -> String {
        render_timestamp(&self.time)
    }
}

fn serialize_time<S: Serializer>(
    time: &DateTime<FixedOffset>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&render_timestamp(time))
}

/// Turns data lines into [`DataPoint`]s for one run's configuration.
#[derive(Debug, Clone, Copy)]
pub struct RecordTranslator<'a> {
    config: &'a ImportConfig,
}

impl<'a> RecordTranslator<'a> {
    pub fn new(config: &'a ImportConfig) -> Self {
        Self { config }
    }

    pub fn translate(&self, record: &RawRecord<'_>) -> Result<DataPoint, IngestError> {
        let time = self.config.timestamp.compose(record)?;

        // field values start right after the timestamp columns
        let offset = self.config.timestamp.columns();
        let mut fields = BTreeMap::new();
        for (i, name) in self.config.fields.names().iter().enumerate() {
            let column = offset + i;
            let raw = record.get(column).ok_or_else(|| IngestError::MissingField {
                field: name.clone(),
                column,
            })?;
            let value = raw.trim().parse::<f64>().map_err(|source| IngestError::InvalidField {
                field: name.clone(),
                value: raw.to_string(),
                source,
            })?;
            fields.insert(name.clone(), value);
        }

        Ok(DataPoint {
            measurement: self.config.measurement.clone(),
            time,
            fields,
            tags: self.config.tags.to_map(),
        })
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::config::{FieldSpec, TagSet};
    use crate::timestamp::TimestampSpec;

    fn config(tags: Option<&str>, fields: &str) -> ImportConfig {
        ImportConfig::new(
            "weather",
            TimestampSpec::new("%m/%d/%Y,%H:%M", "UTC").unwrap(),
            FieldSpec::parse(fields).unwrap(),
            TagSet::parse(tags).unwrap(),
        )
        .unwrap()
    }

    #[test_case("01/17/2020,03:03,10.5", true ; "data")]
    #[test_case("  7,1", true ; "leading spaces")]
    #[test_case("date,time,temp", false ; "header")]
    #[test_case("# comment", false ; "comment")]
    #[test_case("", false ; "empty")]
    #[test_case("   \t", false ; "blank")]
    fn data_line_heuristic(line: &str, expected: bool) {
        assert_eq!(is_data_line(line), expected);
        assert_eq!(RawRecord::parse(line).is_some(), expected);
    }

    #[test]
    fn cells_are_split_without_quoting() {
        let record = RawRecord::parse("1,\"a,b\",3").unwrap();
        assert_eq!(record.cells(), &["1", "\"a", "b\"", "3"]);
        assert_eq!(record.len(), 4);
        assert_eq!(record.get(3), Some("3"));
        assert_eq!(record.get(4), None);
    }

    #[test]
    fn translate_fields_after_timestamp_columns() {
        let config = config(None, "temp");
        let record = RawRecord::parse("01/17/2020,03:03,10.5").unwrap();
        let point = RecordTranslator::new(&config).translate(&record).unwrap();

        assert_eq!(point.measurement, "weather");
        assert_eq!(point.time_string(), "2020-01-17T03:03:00+00:00");
        assert!(!point.time_string().contains(' '));
        assert_eq!(point.fields, BTreeMap::from([("temp".to_string(), 10.5)]));
        assert_eq!(point.tags, None);
    }

    #[test]
    fn translate_trims_field_cells_and_attaches_tags() {
        let config = config(Some("host=a,env=prod"), "temp,hum");
        let record = RawRecord::parse("01/17/2020,03:03, 10.5 ,40\r").unwrap();
        let point = RecordTranslator::new(&config).translate(&record).unwrap();

        assert_eq!(point.fields["temp"], 10.5);
        assert_eq!(point.fields["hum"], 40.0);
        let tags = point.tags.unwrap();
        assert_eq!(tags["host"], "a");
        assert_eq!(tags["env"], "prod");
    }

    #[test]
    fn translate_rejects_non_numeric_field() {
        let config = config(None, "temp");
        let record = RawRecord::parse("01/17/2020,03:03,warm").unwrap();
        let err = RecordTranslator::new(&config).translate(&record).unwrap_err();
        assert!(matches!(
            err,
            IngestError::InvalidField { ref field, ref value, .. }
                if field == "temp" && value == "warm"
        ));
    }

    #[test]
    fn translate_rejects_missing_field_column() {
        let config = config(None, "temp,hum");
        let record = RawRecord::parse("01/17/2020,03:03,10.5").unwrap();
        let err = RecordTranslator::new(&config).translate(&record).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingField { ref field, column: 3 } if field == "hum"
        ));
    }

    #[test]
    fn serialized_point_uses_compact_time() {
        let config = config(Some("host=a"), "temp");
        let record = RawRecord::parse("01/17/2020,03:03,10.5").unwrap();
        let point = RecordTranslator::new(&config).translate(&record).unwrap();
        let json = serde_json::to_value(&point).unwrap();

        assert_eq!(json["time"], "2020-01-17T03:03:00+00:00");
        assert_eq!(json["fields"]["temp"], 10.5);
        assert_eq!(json["tags"]["host"], "a");
    }
}
