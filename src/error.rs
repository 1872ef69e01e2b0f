use std::num::ParseFloatError;

use thiserror::Error;

use crate::store::StoreError;

/// Failures that end an import run.
///
/// Duplicates and rejected writes are not errors; they are reported through
/// [`crate::StopReason`].
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("measurement name must not be empty")]
    EmptyMeasurement,

    #[error("timestamp layout must not be empty")]
    EmptyLayout,

    #[error("unknown timezone {name:?}: {reason}")]
    UnknownTimezone { name: String, reason: String },

    #[error("tag entry {entry:?} is not of the form KEY=VALUE")]
    MalformedTag { entry: String },

    #[error("tag key {key:?} given more than once")]
    DuplicateTag { key: String },

    #[error("at least one field name is required")]
    NoFields,

    #[error("field name at position {position} is empty")]
    EmptyFieldName { position: usize },

    #[error("field {name:?} given more than once")]
    DuplicateField { name: String },

    #[error("timestamp needs {needed} columns but the record has {found}")]
    MissingTimestampColumns { needed: usize, found: usize },

    #[error("timestamp {value:?} does not match layout {layout:?}: {source}")]
    Timestamp {
        value: String,
        layout: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("no value for field {field:?} in column {column}")]
    MissingField { field: String, column: usize },

    #[error("value {value:?} of field {field:?} is not a number: {source}")]
    InvalidField {
        field: String,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("duplicate check failed: {0}")]
    Query(#[source] StoreError),

    #[error("line {line}: {error}")]
    AtLine { line: usize, error: Box<IngestError> },
}

impl IngestError {
    /// True for failures confined to one record's field values.
    ///
    /// Only these may be skipped under [`crate::MalformedPolicy::Skip`];
    /// everything else invalidates the whole run.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self.without_line(),
            IngestError::MissingField { .. } | IngestError::InvalidField { .. }
        )
    }

    /// Attach the 1-based input line the error was raised for.
    pub fn at_line(self, line: usize) -> Self {
        IngestError::AtLine {
            line,
            error: Box::new(self),
        }
    }

    /// Input line of the failure, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            IngestError::AtLine { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// The error with any line information stripped.
    pub fn without_line(&self) -> &IngestError {
        match self {
            IngestError::AtLine { error, .. } => error.without_line(),
            other => other,
        }
    }
}
