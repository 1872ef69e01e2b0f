//! Import delimited text records into an InfluxDB measurement.
//!
//! Every qualifying input line becomes one [`DataPoint`]: a timestamp composed
//! from the leading columns, numeric fields from the columns after them and an
//! optional, run-wide tag set. The [`IngestDriver`] either writes each point
//! after checking the store for an existing one, or collects everything and
//! writes a single batch at the end.

pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod record;
pub mod store;
pub mod timestamp;

pub use config::{
    FieldSpec, ImportConfig, IterationOrder, MalformedPolicy, ServerAddress, TagSet, WriteMode,
};
pub use dedup::DuplicateChecker;
pub use error::IngestError;
pub use ingest::{read_lines, IngestDriver, IngestReport, ProgressTracker, StopReason};
pub use record::{DataPoint, RawRecord, RecordTranslator};
pub use store::{PointStore, Rows, StoreError};
pub use timestamp::{render_timestamp, TimestampSpec};
