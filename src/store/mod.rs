//! The time-series store as seen by the ingestion core.
//!
//! [`PointStore`] covers the calls an import run makes: connectivity checks,
//! database selection, point writes and the count query used for duplicate
//! detection. [`InfluxStore`] talks to an InfluxDB server, [`MemoryStore`]
//! keeps everything in process.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::DataPoint;

pub mod influx;
pub mod memory;

pub use influx::InfluxStore;
pub use memory::{MemoryStore, StoreCall};

/// Result rows of the first statement of a query, one JSON value per column.
pub type Rows = Vec<Vec<serde_json::Value>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Client(#[from] influxdb::Error),

    #[error("malformed response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("server reported: {0}")]
    Server(String),

    #[error("timestamp {0} cannot be represented by the store")]
    Timestamp(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("database {0:?} not found")]
    UnknownDatabase(String),

    #[error("connection already closed")]
    Closed,
}

/// One long-lived store connection.
///
/// Every call is a single round trip; callers await each one before issuing
/// the next.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Returns the server's build type and version.
    async fn ping(&self) -> Result<(String, String), StoreError>;

    async fn list_databases(&self) -> Result<Vec<String>, StoreError>;

    async fn use_database(&mut self, name: &str) -> Result<(), StoreError>;

    /// Persist `points` in one request.
    async fn write(&self, points: &[DataPoint]) -> Result<(), StoreError>;

    async fn query(&self, statement: &str) -> Result<Rows, StoreError>;

    async fn close(&mut self) -> Result<(), StoreError>;
}
