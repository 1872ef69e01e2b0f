//! Run configuration consumed by the ingestion core.
//!
//! Everything here is parsed and validated once before the first line is
//! read and stays unchanged for the rest of the run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::IngestError;
use crate::timestamp::TimestampSpec;

pub const DEFAULT_PORT: u16 = 8086;

/// Tags attached to every point, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pairs: Vec<(String, String)>,
}

impl TagSet {
    /// Parse `KEY=VALUE[,KEY=VALUE]`. `None` or an empty string gives no tags.
    pub fn parse(spec: Option<&str>) -> Result<Self, IngestError> {
        let spec = match spec.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(Self::default()),
        };

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for entry in spec.split(',') {
            let (key, value) = entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| IngestError::MalformedTag { entry: entry.to_string() })?;
            if !seen.insert(key) {
                return Err(IngestError::DuplicateTag { key: key.to_string() });
            }
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(Self { pairs })
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `AND "key" = 'value'` for every tag, joined by spaces, in input order.
    pub fn query_fragment(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| format!("AND \"{}\" = '{}'", key, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The tags as a point's tag mapping; `None` when there are no tags.
    pub fn to_map(&self) -> Option<BTreeMap<String, String>> {
        if self.pairs.is_empty() {
            return None;
        }
        Some(self.pairs.iter().cloned().collect())
    }
}

/// Field names, mapped positionally to the columns after the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    names: Vec<String>,
}

impl FieldSpec {
    pub fn parse(spec: &str) -> Result<Self, IngestError> {
        if spec.trim().is_empty() {
            return Err(IngestError::NoFields);
        }
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for (position, name) in spec.split(',').map(str::trim).enumerate() {
            if name.is_empty() {
                return Err(IngestError::EmptyFieldName { position });
            }
            if !seen.insert(name) {
                return Err(IngestError::DuplicateField { name: name.to_string() });
            }
            names.push(name.to_string());
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// How points reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Check each point for an existing match, then write it on its own.
    #[default]
    Sequential,
    /// No existence check; every point goes into one write at the end.
    /// Whether that overwrites or duplicates data is up to the store.
    Bulk,
}

/// Order in which input lines are visited.
///
/// This decides which record hits a duplicate first, and therefore where a
/// sequential run stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum IterationOrder {
    /// Last line of the file first.
    #[default]
    Reverse,
    Forward,
}

/// What to do with a record whose field values cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// End the run with the error.
    #[default]
    Abort,
    /// Log a warning and go on with the next line.
    Skip,
}

/// Validated configuration of one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub measurement: String,
    pub timestamp: TimestampSpec,
    pub fields: FieldSpec,
    pub tags: TagSet,
    pub mode: WriteMode,
    pub order: IterationOrder,
    pub malformed: MalformedPolicy,
}

impl ImportConfig {
    pub fn new(
        measurement: &str,
        timestamp: TimestampSpec,
        fields: FieldSpec,
        tags: TagSet,
    ) -> Result<Self, IngestError> {
        if measurement.trim().is_empty() {
            return Err(IngestError::EmptyMeasurement);
        }
        Ok(Self {
            measurement: measurement.to_string(),
            timestamp,
            fields,
            tags,
            mode: WriteMode::default(),
            order: IterationOrder::default(),
            malformed: MalformedPolicy::default(),
        })
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_order(mut self, order: IterationOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_malformed(mut self, malformed: MalformedPolicy) -> Self {
        self.malformed = malformed;
        self
    }
}

/// An InfluxDB server given as `[scheme://]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn parse(address: &str) -> Result<Self, IngestError> {
        let invalid = |reason: &str| IngestError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = match address.trim().split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("http".to_string(), address.trim()),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
