use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{PointStore, Rows, StoreError};
use crate::record::DataPoint;

/// A call made against a [`MemoryStore`], in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Ping,
    ListDatabases,
    UseDatabase(String),
    Write(Vec<DataPoint>),
    Query(String),
    Close,
}

#[derive(Debug, Default)]
struct State {
    databases: Vec<String>,
    current: Option<String>,
    points: Vec<DataPoint>,
    calls: Vec<StoreCall>,
    writes_before_failure: Option<usize>,
    closed: bool,
}

/// In-process [`PointStore`].
///
/// Answers the duplicate-check count query by matching stored points on
/// measurement, rendered timestamp and tags.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, name: &str) -> Self {
        self.lock().databases.push(name.to_string());
        self
    }

    /// Seed points as if written by an earlier run.
    pub fn with_points(self, points: impl IntoIterator<Item = DataPoint>) -> Self {
        self.lock().points.extend(points);
        self
    }

    /// Accept `successful` writes, then reject every further one.
    pub fn fail_writes_after(self, successful: usize) -> Self {
        self.lock().writes_before_failure = Some(successful);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Payloads of all write calls, including rejected ones.
    pub fn writes(&self) -> Vec<Vec<DataPoint>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Write(points) => Some(points.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn points(&self) -> Vec<DataPoint> {
        self.lock().points.clone()
    }

    pub fn current_database(&self) -> Option<String> {
        self.lock().current.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PointStore for MemoryStore {
    async fn ping(&self) -> Result<(String, String), StoreError> {
        self.lock().calls.push(StoreCall::Ping);
        Ok(("memory".to_string(), env!("CARGO_PKG_VERSION").to_string()))
    }

    async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ListDatabases);
        Ok(state.databases.clone())
    }

    async fn use_database(&mut self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UseDatabase(name.to_string()));
        if !state.databases.iter().any(|db| db == name) {
            return Err(StoreError::UnknownDatabase(name.to_string()));
        }
        state.current = Some(name.to_string());
        Ok(())
    }

    async fn write(&self, points: &[DataPoint]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Write(points.to_vec()));
        if state.closed {
            return Err(StoreError::Closed);
        }
        let limit = state.writes_before_failure;
        match limit {
            Some(0) => return Err(StoreError::Rejected("write limit reached".to_string())),
            Some(n) => state.writes_before_failure = Some(n - 1),
            None => {}
        }
        state.points.extend_from_slice(points);
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<Rows, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Query(statement.to_string()));
        if state.closed {
            return Err(StoreError::Closed);
        }
        let count = CountQuery::parse(statement)
            .ok_or_else(|| StoreError::Server(format!("unsupported statement: {}", statement)))?;

        let matches = state.points.iter().filter(|point| count.matches(point)).count();
        if matches == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![vec![Value::from("1970-01-01T00:00:00Z"), Value::from(matches)]])
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Close);
        if state.closed {
            return Err(StoreError::Closed);
        }
        state.closed = true;
        Ok(())
    }
}

/// `SELECT COUNT(*) FROM m WHERE "time" = '..' [AND "k" = 'v' ...]`
#[derive(Debug, PartialEq)]
struct CountQuery<'a> {
    measurement: &'a str,
    time: Option<&'a str>,
    tags: Vec<(&'a str, &'a str)>,
}

impl<'a> CountQuery<'a> {
    fn parse(statement: &'a str) -> Option<Self> {
        let rest = statement.trim().strip_prefix("SELECT COUNT(*) FROM ")?;
        let (measurement, conditions) = rest.split_once(" WHERE ")?;

        let mut time = None;
        let mut tags = Vec::new();
        for condition in conditions.split(" AND ") {
            let (key, value) = condition.split_once(" = ")?;
            let key = key.trim().strip_prefix('"')?.strip_suffix('"')?;
            let value = value.trim().strip_prefix('\'')?.strip_suffix('\'')?;
            if key == "time" {
                time = Some(value);
            } else {
                tags.push((key, value));
            }
        }
        Some(Self {
            measurement: measurement.trim(),
            time,
            tags,
        })
    }

    fn matches(&self, point: &DataPoint) -> bool {
        if point.measurement != self.measurement {
            return false;
        }
        if let Some(time) = self.time {
            if point.time_string() != time {
                return false;
            }
        }
        self.tags.iter().all(|(key, value)| {
            point
                .tags
                .as_ref()
                .and_then(|tags| tags.get(*key))
                .map_or(false, |v| v == value)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::DateTime;

    use super::*;

    fn point(time: &str, host: &str) -> DataPoint {
        DataPoint {
            measurement: "weather".to_string(),
            time: DateTime::parse_from_rfc3339(time).unwrap(),
            fields: BTreeMap::from([("temp".to_string(), 1.0)]),
            tags: Some(BTreeMap::from([("host".to_string(), host.to_string())])),
        }
    }

    #[test]
    fn parse_count_query() {
        let q = CountQuery::parse(
            "SELECT COUNT(*) FROM weather WHERE \"time\" = '2020-01-17T03:03:00+00:00' AND \"host\" = 'a'",
        )
        .unwrap();
        assert_eq!(
            q,
            CountQuery {
                measurement: "weather",
                time: Some("2020-01-17T03:03:00+00:00"),
                tags: vec![("host", "a")],
            }
        );
        assert!(CountQuery::parse("SHOW DATABASES").is_none());
    }

    #[tokio::test]
    async fn count_matches_time_and_tags() {
        let store = MemoryStore::new().with_points([
            point("2020-01-17T03:03:00+00:00", "a"),
            point("2020-01-17T03:04:00+00:00", "a"),
        ]);

        let hit = "SELECT COUNT(*) FROM weather WHERE \"time\" = '2020-01-17T03:03:00+00:00' AND \"host\" = 'a'";
        let rows = store.query(hit).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], 1);

        let other_tag = "SELECT COUNT(*) FROM weather WHERE \"time\" = '2020-01-17T03:03:00+00:00' AND \"host\" = 'b'";
        assert!(store.query(other_tag).await.unwrap().is_empty());

        let other_measurement = "SELECT COUNT(*) FROM rain WHERE \"time\" = '2020-01-17T03:03:00+00:00'";
        assert!(store.query(other_measurement).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_statement() {
        let store = MemoryStore::new();
        assert!(matches!(store.query("DROP DATABASE x").await, Err(StoreError::Server(_))));
    }

    #[tokio::test]
    async fn writes_fail_after_limit() {
        let store = MemoryStore::new().fail_writes_after(1);
        let p = point("2020-01-17T03:03:00+00:00", "a");

        store.write(&[p.clone()]).await.unwrap();
        assert!(matches!(store.write(&[p.clone()]).await, Err(StoreError::Rejected(_))));
        assert_eq!(store.points().len(), 1);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn database_selection_and_close() {
        let mut store = MemoryStore::new().with_database("telemetry");
        assert_eq!(store.list_databases().await.unwrap(), vec!["telemetry".to_string()]);
        assert!(matches!(store.use_database("other").await, Err(StoreError::UnknownDatabase(_))));

        store.use_database("telemetry").await.unwrap();
        assert_eq!(store.current_database().as_deref(), Some("telemetry"));

        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.close().await, Err(StoreError::Closed)));
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::ListDatabases,
                StoreCall::UseDatabase("other".to_string()),
                StoreCall::UseDatabase("telemetry".to_string()),
                StoreCall::Close,
                StoreCall::Close,
            ]
        );
    }
}
