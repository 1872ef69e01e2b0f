use async_trait::async_trait;
use influxdb::{Client, ReadQuery, Timestamp, WriteQuery};
use log::{debug, trace};
use serde::Deserialize;

use super::{PointStore, Rows, StoreError};
use crate::record::DataPoint;

/// [`PointStore`] backed by the InfluxDB 1.x HTTP API.
pub struct InfluxStore {
    url: String,
    credentials: Option<(String, String)>,
    client: Option<Client>,
}

impl InfluxStore {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let client = Client::new(url.clone(), "");
        Self {
            url,
            credentials: None,
            client: Some(client),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self.client = Some(self.connect(""));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect(&self, database: &str) -> Client {
        let client = Client::new(self.url.clone(), database);
        match &self.credentials {
            Some((username, password)) => client.with_auth(username, password),
            None => client,
        }
    }

    fn client(&self) -> Result<&Client, StoreError> {
        self.client.as_ref().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl PointStore for InfluxStore {
    async fn ping(&self) -> Result<(String, String), StoreError> {
        Ok(self.client()?.ping().await?)
    }

    async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.query("SHOW DATABASES").await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|name| name.as_str().map(str::to_string))
            .collect())
    }

    async fn use_database(&mut self, name: &str) -> Result<(), StoreError> {
        self.client()?;
        self.client = Some(self.connect(name));
        Ok(())
    }

    async fn write(&self, points: &[DataPoint]) -> Result<(), StoreError> {
        let queries = points.iter().map(to_write_query).collect::<Result<Vec<_>, _>>()?;
        debug!("writing {} point(s)", queries.len());
        self.client()?.query(queries).await?;
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<Rows, StoreError> {
        trace!("query: {}", statement);
        let body = self.client()?.query(ReadQuery::new(statement)).await?;
        parse_rows(&body)
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.client.take().ok_or(StoreError::Closed)?;
        Ok(())
    }
}

/// Build the line protocol write for one point.
pub fn to_write_query(point: &DataPoint) -> Result<WriteQuery, StoreError> {
    // the client only takes unsigned timestamps
    let nanos = point
        .time
        .timestamp_nanos_opt()
        .and_then(|nanos| u128::try_from(nanos).ok())
        .ok_or_else(|| StoreError::Timestamp(point.time_string()))?;

    let mut query = WriteQuery::new(Timestamp::Nanoseconds(nanos), point.measurement.clone());
    for (name, value) in &point.fields {
        query = query.add_field(name.clone(), *value);
    }
    if let Some(tags) = &point.tags {
        for (key, value) in tags {
            query = query.add_tag(key.clone(), value.clone());
        }
    }
    Ok(query)
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn parse_rows(body: &str) -> Result<Rows, StoreError> {
    let response: QueryResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(StoreError::Server(error));
    }
    let first = match response.results.into_iter().next() {
        Some(first) => first,
        None => return Ok(Vec::new()),
    };
    if let Some(error) = first.error {
        return Err(StoreError::Server(error));
    }
    Ok(first.series.into_iter().flat_map(|series| series.values).collect())
}
