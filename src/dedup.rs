use log::debug;

use crate::config::TagSet;
use crate::store::{PointStore, StoreError};

/// Asks the store whether a point with a given timestamp and tag set exists.
pub struct DuplicateChecker<'a, S: PointStore + ?Sized> {
    store: &'a S,
    measurement: &'a str,
    tag_fragment: String,
}

impl<'a, S: PointStore + ?Sized> DuplicateChecker<'a, S> {
    pub fn new(store: &'a S, measurement: &'a str, tags: &TagSet) -> Self {
        Self {
            store,
            measurement,
            tag_fragment: tags.query_fragment(),
        }
    }

    /// The count query for a rendered timestamp.
    pub fn statement(&self, timestamp: &str) -> String {
        let mut statement = format!(
            "SELECT COUNT(*) FROM {} WHERE \"time\" = '{}'",
            self.measurement, timestamp
        );
        if !self.tag_fragment.is_empty() {
            statement.push(' ');
            statement.push_str(&self.tag_fragment);
        }
        statement
    }

    pub async fn exists(&self, timestamp: &str) -> Result<bool, StoreError> {
        let statement = self.statement(timestamp);
        let rows = self.store.query(&statement).await?;
        debug!("{} -> {} row(s)", statement, rows.len());
        Ok(!rows.is_empty())
    }
}
