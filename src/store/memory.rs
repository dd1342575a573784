//! In-memory store backend
//!
//! Keeps records in process memory, one vector per named location, so the
//! sharding decorator can be exercised without any external service. Useful
//! for tests and as the reference semantics for the other backends.

use crate::store::backend::{in_range, max_record, min_record, StoreBackend};
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use std::collections::HashMap;

/// Store backend holding all records in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: String,
    location: String,
    locations: HashMap<String, Vec<Record>>,
}

impl MemoryStore {
    pub fn new(index: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            location: location.into(),
            locations: HashMap::new(),
        }
    }

    fn records(&self) -> &[Record] {
        self.locations
            .get(&self.location)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn non_empty_records(&self) -> StoreResult<&[Record]> {
        let records = self.records();
        if records.is_empty() {
            return Err(StoreError::Empty(self.location.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn index(&self) -> &str {
        &self.index
    }

    fn set_index(&mut self, index: &str) {
        self.index = index.to_string();
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn set_location(&mut self, location: &str) {
        self.location = location.to_string();
    }

    async fn existing_locations(&mut self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.locations.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn put(&mut self, records: &[Record]) -> StoreResult<()> {
        self.locations
            .entry(self.location.clone())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        Ok(self
            .records()
            .iter()
            .filter(|r| in_range(r, &self.index, start, stop))
            .cloned()
            .collect())
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        Ok(self.records().to_vec())
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        min_record(self.non_empty_records()?, &self.index)
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        max_record(self.non_empty_records()?, &self.index)
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        let index = self.index.clone();
        if let Some(records) = self.locations.get_mut(&self.location) {
            records.retain(|r| !in_range(r, &index, start, stop));
        }
        Ok(())
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        self.locations.remove(&self.location);
        Ok(())
    }
}
