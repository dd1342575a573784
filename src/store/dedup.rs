//! Duplicate suppression store decorator
//!
//! Collapses runs of records whose watched field stays within a numeric
//! resolution of an already kept value. Applied on write and on read, so it
//! also cleans up data written before the decorator was configured.

use crate::store::backend::StoreBackend;
use crate::store::error::StoreResult;
use crate::store::record::{Record, Value};
use async_trait::async_trait;

/// Decorator dropping near-duplicate records by one numeric field
pub struct DedupStore {
    inner: Box<dyn StoreBackend>,
    field: String,
    resolution: f64,
}

impl DedupStore {
    pub fn new(inner: Box<dyn StoreBackend>, field: impl Into<String>, resolution: f64) -> Self {
        Self {
            inner,
            field: field.into(),
            resolution,
        }
    }

    /// Collapse each run of records equivalent to the run's first record,
    /// keeping that first record. Two values are equivalent when they differ
    /// by at most the resolution. Records with a missing or non-numeric field
    /// end the current run and are always kept.
    fn deduplicate(&self, records: &[Record]) -> Vec<Record> {
        let mut kept: Vec<Record> = Vec::with_capacity(records.len());
        let mut representative: Option<f64> = None;
        for record in records {
            let value = record.get(&self.field).and_then(Value::as_f64);
            let duplicate = match (representative, value) {
                (Some(rep), Some(v)) => (rep - v).abs() <= self.resolution,
                _ => false,
            };
            if !duplicate {
                representative = value;
                kept.push(record.clone());
            }
        }
        kept
    }
}

#[async_trait]
impl StoreBackend for DedupStore {
    fn index(&self) -> &str {
        self.inner.index()
    }

    fn set_index(&mut self, index: &str) {
        self.inner.set_index(index);
    }

    fn location(&self) -> &str {
        self.inner.location()
    }

    fn set_location(&mut self, location: &str) {
        self.inner.set_location(location);
    }

    async fn existing_locations(&mut self) -> StoreResult<Vec<String>> {
        self.inner.existing_locations().await
    }

    async fn put(&mut self, records: &[Record]) -> StoreResult<()> {
        let kept = self.deduplicate(records);
        self.inner.put(&kept).await
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let records = self.inner.get(start, stop).await?;
        Ok(self.deduplicate(&records))
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        let records = self.inner.get_all().await?;
        Ok(self.deduplicate(&records))
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        self.inner.get_first().await
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        self.inner.get_last().await
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        self.inner.remove(start, stop).await
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        self.inner.delete_all().await
    }
}
