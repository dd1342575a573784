//! Store backend capability interface
//!
//! Every physical backend (memory, flat file, document database, time-series
//! database) and every decorator (sharding, dedup, lazy cache) implements the
//! same [`StoreBackend`] trait, so cross-cutting behavior composes by
//! wrapping. Methods take `&mut self`: the core assumes one logical writer
//! per store instance (see the crate docs for the concurrency model).

use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use std::cmp::Ordering;

/// Capability interface over one logical store.
///
/// `get`-style reads return batches; `get_first`/`get_last` return a
/// single-element batch for consistency with `get`. An empty store surfaces
/// [`StoreError::Empty`] rather than panicking; the manager translates any
/// read failure into [`StoreError::ReadStore`].
#[async_trait]
pub trait StoreBackend: Send {
    /// Name of the index field
    fn index(&self) -> &str;

    fn set_index(&mut self, index: &str);

    /// Current physical location (file stem, table, measurement)
    fn location(&self) -> &str;

    /// Retarget the backend to another physical location. Used by the
    /// sharding decorator, which restores the base location afterwards.
    fn set_location(&mut self, location: &str);

    /// Names of all physical locations the backend can currently see.
    /// The sharding decorator uses this to discover shards.
    async fn existing_locations(&mut self) -> StoreResult<Vec<String>>;

    /// Append records. No partial-write guarantee beyond what the physical
    /// medium gives.
    async fn put(&mut self, records: &[Record]) -> StoreResult<()>;

    /// All records with `start <= index <= stop` (inclusive both ends)
    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>>;

    async fn get_all(&mut self) -> StoreResult<Vec<Record>>;

    /// Record with the smallest index, as a single-element batch
    async fn get_first(&mut self) -> StoreResult<Vec<Record>>;

    /// Record with the largest index, as a single-element batch
    async fn get_last(&mut self) -> StoreResult<Vec<Record>>;

    /// Delete all records in range. Zero matches is not an error.
    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()>;

    /// Destroy the location entirely (teardown/reset)
    async fn delete_all(&mut self) -> StoreResult<()>;
}

/// True if the record's index value lies in `[start, stop]`
pub fn in_range(record: &Record, index: &str, start: &Value, stop: &Value) -> bool {
    match record.get(index) {
        Some(value) => {
            matches!(
                value.compare(start),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ) && matches!(
                value.compare(stop),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
        }
        None => false,
    }
}

/// Single-element batch holding the record with the smallest index
pub fn min_record(records: &[Record], index: &str) -> StoreResult<Vec<Record>> {
    extreme_record(records, index, Ordering::Less)
}

/// Single-element batch holding the record with the largest index
pub fn max_record(records: &[Record], index: &str) -> StoreResult<Vec<Record>> {
    extreme_record(records, index, Ordering::Greater)
}

fn extreme_record(records: &[Record], index: &str, keep: Ordering) -> StoreResult<Vec<Record>> {
    let mut best: Option<&Record> = None;
    for record in records {
        let value = record
            .get(index)
            .ok_or_else(|| StoreError::BadField(index.to_string()))?;
        match best {
            None => best = Some(record),
            Some(current) => {
                let reference = current
                    .get(index)
                    .ok_or_else(|| StoreError::BadField(index.to_string()))?;
                if value.compare(reference) == Some(keep) {
                    best = Some(record);
                }
            }
        }
    }
    best.map(|r| vec![r.clone()])
        .ok_or_else(|| StoreError::Empty(index.to_string()))
}
