//! Sharding store decorator
//!
//! Splits a logical store across physical sub-locations named
//! `base_location + "_" + shard id`, with the shard id derived from one
//! record field. Bounds per-location size and, when the shard field is the
//! store's index, turns range queries into O(relevant shards) instead of
//! O(total history).
//!
//! Every shard operation retargets the inner store to the shard's location
//! and restores the base location afterwards, on success and on error alike.

use crate::store::backend::{max_record, min_record, StoreBackend};
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use chrono::NaiveDate;

/// How a shard id is derived from a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardScheme {
    /// One shard per calendar day (UTC) of a timestamp field
    Date,
    /// One shard per 0.1-wide band of a numeric field
    Decimal,
}

/// Parsed shard id, ordered so shard ranges can be intersected with query
/// ranges
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum ShardKey {
    Date(NaiveDate),
    Decimal(i64),
}

impl ShardScheme {
    /// Shard key for a field value
    pub fn key(&self, value: &Value) -> StoreResult<ShardKey> {
        match self {
            ShardScheme::Date => match value {
                Value::Time(t) => Ok(ShardKey::Date(t.date_naive())),
                Value::Date(d) => Ok(ShardKey::Date(*d)),
                _ => Err(StoreError::BadField("date shard key".to_string())),
            },
            ShardScheme::Decimal => value
                .as_f64()
                .map(|v| ShardKey::Decimal((v * 10.0) as i64))
                .ok_or_else(|| StoreError::BadField("decimal shard key".to_string())),
        }
    }

    /// Shard id string appended to the base location
    pub fn id(&self, key: &ShardKey) -> String {
        match key {
            ShardKey::Date(d) => d.format("%Y-%m-%d").to_string(),
            ShardKey::Decimal(v) => v.to_string(),
        }
    }

    /// Inverse of [`ShardScheme::id`]; `None` if the string is not a shard id
    /// of this scheme
    pub fn parse_id(&self, id: &str) -> Option<ShardKey> {
        match self {
            ShardScheme::Date => NaiveDate::parse_from_str(id, "%Y-%m-%d")
                .ok()
                .map(ShardKey::Date),
            ShardScheme::Decimal => id.parse::<i64>().ok().map(ShardKey::Decimal),
        }
    }
}

/// Decorator distributing records over shards of the inner store
pub struct ShardedStore {
    inner: Box<dyn StoreBackend>,
    field: String,
    scheme: ShardScheme,
    fast_search: bool,
}

impl ShardedStore {
    pub fn new(inner: Box<dyn StoreBackend>, field: impl Into<String>, scheme: ShardScheme) -> Self {
        Self {
            inner,
            field: field.into(),
            scheme,
            fast_search: true,
        }
    }

    /// Disable the shard-range fast path; every query scans all shards
    pub fn without_fast_search(mut self) -> Self {
        self.fast_search = false;
        self
    }

    pub fn shard_field(&self) -> &str {
        &self.field
    }

    fn shard_location(&self, key: &ShardKey) -> String {
        format!("{}_{}", self.inner.location(), self.scheme.id(key))
    }

    /// Shard key of a location name, if it belongs to this store
    fn key_of_location(&self, location: &str) -> Option<ShardKey> {
        let prefix = format!("{}_", self.inner.location());
        location
            .strip_prefix(&prefix)
            .and_then(|id| self.scheme.parse_id(id))
    }

    /// Fast path applies when shard keys follow the index order
    fn fast_path(&self) -> bool {
        self.fast_search && self.field == self.inner.index()
    }

    /// All existing locations that parse as shards of this store
    async fn shards(&mut self) -> StoreResult<Vec<(ShardKey, String)>> {
        let locations = self.inner.existing_locations().await?;
        Ok(locations
            .into_iter()
            .filter_map(|name| self.key_of_location(&name).map(|key| (key, name)))
            .collect())
    }

    /// Existing shards whose key range intersects `[start, stop]`
    async fn shards_between(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<String>> {
        let low = self.scheme.key(start)?;
        let high = self.scheme.key(stop)?;
        Ok(self
            .shards()
            .await?
            .into_iter()
            .filter(|(key, _)| *key >= low && *key <= high)
            .map(|(_, name)| name)
            .collect())
    }

    async fn all_shards(&mut self) -> StoreResult<Vec<String>> {
        Ok(self.shards().await?.into_iter().map(|(_, name)| name).collect())
    }

    async fn extreme_shards(&mut self) -> StoreResult<(String, String)> {
        let shards = self.shards().await?;
        let first = shards
            .iter()
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let last = shards
            .iter()
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        match (first, last) {
            (Some(first), Some(last)) => Ok((first.1.clone(), last.1.clone())),
            _ => Err(StoreError::Empty(self.inner.location().to_string())),
        }
    }

    /// Run `op` against one shard, restoring the base location on every exit
    /// path
    async fn at_shard(&mut self, shard: &str, op: ShardOp<'_>) -> StoreResult<Vec<Record>> {
        let base = self.inner.location().to_string();
        self.inner.set_location(shard);
        let result = match op {
            ShardOp::Put(records) => self.inner.put(records).await.map(|()| Vec::new()),
            ShardOp::Get(start, stop) => self.inner.get(start, stop).await,
            ShardOp::GetAll => self.inner.get_all().await,
            ShardOp::GetFirst => self.inner.get_first().await,
            ShardOp::GetLast => self.inner.get_last().await,
            ShardOp::Remove(start, stop) => {
                self.inner.remove(start, stop).await.map(|()| Vec::new())
            }
            ShardOp::DeleteAll => self.inner.delete_all().await.map(|()| Vec::new()),
        };
        self.inner.set_location(&base);
        result
    }
}

/// One operation executed while retargeted to a shard
enum ShardOp<'a> {
    Put(&'a [Record]),
    Get(&'a Value, &'a Value),
    GetAll,
    GetFirst,
    GetLast,
    Remove(&'a Value, &'a Value),
    DeleteAll,
}

#[async_trait]
impl StoreBackend for ShardedStore {
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
        // Group by shard key, preserving first-seen order
        let mut groups: Vec<(ShardKey, Vec<Record>)> = Vec::new();
        for record in records {
            let value = record
                .get(&self.field)
                .ok_or_else(|| StoreError::BadField(self.field.clone()))?;
            let key = self.scheme.key(value)?;
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(record.clone()),
                None => groups.push((key, vec![record.clone()])),
            }
        }

        for (key, group) in groups {
            let shard = self.shard_location(&key);
            self.at_shard(&shard, ShardOp::Put(&group)).await?;
        }
        Ok(())
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let shards = if self.fast_path() {
            self.shards_between(start, stop).await?
        } else {
            self.all_shards().await?
        };
        // Each shard's get filters by range, so the scan path needs no
        // second filter
        let mut records = Vec::new();
        for shard in &shards {
            records.extend(self.at_shard(shard, ShardOp::Get(start, stop)).await?);
        }
        Ok(records)
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        let shards = self.all_shards().await?;
        let mut records = Vec::new();
        for shard in &shards {
            records.extend(self.at_shard(shard, ShardOp::GetAll).await?);
        }
        Ok(records)
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        if self.fast_path() {
            let (first, _) = self.extreme_shards().await?;
            self.at_shard(&first, ShardOp::GetFirst).await
        } else {
            let shards = self.all_shards().await?;
            let mut candidates = Vec::new();
            for shard in &shards {
                candidates.extend(self.at_shard(shard, ShardOp::GetFirst).await?);
            }
            min_record(&candidates, self.inner.index())
        }
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        if self.fast_path() {
            let (_, last) = self.extreme_shards().await?;
            self.at_shard(&last, ShardOp::GetLast).await
        } else {
            let shards = self.all_shards().await?;
            let mut candidates = Vec::new();
            for shard in &shards {
                candidates.extend(self.at_shard(shard, ShardOp::GetLast).await?);
            }
            max_record(&candidates, self.inner.index())
        }
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        let shards = if self.fast_path() {
            self.shards_between(start, stop).await?
        } else {
            self.all_shards().await?
        };
        for shard in &shards {
            self.at_shard(shard, ShardOp::Remove(start, stop)).await?;
        }
        Ok(())
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        let shards = self.all_shards().await?;
        for shard in &shards {
            self.at_shard(shard, ShardOp::DeleteAll).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn record(day: u32, hour: u32, power: f64) -> Record {
        Record::new()
            .with(
                "time",
                Value::Time(Utc.with_ymd_and_hms(2023, 5, day, hour, 0, 0).unwrap()),
            )
            .with("power", Value::Float(power))
    }

    fn time(day: u32, hour: u32) -> Value {
        Value::Time(Utc.with_ymd_and_hms(2023, 5, day, hour, 0, 0).unwrap())
    }

    fn date_sharded() -> ShardedStore {
        let inner = MemoryStore::new("time", "meter");
        ShardedStore::new(Box::new(inner), "time", ShardScheme::Date)
    }

    fn sample() -> Vec<Record> {
        vec![
            record(1, 6, 1.0),
            record(1, 18, 2.0),
            record(2, 6, 3.0),
            record(3, 6, 4.0),
        ]
    }

    #[tokio::test]
    async fn test_put_creates_one_shard_per_key() {
        let mut store = date_sharded();
        store.put(&sample()).await.unwrap();

        let locations = store.existing_locations().await.unwrap();
        assert_eq!(
            locations,
            vec!["meter_2023-05-01", "meter_2023-05-02", "meter_2023-05-03"]
        );
        // Base location restored after the grouped writes
        assert_eq!(store.location(), "meter");
    }

    #[tokio::test]
    async fn test_sharding_completeness() {
        let mut store = date_sharded();
        let written = sample();
        store.put(&written).await.unwrap();

        let mut all = store.get_all().await.unwrap();
        all.sort_by(|a, b| {
            a.get("time")
                .unwrap()
                .compare(b.get("time").unwrap())
                .unwrap()
        });
        assert_eq!(all, written);
    }

    #[tokio::test]
    async fn test_fast_path_equals_scan_path() {
        let mut fast = date_sharded();
        let mut scan = ShardedStore::new(
            Box::new(MemoryStore::new("time", "meter")),
            "time",
            ShardScheme::Date,
        )
        .without_fast_search();

        let written = sample();
        fast.put(&written).await.unwrap();
        scan.put(&written).await.unwrap();

        for (start, stop) in [
            (time(1, 0), time(1, 23)),
            (time(1, 12), time(3, 0)),
            (time(2, 0), time(2, 0)),
            (time(4, 0), time(4, 23)),
        ] {
            let mut a = fast.get(&start, &stop).await.unwrap();
            let mut b = scan.get(&start, &stop).await.unwrap();
            let by_time = |x: &Record, y: &Record| {
                x.get("time").unwrap().compare(y.get("time").unwrap()).unwrap()
            };
            a.sort_by(by_time);
            b.sort_by(by_time);
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn test_first_and_last_both_paths() {
        for fast in [true, false] {
            let mut store = date_sharded();
            if !fast {
                store = store.without_fast_search();
            }
            store.put(&sample()).await.unwrap();

            let first = store.get_first().await.unwrap();
            assert_eq!(first[0].get("power"), Some(&Value::Float(1.0)));
            let last = store.get_last().await.unwrap();
            assert_eq!(last[0].get("power"), Some(&Value::Float(4.0)));
        }
    }

    #[tokio::test]
    async fn test_remove_fast_path() {
        let mut store = date_sharded();
        store.put(&sample()).await.unwrap();

        store.remove(&time(1, 0), &time(1, 23)).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_all_removes_every_shard() {
        let mut store = date_sharded();
        store.put(&sample()).await.unwrap();
        store.delete_all().await.unwrap();
        assert!(store.existing_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_location_restored_after_failed_put() {
        // Records missing the shard field fail key derivation before any
        // retargeting; records with a non-time field fail inside the loop
        let mut store = date_sharded();
        let bad = Record::new()
            .with("time", Value::Float(1.0))
            .with("power", Value::Float(1.0));
        assert!(store.put(&[bad]).await.is_err());
        assert_eq!(store.location(), "meter");
    }

    #[tokio::test]
    async fn test_decimal_scheme() {
        let inner = MemoryStore::new("level", "tank");
        let mut store = ShardedStore::new(Box::new(inner), "level", ShardScheme::Decimal);

        let records = vec![
            Record::new().with("level", Value::Float(0.52)).with("n", Value::Int(1)),
            Record::new().with("level", Value::Float(0.58)).with("n", Value::Int(2)),
            Record::new().with("level", Value::Float(1.23)).with("n", Value::Int(3)),
        ];
        store.put(&records).await.unwrap();

        assert_eq!(
            store.existing_locations().await.unwrap(),
            vec!["tank_12", "tank_5"]
        );
        let found = store
            .get(&Value::Float(0.5), &Value::Float(0.6))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
