//! Read-through cache store decorator
//!
//! Remembers the result of each read, keyed by operation and arguments, and
//! serves it again until the entry is older than the configured lifetime.
//! Writes pass straight through without touching the cache; readers of a
//! lazy store accept results up to one lifetime stale.

use crate::store::backend::StoreBackend;
use crate::store::error::StoreResult;
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

struct CacheEntry {
    at: DateTime<Utc>,
    result: Vec<Record>,
}

/// Decorator caching read results for a fixed lifetime
pub struct LazyStore {
    inner: Box<dyn StoreBackend>,
    lifetime: Duration,
    cache: HashMap<(String, String), CacheEntry>,
}

impl LazyStore {
    pub fn new(inner: Box<dyn StoreBackend>, lifetime: Duration) -> Self {
        Self {
            inner,
            lifetime,
            cache: HashMap::new(),
        }
    }

    fn fresh(&self, key: &(String, String)) -> Option<Vec<Record>> {
        self.cache
            .get(key)
            .filter(|entry| Utc::now() - entry.at < self.lifetime)
            .map(|entry| entry.result.clone())
    }

    fn store(&mut self, key: (String, String), result: &[Record]) {
        self.cache.insert(
            key,
            CacheEntry {
                at: Utc::now(),
                result: result.to_vec(),
            },
        );
    }
}

macro_rules! cached {
    ($self:ident, $op:literal, $args:expr, $call:expr) => {{
        let key = ($op.to_string(), $args);
        if let Some(result) = $self.fresh(&key) {
            return Ok(result);
        }
        // On error the previous entry stays; a stale answer beats none once
        // the backend recovers
        let result = $call.await?;
        $self.store(key, &result);
        Ok(result)
    }};
}

#[async_trait]
impl StoreBackend for LazyStore {
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
        self.inner.put(records).await
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        cached!(
            self,
            "get",
            format!("{:?}..{:?}@{}", start, stop, self.inner.location()),
            self.inner.get(start, stop)
        )
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        cached!(
            self,
            "get_all",
            self.inner.location().to_string(),
            self.inner.get_all()
        )
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        cached!(
            self,
            "get_first",
            self.inner.location().to_string(),
            self.inner.get_first()
        )
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        cached!(
            self,
            "get_last",
            self.inner.location().to_string(),
            self.inner.get_last()
        )
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        self.inner.remove(start, stop).await
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        self.inner.delete_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn reading(n: i64) -> Record {
        Record::new()
            .with("n", Value::Int(n))
            .with("power", Value::Float(n as f64))
    }

    #[tokio::test]
    async fn test_reads_within_lifetime_are_served_from_cache() {
        let mut store = LazyStore::new(
            Box::new(MemoryStore::new("n", "meter")),
            Duration::hours(1),
        );
        store.put(&[reading(1)]).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);

        // Writes do not invalidate, so the cached answer hides the new record
        store.put(&[reading(2)]).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refreshed() {
        let mut store = LazyStore::new(
            Box::new(MemoryStore::new("n", "meter")),
            Duration::zero(),
        );
        store.put(&[reading(1)]).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);

        store.put(&[reading(2)]).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_ranges_cache_separately() {
        let mut store = LazyStore::new(
            Box::new(MemoryStore::new("n", "meter")),
            Duration::hours(1),
        );
        store.put(&[reading(1), reading(2), reading(3)]).await.unwrap();

        let narrow = store.get(&Value::Int(1), &Value::Int(1)).await.unwrap();
        let wide = store.get(&Value::Int(1), &Value::Int(3)).await.unwrap();
        assert_eq!(narrow.len(), 1);
        assert_eq!(wide.len(), 3);
    }

    #[tokio::test]
    async fn test_first_and_last_cached_independently() {
        let mut store = LazyStore::new(
            Box::new(MemoryStore::new("n", "meter")),
            Duration::hours(1),
        );
        store.put(&[reading(1), reading(2)]).await.unwrap();

        assert_eq!(
            store.get_first().await.unwrap()[0].get("n"),
            Some(&Value::Int(1))
        );
        assert_eq!(
            store.get_last().await.unwrap()[0].get("n"),
            Some(&Value::Int(2))
        );
    }
}
