//! Store manager
//!
//! Front door for one configured store. Wraps a backend stack with the two
//! behaviours every writer and reader relies on: rejected writes when a
//! batch's shape disagrees with what the store already holds, and a retry
//! buffer that keeps batches in memory across backend outages until a later
//! write drains them.

use crate::store::backend::StoreBackend;
use crate::store::codec::RecordCodec;
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Managed store with form checking and buffered retries
pub struct StoreManager {
    backend: Box<dyn StoreBackend>,
    codec: RecordCodec,
    buffer: VecDeque<Vec<Record>>,
    records_written: u64,
}

impl StoreManager {
    pub fn new(backend: Box<dyn StoreBackend>) -> Self {
        Self::with_codec(backend, RecordCodec::default())
    }

    pub fn with_codec(backend: Box<dyn StoreBackend>, codec: RecordCodec) -> Self {
        Self {
            backend,
            codec,
            buffer: VecDeque::new(),
            records_written: 0,
        }
    }

    pub fn index(&self) -> &str {
        self.backend.index()
    }

    pub fn set_index(&mut self, index: &str) {
        self.backend.set_index(index);
    }

    pub fn location(&self) -> &str {
        self.backend.location()
    }

    /// Total records handed to the backend successfully
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Batches waiting for the backend to come back
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Queue a batch and drain as much of the buffer as the backend accepts.
    ///
    /// The batch must match the form of the store's existing records. A
    /// backend failure is not an error here; the batch moves to the tail of
    /// the buffer and a later put retries it. Each call attempts at most as
    /// many batches as were queued when it started.
    pub async fn put(&mut self, records: Vec<Record>) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.check_form(&records).await?;
        self.buffer.push_back(records);
        self.drain().await;
        Ok(())
    }

    /// Reject batches shaped differently from stored data. A store that
    /// cannot produce a first record counts as empty and accepts any form.
    /// The stored record is normalized first; a textual backend handing a
    /// midnight timestamp back as a bare date must not change the form.
    async fn check_form(&mut self, records: &[Record]) -> StoreResult<()> {
        let existing = match self.backend.get_first().await {
            Ok(found) => self.normalize(found),
            Err(_) => return Ok(()),
        };
        let expected = match existing.first() {
            Some(record) => record.form(),
            None => return Ok(()),
        };
        for record in records {
            let found = record.form();
            if found != expected {
                return Err(StoreError::FormMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn drain(&mut self) {
        for _ in 0..self.buffer.len() {
            let batch = match self.buffer.pop_front() {
                Some(batch) => batch,
                None => break,
            };
            match self.backend.put(&batch).await {
                Ok(()) => {
                    self.records_written += batch.len() as u64;
                }
                Err(e) => {
                    warn!(
                        location = self.backend.location(),
                        buffered = self.buffer.len() + 1,
                        error = %e,
                        "write failed, batch kept for retry"
                    );
                    self.buffer.push_back(batch);
                    break;
                }
            }
        }
    }

    /// Backend read failures wrap into `ReadStore`; an empty store stays
    /// `Empty` so callers can tell "nothing there yet" from a broken backend
    fn wrap_read_error(error: StoreError) -> StoreError {
        match error {
            StoreError::Empty(location) => StoreError::Empty(location),
            other => StoreError::ReadStore(other.to_string()),
        }
    }

    pub async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let records = self
            .backend
            .get(start, stop)
            .await
            .map_err(Self::wrap_read_error)?;
        Ok(self.normalize(records))
    }

    pub async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        let records = self
            .backend
            .get_all()
            .await
            .map_err(Self::wrap_read_error)?;
        Ok(self.normalize(records))
    }

    pub async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        let records = self
            .backend
            .get_first()
            .await
            .map_err(Self::wrap_read_error)?;
        Ok(self.normalize(records))
    }

    pub async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        let records = self
            .backend
            .get_last()
            .await
            .map_err(Self::wrap_read_error)?;
        Ok(self.normalize(records))
    }

    pub async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        self.backend.remove(start, stop).await
    }

    pub async fn delete_all(&mut self) -> StoreResult<()> {
        debug!(location = self.backend.location(), "deleting all records");
        self.backend.delete_all().await
    }

    /// Index values always come back as timestamps, never as bare dates, so
    /// callers can compare them against query bounds
    fn normalize(&self, records: Vec<Record>) -> Vec<Record> {
        let index = self.backend.index().to_string();
        records
            .into_iter()
            .map(|mut record| {
                if let Some(value) = record.get(&index) {
                    let fixed = self.codec.redecode(value, true);
                    record.set(&index, fixed);
                }
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::StoreBackend;
    use crate::store::flatfile::FlatFileStore;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn reading(n: i64, power: f64) -> Record {
        Record::new()
            .with("n", Value::Int(n))
            .with("power", Value::Float(power))
    }

    /// Backend that fails a set number of writes before recovering, and
    /// optionally fails every read
    struct Flaky {
        inner: MemoryStore,
        failures_left: usize,
        fail_reads: bool,
    }

    #[async_trait]
    impl StoreBackend for Flaky {
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
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(StoreError::Unsupported("backend offline"));
            }
            self.inner.put(records).await
        }
        async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
            self.inner.get(start, stop).await
        }
        async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
            if self.fail_reads {
                return Err(StoreError::Unsupported("backend offline"));
            }
            self.inner.get_all().await
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

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let mut manager = StoreManager::new(Box::new(MemoryStore::new("n", "meter")));
        manager.put(vec![reading(1, 1.0), reading(2, 2.0)]).await.unwrap();

        assert_eq!(manager.records_written(), 2);
        assert_eq!(manager.get_all().await.unwrap().len(), 2);
        let found = manager.get(&Value::Int(2), &Value::Int(2)).await.unwrap();
        assert_eq!(found[0].get("power"), Some(&Value::Float(2.0)));
    }

    #[tokio::test]
    async fn test_form_mismatch_rejected_and_store_unchanged() {
        let mut manager = StoreManager::new(Box::new(MemoryStore::new("n", "meter")));
        manager.put(vec![reading(1, 1.0)]).await.unwrap();

        let odd = Record::new()
            .with("n", Value::Int(2))
            .with("power", Value::Text("off".to_string()));
        let err = manager.put(vec![odd]).await.unwrap_err();
        assert!(matches!(err, StoreError::FormMismatch { .. }));
        assert_eq!(manager.get_all().await.unwrap().len(), 1);
        assert_eq!(manager.buffer_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_writes_buffer_and_drain_later() {
        let flaky = Flaky {
            inner: MemoryStore::new("n", "meter"),
            failures_left: 2,
            fail_reads: false,
        };
        let mut manager = StoreManager::new(Box::new(flaky));

        // First two puts hit the outage; put itself still succeeds
        manager.put(vec![reading(1, 1.0)]).await.unwrap();
        manager.put(vec![reading(2, 2.0)]).await.unwrap();
        assert_eq!(manager.buffer_len(), 2);
        assert_eq!(manager.records_written(), 0);

        // Backend is back; this put drains the whole buffer
        manager.put(vec![reading(3, 3.0)]).await.unwrap();
        assert_eq!(manager.buffer_len(), 0);
        assert_eq!(manager.records_written(), 3);

        let all = manager.get_all().await.unwrap();
        let mut ns: Vec<i64> = all
            .iter()
            .filter_map(|r| match r.get("n") {
                Some(Value::Int(n)) => Some(*n),
                _ => None,
            })
            .collect();
        ns.sort();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let mut manager = StoreManager::new(Box::new(MemoryStore::new("n", "meter")));
        manager.put(Vec::new()).await.unwrap();
        assert_eq!(manager.records_written(), 0);
    }

    #[tokio::test]
    async fn test_empty_store_read_stays_empty() {
        let mut manager = StoreManager::new(Box::new(MemoryStore::new("n", "meter")));
        let err = manager.get_first().await.unwrap_err();
        assert!(matches!(err, StoreError::Empty(_)));
    }

    #[tokio::test]
    async fn test_backend_read_failures_are_wrapped() {
        let flaky = Flaky {
            inner: MemoryStore::new("n", "meter"),
            failures_left: 0,
            fail_reads: true,
        };
        let mut manager = StoreManager::new(Box::new(flaky));
        let err = manager.get_all().await.unwrap_err();
        assert!(matches!(err, StoreError::ReadStore(_)));
    }

    #[tokio::test]
    async fn test_midnight_first_record_accepts_later_writes() {
        // A flat file hands a midnight timestamp back as a bare date; that
        // must not change the form later writes are checked against
        let dir = tempfile::tempdir().unwrap();
        let backend = FlatFileStore::new("time", dir.path(), "meter");
        let mut manager = StoreManager::new(Box::new(backend));

        let midnight = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        let first = Record::new()
            .with("time", Value::Time(midnight))
            .with("power", Value::Float(1.0));
        manager.put(vec![first]).await.unwrap();

        let later = Record::new()
            .with("time", Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 6, 0, 0).unwrap()))
            .with("power", Value::Float(2.0));
        manager.put(vec![later]).await.unwrap();

        let all = manager.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get("time"), Some(&Value::Time(midnight)));
    }

    #[tokio::test]
    async fn test_index_normalized_to_timestamp() {
        // A midnight timestamp survives a manager read as a timestamp even if
        // the backend hands back a bare date
        let mut manager = StoreManager::new(Box::new(MemoryStore::new("time", "meter")));
        let midnight = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        let record = Record::new()
            .with("time", Value::Date(midnight.date_naive()))
            .with("power", Value::Float(1.0));
        manager.put(vec![record]).await.unwrap();

        let all = manager.get_all().await.unwrap();
        assert_eq!(all[0].get("time"), Some(&Value::Time(midnight)));
    }
}
