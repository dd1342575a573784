//! Document-database store backend
//!
//! Persists records as JSON documents in an embedded SQLite database, one
//! table per location. Each row carries a sortable copy of the index value so
//! range queries run in SQL; the document itself is the codec's wire form,
//! stored as an ordered array of `[field, value]` pairs to preserve the
//! store's field order.

use crate::store::backend::StoreBackend;
use crate::store::codec::{RecordCodec, WireRecord};
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, ToSql};
use std::path::Path;

/// Store backend writing JSON documents into SQLite tables
pub struct DocumentStore {
    conn: Connection,
    index: String,
    location: String,
    codec: RecordCodec,
}

/// Index values bind as REAL for numbers and TEXT otherwise; RFC 3339
/// timestamps sort correctly as text
enum IndexParam {
    Number(f64),
    Text(String),
}

impl ToSql for IndexParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            IndexParam::Number(v) => v.to_sql(),
            IndexParam::Text(v) => v.to_sql(),
        }
    }
}

impl DocumentStore {
    /// Open (or create) the database file at `path`
    pub fn open(
        path: impl AsRef<Path>,
        index: impl Into<String>,
        location: impl Into<String>,
    ) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            index: index.into(),
            location: location.into(),
            codec: RecordCodec::default(),
        })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory(
        index: impl Into<String>,
        location: impl Into<String>,
    ) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            index: index.into(),
            location: location.into(),
            codec: RecordCodec::default(),
        })
    }

    pub fn with_codec(mut self, codec: RecordCodec) -> Self {
        self.codec = codec;
        self
    }

    fn table(&self) -> String {
        // Locations may contain shard suffixes like dates; always quote
        format!("\"{}\"", self.location.replace('"', "\"\""))
    }

    fn table_exists(&self) -> StoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&self.location],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn index_param(&self, value: &Value) -> IndexParam {
        match value.as_f64() {
            Some(v) => IndexParam::Number(v),
            None => IndexParam::Text(self.codec.encode_value(value)),
        }
    }

    fn decode_rows(&self, docs: Vec<String>) -> StoreResult<Vec<Record>> {
        let mut rows: Vec<WireRecord> = Vec::with_capacity(docs.len());
        for doc in docs {
            let pairs: Vec<(String, String)> = serde_json::from_str(&doc)?;
            rows.push(pairs);
        }
        Ok(self.codec.decode_records(&rows))
    }

    fn select(&self, clause: &str, params: &[&dyn ToSql]) -> StoreResult<Vec<Record>> {
        if !self.table_exists()? {
            return Err(StoreError::Empty(self.location.clone()));
        }
        let sql = format!("SELECT doc FROM {} {}", self.table(), clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        if docs.is_empty() {
            return Err(StoreError::Empty(self.location.clone()));
        }
        self.decode_rows(docs)
    }
}

#[async_trait]
impl StoreBackend for DocumentStore {
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
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    async fn put(&mut self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.table();
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (idx NOT NULL, doc TEXT NOT NULL)",
                table
            ),
            [],
        )?;

        let index = self.index.clone();
        let mut payload = Vec::with_capacity(records.len());
        for record in records {
            let idx_value = record
                .get(&index)
                .ok_or_else(|| StoreError::BadField(index.clone()))?;
            let wire: WireRecord = record
                .iter()
                .map(|(n, v)| (n.to_string(), self.codec.encode_value(v)))
                .collect();
            payload.push((self.index_param(idx_value), serde_json::to_string(&wire)?));
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {} (idx, doc) VALUES (?1, ?2)", table))?;
            for (idx, doc) in &payload {
                stmt.execute(rusqlite::params![idx, doc])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let start = self.index_param(start);
        let stop = self.index_param(stop);
        match self.select(
            "WHERE idx >= ?1 AND idx <= ?2 ORDER BY idx",
            &[&start, &stop],
        ) {
            Ok(records) => Ok(records),
            // A range with no matches is an empty result, not a failure
            Err(StoreError::Empty(_)) if self.table_exists()? => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        self.select("ORDER BY idx", &[])
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        self.select("ORDER BY idx ASC LIMIT 1", &[])
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        self.select("ORDER BY idx DESC LIMIT 1", &[])
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        let sql = format!("DELETE FROM {} WHERE idx >= ?1 AND idx <= ?2", self.table());
        self.conn
            .execute(&sql, rusqlite::params![self.index_param(start), self.index_param(stop)])?;
        Ok(())
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", self.table()), [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(minute: u32, power: f64) -> Record {
        Record::new()
            .with(
                "time",
                Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 12, minute, 0).unwrap()),
            )
            .with("power", Value::Float(power))
    }

    fn time(minute: u32) -> Value {
        Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 12, minute, 0).unwrap())
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let mut store = DocumentStore::open_in_memory("time", "meter").unwrap();
        let written = vec![record(0, 1.5), record(5, 2.5), record(10, 3.5)];
        store.put(&written).await.unwrap();

        assert_eq!(store.get_all().await.unwrap(), written);
        assert_eq!(
            store.get(&time(4), &time(10)).await.unwrap(),
            vec![record(5, 2.5), record(10, 3.5)]
        );
    }

    #[tokio::test]
    async fn test_first_last_and_remove() {
        let mut store = DocumentStore::open_in_memory("time", "meter").unwrap();
        store
            .put(&[record(5, 2.0), record(0, 1.0), record(10, 3.0)])
            .await
            .unwrap();

        assert_eq!(store.get_first().await.unwrap(), vec![record(0, 1.0)]);
        assert_eq!(store.get_last().await.unwrap(), vec![record(10, 3.0)]);

        store.remove(&time(0), &time(5)).await.unwrap();
        assert_eq!(store.get_all().await.unwrap(), vec![record(10, 3.0)]);
    }

    #[tokio::test]
    async fn test_empty_range_is_not_an_error() {
        let mut store = DocumentStore::open_in_memory("time", "meter").unwrap();
        store.put(&[record(0, 1.0)]).await.unwrap();
        assert!(store.get(&time(20), &time(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_empty_error() {
        let mut store = DocumentStore::open_in_memory("time", "meter").unwrap();
        assert!(matches!(
            store.get_all().await.unwrap_err(),
            StoreError::Empty(_)
        ));
    }

    #[tokio::test]
    async fn test_locations_and_delete() {
        let mut store = DocumentStore::open_in_memory("time", "meter").unwrap();
        store.put(&[record(0, 1.0)]).await.unwrap();
        store.set_location("meter_2023-05-02");
        store.put(&[record(1, 2.0)]).await.unwrap();

        assert_eq!(
            store.existing_locations().await.unwrap(),
            vec!["meter", "meter_2023-05-02"]
        );

        store.delete_all().await.unwrap();
        assert_eq!(store.existing_locations().await.unwrap(), vec!["meter"]);
    }

    #[tokio::test]
    async fn test_persists_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("documents.db");
        {
            let mut store = DocumentStore::open(&path, "time", "meter").unwrap();
            store.put(&[record(0, 1.0)]).await.unwrap();
        }
        let mut store = DocumentStore::open(&path, "time", "meter").unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }
}
