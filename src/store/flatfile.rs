//! Flat-file store backend
//!
//! Persists one CSV file per location under a base directory. The first row
//! is a header naming the fields; `put` appends rows, `remove` rewrites the
//! file without the matching range. Values go through the [`RecordCodec`] on
//! the way in and out.

use crate::store::backend::{in_range, max_record, min_record, StoreBackend};
use crate::store::codec::{RecordCodec, WireRecord};
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Store backend writing CSV files, one per location
#[derive(Debug)]
pub struct FlatFileStore {
    index: String,
    directory: PathBuf,
    location: String,
    codec: RecordCodec,
}

impl FlatFileStore {
    pub fn new(
        index: impl Into<String>,
        directory: impl Into<PathBuf>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            directory: directory.into(),
            location: location.into(),
            codec: RecordCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: RecordCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Full path of the current location's file
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.csv", self.location))
    }

    fn read_all(&self) -> StoreResult<Vec<Record>> {
        let path = self.file_path();
        if !path.exists() {
            return Err(StoreError::Empty(self.location.clone()));
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let headers = reader.headers()?.clone();
        let mut rows: Vec<WireRecord> = Vec::new();
        for row in reader.records() {
            let row = row?;
            rows.push(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(name, cell)| (name.to_string(), cell.to_string()))
                    .collect(),
            );
        }
        Ok(self.codec.decode_records(&rows))
    }

    fn append(&self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.directory)?;

        let path = self.file_path();
        let file_exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !file_exists {
            writer.write_record(records[0].names())?;
        }
        for wire in self.codec.encode_records(records) {
            writer.write_record(wire.iter().map(|(_, cell)| cell.as_str()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for FlatFileStore {
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
        if !self.directory.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn put(&mut self, records: &[Record]) -> StoreResult<()> {
        self.append(records)
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .filter(|r| in_range(r, &self.index, start, stop))
            .collect())
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        self.read_all()
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        min_record(&self.read_all()?, &self.index)
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        max_record(&self.read_all()?, &self.index)
    }

    async fn remove(&mut self, start: &Value, stop: &Value) -> StoreResult<()> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(());
        }
        let remaining: Vec<Record> = self
            .read_all()?
            .into_iter()
            .filter(|r| !in_range(r, &self.index, start, stop))
            .collect();
        std::fs::remove_file(&path)?;
        self.append(&remaining)
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        let path = self.file_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Helper used in tests and the demo binary: number of data rows in a file
pub fn count_rows(path: &Path) -> StoreResult<usize> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    Ok(reader.records().count())
}
