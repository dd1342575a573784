//! Time-series database store backend
//!
//! Talks to an InfluxDB v2 compatible server over HTTP: `put` writes line
//! protocol to `/api/v2/write`, reads run Flux range queries against
//! `/api/v2/query` and parse the CSV response. One measurement per location.
//!
//! The server owns retention, so `remove` and `delete_all` are accepted and
//! ignored.

use crate::store::backend::StoreBackend;
use crate::store::codec::{RecordCodec, WireRecord};
use crate::store::error::{StoreError, StoreResult};
use crate::store::record::{Record, Value};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Columns the Flux pipeline returns that are not record fields
const META_COLUMNS: &[&str] = &["", "result", "table", "_measurement", "_start", "_stop"];

/// How far back unbounded reads look, in days. Flux requires an explicit
/// range start; anything older than this is assumed past the bucket's
/// retention window.
const FULL_RANGE_DAYS: i64 = 10 * 365;

/// Store backend for an InfluxDB-style time-series database
pub struct InfluxStore {
    http: reqwest::Client,
    base_url: String,
    org: String,
    token: String,
    bucket: String,
    location: String,
    index: String,
    codec: RecordCodec,
}

impl InfluxStore {
    pub fn new(
        base_url: impl Into<String>,
        org: impl Into<String>,
        token: impl Into<String>,
        bucket: impl Into<String>,
        measurement: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            org: org.into(),
            token: token.into(),
            bucket: bucket.into(),
            location: measurement.into(),
            // The server's own time column indexes every measurement
            index: "_time".to_string(),
            codec: RecordCodec::default(),
        }
    }

    fn time_of(value: &Value) -> StoreResult<DateTime<Utc>> {
        value
            .as_time()
            .ok_or_else(|| StoreError::BadField("_time".to_string()))
    }

    fn range_query(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> String {
        // Flux ranges are half-open; widen stop by one nanosecond so the
        // capability contract (inclusive both ends) holds
        let stop = stop + Duration::nanoseconds(1);
        format!(
            "from(bucket:\"{}\") \
             |> range(start: {}, stop: {}) \
             |> filter(fn: (r) => r[\"_measurement\"] == \"{}\") \
             |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\") \
             |> drop(columns: [\"_measurement\", \"_start\", \"_stop\"])",
            self.bucket,
            start.to_rfc3339_opts(SecondsFormat::Nanos, true),
            stop.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.location,
        )
    }

    /// Range query over the whole retention window as of now
    fn full_range_query(&self) -> String {
        let stop = Utc::now();
        self.range_query(stop - Duration::days(FULL_RANGE_DAYS), stop)
    }

    async fn query(&self, flux: String) -> StoreResult<Vec<Record>> {
        let url = format!("{}/api/v2/query?org={}", self.base_url, self.org);
        let body = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": { "header": true, "annotations": [] },
        });
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;

        let rows = parse_query_csv(&text);
        if rows.is_empty() {
            return Err(StoreError::Empty(self.location.clone()));
        }
        Ok(self.codec.decode_records(&rows))
    }
}

/// Encode one record as an InfluxDB line-protocol line.
///
/// The index field becomes the line timestamp (nanoseconds); numeric fields
/// are written bare (`i` suffix for integers), everything else as a quoted
/// string in codec wire form.
pub fn encode_line(
    measurement: &str,
    record: &Record,
    index: &str,
    codec: &RecordCodec,
) -> StoreResult<String> {
    let timestamp = record
        .get(index)
        .and_then(Value::as_time)
        .and_then(|t| t.timestamp_nanos_opt())
        .ok_or_else(|| StoreError::BadField(index.to_string()))?;

    let mut fields = Vec::new();
    for (name, value) in record.iter() {
        if name == index {
            continue;
        }
        let encoded = match value {
            Value::Float(v) => format!("{:?}", v),
            Value::Int(v) => format!("{}i", v),
            other => format!("\"{}\"", escape_string(&codec.encode_value(other))),
        };
        fields.push(format!("{}={}", escape_key(name), encoded));
    }
    if fields.is_empty() {
        return Err(StoreError::BadField("record has no data fields".to_string()));
    }

    Ok(format!(
        "{} {} {}",
        escape_key(measurement),
        fields.join(","),
        timestamp
    ))
}

fn escape_key(key: &str) -> String {
    key.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse a headered CSV query response into wire records, dropping the
/// result/table bookkeeping columns. Quoting follows CSV rules, so text
/// values holding commas or quotes survive the round trip.
pub fn parse_query_csv(text: &str) -> Vec<WireRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for result in reader.records() {
        let cells = match result {
            Ok(cells) => cells,
            Err(_) => continue,
        };
        if cells.iter().all(str::is_empty) {
            continue;
        }
        let names = match &header {
            Some(names) => names,
            None => {
                header = Some(cells.iter().map(str::to_string).collect());
                continue;
            }
        };
        let row: WireRecord = names
            .iter()
            .zip(cells.iter())
            .filter(|(name, _)| !META_COLUMNS.contains(&name.as_str()))
            .map(|(name, cell)| (name.clone(), cell.to_string()))
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    rows
}

#[async_trait]
impl StoreBackend for InfluxStore {
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
        // Measurements are not enumerable through this client
        Ok(vec![self.location.clone()])
    }

    async fn put(&mut self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let lines: StoreResult<Vec<String>> = records
            .iter()
            .map(|r| encode_line(&self.location, r, &self.index, &self.codec))
            .collect();
        let body = lines?.join("\n");

        let url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            self.base_url, self.org, self.bucket
        );
        self.http
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get(&mut self, start: &Value, stop: &Value) -> StoreResult<Vec<Record>> {
        let flux = self.range_query(Self::time_of(start)?, Self::time_of(stop)?);
        match self.query(flux).await {
            Ok(records) => Ok(records),
            // A range with no matches is an empty result, not a failure
            Err(StoreError::Empty(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn get_all(&mut self) -> StoreResult<Vec<Record>> {
        let flux = self.full_range_query();
        self.query(flux).await
    }

    async fn get_first(&mut self) -> StoreResult<Vec<Record>> {
        let flux = format!("{} |> first(column: \"_time\")", self.full_range_query());
        self.query(flux).await
    }

    async fn get_last(&mut self) -> StoreResult<Vec<Record>> {
        let flux = format!("{} |> last(column: \"_time\")", self.full_range_query());
        self.query(flux).await
    }

    async fn remove(&mut self, _start: &Value, _stop: &Value) -> StoreResult<()> {
        tracing::debug!(measurement = %self.location, "remove ignored; retention is server-side");
        Ok(())
    }

    async fn delete_all(&mut self) -> StoreResult<()> {
        tracing::debug!(measurement = %self.location, "delete_all ignored; retention is server-side");
        Ok(())
    }
}
