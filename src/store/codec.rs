//! Record codec
//!
//! Converts between typed [`Record`]s and the string wire form the textual
//! backends persist (CSV cells, document fields, line-protocol values).
//!
//! Guarantees `decode(encode(v)) == v` for every supported type, modulo two
//! documented normalisations:
//! - timestamps are written in the storage timezone (UTC) and a timestamp
//!   that falls exactly on local midnight decodes as a bare [`Value::Date`]
//!   unless the caller prevents date inference
//! - durations are written as `"<seconds>s"`
//!
//! Decoding is lenient: a cell that parses as nothing passes through
//! unchanged as [`Value::Text`]. Type mismatches are the store form's job.

use crate::store::record::{Record, Value, ValueKind};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};

/// A wire-form record: field names paired with their encoded string cells
pub type WireRecord = Vec<(String, String)>;

/// Codec between typed values and their string wire form
#[derive(Debug, Clone)]
pub struct RecordCodec {
    /// Timezone used for date inference and bare-date promotion.
    /// Storage timezone is always UTC.
    local: FixedOffset,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self { local: Utc.fix() }
    }
}

impl RecordCodec {
    pub fn new(local: FixedOffset) -> Self {
        Self { local }
    }

    /// Encode one value to its wire string
    pub fn encode_value(&self, value: &Value) -> String {
        match value {
            Value::Float(v) => format!("{:?}", v),
            Value::Int(v) => format!("{}", v),
            Value::Text(v) => v.clone(),
            Value::Time(v) => v.to_rfc3339(),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Duration(v) => format!("{}s", v.num_seconds()),
        }
    }

    /// Decode one wire string to a typed value.
    ///
    /// `prevent_date` disables bare-date inference for cells statically known
    /// to hold timestamps (e.g. a store's index column): bare dates and
    /// midnight timestamps then decode as `Time` at local midnight.
    pub fn decode_value(&self, cell: &str, prevent_date: bool) -> Value {
        let cell = cell.trim();

        if let Ok(v) = cell.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = cell.parse::<f64>() {
            return Value::Float(v);
        }
        if let Ok(date) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
            if prevent_date {
                return Value::Time(self.local_midnight(date));
            }
            return Value::Date(date);
        }
        if let Some(seconds) = cell
            .strip_suffix('s')
            .and_then(|body| body.parse::<f64>().ok())
        {
            return Value::Duration(Duration::milliseconds((seconds * 1000.0) as i64));
        }
        if let Some(time) = self.parse_datetime(cell) {
            let local = time.with_timezone(&self.local);
            if local.time() == NaiveTime::MIN && !prevent_date {
                return Value::Date(local.date_naive());
            }
            return Value::Time(time);
        }

        // Lenient fall-through: keep the raw cell
        Value::Text(cell.to_string())
    }

    /// Encode a batch of records into wire form
    pub fn encode_records(&self, records: &[Record]) -> Vec<WireRecord> {
        records
            .iter()
            .map(|record| {
                record
                    .iter()
                    .map(|(name, value)| (name.to_string(), self.encode_value(value)))
                    .collect()
            })
            .collect()
    }

    /// Decode a batch of wire records.
    ///
    /// Works column-wise: if a column decodes to a mix of dates and
    /// timestamps, the whole column is re-decoded with date inference off so
    /// that every record keeps the store's form.
    pub fn decode_records(&self, rows: &[WireRecord]) -> Vec<Record> {
        let mut records: Vec<Record> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(name, cell)| (name.clone(), self.decode_value(cell, false)))
                    .collect()
            })
            .collect();

        if records.is_empty() {
            return records;
        }

        // One pass per column of the first record; shapes are uniform per store
        let names: Vec<String> = records[0].names().iter().map(|n| n.to_string()).collect();
        for name in &names {
            let kinds: Vec<ValueKind> = records
                .iter()
                .filter_map(|r| r.get(name).map(Value::kind))
                .collect();
            let mixed = kinds.contains(&ValueKind::Date) && kinds.contains(&ValueKind::Time);
            if mixed {
                for (record, row) in records.iter_mut().zip(rows.iter()) {
                    if let Some((_, cell)) = row.iter().find(|(n, _)| n == name) {
                        record.set(name, self.decode_value(cell, true));
                    }
                }
            }
        }

        records
    }

    /// Re-run a value through the codec, optionally disabling date inference.
    /// Used by the manager to normalise columns statically known to be
    /// timestamps.
    pub fn redecode(&self, value: &Value, prevent_date: bool) -> Value {
        self.decode_value(&self.encode_value(value), prevent_date)
    }

    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN);
        let utc_naive = naive - Duration::seconds(self.local.local_minus_utc() as i64);
        DateTime::from_naive_utc_and_offset(utc_naive, Utc)
    }

    fn parse_datetime(&self, cell: &str) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(cell) {
            return Some(t.with_timezone(&Utc));
        }
        // Naive datetimes in wire data are interpreted in the storage timezone
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(cell, format) {
                return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn codec() -> RecordCodec {
        RecordCodec::default()
    }

    #[test]
    fn test_round_trip_numbers() {
        let c = codec();
        for value in [Value::Float(3.5), Value::Float(3.0), Value::Int(3)] {
            let decoded = c.decode_value(&c.encode_value(&value), false);
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_round_trip_time_and_date() {
        let c = codec();
        let time = Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 12, 30, 0).unwrap());
        assert_eq!(c.decode_value(&c.encode_value(&time), false), time);

        let date = Value::Date(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
        assert_eq!(c.decode_value(&c.encode_value(&date), false), date);
    }

    #[test]
    fn test_round_trip_duration() {
        let c = codec();
        let duration = Value::Duration(Duration::seconds(3600));
        let encoded = c.encode_value(&duration);
        assert_eq!(encoded, "3600s");
        assert_eq!(c.decode_value(&encoded, false), duration);
    }

    #[test]
    fn test_midnight_decodes_as_date() {
        let c = codec();
        let midnight = Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
        let decoded = c.decode_value(&c.encode_value(&midnight), false);
        assert_eq!(
            decoded,
            Value::Date(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap())
        );

        // prevent_date keeps the timestamp
        let decoded = c.decode_value(&c.encode_value(&midnight), true);
        assert_eq!(decoded, midnight);
    }

    #[test]
    fn test_prevent_date_promotes_bare_date() {
        let c = codec();
        let decoded = c.decode_value("2023-05-01", true);
        assert_eq!(
            decoded,
            Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_local_timezone_midnight() {
        // UTC+2: local midnight is 22:00 UTC the previous day
        let c = RecordCodec::new(FixedOffset::east_opt(2 * 3600).unwrap());
        let local_midnight = Value::Time(Utc.with_ymd_and_hms(2023, 4, 30, 22, 0, 0).unwrap());
        let decoded = c.decode_value(&c.encode_value(&local_midnight), false);
        assert_eq!(
            decoded,
            Value::Date(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap())
        );
    }

    #[test]
    fn test_lenient_passthrough() {
        let c = codec();
        let decoded = c.decode_value("not a number", false);
        assert_eq!(decoded, Value::Text("not a number".to_string()));
    }

    #[test]
    fn test_mixed_column_redecoded_as_time() {
        let c = codec();
        let rows = vec![
            vec![
                ("time".to_string(), "2023-05-01T00:00:00+00:00".to_string()),
                ("power".to_string(), "1.5".to_string()),
            ],
            vec![
                ("time".to_string(), "2023-05-01T06:00:00+00:00".to_string()),
                ("power".to_string(), "2.5".to_string()),
            ],
        ];
        let records = c.decode_records(&rows);
        // Without the column pass the first cell would decode as a Date
        assert_eq!(
            records[0].get("time"),
            Some(&Value::Time(
                Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            records[1].get("time"),
            Some(&Value::Time(
                Utc.with_ymd_and_hms(2023, 5, 1, 6, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_encode_records_preserves_field_order() {
        let c = codec();
        let record = Record::new()
            .with("time", Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()))
            .with("power", Value::Float(1.5));
        let wire = c.encode_records(&[record]);
        assert_eq!(wire[0][0].0, "time");
        assert_eq!(wire[0][1], ("power".to_string(), "1.5".to_string()));
    }
}
