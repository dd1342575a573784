//! Core data types for the gridlog store layer
//!
//! This module defines the fundamental types shared by every backend and
//! decorator:
//! - `Value`: one typed cell (number, text, timestamp, date, duration)
//! - `Record`: an insertion-ordered mapping from field name to `Value`
//! - `Form`: the field-name/kind signature a store enforces across records

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::cmp::Ordering;

/// A single typed value inside a record.
///
/// Values of the same variant are totally ordered; comparing values of
/// different variants yields `None`, except `Int`/`Float` (numeric) and
/// `Date`/`Time` (the date counts as UTC midnight).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
    Date(NaiveDate),
    Duration(Duration),
}

/// The kind of a [`Value`], used for form checking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Int,
    Text,
    Time,
    Date,
    Duration,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::Text => "text",
            ValueKind::Time => "time",
            ValueKind::Date => "date",
            ValueKind::Duration => "duration",
        };
        write!(f, "{}", name)
    }
}

impl Value {
    /// Kind tag of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Int(_) => ValueKind::Int,
            Value::Text(_) => ValueKind::Text,
            Value::Time(_) => ValueKind::Time,
            Value::Date(_) => ValueKind::Date,
            Value::Duration(_) => ValueKind::Duration,
        }
    }

    /// Numeric view of this value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Timestamp view of this value, if it is a `Time`
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Compare two values of the same kind. Dates cross-compare against
    /// timestamps as UTC midnight. `None` for incomparable kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Time(b)) => {
                Some(a.and_time(NaiveTime::MIN).and_utc().cmp(b))
            }
            (Value::Time(a), Value::Date(b)) => {
                Some(a.cmp(&b.and_time(NaiveTime::MIN).and_utc()))
            }
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        self.compare(other)
    }
}

/// One sensor record: an ordered list of named values.
///
/// Field order matters; it is part of the store's form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: append a field
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Replace an existing field's value, or append the field
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Field names in order
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The name/kind signature of this record
    pub fn form(&self) -> Form {
        Form(
            self.fields
                .iter()
                .map(|(n, v)| (n.clone(), v.kind()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Field-name/kind signature enforced across all records of a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form(Vec<(String, ValueKind)>);

impl std::fmt::Display for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(n, k)| format!("{}:{}", n, k))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_builder_preserves_order() {
        let record = Record::new()
            .with("time", Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()))
            .with("power", Value::Float(1.5))
            .with("meter", Value::Text("main".to_string()));

        assert_eq!(record.names(), vec!["time", "power", "meter"]);
        assert_eq!(record.get("power"), Some(&Value::Float(1.5)));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_value_ordering() {
        let a = Value::Time(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
        let b = Value::Time(Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).unwrap());
        assert!(a < b);

        assert!(Value::Float(1.0) < Value::Float(2.0));
        // Int and Float compare numerically
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
        // Incomparable kinds
        assert_eq!(Value::Text("a".into()).compare(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_form_equality() {
        let a = Record::new()
            .with("time", Value::Time(Utc::now()))
            .with("power", Value::Float(1.0));
        let b = Record::new()
            .with("time", Value::Time(Utc::now()))
            .with("power", Value::Float(99.0));
        let c = Record::new()
            .with("time", Value::Time(Utc::now()))
            .with("power", Value::Text("1.0".into()));

        assert_eq!(a.form(), b.form());
        assert_ne!(a.form(), c.form());
        assert_eq!(a.form().to_string(), "time:time, power:float");
    }

    #[test]
    fn test_record_set_replaces() {
        let mut record = Record::new().with("power", Value::Float(1.0));
        record.set("power", Value::Float(2.0));
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("power"), Some(&Value::Float(2.0)));
    }
}
