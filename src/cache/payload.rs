//! Payload Module
//!
//! The dynamically typed value a producer hands to the cache, and the
//! sanitization that turns it into storable JSON.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// Nesting depth beyond which a value is stored as a short summary.
pub const MAX_SANITIZE_DEPTH: usize = 10;

/// Marker strings stored in place of non-finite floats.
pub const POS_INFINITY: &str = "Infinity";
pub const NEG_INFINITY: &str = "-Infinity";

// == Table ==
/// Column-oriented tabular data (a frame).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Payload>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Payload>) {
        self.rows.push(row);
    }
}

// == Payload ==
/// A producer result.
///
/// Everything a producer can return is representable here, including values JSON
/// cannot carry directly (NaN, infinities, timestamps, tables, opaque objects).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    List(Vec<Payload>),
    Map(Vec<(String, Payload)>),
    Table(Table),
    /// A structured value with named attributes
    Object {
        type_name: String,
        attrs: Vec<(String, Payload)>,
    },
    /// Something with no structure beyond its textual form
    Opaque(String),
}

impl Payload {
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Builds a map payload from `(name, value)` pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Payload>,
        I: IntoIterator<Item = (K, V)>,
    {
        Payload::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Best-effort conversion of any serializable value.
    ///
    /// Falls back to an opaque payload naming the type when serialization fails.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => Payload::from(json),
            Err(_) => Payload::Opaque(std::any::type_name::<T>().to_string()),
        }
    }

    /// Sanitized JSON form of this payload.
    pub fn to_json(&self) -> Value {
        sanitize(self, 0)
    }
}

// == Sanitize ==
fn sanitize(payload: &Payload, depth: usize) -> Value {
    if depth > MAX_SANITIZE_DEPTH {
        return Value::String(summary(payload));
    }

    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(i) => Value::Number((*i).into()),
        Payload::Float(f) => float_to_json(*f),
        Payload::Str(s) => Value::String(s.clone()),
        Payload::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        Payload::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        Payload::List(items) => {
            Value::Array(items.iter().map(|p| sanitize(p, depth + 1)).collect())
        }
        Payload::Map(pairs) => pairs_to_json(pairs, depth),
        Payload::Table(table) => Value::Array(
            table
                .rows
                .iter()
                .map(|row| {
                    let record: Map<String, Value> = table
                        .columns
                        .iter()
                        .zip(row.iter())
                        .map(|(col, cell)| (col.clone(), sanitize(cell, depth + 2)))
                        .collect();
                    Value::Object(record)
                })
                .collect(),
        ),
        Payload::Object { type_name, attrs } => {
            if attrs.is_empty() {
                Value::String(type_name.clone())
            } else {
                pairs_to_json(attrs, depth)
            }
        }
        Payload::Opaque(text) => Value::String(text.clone()),
    }
}

/// Bounded stand-in for a value past the depth limit; never descends.
fn summary(payload: &Payload) -> String {
    match payload {
        Payload::List(items) => format!("<list len={}>", items.len()),
        Payload::Map(pairs) => format!("<map len={}>", pairs.len()),
        Payload::Table(table) => format!("<table rows={}>", table.rows.len()),
        Payload::Object { type_name, .. } => format!("<{}>", type_name),
        scalar => scalar.to_string(),
    }
}

fn pairs_to_json(pairs: &[(String, Payload)], depth: usize) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(k, v)| (k.clone(), sanitize(v, depth + 1)))
            .collect(),
    )
}

fn float_to_json(f: f64) -> Value {
    if f.is_nan() {
        Value::Null
    } else if f.is_infinite() {
        let marker = if f > 0.0 { POS_INFINITY } else { NEG_INFINITY };
        Value::String(marker.to_string())
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// == Display ==
/// Compact textual form, used in cache keys.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => write!(f, "null"),
            Payload::Bool(b) => write!(f, "{}", b),
            Payload::Int(i) => write!(f, "{}", i),
            Payload::Float(x) => write!(f, "{}", x),
            Payload::Str(s) | Payload::Opaque(s) => write!(f, "{}", s),
            Payload::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Payload::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Payload::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Payload::Map(pairs) | Payload::Object { attrs: pairs, .. } => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Payload::Table(table) => write!(
                f,
                "<table {} cols x {} rows>",
                table.columns.len(),
                table.rows.len()
            ),
        }
    }
}

// == Conversions ==
impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Payload::Int(i),
                None => Payload::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Payload::Str(s),
            Value::Array(items) => Payload::List(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                Payload::Map(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Str(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Str(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Payload::Int(i)
    }
}

impl From<i32> for Payload {
    fn from(i: i32) -> Self {
        Payload::Int(i64::from(i))
    }
}

impl From<u32> for Payload {
    fn from(i: u32) -> Self {
        Payload::Int(i64::from(i))
    }
}

impl From<f64> for Payload {
    fn from(f: f64) -> Self {
        Payload::Float(f)
    }
}

impl From<DateTime<Utc>> for Payload {
    fn from(ts: DateTime<Utc>) -> Self {
        Payload::Timestamp(ts)
    }
}

impl From<NaiveDate> for Payload {
    fn from(d: NaiveDate) -> Self {
        Payload::Date(d)
    }
}

impl From<Table> for Payload {
    fn from(t: Table) -> Self {
        Payload::Table(t)
    }
}

impl<T: Into<Payload>> From<Vec<T>> for Payload {
    fn from(items: Vec<T>) -> Self {
        Payload::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Payload::Null)
    }
}
