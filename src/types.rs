//! Shared value and table types.
//!
//! [`Value`] is used both for caller parameters and for result cells, so a
//! table fetched from one query can feed parameters of the next without
//! conversion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A scalar parameter or cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Parse a loosely-typed string (CLI input, TOML) into the narrowest value:
    /// integer, float, `YYYY-MM-DD` date, else text.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>()
            && f.is_finite()
        {
            return Self::Float(f);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Self::Date(d);
        }
        Self::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Text is parsed leniently the way warehouse
    /// drivers hand back DECIMAL columns as strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as an SQL literal when the value class is literal-safe.
    ///
    /// Only dates and finite numbers qualify; text never does. Negative
    /// numbers are parenthesized so a preceding `-` cannot form a `--`
    /// comment.
    pub(crate) fn sql_literal(&self) -> Option<String> {
        match self {
            Self::Date(d) => Some(format!("'{}'", d.format("%Y-%m-%d"))),
            Self::Int(i) if *i < 0 => Some(format!("({i})")),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) if f.is_finite() && f.is_sign_negative() => Some(format!("({f})")),
            Self::Float(f) if f.is_finite() => Some(f.to_string()),
            _ => None,
        }
    }

    /// Type-tagged, unambiguous form used to build cache keys.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Self::Null => "n".to_string(),
            Self::Int(i) => format!("i:{i}"),
            Self::Float(f) => format!("f:{f:?}"),
            Self::Text(s) => format!("s:{}", serde_json::Value::from(s.as_str())),
            Self::Date(d) => format!("d:{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Display label. Integral floats print without a fractional part so that
/// `Int(3)` and `Float(3.0)` label the same pivot column.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => {
                write!(f, "{x:.0}")
            }
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// ParameterSet
// ---------------------------------------------------------------------------

/// Placeholder name → value, ordered by name.
///
/// Ordering by name makes the canonical form independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, Value>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Present and not null.
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deterministic text form: `name=tagged` pairs joined with `&`, sorted by
    /// name.
    pub fn canonical(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", serde_json::Value::from(k.as_str()), v.canonical()))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// MetricTable
// ---------------------------------------------------------------------------

/// One result row, positionally aligned with [`MetricTable::columns`].
pub type MetricRow = Vec<Value>;

/// Tabular query result: ordered named columns, rows of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricTable {
    columns: Vec<String>,
    rows: Vec<MetricRow>,
}

impl MetricTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Short rows are padded with `Null`, long rows truncated,
    /// so every row always matches the column count.
    pub fn push_row(&mut self, row: impl Into<MetricRow>) {
        let mut row = row.into();
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Builder-style [`push_row`](Self::push_row).
    pub fn with_row(mut self, row: impl Into<MetricRow>) -> Self {
        self.push_row(row);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position by name: exact match first, then ASCII
    /// case-insensitive (warehouses upper-case unquoted aliases).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name).or_else(|| {
            self.columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
        })
    }

    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.column_index(n).is_some())
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// First cell of the first row; the shape of single-metric queries.
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first()?.first()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), serde_json::to_value(v).unwrap_or_default()))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::json!({
            "columns": self.columns,
            "rows": rows,
            "row_count": self.rows.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
