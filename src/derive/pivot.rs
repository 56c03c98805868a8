//! Long-to-wide reshaping for matrix displays (heatmaps).

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{MetricTable, Value};

/// Value written where a row/column combination has no data.
pub const FILL_VALUE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
    Count,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
        })
    }
}

/// The 24 hours of a day, `0..=23`, for hour-of-day heatmaps.
pub fn hours_of_day() -> Vec<Value> {
    (0..24).map(Value::Int).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PivotTable {
    pub row_key: String,
    pub row_labels: Vec<Value>,
    pub column_labels: Vec<Value>,
    /// `cells[row][column]`
    pub cells: Vec<Vec<f64>>,
}

impl PivotTable {
    pub fn is_empty(&self) -> bool {
        self.row_labels.is_empty()
    }

    pub fn cell(&self, row: &Value, column: &Value) -> Option<f64> {
        let r = self.row_labels.iter().position(|l| same_label(l, row))?;
        let c = self.column_labels.iter().position(|l| same_label(l, column))?;
        Some(self.cells[r][c])
    }

    pub fn row(&self, row: &Value) -> Option<&[f64]> {
        let r = self.row_labels.iter().position(|l| same_label(l, row))?;
        Some(&self.cells[r])
    }

    /// Flatten into a table whose first column is the row key and whose
    /// remaining columns are the pivot column labels.
    pub fn to_metric_table(&self) -> MetricTable {
        let mut columns = vec![self.row_key.clone()];
        columns.extend(self.column_labels.iter().map(ToString::to_string));
        let mut out = MetricTable::new(columns);
        for (label, cells) in self.row_labels.iter().zip(&self.cells) {
            let mut row = Vec::with_capacity(cells.len() + 1);
            row.push(label.clone());
            row.extend(cells.iter().map(|v| Value::Float(*v)));
            out.push_row(row);
        }
        out
    }
}

fn same_label(a: &Value, b: &Value) -> bool {
    a.to_string() == b.to_string()
}

#[derive(Debug, Clone, Copy, Default)]
struct Acc {
    sum: f64,
    count: usize,
}

impl Acc {
    fn finish(self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Mean if self.count > 0 => self.sum / self.count as f64,
            Aggregation::Mean => FILL_VALUE,
            Aggregation::Count => self.count as f64,
        }
    }
}

/// Label interner preserving first-seen order.
#[derive(Default)]
struct Labels {
    values: Vec<Value>,
    index: FxHashMap<String, usize>,
}

impl Labels {
    fn intern(&mut self, value: &Value) -> usize {
        let key = value.to_string();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.values.len();
        self.values.push(value.clone());
        self.index.insert(key, idx);
        idx
    }
}

/// Reshape long rows into a `row_key × column_key` grid of `value_key`.
///
/// Declared columns come first in declared order, whether or not any row
/// mentions them; column keys found only in the data follow in order of first
/// appearance. Rows keep their order of first appearance. Rows whose row or
/// column key is null are skipped.
pub fn pivot_for_matrix(
    table: &MetricTable,
    row_key: &str,
    column_key: &str,
    value_key: &str,
    aggregation: Aggregation,
    declared_columns: &[Value],
) -> PivotTable {
    if table.is_empty() {
        warn!(op = "pivot_for_matrix", "Input table is empty");
        return PivotTable::default();
    }
    let (Some(ri), Some(ci), Some(vi)) = (
        table.column_index(row_key),
        table.column_index(column_key),
        table.column_index(value_key),
    ) else {
        warn!(
            op = "pivot_for_matrix",
            row_key, column_key, value_key, "Missing required column"
        );
        return PivotTable::default();
    };

    let mut rows = Labels::default();
    let mut columns = Labels::default();
    for declared in declared_columns {
        columns.intern(declared);
    }
    let mut acc: Vec<Vec<Acc>> = Vec::new();

    for row in table.rows() {
        let (r, c, v) = (&row[ri], &row[ci], &row[vi]);
        if r.is_null() || c.is_null() {
            continue;
        }
        let r = rows.intern(r);
        let c = columns.intern(c);
        if r == acc.len() {
            acc.push(Vec::new());
        }
        let cells = &mut acc[r];
        if cells.len() <= c {
            cells.resize(c + 1, Acc::default());
        }
        let cell = &mut cells[c];
        match aggregation {
            Aggregation::Count => {
                if !v.is_null() {
                    cell.count += 1;
                }
            }
            Aggregation::Sum | Aggregation::Mean => {
                if let Some(x) = v.as_f64() {
                    cell.sum += x;
                    cell.count += 1;
                }
            }
        }
    }

    let width = columns.values.len();
    let cells: Vec<Vec<f64>> = acc
        .into_iter()
        .map(|mut row| {
            row.resize(width, Acc::default());
            row.into_iter().map(|a| a.finish(aggregation)).collect()
        })
        .collect();

    PivotTable {
        row_key: table.columns()[ri].clone(),
        row_labels: rows.values,
        column_labels: columns.values,
        cells,
    }
}
