//! Top-N with overflow folded into a single "Others" row.

use std::cmp::Ordering;

use tracing::warn;

use crate::types::{MetricRow, MetricTable, Value};

pub const OTHERS_LABEL: &str = "Others";

/// Keep the `n` largest rows by `value_column` and sum the rest into one
/// `"Others"` row.
///
/// Kept rows come through whole with every source column. The `"Others"` row
/// carries the label under `name_column`, the folded sum under
/// `value_column`, and `Null` everywhere else. Sorting is stable, so ties keep
/// input order. Non-numeric values count as zero. The sum of the output values
/// always equals the sum of the input values.
pub fn top_n_with_overflow(
    table: &MetricTable,
    value_column: &str,
    name_column: &str,
    n: usize,
) -> MetricTable {
    let empty = || MetricTable::new(table.columns().iter().cloned());
    if table.is_empty() {
        warn!(op = "top_n_with_overflow", "Input table is empty");
        return empty();
    }
    let (Some(value_idx), Some(name_idx)) = (
        table.column_index(value_column),
        table.column_index(name_column),
    ) else {
        warn!(
            op = "top_n_with_overflow",
            value_column, name_column, "Missing required column"
        );
        return empty();
    };

    let mut ranked: Vec<(&MetricRow, f64)> = table
        .rows()
        .iter()
        .map(|row| (row, row[value_idx].as_f64().unwrap_or(0.0)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut out = empty();
    let overflow = ranked.split_off(n.min(ranked.len()));
    for (row, _) in ranked {
        out.push_row(row.clone());
    }
    if !overflow.is_empty() {
        let mut others = vec![Value::Null; table.columns().len()];
        others[name_idx] = Value::from(OTHERS_LABEL);
        others[value_idx] = Value::Float(overflow.iter().map(|(_, v)| v).sum());
        out.push_row(others);
    }
    out
}
