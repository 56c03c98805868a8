//! Priority buckets for cost rankings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{MetricTable, Value};

/// Output column appended by [`PriorityReport::to_metric_table`].
pub const PRIORITY_COLUMN: &str = "PRIORITY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    High,
    Medium,
    Low,
    Normal,
}

impl PriorityBucket {
    pub const ALL: [PriorityBucket; 4] = [Self::High, Self::Medium, Self::Low, Self::Normal];

    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
            Self::Normal => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High Priority",
            Self::Medium => "Medium Priority",
            Self::Low => "Low Priority",
            Self::Normal => "Normal",
        }
    }
}

impl fmt::Display for PriorityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Percentile cut-offs as fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityThresholds {
    pub high_percentile: f64,
    pub medium_percentile: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            high_percentile: 0.90,
            medium_percentile: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrioritizedRow {
    /// Position of the row in the input table.
    pub index: usize,
    pub value: Option<f64>,
    pub bucket: PriorityBucket,
}

/// Rows ordered by bucket rank, value descending, then input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriorityReport {
    pub rows: Vec<PrioritizedRow>,
    pub high_threshold: Option<f64>,
    pub medium_threshold: Option<f64>,
}

impl PriorityReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn count(&self, bucket: PriorityBucket) -> usize {
        self.rows.iter().filter(|r| r.bucket == bucket).count()
    }

    pub fn counts(&self) -> [(PriorityBucket, usize); 4] {
        PriorityBucket::ALL.map(|b| (b, self.count(b)))
    }

    /// Bucket of the input row at `index`.
    pub fn bucket_of(&self, index: usize) -> Option<PriorityBucket> {
        self.rows.iter().find(|r| r.index == index).map(|r| r.bucket)
    }

    /// The source rows in report order with a priority label column appended.
    pub fn to_metric_table(&self, source: &MetricTable) -> MetricTable {
        let mut columns = source.columns().to_vec();
        columns.push(PRIORITY_COLUMN.to_string());
        let mut out = MetricTable::new(columns);
        for row in &self.rows {
            if let Some(src) = source.rows().get(row.index) {
                let mut cells = src.clone();
                cells.push(Value::from(row.bucket.label()));
                out.push_row(cells);
            }
        }
        out
    }
}

/// Linear-interpolated percentile of `values` at fraction `p`.
///
/// `p` is clamped to `[0, 1]`. Non-finite values are ignored; `None` when no
/// finite values remain.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

fn numeric_column(table: &MetricTable, value_column: &str, op: &str) -> Option<Vec<Option<f64>>> {
    if table.is_empty() {
        warn!(op, "Input table is empty");
        return None;
    }
    let Some(idx) = table.column_index(value_column) else {
        warn!(op, column = value_column, "Missing value column");
        return None;
    };
    Some(table.rows().iter().map(|r| r[idx].as_f64()).collect())
}

fn sorted_report(
    values: &[Option<f64>],
    assign: impl Fn(f64) -> PriorityBucket,
    high_threshold: Option<f64>,
    medium_threshold: Option<f64>,
) -> PriorityReport {
    let mut rows: Vec<PrioritizedRow> = values
        .iter()
        .enumerate()
        .map(|(index, value)| PrioritizedRow {
            index,
            value: *value,
            bucket: value.map_or(PriorityBucket::Normal, &assign),
        })
        .collect();

    rows.sort_by(|a, b| {
        a.bucket
            .rank()
            .cmp(&b.bucket.rank())
            .then_with(|| {
                let a = a.value.unwrap_or(f64::NEG_INFINITY);
                let b = b.value.unwrap_or(f64::NEG_INFINITY);
                b.partial_cmp(&a).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.index.cmp(&b.index))
    });

    PriorityReport {
        rows,
        high_threshold,
        medium_threshold,
    }
}

/// Bucket rows by where their value falls in the table's own distribution.
///
/// `value ≥ P(high)` is High, `≥ P(medium)` is Medium, anything else Low.
/// Rows without a numeric value are Normal, and so is every row when all
/// values are equal.
pub fn bucket_by_percentile(
    table: &MetricTable,
    value_column: &str,
    high: f64,
    medium: f64,
) -> PriorityReport {
    let Some(values) = numeric_column(table, value_column, "bucket_by_percentile") else {
        return PriorityReport::default();
    };

    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let (min, max) = present
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if present.is_empty() || min == max {
        return sorted_report(&values, |_| PriorityBucket::Normal, None, None);
    }

    let high = high.clamp(0.0, 1.0);
    let medium = medium.clamp(0.0, 1.0).min(high);
    let high_cut = percentile(&present, high);
    let medium_cut = percentile(&present, medium);

    let assign = |v: f64| match (high_cut, medium_cut) {
        (Some(h), _) if v >= h => PriorityBucket::High,
        (_, Some(m)) if v >= m => PriorityBucket::Medium,
        _ => PriorityBucket::Low,
    };
    sorted_report(&values, assign, high_cut, medium_cut)
}

/// Bucket rows against multiples of the mean: `> 2×` High, `> 1.5×` Medium,
/// `> 1×` Low, else Normal.
pub fn bucket_by_mean_ratio(table: &MetricTable, value_column: &str) -> PriorityReport {
    let Some(values) = numeric_column(table, value_column, "bucket_by_mean_ratio") else {
        return PriorityReport::default();
    };

    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let mean = if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    };
    if mean == 0.0 {
        return sorted_report(&values, |_| PriorityBucket::Normal, None, None);
    }

    let assign = |v: f64| {
        if v > 2.0 * mean {
            PriorityBucket::High
        } else if v > 1.5 * mean {
            PriorityBucket::Medium
        } else if v > mean {
            PriorityBucket::Low
        } else {
            PriorityBucket::Normal
        }
    };
    sorted_report(&values, assign, Some(2.0 * mean), Some(1.5 * mean))
}
