//! Derived metrics over fetched tables.
//!
//! Everything here is a pure function. Empty input or a missing column yields
//! an explicitly empty result and a warning, never an error.
//!
//! # Module structure
//!
//! - [`delta`]: period-over-period percentage change and direction
//! - [`priority`]: percentile and mean-ratio priority buckets
//! - [`topn`]: top-N with the remainder folded into "Others"
//! - [`pivot`]: long rows to a row × column matrix

pub mod delta;
pub mod pivot;
pub mod priority;
pub mod topn;

pub use delta::{
    DeltaDirection, MetricDelta, format_delta, percentage_delta, percentage_delta_opt,
};
pub use pivot::{Aggregation, PivotTable, hours_of_day, pivot_for_matrix};
pub use priority::{
    PriorityBucket, PriorityReport, PriorityThresholds, PrioritizedRow, bucket_by_mean_ratio,
    bucket_by_percentile, percentile,
};
pub use topn::{OTHERS_LABEL, top_n_with_overflow};
