//! Period-over-period deltas.

use std::fmt;

use serde::Serialize;

/// Delta reported when the previous period was zero and the current is not.
pub const ZERO_BASELINE_DELTA: f64 = 100.0;

/// Percentage change from `previous` to `current`.
///
/// A zero baseline has no defined ratio, so it is clamped: `0 → 0` is `0`,
/// `0 → x` is `±100` with the sign of `x`.
pub fn percentage_delta(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            ZERO_BASELINE_DELTA.copysign(current)
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// [`percentage_delta`] over optional inputs; `None` if either side is
/// missing or not finite.
pub fn percentage_delta_opt(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = current.filter(|v| v.is_finite())?;
    let previous = previous.filter(|v| v.is_finite())?;
    Some(percentage_delta(current, previous))
}

/// `+50.0%`, `-12.5%`, or `N/A`.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) if d.is_finite() => format!("{d:+.1}%"),
        _ => "N/A".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaDirection {
    Improved,
    Regressed,
    Unchanged,
}

impl DeltaDirection {
    /// Classify a delta given whether growth is good for this metric.
    pub fn classify(delta: Option<f64>, higher_is_better: bool) -> Self {
        match delta {
            Some(d) if d > 0.0 => {
                if higher_is_better {
                    Self::Improved
                } else {
                    Self::Regressed
                }
            }
            Some(d) if d < 0.0 => {
                if higher_is_better {
                    Self::Regressed
                } else {
                    Self::Improved
                }
            }
            _ => Self::Unchanged,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improved => "improved",
            Self::Regressed => "regressed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for DeltaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric compared across two periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub delta_pct: Option<f64>,
    pub direction: DeltaDirection,
}

impl MetricDelta {
    pub fn new(current: Option<f64>, previous: Option<f64>, higher_is_better: bool) -> Self {
        let delta_pct = percentage_delta_opt(current, previous);
        Self {
            current,
            previous,
            delta_pct,
            direction: DeltaDirection::classify(delta_pct, higher_is_better),
        }
    }

    pub fn formatted(&self) -> String {
        format_delta(self.delta_pct)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "current": self.current,
            "previous": self.previous,
            "delta_pct": self.delta_pct,
            "formatted": self.formatted(),
            "direction": self.direction.as_str(),
        })
    }
}
