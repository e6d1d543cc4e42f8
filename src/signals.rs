// 📈 Trend Signals - quantize any delta metric into an ordinal bucket
//
// One generic bucketizer for every metric (revenue trend, enrollment trend,
// demographic share trend...). Thresholds are inclusive lower bounds,
// evaluated top-down, first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TREND BUCKET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBucket {
    StrongGrowth,
    Growth,
    Stable,
    Decline,
    StrongDecline,
}

impl TrendBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendBucket::StrongGrowth => "strong_growth",
            TrendBucket::Growth => "growth",
            TrendBucket::Stable => "stable",
            TrendBucket::Decline => "decline",
            TrendBucket::StrongDecline => "strong_decline",
        }
    }

    pub fn is_growing(&self) -> bool {
        matches!(self, TrendBucket::StrongGrowth | TrendBucket::Growth)
    }

    pub fn is_declining(&self) -> bool {
        matches!(self, TrendBucket::Decline | TrendBucket::StrongDecline)
    }
}

impl fmt::Display for TrendBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (inclusive lower bound, bucket), highest first
const THRESHOLDS: [(f64, TrendBucket); 4] = [
    (5.0, TrendBucket::StrongGrowth),
    (1.0, TrendBucket::Growth),
    (-1.0, TrendBucket::Stable),
    (-5.0, TrendBucket::Decline),
];

/// Bucketize a delta. `None` (or NaN) stays `None`.
pub fn bucket(delta: Option<f64>) -> Option<TrendBucket> {
    let delta = delta.filter(|d| !d.is_nan())?;

    let bucket = THRESHOLDS
        .iter()
        .find(|(lower, _)| delta >= *lower)
        .map(|(_, bucket)| *bucket)
        .unwrap_or(TrendBucket::StrongDecline);

    Some(bucket)
}

// ============================================================================
// DELTA COMPUTATION
// ============================================================================

/// Percent change from `base` to `latest`, rounded to 2 decimals.
///
/// Undefined (None) when either side is missing or `base <= 0`.
pub fn percent_change(base: Option<f64>, latest: Option<f64>) -> Option<f64> {
    match (base, latest) {
        (Some(b), Some(l)) if b > 0.0 && b.is_finite() && l.is_finite() => {
            Some(round2((l - b) / b * 100.0))
        }
        _ => None,
    }
}

/// Gap between two trends, e.g. enrollment trend minus staffing trend
/// (positive = demand outgrowing supply).
pub fn pressure_signal(leading: Option<f64>, lagging: Option<f64>) -> Option<f64> {
    Some(round2(leading? - lagging?))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// TESTS
// ============================================================================
