// 🏆 Dominance Ranker - which vendor "owns" the account
//
// Per vendor: most recent period with positive realized revenue, then the
// sum over a trailing window ending at that period. Sort by
//   (period DESC, aggregate DESC, vendor key ASC)
// and take the top. Recency beats size: a small current customer outranks
// a large one from an older period.
//
// Pipeline is ignored. Periods where the vendor's tier is None contribute
// nothing.

use crate::error::EngineResult;
use crate::facts::AccountSnapshot;
use crate::period::{FiscalPeriod, PeriodCalendar};
use crate::vendor::VendorRegistry;
use serde::Serialize;
use std::collections::BTreeMap;

/// Current + prior, the same pair the classifier compares
pub const DEFAULT_WINDOW: usize = 2;

// ============================================================================
// RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominanceCandidate {
    pub vendor: String,
    /// Most recent period with positive revenue
    pub period: FiscalPeriod,
    /// Sum over the trailing window ending at `period`
    pub aggregate: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DominanceRanking {
    /// Ordered best-first
    pub candidates: Vec<DominanceCandidate>,
}

impl DominanceRanking {
    pub fn winner(&self) -> Option<&DominanceCandidate> {
        self.candidates.first()
    }

    pub fn dominant_vendor(&self) -> Option<&str> {
        self.winner().map(|c| c.vendor.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Realized revenue per period for one vendor (tier-None periods excluded)
pub type VendorSeries = BTreeMap<FiscalPeriod, f64>;

// ============================================================================
// RANKER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DominanceRanker {
    pub window: usize,
}

impl DominanceRanker {
    pub fn new() -> Self {
        DominanceRanker {
            window: DEFAULT_WINDOW,
        }
    }

    /// Builder: trailing window size (0 is treated as 1)
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Rank an account's vendors from its facts
    pub fn rank(
        &self,
        snapshot: &AccountSnapshot,
        registry: &VendorRegistry,
        calendar: &PeriodCalendar,
    ) -> EngineResult<DominanceRanking> {
        let mut series: BTreeMap<String, VendorSeries> = BTreeMap::new();

        for vendor in registry.vendors() {
            let values: VendorSeries = calendar
                .periods()
                .iter()
                .filter_map(|p| snapshot.tiered_revenue(vendor, *p).map(|v| (*p, v)))
                .collect();
            series.insert(vendor.key.clone(), values);
        }

        self.rank_series(&series, calendar)
    }

    /// Rank pre-extracted per-vendor series
    pub fn rank_series(
        &self,
        series: &BTreeMap<String, VendorSeries>,
        calendar: &PeriodCalendar,
    ) -> EngineResult<DominanceRanking> {
        let mut candidates = Vec::new();

        for (vendor, values) in series {
            let latest = values
                .iter()
                .rev()
                .find(|(_, value)| **value > 0.0)
                .map(|(period, _)| *period);

            let Some(period) = latest else {
                continue;
            };

            let aggregate: f64 = calendar
                .window_ending(period, self.window)?
                .iter()
                .filter_map(|p| values.get(p))
                .sum();

            candidates.push(DominanceCandidate {
                vendor: vendor.clone(),
                period,
                aggregate,
            });
        }

        candidates.sort_by(|a, b| {
            b.period
                .cmp(&a.period)
                .then_with(|| b.aggregate.total_cmp(&a.aggregate))
                .then_with(|| a.vendor.cmp(&b.vendor))
        });

        Ok(DominanceRanking { candidates })
    }
}

impl Default for DominanceRanker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
