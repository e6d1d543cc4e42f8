// 🔁 Multi-Period Orchestrator - every vendor × every period
//
// For each vendor (registry order) and each calendar period (earliest →
// latest), period k is "current" and the calendar's immediate predecessor
// is "prior". Non-adjacent periods are never compared.
//
// A missing fact still yields a cell: it is synthesized as all-None with the
// account-level targeting flag, so every (vendor, period) has exactly one label.

use crate::classifier::{classify_traced, surface, ClassifierInput, LifecycleLabel, LifecycleStage};
use crate::error::{EngineError, EngineResult};
use crate::facts::{AccountSnapshot, HistoryDepth, PeriodFact};
use crate::period::{FiscalPeriod, PeriodCalendar};
use crate::vendor::{DataTier, Vendor, VendorRegistry, VendorRole};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleCell {
    pub vendor: String,
    pub role: VendorRole,
    pub period: FiscalPeriod,
    pub tier: DataTier,
    pub stage: LifecycleStage,
    pub label: LifecycleLabel,
    /// Rule that produced the stage
    pub rule: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountLifecycle {
    pub account_id: String,
    /// Vendor-major, period-ascending
    pub cells: Vec<LifecycleCell>,
}

impl AccountLifecycle {
    pub fn cell(&self, vendor: &str, period: FiscalPeriod) -> Option<&LifecycleCell> {
        self.cells
            .iter()
            .find(|c| c.vendor == vendor && c.period == period)
    }

    pub fn label_at(&self, vendor: &str, period: FiscalPeriod) -> Option<LifecycleLabel> {
        self.cell(vendor, period).map(|c| c.label)
    }

    /// All cells at one period, in registry order
    pub fn cells_at(&self, period: FiscalPeriod) -> impl Iterator<Item = &LifecycleCell> + '_ {
        self.cells.iter().filter(move |c| c.period == period)
    }
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

/// Reject rows the loader flagged and facts the registry or calendar cannot place
fn validate_snapshot(
    snapshot: &AccountSnapshot,
    registry: &VendorRegistry,
    calendar: &PeriodCalendar,
) -> EngineResult<()> {
    if !snapshot.rejected.is_empty() {
        return Err(EngineError::RejectedRows(snapshot.rejected.join("; ")));
    }
    for (vendor, period) in snapshot.facts.keys() {
        if registry.get(vendor).is_none() {
            return Err(EngineError::UnknownVendor(vendor.clone()));
        }
        calendar.index_of(*period)?;
    }
    Ok(())
}

fn ever_had_revenue(
    snapshot: &AccountSnapshot,
    vendor: &Vendor,
    period: FiscalPeriod,
    prior: Option<FiscalPeriod>,
    history: HistoryDepth,
) -> bool {
    match history {
        HistoryDepth::Full => snapshot.ever_had_revenue_before(vendor, period),
        HistoryDepth::ImmediatePriorOnly => prior
            .map(|p| snapshot.had_revenue_in(vendor, p))
            .unwrap_or(false),
    }
}

fn classify_cell(
    snapshot: &AccountSnapshot,
    vendor: &Vendor,
    calendar: &PeriodCalendar,
    period: FiscalPeriod,
    history: HistoryDepth,
) -> EngineResult<LifecycleCell> {
    let prior = calendar.prior_of(period)?;
    let fact = snapshot
        .fact(&vendor.key, period)
        .cloned()
        .unwrap_or_else(|| PeriodFact::missing(snapshot.targeted));
    let tier = vendor.tier_for(period);

    let input = ClassifierInput {
        prior: prior.and_then(|p| snapshot.tiered_revenue(vendor, p)),
        current: fact.realized_revenue,
        pipeline: fact.pipeline_value,
        ever_had_revenue_before: ever_had_revenue(snapshot, vendor, period, prior, history),
        is_targeted: fact.is_targeted || snapshot.targeted,
        tier,
        has_prior_period: prior.is_some(),
    };

    let result = classify_traced(&input);

    Ok(LifecycleCell {
        vendor: vendor.key.clone(),
        role: vendor.role,
        period,
        tier,
        stage: result.stage,
        label: surface(result.stage, vendor.role),
        rule: result.rule,
    })
}

/// Classify one account across every vendor and every calendar period
pub fn classify_account(
    snapshot: &AccountSnapshot,
    registry: &VendorRegistry,
    calendar: &PeriodCalendar,
    history: HistoryDepth,
) -> EngineResult<AccountLifecycle> {
    validate_snapshot(snapshot, registry, calendar)?;

    let mut cells = Vec::with_capacity(registry.len() * calendar.periods().len());
    for vendor in registry.vendors() {
        for &period in calendar.periods() {
            cells.push(classify_cell(snapshot, vendor, calendar, period, history)?);
        }
    }

    debug!(account = %snapshot.account_id, cells = cells.len(), "classified account");

    Ok(AccountLifecycle {
        account_id: snapshot.account_id.clone(),
        cells,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dominance::DominanceRanker;

    fn fy(year: u16) -> FiscalPeriod {
        FiscalPeriod::new(year)
    }

    fn calendar() -> PeriodCalendar {
        PeriodCalendar::new(vec![fy(2024), fy(2025), fy(2026), fy(2027)]).unwrap()
    }

    fn revenue(value: f64) -> PeriodFact {
        PeriodFact::new(Some(value), None, false)
    }

    #[test]
    fn test_one_cell_per_vendor_period() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001");

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();

        assert_eq!(lifecycle.cells.len(), 4 * 4);
        assert!(lifecycle
            .cells
            .iter()
            .all(|c| c.label == LifecycleLabel::Unlabeled));

        println!("✅ Empty account yields {} unlabeled cells", lifecycle.cells.len());
    }

    #[test]
    fn test_subject_walk_across_periods() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001")
            .with_fact("fullmind", fy(2024), revenue(50_000.0))
            .with_fact("fullmind", fy(2025), revenue(100_000.0))
            .with_fact("fullmind", fy(2026), PeriodFact::new(Some(0.0), Some(120_000.0), false))
            .with_fact("fullmind", fy(2027), revenue(90_000.0));

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();

        // First period: only new/target/none
        assert_eq!(lifecycle.label_at("fullmind", fy(2024)), Some(LifecycleLabel::New));
        assert_eq!(
            lifecycle.label_at("fullmind", fy(2025)),
            Some(LifecycleLabel::MultiYearGrowing)
        );
        // Full tier, prior 100k, pipeline 120k
        assert_eq!(
            lifecycle.label_at("fullmind", fy(2026)),
            Some(LifecycleLabel::ExpansionPipeline)
        );
        // Prior is FY26 (0), not FY25
        assert_eq!(lifecycle.label_at("fullmind", fy(2027)), Some(LifecycleLabel::New));
    }

    #[test]
    fn test_competitor_churned_and_tier_none() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("elevate", fy(2025), revenue(40_000.0))
            .with_fact("elevate", fy(2027), revenue(99_000.0));

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();

        let fy26 = lifecycle.cell("elevate", fy(2026)).unwrap();
        assert_eq!(fy26.stage, LifecycleStage::Lapsed);
        assert_eq!(fy26.label, LifecycleLabel::Churned);

        // Competitors have no FY27 columns: revenue is ignored
        let fy27 = lifecycle.cell("elevate", fy(2027)).unwrap();
        assert_eq!(fy27.tier, DataTier::None);
        assert_eq!(fy27.label, LifecycleLabel::Target);
    }

    #[test]
    fn test_partial_tier_ignores_pipeline() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("fullmind", fy(2025), PeriodFact::new(None, Some(80_000.0), true));

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();

        assert_eq!(lifecycle.label_at("fullmind", fy(2025)), Some(LifecycleLabel::Target));
    }

    #[test]
    fn test_history_depth_changes_winback() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("fullmind", fy(2024), revenue(10_000.0))
            .with_fact("fullmind", fy(2026), PeriodFact::new(None, Some(5_000.0), true));

        let full = classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();
        let shallow = classify_account(
            &snapshot,
            &registry,
            &calendar(),
            HistoryDepth::ImmediatePriorOnly,
        )
        .unwrap();

        assert_eq!(
            full.label_at("fullmind", fy(2026)),
            Some(LifecycleLabel::WinbackPipeline)
        );
        assert_eq!(
            shallow.label_at("fullmind", fy(2026)),
            Some(LifecycleLabel::NewBusinessPipeline)
        );
    }

    #[test]
    fn test_tier_none_period_is_not_history() {
        // No revenue columns for FY24, so its 100 is not a prior
        let registry = VendorRegistry::new(vec![Vendor::new("us", "Us", VendorRole::Subject)
            .with_tier(fy(2025), DataTier::Partial)
            .with_tier(fy(2026), DataTier::Full)])
        .unwrap();
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("us", fy(2024), revenue(100.0))
            .with_fact("us", fy(2025), revenue(50.0));

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();
        assert_eq!(lifecycle.label_at("us", fy(2025)), Some(LifecycleLabel::New));

        let ranking = DominanceRanker::new()
            .rank(&snapshot, &registry, &calendar())
            .unwrap();
        assert_eq!(ranking.winner().map(|w| w.aggregate), Some(50.0));

        // FY24 revenue alone does not make a lapsed customer a winback
        let snapshot = AccountSnapshot::new("0100002")
            .targeted(true)
            .with_fact("us", fy(2024), revenue(100.0))
            .with_fact("us", fy(2026), PeriodFact::new(None, Some(5_000.0), true));

        let lifecycle =
            classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();
        assert_eq!(
            lifecycle.label_at("us", fy(2026)),
            Some(LifecycleLabel::NewBusinessPipeline)
        );
    }

    #[test]
    fn test_rejects_unknown_vendor_and_period() {
        let registry = VendorRegistry::with_defaults();

        let snapshot = AccountSnapshot::new("0100001").with_fact("acme", fy(2025), revenue(1.0));
        let err = classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap_err();
        assert_eq!(err, EngineError::UnknownVendor("acme".to_string()));

        let snapshot =
            AccountSnapshot::new("0100001").with_fact("fullmind", fy(2019), revenue(1.0));
        let err = classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPeriodOrdering { .. }));
    }

    #[test]
    fn test_deterministic() {
        let registry = VendorRegistry::with_defaults();
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("fullmind", fy(2025), revenue(100.0))
            .with_fact("tbt", fy(2026), revenue(300.0));

        let a = classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();
        let b = classify_account(&snapshot, &registry, &calendar(), HistoryDepth::Full).unwrap();
        assert_eq!(a, b);
    }
}
