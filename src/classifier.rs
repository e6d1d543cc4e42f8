// 🏷️ Lifecycle Classifier - Rules as Data
// One vendor, one account, one fiscal period → one lifecycle label
//
// Rules live in ONE priority-ordered table. First match wins; once a rule
// matches no lower-priority predicate is ever consulted. Each rule declares
// what data it needs, and the input's tier/prior availability decides which
// rules are reachable at all.

use crate::error::EngineResult;
use crate::vendor::{DataTier, VendorRole};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// LIFECYCLE STAGE (rule outcome)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    MultiYearGrowing,
    MultiYearShrinking,
    MultiYearFlat,
    New,
    ExpansionPipeline,
    RenewalPipeline,
    WinbackPipeline,
    NewBusinessPipeline,
    Lapsed,
    Target,
    /// No label applies (absence of a label, not an error)
    #[serde(rename = "none")]
    Unlabeled,
}

// ============================================================================
// LIFECYCLE LABEL (surfaced name)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleLabel {
    MultiYearGrowing,
    MultiYearShrinking,
    MultiYearFlat,
    New,
    ExpansionPipeline,
    RenewalPipeline,
    WinbackPipeline,
    NewBusinessPipeline,
    Lapsed,
    /// Competitor-facing name for `Lapsed`
    Churned,
    Target,
    #[serde(rename = "none")]
    Unlabeled,
}

impl LifecycleLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleLabel::MultiYearGrowing => "multi_year_growing",
            LifecycleLabel::MultiYearShrinking => "multi_year_shrinking",
            LifecycleLabel::MultiYearFlat => "multi_year_flat",
            LifecycleLabel::New => "new",
            LifecycleLabel::ExpansionPipeline => "expansion_pipeline",
            LifecycleLabel::RenewalPipeline => "renewal_pipeline",
            LifecycleLabel::WinbackPipeline => "winback_pipeline",
            LifecycleLabel::NewBusinessPipeline => "new_business_pipeline",
            LifecycleLabel::Lapsed => "lapsed",
            LifecycleLabel::Churned => "churned",
            LifecycleLabel::Target => "target",
            LifecycleLabel::Unlabeled => "none",
        }
    }

    pub fn is_multi_year(&self) -> bool {
        matches!(
            self,
            LifecycleLabel::MultiYearGrowing
                | LifecycleLabel::MultiYearShrinking
                | LifecycleLabel::MultiYearFlat
        )
    }

    /// Has realized revenue in the period (multi-year or new)
    pub fn is_customer(&self) -> bool {
        self.is_multi_year() || matches!(self, LifecycleLabel::New)
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(
            self,
            LifecycleLabel::ExpansionPipeline
                | LifecycleLabel::RenewalPipeline
                | LifecycleLabel::WinbackPipeline
                | LifecycleLabel::NewBusinessPipeline
        )
    }
}

impl fmt::Display for LifecycleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LifecycleStage> for LifecycleLabel {
    fn from(stage: LifecycleStage) -> Self {
        match stage {
            LifecycleStage::MultiYearGrowing => LifecycleLabel::MultiYearGrowing,
            LifecycleStage::MultiYearShrinking => LifecycleLabel::MultiYearShrinking,
            LifecycleStage::MultiYearFlat => LifecycleLabel::MultiYearFlat,
            LifecycleStage::New => LifecycleLabel::New,
            LifecycleStage::ExpansionPipeline => LifecycleLabel::ExpansionPipeline,
            LifecycleStage::RenewalPipeline => LifecycleLabel::RenewalPipeline,
            LifecycleStage::WinbackPipeline => LifecycleLabel::WinbackPipeline,
            LifecycleStage::NewBusinessPipeline => LifecycleLabel::NewBusinessPipeline,
            LifecycleStage::Lapsed => LifecycleLabel::Lapsed,
            LifecycleStage::Target => LifecycleLabel::Target,
            LifecycleStage::Unlabeled => LifecycleLabel::Unlabeled,
        }
    }
}

// ============================================================================
// LABEL VOCABULARY (per vendor role)
// ============================================================================

/// Role-specific renames. Same predicate, different surfaced name.
const LABEL_OVERRIDES: &[(VendorRole, LifecycleStage, LifecycleLabel)] = &[(
    VendorRole::Competitor,
    LifecycleStage::Lapsed,
    LifecycleLabel::Churned,
)];

/// Surface a rule outcome in the vocabulary of the vendor's role
pub fn surface(stage: LifecycleStage, role: VendorRole) -> LifecycleLabel {
    LABEL_OVERRIDES
        .iter()
        .find(|(r, s, _)| *r == role && *s == stage)
        .map(|(_, _, label)| *label)
        .unwrap_or_else(|| stage.into())
}

/// Same as [`surface`] for a role given by name; unknown roles fail fast
pub fn surface_for_role_name(stage: LifecycleStage, role: &str) -> EngineResult<LifecycleLabel> {
    let role: VendorRole = role.parse()?;
    Ok(surface(stage, role))
}

// ============================================================================
// CLASSIFIER INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierInput {
    /// Revenue in the immediately preceding period
    pub prior: Option<f64>,
    /// Revenue in the current period
    pub current: Option<f64>,
    /// Open pipeline in the current period
    pub pipeline: Option<f64>,
    pub ever_had_revenue_before: bool,
    pub is_targeted: bool,
    pub tier: DataTier,
    /// False for the first period in the calendar
    pub has_prior_period: bool,
}

impl ClassifierInput {
    /// Full-tier input with a prior period (the common case)
    pub fn new(prior: Option<f64>, current: Option<f64>, pipeline: Option<f64>) -> Self {
        ClassifierInput {
            prior,
            current,
            pipeline,
            ever_had_revenue_before: false,
            is_targeted: false,
            tier: DataTier::Full,
            has_prior_period: true,
        }
    }

    pub fn targeted(mut self, is_targeted: bool) -> Self {
        self.is_targeted = is_targeted;
        self
    }

    pub fn ever_had_revenue(mut self, ever: bool) -> Self {
        self.ever_had_revenue_before = ever;
        self
    }

    pub fn tier(mut self, tier: DataTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn first_period(mut self) -> Self {
        self.has_prior_period = false;
        self
    }

    pub fn reach(&self) -> Reach {
        Reach::derive(self.tier, self.has_prior_period)
    }
}

/// Zero-coalesced numbers the predicates compare
#[derive(Debug, Clone, Copy)]
struct Values {
    prior: f64,
    current: f64,
    pipeline: f64,
    ever: bool,
    targeted: bool,
}

impl From<&ClassifierInput> for Values {
    fn from(input: &ClassifierInput) -> Self {
        // The first period has no prior, whatever the input carries
        let prior = if input.has_prior_period {
            input.prior.unwrap_or(0.0)
        } else {
            0.0
        };
        Values {
            prior,
            current: input.current.unwrap_or(0.0),
            pipeline: input.pipeline.unwrap_or(0.0),
            ever: input.ever_had_revenue_before,
            targeted: input.is_targeted,
        }
    }
}

// ============================================================================
// REACHABILITY
// ============================================================================

/// Data a rule needs before it may be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Needs {
    pub revenue: bool,
    pub prior: bool,
    pub pipeline: bool,
}

const NEEDS_NOTHING: Needs = Needs { revenue: false, prior: false, pipeline: false };

/// Which rules an input can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// tier = none: only target/none
    TargetOnly,
    /// first period: only new/target/none
    FirstPeriod,
    /// tier = partial: no pipeline rules
    RevenueOnly,
    Full,
}

impl Reach {
    pub fn derive(tier: DataTier, has_prior_period: bool) -> Self {
        match tier {
            DataTier::None => Reach::TargetOnly,
            _ if !has_prior_period => Reach::FirstPeriod,
            DataTier::Partial => Reach::RevenueOnly,
            DataTier::Full => Reach::Full,
        }
    }

    fn provides(&self) -> Needs {
        match self {
            Reach::TargetOnly => NEEDS_NOTHING,
            Reach::FirstPeriod => Needs { revenue: true, prior: false, pipeline: false },
            Reach::RevenueOnly => Needs { revenue: true, prior: true, pipeline: false },
            Reach::Full => Needs { revenue: true, prior: true, pipeline: true },
        }
    }

    pub fn allows(&self, needs: Needs) -> bool {
        let has = self.provides();
        (!needs.revenue || has.revenue)
            && (!needs.prior || has.prior)
            && (!needs.pipeline || has.pipeline)
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

pub struct ClassificationRule {
    pub id: &'static str,
    pub needs: Needs,
    predicate: fn(&Values) -> Option<LifecycleStage>,
}

pub const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        id: "multi_year",
        needs: Needs { revenue: true, prior: true, pipeline: false },
        predicate: |v| {
            if v.prior > 0.0 && v.current > 0.0 {
                Some(if v.current > v.prior {
                    LifecycleStage::MultiYearGrowing
                } else if v.current < v.prior {
                    LifecycleStage::MultiYearShrinking
                } else {
                    LifecycleStage::MultiYearFlat
                })
            } else {
                None
            }
        },
    },
    ClassificationRule {
        id: "new",
        needs: Needs { revenue: true, prior: false, pipeline: false },
        predicate: |v| (v.current > 0.0 && v.prior <= 0.0).then_some(LifecycleStage::New),
    },
    ClassificationRule {
        id: "expansion_pipeline",
        needs: Needs { revenue: true, prior: true, pipeline: true },
        predicate: |v| {
            (v.prior > 0.0 && v.pipeline > v.prior).then_some(LifecycleStage::ExpansionPipeline)
        },
    },
    ClassificationRule {
        id: "renewal_pipeline",
        needs: Needs { revenue: true, prior: true, pipeline: true },
        predicate: |v| {
            (v.prior > 0.0 && v.pipeline > 0.0).then_some(LifecycleStage::RenewalPipeline)
        },
    },
    ClassificationRule {
        id: "winback_pipeline",
        needs: Needs { revenue: false, prior: false, pipeline: true },
        predicate: |v| {
            (v.pipeline > 0.0 && v.targeted && v.ever).then_some(LifecycleStage::WinbackPipeline)
        },
    },
    ClassificationRule {
        id: "new_business_pipeline",
        needs: Needs { revenue: false, prior: false, pipeline: true },
        predicate: |v| {
            (v.pipeline > 0.0 && v.targeted && !v.ever)
                .then_some(LifecycleStage::NewBusinessPipeline)
        },
    },
    ClassificationRule {
        id: "lapsed",
        needs: Needs { revenue: true, prior: true, pipeline: false },
        predicate: |v| (v.prior > 0.0 && v.current <= 0.0).then_some(LifecycleStage::Lapsed),
    },
    ClassificationRule {
        id: "target",
        needs: NEEDS_NOTHING,
        predicate: |v| v.targeted.then_some(LifecycleStage::Target),
    },
    ClassificationRule {
        id: "none",
        needs: NEEDS_NOTHING,
        predicate: |_| Some(LifecycleStage::Unlabeled),
    },
];

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub stage: LifecycleStage,
    /// Id of the rule that matched
    pub rule: &'static str,
}

/// Classify one cell. Total over any numeric input, never clamps.
pub fn classify(input: &ClassifierInput) -> LifecycleStage {
    classify_traced(input).stage
}

/// Classify and report which rule matched
pub fn classify_traced(input: &ClassifierInput) -> Classification {
    let reach = input.reach();
    let values = Values::from(input);

    for rule in RULES {
        if !reach.allows(rule.needs) {
            continue;
        }
        if let Some(stage) = (rule.predicate)(&values) {
            return Classification { stage, rule: rule.id };
        }
    }

    // Unreachable: the "none" rule always matches
    Classification {
        stage: LifecycleStage::Unlabeled,
        rule: "none",
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: [f64; 7] = [-100.0, 0.0, 1.0, 5_000.0, 100_000.0, 120_000.0, 150_000.0];

    #[test]
    fn test_scenario_multi_year_growing() {
        let input = ClassifierInput::new(Some(100_000.0), Some(150_000.0), Some(0.0));
        assert_eq!(classify(&input), LifecycleStage::MultiYearGrowing);
    }

    #[test]
    fn test_scenario_new() {
        let input = ClassifierInput::new(Some(0.0), Some(50_000.0), None);
        assert_eq!(classify(&input), LifecycleStage::New);
    }

    #[test]
    fn test_scenario_expansion_beats_lapsed() {
        let input = ClassifierInput::new(Some(100_000.0), Some(0.0), Some(120_000.0));
        assert_eq!(classify(&input), LifecycleStage::ExpansionPipeline);
    }

    #[test]
    fn test_scenario_lapsed_even_when_targeted() {
        let input = ClassifierInput::new(Some(100_000.0), Some(0.0), Some(0.0)).targeted(true);
        assert_eq!(classify(&input), LifecycleStage::Lapsed);
    }

    #[test]
    fn test_scenario_new_business_pipeline() {
        let input = ClassifierInput::new(Some(0.0), Some(0.0), Some(5_000.0))
            .targeted(true)
            .ever_had_revenue(false);
        assert_eq!(classify(&input), LifecycleStage::NewBusinessPipeline);
    }

    #[test]
    fn test_scenario_tier_none_short_circuit() {
        let input = ClassifierInput::new(Some(100_000.0), Some(150_000.0), Some(200_000.0))
            .targeted(true)
            .tier(DataTier::None);
        let result = classify_traced(&input);
        assert_eq!(result.stage, LifecycleStage::Target);
        assert_eq!(result.rule, "target");
    }

    #[test]
    fn test_multi_year_flat_and_shrinking() {
        let flat = ClassifierInput::new(Some(10.0), Some(10.0), None);
        let shrink = ClassifierInput::new(Some(10.0), Some(9.0), Some(1_000.0));
        assert_eq!(classify(&flat), LifecycleStage::MultiYearFlat);
        assert_eq!(classify(&shrink), LifecycleStage::MultiYearShrinking);
    }

    #[test]
    fn test_renewal_and_winback() {
        let renewal = ClassifierInput::new(Some(100.0), Some(0.0), Some(50.0));
        assert_eq!(classify(&renewal), LifecycleStage::RenewalPipeline);

        let winback = ClassifierInput::new(Some(0.0), None, Some(50.0))
            .targeted(true)
            .ever_had_revenue(true);
        assert_eq!(classify(&winback), LifecycleStage::WinbackPipeline);

        // Pipeline without targeting and without prior revenue labels nothing
        let untargeted = ClassifierInput::new(None, None, Some(50.0));
        assert_eq!(classify(&untargeted), LifecycleStage::Unlabeled);
    }

    #[test]
    fn test_null_and_zero_are_the_same() {
        let nulls = ClassifierInput::new(None, None, None).targeted(true);
        let zeros = ClassifierInput::new(Some(0.0), Some(0.0), Some(0.0)).targeted(true);
        assert_eq!(classify(&nulls), classify(&zeros));
        assert_eq!(classify(&nulls), LifecycleStage::Target);
    }

    #[test]
    fn test_multi_year_exclusive_over_grid() {
        for &prior in GRID.iter().filter(|v| **v > 0.0) {
            for &current in GRID.iter().filter(|v| **v > 0.0) {
                for &pipeline in &GRID {
                    for targeted in [false, true] {
                        let input = ClassifierInput::new(Some(prior), Some(current), Some(pipeline))
                            .targeted(targeted)
                            .ever_had_revenue(true);
                        let expected = if current > prior {
                            LifecycleStage::MultiYearGrowing
                        } else if current < prior {
                            LifecycleStage::MultiYearShrinking
                        } else {
                            LifecycleStage::MultiYearFlat
                        };
                        assert_eq!(classify(&input), expected, "{:?}", input);
                    }
                }
            }
        }
    }

    #[test]
    fn test_idempotent() {
        for &prior in &GRID {
            for &current in &GRID {
                for &pipeline in &GRID {
                    let input = ClassifierInput::new(Some(prior), Some(current), Some(pipeline))
                        .targeted(true);
                    assert_eq!(classify_traced(&input), classify_traced(&input));
                }
            }
        }
    }

    #[test]
    fn test_priority_order_first_match_wins() {
        // Satisfies renewal (4), winback (5), lapsed (7) and target (8): expansion (3) wins
        let input = ClassifierInput::new(Some(100.0), Some(0.0), Some(500.0))
            .targeted(true)
            .ever_had_revenue(true);
        assert_eq!(classify_traced(&input).rule, "expansion_pipeline");

        // Satisfies winback (5), lapsed (7) and target (8): renewal (4) wins
        let input = ClassifierInput::new(Some(100.0), Some(0.0), Some(50.0))
            .targeted(true)
            .ever_had_revenue(true);
        assert_eq!(classify_traced(&input).rule, "renewal_pipeline");

        // Satisfies new (2) and new_business (6) and target (8): new wins
        let input = ClassifierInput::new(Some(0.0), Some(10.0), Some(50.0)).targeted(true);
        assert_eq!(classify(&input), LifecycleStage::New);

        // Satisfies lapsed (7) and target (8): lapsed wins
        let input = ClassifierInput::new(Some(10.0), Some(0.0), None).targeted(true);
        assert_eq!(classify(&input), LifecycleStage::Lapsed);
    }

    #[test]
    fn test_tier_none_only_target_or_none() {
        for &prior in &GRID {
            for &current in &GRID {
                for &pipeline in &GRID {
                    for targeted in [false, true] {
                        for ever in [false, true] {
                            let input =
                                ClassifierInput::new(Some(prior), Some(current), Some(pipeline))
                                    .targeted(targeted)
                                    .ever_had_revenue(ever)
                                    .tier(DataTier::None);
                            let stage = classify(&input);
                            let expected = if targeted {
                                LifecycleStage::Target
                            } else {
                                LifecycleStage::Unlabeled
                            };
                            assert_eq!(stage, expected);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_period_only_new_target_none() {
        for &prior in &GRID {
            for &current in &GRID {
                for &pipeline in &GRID {
                    for targeted in [false, true] {
                        let input = ClassifierInput::new(Some(prior), Some(current), Some(pipeline))
                            .targeted(targeted)
                            .ever_had_revenue(true)
                            .first_period();
                        let stage = classify(&input);
                        assert!(
                            matches!(
                                stage,
                                LifecycleStage::New | LifecycleStage::Target | LifecycleStage::Unlabeled
                            ),
                            "{:?} -> {:?}",
                            input,
                            stage
                        );
                    }
                }
            }
        }

        // Prior value is ignored entirely in the first period
        let input = ClassifierInput::new(Some(500.0), Some(10.0), None).first_period();
        assert_eq!(classify(&input), LifecycleStage::New);
    }

    #[test]
    fn test_first_period_ignores_carried_prior() {
        let input = ClassifierInput::new(Some(500.0), Some(10.0), None).first_period();
        let traced = classify_traced(&input);
        assert_eq!(traced.stage, LifecycleStage::New);
        assert_eq!(traced.rule, "new");

        // Same numbers with a real prior period shrink instead
        let input = ClassifierInput::new(Some(500.0), Some(10.0), None);
        assert_eq!(classify(&input), LifecycleStage::MultiYearShrinking);
    }

    #[test]
    fn test_partial_tier_never_yields_pipeline_labels() {
        let input = ClassifierInput::new(Some(100.0), Some(0.0), Some(1_000.0))
            .targeted(true)
            .tier(DataTier::Partial);
        assert_eq!(classify(&input), LifecycleStage::Lapsed);

        let input = ClassifierInput::new(None, None, Some(1_000.0))
            .targeted(true)
            .tier(DataTier::Partial);
        assert_eq!(classify(&input), LifecycleStage::Target);
    }

    #[test]
    fn test_negative_values_compared_as_is() {
        // Negative prior counts as "prior <= 0"
        let input = ClassifierInput::new(Some(-50.0), Some(10.0), None);
        assert_eq!(classify(&input), LifecycleStage::New);

        // Negative current after positive prior is lapsed
        let input = ClassifierInput::new(Some(50.0), Some(-10.0), Some(-1.0));
        assert_eq!(classify(&input), LifecycleStage::Lapsed);
    }

    #[test]
    fn test_competitor_vocabulary() {
        assert_eq!(surface(LifecycleStage::Lapsed, VendorRole::Subject), LifecycleLabel::Lapsed);
        assert_eq!(surface(LifecycleStage::Lapsed, VendorRole::Competitor), LifecycleLabel::Churned);
        assert_eq!(
            surface(LifecycleStage::MultiYearGrowing, VendorRole::Competitor),
            LifecycleLabel::MultiYearGrowing
        );

        assert_eq!(
            surface_for_role_name(LifecycleStage::Lapsed, "competitor").unwrap(),
            LifecycleLabel::Churned
        );
        assert!(surface_for_role_name(LifecycleStage::Lapsed, "reseller").is_err());
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(serde_json::to_string(&LifecycleLabel::Unlabeled).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::to_string(&LifecycleLabel::NewBusinessPipeline).unwrap(),
            "\"new_business_pipeline\""
        );
        assert_eq!(LifecycleLabel::Churned.to_string(), "churned");
    }
}
