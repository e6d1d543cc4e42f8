// 🔖 Derived Tags - typed registry of engine-managed tags
//
// Tags are a pure function of the classified account. The catalog maps each
// kind to its row in the `tags` table, resolved ONCE per process instead of
// looking names up on every account.

use crate::classifier::LifecycleLabel;
use crate::dominance::DominanceRanking;
use crate::orchestrator::AccountLifecycle;
use crate::period::FiscalPeriod;
use crate::signals::bucket;
use crate::vendor::{VendorRegistry, VendorRole};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// TAG KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    SubjectCustomer,
    SubjectPipeline,
    SubjectLapsed,
    SubjectTarget,
    CompetitorCustomer,
    CompetitorChurned,
    CompetitorDominant,
    TrendGrowing,
    TrendDeclining,
}

impl TagKind {
    pub const ALL: [TagKind; 9] = [
        TagKind::SubjectCustomer,
        TagKind::SubjectPipeline,
        TagKind::SubjectLapsed,
        TagKind::SubjectTarget,
        TagKind::CompetitorCustomer,
        TagKind::CompetitorChurned,
        TagKind::CompetitorDominant,
        TagKind::TrendGrowing,
        TagKind::TrendDeclining,
    ];

    /// Stable name stored in the `tags` table
    pub fn name(&self) -> &'static str {
        match self {
            TagKind::SubjectCustomer => "Customer",
            TagKind::SubjectPipeline => "Open Pipeline",
            TagKind::SubjectLapsed => "Lapsed Customer",
            TagKind::SubjectTarget => "Target",
            TagKind::CompetitorCustomer => "Competitor Customer",
            TagKind::CompetitorChurned => "Competitor Churned",
            TagKind::CompetitorDominant => "Competitor Dominant",
            TagKind::TrendGrowing => "Growing",
            TagKind::TrendDeclining => "Declining",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            TagKind::SubjectCustomer => "#2E7D32",
            TagKind::SubjectPipeline => "#1565C0",
            TagKind::SubjectLapsed => "#C62828",
            TagKind::SubjectTarget => "#6A1B9A",
            TagKind::CompetitorCustomer => "#EF6C00",
            TagKind::CompetitorChurned => "#F9A825",
            TagKind::CompetitorDominant => "#AD1457",
            TagKind::TrendGrowing => "#00897B",
            TagKind::TrendDeclining => "#5D4037",
        }
    }
}

// ============================================================================
// TAG CATALOG
// ============================================================================

/// TagKind → tags.id, resolved once
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagCatalog {
    ids: BTreeMap<TagKind, i64>,
}

impl TagCatalog {
    /// Ensure every managed tag exists and load its id
    pub fn resolve(conn: &Connection) -> Result<Self> {
        let mut ids = BTreeMap::new();

        for kind in TagKind::ALL {
            conn.execute(
                "INSERT INTO tags (name, color, managed) VALUES (?1, ?2, 1)
                 ON CONFLICT(name) DO UPDATE SET color = excluded.color, managed = 1",
                params![kind.name(), kind.color()],
            )
            .with_context(|| format!("Failed to register tag {}", kind.name()))?;

            let id: i64 = conn.query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![kind.name()],
                |row| row.get(0),
            )?;
            ids.insert(kind, id);
        }

        Ok(TagCatalog { ids })
    }

    pub fn id(&self, kind: TagKind) -> Result<i64> {
        self.ids
            .get(&kind)
            .copied()
            .ok_or_else(|| anyhow!("tag {} not resolved", kind.name()))
    }

    pub fn kind(&self, id: i64) -> Option<TagKind> {
        self.ids
            .iter()
            .find(|(_, tag_id)| **tag_id == id)
            .map(|(kind, _)| *kind)
    }
}

// ============================================================================
// DERIVATION
// ============================================================================

/// Tags for one account at the current period
pub fn derive_tags(
    lifecycle: &AccountLifecycle,
    ranking: &DominanceRanking,
    signals: &BTreeMap<String, Option<f64>>,
    registry: &VendorRegistry,
    current: FiscalPeriod,
) -> BTreeSet<TagKind> {
    let mut tags = BTreeSet::new();

    for cell in lifecycle.cells_at(current) {
        match cell.role {
            VendorRole::Subject => {
                if cell.label.is_customer() {
                    tags.insert(TagKind::SubjectCustomer);
                } else if cell.label.is_pipeline() {
                    tags.insert(TagKind::SubjectPipeline);
                } else if cell.label == LifecycleLabel::Lapsed {
                    tags.insert(TagKind::SubjectLapsed);
                } else if cell.label == LifecycleLabel::Target {
                    tags.insert(TagKind::SubjectTarget);
                }
            }
            VendorRole::Competitor => {
                if cell.label.is_customer() {
                    tags.insert(TagKind::CompetitorCustomer);
                } else if cell.label == LifecycleLabel::Churned {
                    tags.insert(TagKind::CompetitorChurned);
                }
            }
        }
    }

    let competitor_dominant = ranking
        .dominant_vendor()
        .and_then(|key| registry.get(key))
        .map(|v| v.role == VendorRole::Competitor)
        .unwrap_or(false);
    if competitor_dominant {
        tags.insert(TagKind::CompetitorDominant);
    }

    for delta in signals.values() {
        match bucket(*delta) {
            Some(b) if b.is_growing() => {
                tags.insert(TagKind::TrendGrowing);
            }
            Some(b) if b.is_declining() => {
                tags.insert(TagKind::TrendDeclining);
            }
            _ => {}
        }
    }

    tags
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::dominance::DominanceRanker;
    use crate::facts::{AccountSnapshot, HistoryDepth, PeriodFact};
    use crate::orchestrator::classify_account;
    use crate::period::PeriodCalendar;

    fn fy(year: u16) -> FiscalPeriod {
        FiscalPeriod::new(year)
    }

    fn tags_for(snapshot: &AccountSnapshot) -> BTreeSet<TagKind> {
        let registry = VendorRegistry::with_defaults();
        let calendar = PeriodCalendar::new(vec![fy(2024), fy(2025), fy(2026)]).unwrap();
        let lifecycle = classify_account(snapshot, &registry, &calendar, HistoryDepth::Full).unwrap();
        let ranking = DominanceRanker::new().rank(snapshot, &registry, &calendar).unwrap();
        derive_tags(&lifecycle, &ranking, &snapshot.signals, &registry, fy(2026))
    }

    #[test]
    fn test_tag_names_unique() {
        let names: BTreeSet<&str> = TagKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), TagKind::ALL.len());
    }

    #[test]
    fn test_subject_customer_with_churned_competitor() {
        let snapshot = AccountSnapshot::new("0100001")
            .with_fact("fullmind", fy(2026), PeriodFact::new(Some(10.0), None, false))
            .with_fact("elevate", fy(2025), PeriodFact::new(Some(500.0), None, false))
            .with_signal("enrollment_trend", Some(-7.0));

        let tags = tags_for(&snapshot);

        assert!(tags.contains(&TagKind::SubjectCustomer));
        assert!(tags.contains(&TagKind::CompetitorChurned));
        assert!(tags.contains(&TagKind::TrendDeclining));
        assert!(!tags.contains(&TagKind::CompetitorDominant));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_competitor_dominant_and_target() {
        let snapshot = AccountSnapshot::new("0100001")
            .targeted(true)
            .with_fact("proximity", fy(2026), PeriodFact::new(Some(10.0), None, true));

        let tags = tags_for(&snapshot);

        let expected: BTreeSet<TagKind> = [
            TagKind::SubjectTarget,
            TagKind::CompetitorCustomer,
            TagKind::CompetitorDominant,
        ]
        .into_iter()
        .collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_no_tags_for_empty_account() {
        assert!(tags_for(&AccountSnapshot::new("0100001")).is_empty());
    }

    #[test]
    fn test_catalog_resolve_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = TagCatalog::resolve(&conn).unwrap();
        let second = TagCatalog::resolve(&conn).unwrap();

        assert_eq!(first, second);
        assert!(TagKind::ALL.iter().all(|kind| first.id(*kind).is_ok()));

        let id = first.id(TagKind::SubjectLapsed).unwrap();
        assert_eq!(first.kind(id), Some(TagKind::SubjectLapsed));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 9);
    }
}
