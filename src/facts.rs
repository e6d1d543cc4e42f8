// 📥 Facts Provider - per (account, vendor, period) revenue/pipeline facts
//
// Facts are recomputed from source-of-truth CSV exports on every run and
// fully replace the previous snapshot. Missing values stay `None` here;
// the classifier (not the provider) coalesces them to zero.
//
// The provider owns `ever_had_revenue_before`: it scans EVERY strictly
// earlier period, not just the immediate predecessor. Periods where the
// vendor has no revenue columns (tier `None`) never count as history.

use crate::error::{EngineError, EngineResult};
use crate::period::FiscalPeriod;
use crate::signals::percent_change;
use crate::vendor::{Vendor, VendorRegistry};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// PERIOD FACT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodFact {
    /// Realized revenue with closed-won bookings already folded in
    pub realized_revenue: Option<f64>,

    /// Open pipeline; `None` when unknown or not applicable for the tier
    pub pipeline_value: Option<f64>,

    /// Account is on an active pursuit list
    pub is_targeted: bool,
}

impl PeriodFact {
    pub fn new(realized_revenue: Option<f64>, pipeline_value: Option<f64>, is_targeted: bool) -> Self {
        PeriodFact {
            realized_revenue,
            pipeline_value,
            is_targeted,
        }
    }

    /// Fact for a cell with no source row at all
    pub fn missing(is_targeted: bool) -> Self {
        PeriodFact {
            realized_revenue: None,
            pipeline_value: None,
            is_targeted,
        }
    }

    pub fn has_data(&self) -> bool {
        self.realized_revenue.is_some() || self.pipeline_value.is_some()
    }

    /// Merge a duplicate row: each value keeps the greater of the two
    pub fn merge(&mut self, other: &PeriodFact) {
        self.realized_revenue = max_opt(self.realized_revenue, other.realized_revenue);
        self.pipeline_value = max_opt(self.pipeline_value, other.pipeline_value);
        self.is_targeted |= other.is_targeted;
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

// ============================================================================
// HISTORY DEPTH
// ============================================================================

/// How far back `ever_had_revenue_before` may look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryDepth {
    /// Any strictly earlier period (authoritative)
    #[default]
    Full,

    /// Immediate prior period only. Degraded fallback for sources that
    /// genuinely lack full history.
    ImmediatePriorOnly,
}

// ============================================================================
// ACCOUNT SNAPSHOT
// ============================================================================

/// Everything the engine needs for one account, in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSnapshot {
    pub account_id: String,

    /// Member of any active pursuit list
    pub targeted: bool,

    /// Identity/geometry fields copied to the output untouched
    pub passthrough: BTreeMap<String, String>,

    /// Keyed by (vendor key, period)
    pub facts: BTreeMap<(String, FiscalPeriod), PeriodFact>,

    /// Raw signal deltas keyed by metric name
    pub signals: BTreeMap<String, Option<f64>>,

    /// Source rows for this account the loader could not place.
    /// Any entry fails the account instead of classifying partial data.
    pub rejected: Vec<String>,
}

impl AccountSnapshot {
    pub fn new(account_id: impl Into<String>) -> Self {
        AccountSnapshot {
            account_id: account_id.into(),
            ..Default::default()
        }
    }

    /// Builder: mark as targeted
    pub fn targeted(mut self, targeted: bool) -> Self {
        self.targeted = targeted;
        self
    }

    /// Builder: add (or merge) a fact
    pub fn with_fact(mut self, vendor: &str, period: FiscalPeriod, fact: PeriodFact) -> Self {
        self.insert_fact(vendor, period, fact);
        self
    }

    /// Builder: add a raw signal delta
    pub fn with_signal(mut self, metric: impl Into<String>, delta: Option<f64>) -> Self {
        self.signals.insert(metric.into(), delta);
        self
    }

    /// Builder: add a passthrough field
    pub fn with_passthrough(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.passthrough.insert(key.into(), value.into());
        self
    }

    pub fn insert_fact(&mut self, vendor: &str, period: FiscalPeriod, fact: PeriodFact) {
        self.targeted |= fact.is_targeted;
        self.facts
            .entry((vendor.to_string(), period))
            .and_modify(|existing| existing.merge(&fact))
            .or_insert(fact);
    }

    pub fn fact(&self, vendor: &str, period: FiscalPeriod) -> Option<&PeriodFact> {
        self.facts.get(&(vendor.to_string(), period))
    }

    /// Realized revenue for a cell, `None` when no row or no value
    pub fn revenue(&self, vendor: &str, period: FiscalPeriod) -> Option<f64> {
        self.fact(vendor, period).and_then(|f| f.realized_revenue)
    }

    /// Revenue in a period the vendor has revenue columns for.
    /// Values sitting in a tier-`None` period are treated as absent.
    pub fn tiered_revenue(&self, vendor: &Vendor, period: FiscalPeriod) -> Option<f64> {
        if !vendor.tier_for(period).has_revenue() {
            return None;
        }
        self.revenue(&vendor.key, period)
    }

    /// Did the vendor book positive revenue in ANY period strictly before `period`?
    pub fn ever_had_revenue_before(&self, vendor: &Vendor, period: FiscalPeriod) -> bool {
        self.facts.iter().any(|((v, p), fact)| {
            *v == vendor.key
                && *p < period
                && vendor.tier_for(*p).has_revenue()
                && fact.realized_revenue.unwrap_or(0.0) > 0.0
        })
    }

    /// Positive revenue in exactly this period
    pub fn had_revenue_in(&self, vendor: &Vendor, period: FiscalPeriod) -> bool {
        self.tiered_revenue(vendor, period).unwrap_or(0.0) > 0.0
    }
}

// ============================================================================
// PARSING HELPERS
// ============================================================================

/// Normalize an account ID.
///
/// Numeric IDs (NCES style) are zero-padded to 7 characters:
/// `604020` → `"0604020"`, `"4500690.0"` → `"4500690"`.
/// Non-numeric IDs pass through trimmed.
pub fn normalize_account_id(raw: &str) -> EngineResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidAccountId(raw.to_string()));
    }

    // Drop a trailing ".0" style decimal portion from spreadsheet exports
    let integral = match trimmed.split_once('.') {
        Some((int_part, frac)) if frac.chars().all(|c| c == '0') => int_part,
        _ => trimmed,
    };

    if !integral.is_empty() && integral.chars().all(|c| c.is_ascii_digit()) {
        if integral.len() > 7 {
            return Err(EngineError::InvalidAccountId(raw.to_string()));
        }
        return Ok(format!("{:0>7}", integral));
    }

    Ok(trimmed.to_string())
}

/// Parse "$1,234.56", "-$50" or "($50)" into a number.
/// Empty or unparsable input is "no data".
pub fn parse_currency(raw: &str) -> Option<f64> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let mut negative = false;
    if value.starts_with('(') && value.ends_with(')') {
        negative = true;
        value = &value[1..value.len() - 1];
    } else if let Some(rest) = value.strip_prefix('-') {
        negative = true;
        value = rest;
    }

    let cleaned: String = value
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let parsed: f64 = cleaned.parse().ok()?;
    if parsed.is_nan() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1"
    )
}

// ============================================================================
// CSV LOADING
// ============================================================================

#[derive(Debug, Deserialize)]
struct FactRow {
    account_id: String,
    #[serde(default)]
    account_name: String,
    #[serde(default)]
    state: String,
    vendor: String,
    fiscal_year: String,
    #[serde(default)]
    revenue: String,
    #[serde(default)]
    closed_won_bookings: String,
    #[serde(default)]
    pipeline: String,
    #[serde(default)]
    is_targeted: String,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    account_id: String,
    metric: String,
    #[serde(default)]
    base: String,
    #[serde(default)]
    latest: String,
}

/// A CSV row that could not be attributed to any account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub source: &'static str,
    /// 1-based data row (header excluded)
    pub row: usize,
    pub reason: String,
}

/// Snapshots plus the rows that were dropped while loading them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactsLoad {
    /// One per account, sorted by account id
    pub snapshots: Vec<AccountSnapshot>,
    pub skipped: Vec<SkippedRow>,
}

impl FactsLoad {
    fn skip(&mut self, source: &'static str, row: usize, reason: String) {
        warn!(source, row, reason = %reason, "skipped source row");
        self.skipped.push(SkippedRow { source, row, reason });
    }
}

fn require_columns(headers: &csv::StringRecord, required: &[&str], source: &str) -> Result<()> {
    for column in required {
        if !headers.iter().any(|h| h.trim() == *column) {
            bail!("{} CSV is missing required column '{}'", source, column);
        }
    }
    Ok(())
}

/// Load account snapshots from a facts CSV file
pub fn load_facts_csv(path: &Path, registry: &VendorRegistry) -> Result<FactsLoad> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open facts CSV: {:?}", path))?;
    let load = read_facts(file, registry)?;
    info!(
        path = %path.display(),
        accounts = load.snapshots.len(),
        skipped = load.skipped.len(),
        "loaded facts"
    );
    Ok(load)
}

/// Parse facts CSV rows into one snapshot per account.
///
/// Only a broken header fails the whole file. A row without a usable
/// account id is skipped; a row with a bad vendor or fiscal year is
/// recorded on its account, which then fails on its own in the batch.
pub fn read_facts<R: Read>(reader: R, registry: &VendorRegistry) -> Result<FactsLoad> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("Failed to read facts CSV header")?.clone();
    require_columns(&headers, &["account_id", "vendor", "fiscal_year"], "facts")?;

    let mut load = FactsLoad::default();
    let mut accounts: BTreeMap<String, AccountSnapshot> = BTreeMap::new();

    for (index, result) in rdr.deserialize::<FactRow>().enumerate() {
        let row_number = index + 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                load.skip("facts", row_number, format!("malformed row: {}", e));
                continue;
            }
        };

        let account_id = match normalize_account_id(&row.account_id) {
            Ok(id) => id,
            Err(e) => {
                load.skip("facts", row_number, e.to_string());
                continue;
            }
        };

        let snapshot = accounts
            .entry(account_id.clone())
            .or_insert_with(|| AccountSnapshot::new(account_id.clone()));

        if !row.account_name.trim().is_empty() {
            snapshot
                .passthrough
                .insert("name".to_string(), row.account_name.trim().to_string());
        }
        if !row.state.trim().is_empty() {
            snapshot
                .passthrough
                .insert("state_abbrev".to_string(), row.state.trim().to_uppercase());
        }

        let placed = registry
            .resolve(&row.vendor)
            .and_then(|vendor| Ok((vendor, row.fiscal_year.parse::<FiscalPeriod>()?)));
        let (vendor, period) = match placed {
            Ok(placed) => placed,
            Err(e) => {
                warn!(row = row_number, account = %account_id, error = %e, "rejected fact row");
                snapshot.rejected.push(format!("fact row {}: {}", row_number, e));
                continue;
            }
        };

        // Closed-won bookings count as realized revenue
        let revenue = parse_currency(&row.revenue);
        let bookings = parse_currency(&row.closed_won_bookings);
        let realized = match (revenue, bookings) {
            (None, None) => None,
            (r, b) => Some(r.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };

        let fact = PeriodFact::new(realized, parse_currency(&row.pipeline), parse_flag(&row.is_targeted));
        snapshot.insert_fact(&vendor.key, period, fact);
    }

    debug!(accounts = accounts.len(), "grouped fact rows by account");
    load.snapshots = accounts.into_values().collect();
    Ok(load)
}

/// Load signal rows and attach their percent-change deltas to the snapshots.
/// Signals for accounts without facts create fact-less snapshots.
pub fn load_signals_csv(path: &Path, load: &mut FactsLoad) -> Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open signals CSV: {:?}", path))?;
    let count = read_signals(file, load)?;
    info!(path = %path.display(), signals = count, "loaded signals");
    Ok(count)
}

pub fn read_signals<R: Read>(reader: R, load: &mut FactsLoad) -> Result<usize> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("Failed to read signals CSV header")?.clone();
    require_columns(&headers, &["account_id", "metric"], "signals")?;

    let mut index: BTreeMap<String, usize> = load
        .snapshots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.account_id.clone(), i))
        .collect();
    let mut count = 0;

    for (i, result) in rdr.deserialize::<SignalRow>().enumerate() {
        let row_number = i + 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                load.skip("signals", row_number, format!("malformed row: {}", e));
                continue;
            }
        };
        let account_id = match normalize_account_id(&row.account_id) {
            Ok(id) => id,
            Err(e) => {
                load.skip("signals", row_number, e.to_string());
                continue;
            }
        };
        let metric = row.metric.trim().to_lowercase();
        if metric.is_empty() {
            continue;
        }

        let delta = percent_change(parse_currency(&row.base), parse_currency(&row.latest));

        let snapshots = &mut load.snapshots;
        let position = *index.entry(account_id.clone()).or_insert_with(|| {
            snapshots.push(AccountSnapshot::new(account_id));
            snapshots.len() - 1
        });
        snapshots[position].signals.insert(metric, delta);
        count += 1;
    }

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendor::{DataTier, VendorRole};

    fn fy(year: u16) -> FiscalPeriod {
        FiscalPeriod::new(year)
    }

    #[test]
    fn test_normalize_account_id() {
        assert_eq!(normalize_account_id("604020").unwrap(), "0604020");
        assert_eq!(normalize_account_id(" 4500690 ").unwrap(), "4500690");
        assert_eq!(normalize_account_id("4500690.0").unwrap(), "4500690");
        assert_eq!(normalize_account_id("acct-17").unwrap(), "acct-17");
        assert!(normalize_account_id("").is_err());
        assert!(normalize_account_id("12345678").is_err());
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.56"), Some(1234.56));
        assert_eq!(parse_currency("-$50"), Some(-50.0));
        assert_eq!(parse_currency("($50.00)"), Some(-50.0));
        assert_eq!(parse_currency("  "), None);
        assert_eq!(parse_currency("$"), None);
        assert_eq!(parse_currency("n/a"), None);
        assert_eq!(parse_currency("0"), Some(0.0));
    }

    #[test]
    fn test_ever_had_revenue_scans_all_earlier_periods() {
        let snapshot = AccountSnapshot::new("0100001")
            .with_fact("fullmind", fy(2024), PeriodFact::new(Some(500.0), None, false))
            .with_fact("fullmind", fy(2025), PeriodFact::new(Some(0.0), None, false))
            .with_fact("fullmind", fy(2026), PeriodFact::new(None, Some(900.0), false));

        let registry = VendorRegistry::with_defaults();
        let fullmind = registry.get("fullmind").unwrap();
        let elevate = registry.get("elevate").unwrap();

        // FY24 revenue is two periods back, still counts
        assert!(snapshot.ever_had_revenue_before(fullmind, fy(2026)));
        // ...but the immediate prior alone would miss it
        assert!(!snapshot.had_revenue_in(fullmind, fy(2025)));
        // Strictly earlier: the period itself does not count
        assert!(!snapshot.ever_had_revenue_before(fullmind, fy(2024)));
        assert!(!snapshot.ever_had_revenue_before(elevate, fy(2026)));
    }

    #[test]
    fn test_tier_none_revenue_is_absent() {
        let vendor = Vendor::new("us", "Us", VendorRole::Subject)
            .with_tier(fy(2025), DataTier::Partial);
        let snapshot = AccountSnapshot::new("0100001")
            .with_fact("us", fy(2024), PeriodFact::new(Some(100.0), None, false))
            .with_fact("us", fy(2025), PeriodFact::new(Some(50.0), None, false));

        assert_eq!(snapshot.revenue("us", fy(2024)), Some(100.0));
        assert_eq!(snapshot.tiered_revenue(&vendor, fy(2024)), None);
        assert_eq!(snapshot.tiered_revenue(&vendor, fy(2025)), Some(50.0));
        assert!(!snapshot.ever_had_revenue_before(&vendor, fy(2025)));
        assert!(snapshot.ever_had_revenue_before(&vendor, fy(2026)));
    }

    #[test]
    fn test_fact_merge_keeps_greatest() {
        let mut fact = PeriodFact::new(Some(100.0), None, false);
        fact.merge(&PeriodFact::new(Some(80.0), Some(40.0), true));

        assert_eq!(fact.realized_revenue, Some(100.0));
        assert_eq!(fact.pipeline_value, Some(40.0));
        assert!(fact.is_targeted);
    }

    #[test]
    fn test_read_facts_csv() {
        let data = "\
account_id,account_name,state,vendor,fiscal_year,revenue,closed_won_bookings,pipeline,is_targeted
604020,Springfield USD,ca,Fullmind,FY25,\"$100,000\",,,true
604020,Springfield USD,ca,Fullmind,FY26,\"$120,000\",\"$30,000\",$5000,true
604020,Springfield USD,ca,Fullmind,FY26,\"$90,000\",,$7000,
604020,Springfield USD,ca,Elevate K12,FY25,$40000,,,
4500690,Shelby County,TN,Proximity Learning,2026,,,,no
";
        let registry = VendorRegistry::with_defaults();
        let load = read_facts(data.as_bytes(), &registry).unwrap();
        assert!(load.skipped.is_empty());
        let snapshots = &load.snapshots;

        assert_eq!(snapshots.len(), 2);
        let springfield = &snapshots[0];
        assert_eq!(springfield.account_id, "0604020");
        assert!(springfield.targeted);
        assert_eq!(springfield.passthrough.get("state_abbrev").unwrap(), "CA");

        // Bookings folded into revenue, duplicates merged by max
        let fy26 = springfield.fact("fullmind", fy(2026)).unwrap();
        assert_eq!(fy26.realized_revenue, Some(150_000.0));
        assert_eq!(fy26.pipeline_value, Some(7000.0));

        assert_eq!(springfield.revenue("elevate", fy(2025)), Some(40_000.0));

        let shelby = &snapshots[1];
        assert!(!shelby.targeted);
        assert!(!shelby.fact("proximity", fy(2026)).unwrap().has_data());
    }

    #[test]
    fn test_read_facts_isolates_bad_rows() {
        let data = "\
account_id,vendor,fiscal_year,revenue
604020,Fullmind,FY26,$10
604021,Acme,FY26,$20
604022,Elevate,FY26,$30
12345678,Fullmind,FY26,$40
604022,Fullmind,FY2x,$50
";
        let registry = VendorRegistry::with_defaults();
        let load = read_facts(data.as_bytes(), &registry).unwrap();

        // Every account with a usable id survives the load
        let ids: Vec<&str> = load.snapshots.iter().map(|s| s.account_id.as_str()).collect();
        assert_eq!(ids, vec!["0604020", "0604021", "0604022"]);

        assert!(load.snapshots[0].rejected.is_empty());
        assert_eq!(load.snapshots[1].rejected.len(), 1);
        assert!(load.snapshots[1].rejected[0].contains("unknown vendor"));
        assert!(load.snapshots[1].facts.is_empty());

        // Good rows of a partly-bad account are kept, the bad one is flagged
        assert_eq!(load.snapshots[2].revenue("elevate", fy(2026)), Some(30.0));
        assert!(load.snapshots[2].rejected[0].starts_with("fact row 5"));

        assert_eq!(load.skipped.len(), 1);
        assert_eq!(load.skipped[0].source, "facts");
        assert_eq!(load.skipped[0].row, 4);
    }

    #[test]
    fn test_read_facts_requires_columns() {
        let data = "account_id,revenue\n604020,$10\n";
        let registry = VendorRegistry::with_defaults();
        let err = read_facts(data.as_bytes(), &registry).unwrap_err();
        assert!(err.to_string().contains("vendor"));
    }

    #[test]
    fn test_read_signals_csv() {
        let mut load = FactsLoad {
            snapshots: vec![AccountSnapshot::new("0604020")],
            skipped: Vec::new(),
        };
        let data = "\
account_id,metric,base,latest
604020,Enrollment_Trend,1000,1100
604020,staffing_trend,0,12
999,enrollment_trend,200,190
999,staffing_trend,20,22
,enrollment_trend,1,2
";
        let count = read_signals(data.as_bytes(), &mut load).unwrap();

        assert_eq!(count, 4);
        let snapshots = &load.snapshots;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].signals.get("enrollment_trend"), Some(&Some(10.0)));
        assert_eq!(snapshots[0].signals.get("staffing_trend"), Some(&None));
        assert_eq!(snapshots[1].account_id, "0000999");
        assert_eq!(snapshots[1].signals.get("enrollment_trend"), Some(&Some(-5.0)));
        assert_eq!(snapshots[1].signals.get("staffing_trend"), Some(&Some(10.0)));

        assert_eq!(load.skipped.len(), 1);
        assert_eq!(load.skipped[0].source, "signals");
    }
}
