// 🧱 Output Materializer - one flat record per account
//
// Column layout (stable, in this order):
//   account_id
//   passthrough fields (sorted by name, values untouched)
//   {vendor}_{fy}_category   for every vendor × period cell
//   dominant_vendor, dominant_period
//   {metric}_signal, {metric}_delta   for every signal metric (sorted)
//   fingerprint
//
// Records are pure functions of the facts. The fingerprint is a SHA-256 of
// the canonical (key-sorted) JSON of every other column, so recomputing an
// unchanged account yields the exact same record.

use crate::classifier::LifecycleLabel;
use crate::dominance::DominanceRanking;
use crate::error::EngineResult;
use crate::facts::AccountSnapshot;
use crate::orchestrator::AccountLifecycle;
use crate::period::{FiscalPeriod, PeriodCalendar};
use crate::signals::{bucket, percent_change, pressure_signal};
use crate::vendor::VendorRegistry;
use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

pub const FINGERPRINT_COLUMN: &str = "fingerprint";

/// Derived from subject revenue at the current period
pub const REVENUE_TREND: &str = "revenue_trend";

/// enrollment_trend − staffing_trend
pub const VACANCY_PRESSURE: &str = "vacancy_pressure";

// ============================================================================
// COLUMN NAMING
// ============================================================================

pub fn category_column(vendor: &str, period: FiscalPeriod) -> String {
    format!("{}_{}_category", vendor, period.slug())
}

pub fn signal_column(metric: &str) -> String {
    format!("{}_signal", metric)
}

pub fn delta_column(metric: &str) -> String {
    format!("{}_delta", metric)
}

// ============================================================================
// ACCOUNT RECORD
// ============================================================================

/// Insertion-ordered map of scalar columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountRecord {
    columns: Vec<(String, Value)>,
}

impl AccountRecord {
    pub fn new(account_id: &str) -> Self {
        let mut record = AccountRecord::default();
        record.set("account_id", Value::from(account_id));
        record
    }

    /// Set a column, replacing in place if it already exists
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(|v| v.as_str())
    }

    pub fn account_id(&self) -> &str {
        self.get_str("account_id").unwrap_or_default()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.get_str(FINGERPRINT_COLUMN)
    }

    /// SHA-256 over the key-sorted JSON of every non-fingerprint column
    pub fn compute_fingerprint(&self) -> String {
        let canonical: BTreeMap<&str, &Value> = self
            .columns
            .iter()
            .filter(|(name, _)| name != FINGERPRINT_COLUMN)
            .map(|(name, value)| (name.as_str(), value))
            .collect();

        // BTreeMap<&str, &Value> always serializes
        let json = serde_json::to_string(&canonical).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Compute and store the fingerprint as the last column
    pub fn seal(&mut self) {
        let fingerprint = self.compute_fingerprint();
        self.columns.retain(|(name, _)| name != FINGERPRINT_COLUMN);
        self.columns
            .push((FINGERPRINT_COLUMN.to_string(), Value::from(fingerprint)));
    }

    pub fn verify_fingerprint(&self) -> bool {
        self.fingerprint() == Some(self.compute_fingerprint().as_str())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize account record")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse account record")
    }
}

impl Serialize for AccountRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = AccountRecord;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object of scalar columns")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut record = AccountRecord::default();
        while let Some((name, value)) = access.next_entry::<String, Value>()? {
            record.set(name, value);
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for AccountRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

// ============================================================================
// SIGNAL DERIVATION
// ============================================================================

/// Raw signals plus the derived ones:
/// - `revenue_trend`: subject revenue prior → current (percent change)
/// - `vacancy_pressure`: when both enrollment and staffing trends exist
pub fn derive_signals(
    snapshot: &AccountSnapshot,
    registry: &VendorRegistry,
    calendar: &PeriodCalendar,
    current: FiscalPeriod,
) -> EngineResult<BTreeMap<String, Option<f64>>> {
    let mut signals = snapshot.signals.clone();

    let subject = &registry.subject().key;
    let revenue_trend = match calendar.prior_of(current)? {
        Some(prior) => percent_change(
            snapshot.revenue(subject, prior),
            snapshot.revenue(subject, current),
        ),
        None => None,
    };
    signals.insert(REVENUE_TREND.to_string(), revenue_trend);

    if let (Some(enrollment), Some(staffing)) = (
        snapshot.signals.get("enrollment_trend"),
        snapshot.signals.get("staffing_trend"),
    ) {
        signals.insert(
            VACANCY_PRESSURE.to_string(),
            pressure_signal(*enrollment, *staffing),
        );
    }

    Ok(signals)
}

// ============================================================================
// MATERIALIZATION
// ============================================================================

/// Flatten one account's derived state into a sealed record
pub fn materialize(
    snapshot: &AccountSnapshot,
    lifecycle: &AccountLifecycle,
    ranking: &DominanceRanking,
    signals: &BTreeMap<String, Option<f64>>,
) -> AccountRecord {
    let mut record = AccountRecord::new(&snapshot.account_id);

    for (name, value) in &snapshot.passthrough {
        record.set(name.clone(), Value::from(value.as_str()));
    }

    // "none" is the absence of a label: written as null
    for cell in &lifecycle.cells {
        let value = if cell.label == LifecycleLabel::Unlabeled {
            Value::Null
        } else {
            Value::from(cell.label.as_str())
        };
        record.set(category_column(&cell.vendor, cell.period), value);
    }

    match ranking.winner() {
        Some(winner) => {
            record.set("dominant_vendor", Value::from(winner.vendor.as_str()));
            record.set("dominant_period", Value::from(winner.period.to_string()));
        }
        None => {
            record.set("dominant_vendor", Value::Null);
            record.set("dominant_period", Value::Null);
        }
    }

    for (metric, delta) in signals {
        let bucketed = bucket(*delta)
            .map(|b| Value::from(b.as_str()))
            .unwrap_or(Value::Null);
        record.set(signal_column(metric), bucketed);
        record.set(
            delta_column(metric),
            delta.map(Value::from).unwrap_or(Value::Null),
        );
    }

    record.seal();
    record
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Union of columns across records, first-seen order, fingerprint last
pub fn column_union(records: &[AccountRecord]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for record in records {
        for column in record.columns() {
            if column != FINGERPRINT_COLUMN && !header.iter().any(|h| h == column) {
                header.push(column.to_string());
            }
        }
    }
    header.push(FINGERPRINT_COLUMN.to_string());
    header
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Write records as CSV aligned on the union of their columns
pub fn write_csv<W: Write>(writer: W, records: &[AccountRecord]) -> Result<usize> {
    let header = column_union(records);
    let mut wtr = csv::Writer::from_writer(writer);

    wtr.write_record(&header).context("Failed to write CSV header")?;
    for record in records {
        let row: Vec<String> = header.iter().map(|h| cell_text(record.get(h))).collect();
        wtr.write_record(&row)
            .with_context(|| format!("Failed to write record {}", record.account_id()))?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;

    Ok(records.len())
}

pub fn export_csv(path: &Path, records: &[AccountRecord]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file: {:?}", path))?;
    write_csv(file, records)
}

// ============================================================================
// TESTS
// ============================================================================
