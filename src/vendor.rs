// 🏢 Vendor Entity - subject vendor + named competitors
//
// "Vendor key is IDENTITY (never changes), display name and aliases are VALUES"
//
// Problem solved:
// - "Elevate K12", "Elevate", "elevate" → All same vendor
// - Each vendor carries a ROLE (selects label vocabulary) and a per-period
//   data-availability TIER (selects which classifier rules are reachable)

use crate::error::{EngineError, EngineResult};
use crate::period::FiscalPeriod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// VENDOR ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VendorRole {
    /// The operator running the territory plan
    Subject,

    /// A named competitor selling into the same accounts
    Competitor,
}

impl VendorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorRole::Subject => "subject",
            VendorRole::Competitor => "competitor",
        }
    }
}

impl FromStr for VendorRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "subject" => Ok(VendorRole::Subject),
            "competitor" => Ok(VendorRole::Competitor),
            _ => Err(EngineError::UnknownVendorRoleMapping(s.to_string())),
        }
    }
}

impl TryFrom<String> for VendorRole {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VendorRole> for String {
    fn from(role: VendorRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for VendorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DATA TIER
// ============================================================================

/// What columns exist for a vendor in a given period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTier {
    /// Revenue and pipeline
    Full,

    /// Revenue only (pipeline is "not applicable")
    Partial,

    /// No columns at all for this period
    None,
}

impl DataTier {
    pub fn has_revenue(&self) -> bool {
        !matches!(self, DataTier::None)
    }

    pub fn has_pipeline(&self) -> bool {
        matches!(self, DataTier::Full)
    }
}

// ============================================================================
// VENDOR ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    /// Stable short key used in column names ("fullmind", "elevate")
    pub key: String,

    /// Display name as it appears in source files
    pub name: String,

    pub role: VendorRole,

    /// Alternative names that map to this vendor
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Data availability per period; missing periods are `DataTier::None`
    #[serde(default)]
    pub tiers: BTreeMap<FiscalPeriod, DataTier>,
}

impl Vendor {
    pub fn new(key: impl Into<String>, name: impl Into<String>, role: VendorRole) -> Self {
        Vendor {
            key: key.into(),
            name: name.into(),
            role,
            aliases: Vec::new(),
            tiers: BTreeMap::new(),
        }
    }

    /// Builder: add alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) && alias != self.name {
            self.aliases.push(alias);
        }
        self
    }

    /// Builder: set tier for a period
    pub fn with_tier(mut self, period: FiscalPeriod, tier: DataTier) -> Self {
        self.tiers.insert(period, tier);
        self
    }

    pub fn tier_for(&self, period: FiscalPeriod) -> DataTier {
        self.tiers.get(&period).copied().unwrap_or(DataTier::None)
    }

    /// Case-insensitive exact match on key, name or any alias
    pub fn matches(&self, raw: &str) -> bool {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }

        self.key.to_lowercase() == needle
            || self.name.to_lowercase() == needle
            || self.aliases.iter().any(|a| a.to_lowercase() == needle)
    }
}

// ============================================================================
// VENDOR REGISTRY
// ============================================================================

/// Closed set of vendors, in declaration order, with exactly one subject
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRegistry {
    vendors: Vec<Vendor>,
}

impl VendorRegistry {
    pub fn new(vendors: Vec<Vendor>) -> EngineResult<Self> {
        let subjects = vendors
            .iter()
            .filter(|v| v.role == VendorRole::Subject)
            .count();
        if subjects != 1 {
            return Err(EngineError::Registry(format!(
                "expected exactly one subject vendor, found {}",
                subjects
            )));
        }

        for (i, vendor) in vendors.iter().enumerate() {
            if vendor.key.trim().is_empty() {
                return Err(EngineError::Registry("vendor key is empty".to_string()));
            }
            if vendors[..i].iter().any(|v| v.key == vendor.key) {
                return Err(EngineError::Registry(format!(
                    "duplicate vendor key '{}'",
                    vendor.key
                )));
            }
        }

        Ok(VendorRegistry { vendors })
    }

    /// The four vendors present in the customer book
    pub fn with_defaults() -> Self {
        let (fy24, fy25, fy26, fy27) = (
            FiscalPeriod::new(2024),
            FiscalPeriod::new(2025),
            FiscalPeriod::new(2026),
            FiscalPeriod::new(2027),
        );

        let competitor = |key: &str, name: &str| {
            Vendor::new(key, name, VendorRole::Competitor)
                .with_tier(fy24, DataTier::Partial)
                .with_tier(fy25, DataTier::Partial)
                .with_tier(fy26, DataTier::Partial)
        };

        let vendors = vec![
            Vendor::new("fullmind", "Fullmind", VendorRole::Subject)
                .with_tier(fy24, DataTier::Partial)
                .with_tier(fy25, DataTier::Partial)
                .with_tier(fy26, DataTier::Full)
                .with_tier(fy27, DataTier::Full),
            competitor("elevate", "Elevate K12").with_alias("Elevate"),
            competitor("proximity", "Proximity Learning"),
            competitor("tbt", "Tutored By Teachers"),
        ];

        VendorRegistry { vendors }
    }

    pub fn vendors(&self) -> &[Vendor] {
        &self.vendors
    }

    pub fn get(&self, key: &str) -> Option<&Vendor> {
        self.vendors.iter().find(|v| v.key == key)
    }

    /// Resolve a raw vendor/company string to a registered vendor
    pub fn resolve(&self, raw: &str) -> EngineResult<&Vendor> {
        self.vendors
            .iter()
            .find(|v| v.matches(raw))
            .ok_or_else(|| EngineError::UnknownVendor(raw.trim().to_string()))
    }

    pub fn subject(&self) -> &Vendor {
        // Constructors guarantee exactly one subject
        self.vendors
            .iter()
            .find(|v| v.role == VendorRole::Subject)
            .unwrap_or(&self.vendors[0])
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}

impl Default for VendorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
