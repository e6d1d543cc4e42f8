//! Engine configuration (TOML)

use crate::dominance::DEFAULT_WINDOW;
use crate::error::{EngineError, EngineResult};
use crate::facts::HistoryDepth;
use crate::period::{FiscalPeriod, PeriodCalendar};
use crate::vendor::{Vendor, VendorRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Every known fiscal period, strictly increasing
    pub periods: Vec<FiscalPeriod>,

    /// Period used for tags, trends and the "current" view
    pub current_period: FiscalPeriod,

    /// Trailing window summed by the dominance ranker
    #[serde(default = "default_dominance_window")]
    pub dominance_window: usize,

    /// How far back `ever_had_revenue_before` looks
    #[serde(default)]
    pub history_depth: HistoryDepth,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Vendor registry, declaration order is registry order
    pub vendors: Vec<Vendor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let fy = FiscalPeriod::new;
        Self {
            periods: vec![fy(2024), fy(2025), fy(2026), fy(2027)],
            current_period: fy(2026),
            dominance_window: DEFAULT_WINDOW,
            history_depth: HistoryDepth::Full,
            log_level: default_log_level(),
            batch: BatchConfig::default(),
            paths: PathsConfig::default(),
            vendors: VendorRegistry::with_defaults().vendors().to_vec(),
        }
    }
}

fn default_dominance_window() -> usize {
    DEFAULT_WINDOW
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Accounts claimed per queue pop
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_chunk_size() -> usize {
    64
}

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub database: PathBuf,
    pub facts: PathBuf,

    #[serde(default)]
    pub signals: Option<PathBuf>,

    pub export: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("territory.db"),
            facts: PathBuf::from("data/facts.csv"),
            signals: Some(PathBuf::from("data/signals.csv")),
            export: PathBuf::from("data/account_features.csv"),
        }
    }
}

impl EngineConfig {
    pub fn registry(&self) -> EngineResult<VendorRegistry> {
        VendorRegistry::new(self.vendors.clone())
    }

    pub fn calendar(&self) -> EngineResult<PeriodCalendar> {
        PeriodCalendar::new(self.periods.clone())
    }

    /// Fail fast on anything the engine cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        let calendar = self.calendar()?;
        if !calendar.contains(self.current_period) {
            return Err(EngineError::ordering(
                self.current_period,
                "current period is not in the calendar",
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// Unknown levels fall back to INFO
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {:?}", path))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config: {:?}", path))?;
    Ok(())
}

pub const CONFIG_TEMPLATE: &str = r#"# Territory Lifecycle Engine Configuration

# Every known fiscal period (July-June), strictly increasing
periods = ["FY24", "FY25", "FY26", "FY27"]

# Period used for tags, trends and the current view
current_period = "FY26"

# Trailing periods summed when ranking vendor dominance
dominance_window = 2

# "full" scans every earlier period for past revenue.
# "immediate_prior_only" is a degraded mode for sources without history.
history_depth = "full"

# trace | debug | info | warn | error
log_level = "info"

[batch]
workers = 4
chunk_size = 64

[paths]
database = "territory.db"
facts = "data/facts.csv"
signals = "data/signals.csv"
export = "data/account_features.csv"

# Exactly one vendor must have role = "subject".
# Tiers: "full" (revenue + pipeline), "partial" (revenue only).
# Periods not listed have no data for that vendor.

[[vendors]]
key = "fullmind"
name = "Fullmind"
role = "subject"

[vendors.tiers]
FY24 = "partial"
FY25 = "partial"
FY26 = "full"
FY27 = "full"

[[vendors]]
key = "elevate"
name = "Elevate K12"
role = "competitor"
aliases = ["Elevate"]

[vendors.tiers]
FY24 = "partial"
FY25 = "partial"
FY26 = "partial"

[[vendors]]
key = "proximity"
name = "Proximity Learning"
role = "competitor"

[vendors.tiers]
FY24 = "partial"
FY25 = "partial"
FY26 = "partial"

[[vendors]]
key = "tbt"
name = "Tutored By Teachers"
role = "competitor"

[vendors.tiers]
FY24 = "partial"
FY25 = "partial"
FY26 = "partial"
"#;

/// Create a default configuration file template
pub fn create_config_template(path: &Path) -> Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config template: {:?}", path))?;
    Ok(())
}
