// 📅 Fiscal Periods - totally ordered accounting years
//
// Fiscal year runs July 1 - June 30:
//   July 2025 - June 2026 = FY26
//
// "current" and "prior" always refer to ADJACENT periods in the calendar.

use crate::error::{EngineError, EngineResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FISCAL PERIOD
// ============================================================================

/// Fiscal year, stored as the full calendar year the period ends in (FY26 = 2026)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalPeriod(u16);

impl FiscalPeriod {
    pub fn new(year: u16) -> Self {
        FiscalPeriod(year)
    }

    pub fn year(&self) -> u16 {
        self.0
    }

    /// Fiscal period containing a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        let year = if date.month() >= 7 {
            date.year() + 1
        } else {
            date.year()
        };
        FiscalPeriod(year as u16)
    }

    /// Lowercase short form used in column names ("fy26")
    pub fn slug(&self) -> String {
        format!("fy{:02}", self.0 % 100)
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{:02}", self.0 % 100)
    }
}

impl FromStr for FiscalPeriod {
    type Err = EngineError;

    /// Accepts "FY26", "fy26", "2026" and "26"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("FY")
            .or_else(|| trimmed.strip_prefix("fy"))
            .or_else(|| trimmed.strip_prefix("Fy"))
            .unwrap_or(trimmed);

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::InvalidPeriod(s.to_string()));
        }

        let value: u16 = digits
            .parse()
            .map_err(|_| EngineError::InvalidPeriod(s.to_string()))?;

        match digits.len() {
            1 | 2 => Ok(FiscalPeriod(2000 + value)),
            4 => Ok(FiscalPeriod(value)),
            _ => Err(EngineError::InvalidPeriod(s.to_string())),
        }
    }
}

impl TryFrom<String> for FiscalPeriod {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FiscalPeriod> for String {
    fn from(period: FiscalPeriod) -> Self {
        period.to_string()
    }
}

// ============================================================================
// PERIOD CALENDAR
// ============================================================================

/// Strictly increasing list of every period the engine knows about
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodCalendar {
    periods: Vec<FiscalPeriod>,
}

impl PeriodCalendar {
    pub fn new(periods: Vec<FiscalPeriod>) -> EngineResult<Self> {
        if periods.is_empty() {
            return Err(EngineError::ordering("<calendar>", "calendar has no periods"));
        }

        for pair in periods.windows(2) {
            if pair[0] >= pair[1] {
                return Err(EngineError::ordering(
                    pair[1],
                    format!("must come strictly after {}", pair[0]),
                ));
            }
        }

        Ok(PeriodCalendar { periods })
    }

    pub fn periods(&self) -> &[FiscalPeriod] {
        &self.periods
    }

    pub fn contains(&self, period: FiscalPeriod) -> bool {
        self.periods.binary_search(&period).is_ok()
    }

    pub fn index_of(&self, period: FiscalPeriod) -> EngineResult<usize> {
        self.periods
            .binary_search(&period)
            .map_err(|_| EngineError::ordering(period, "period is not in the calendar"))
    }

    /// Immediately preceding period; `None` for the first one
    pub fn prior_of(&self, period: FiscalPeriod) -> EngineResult<Option<FiscalPeriod>> {
        let idx = self.index_of(period)?;
        Ok(if idx == 0 {
            None
        } else {
            Some(self.periods[idx - 1])
        })
    }

    /// Trailing window of `size` periods ending at (and including) `period`
    pub fn window_ending(&self, period: FiscalPeriod, size: usize) -> EngineResult<&[FiscalPeriod]> {
        let idx = self.index_of(period)?;
        let start = (idx + 1).saturating_sub(size.max(1));
        Ok(&self.periods[start..=idx])
    }
}

// ============================================================================
// TESTS
// ============================================================================
