// ⚠️ Engine Errors - typed failures for the classification engine
//
// Missing facts are NOT errors (they coalesce to zero). Everything here is
// a programmer error, a misconfigured registry, or bad source rows that fail
// a single account.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A period was requested that the calendar cannot place, or the
    /// calendar itself was built out of order.
    #[error("invalid period ordering for {period}: {reason}")]
    InvalidPeriodOrdering { period: String, reason: String },

    /// Label mapping requested for a role outside {subject, competitor}
    #[error("unknown vendor role mapping: '{0}' (expected 'subject' or 'competitor')")]
    UnknownVendorRoleMapping(String),

    #[error("unknown vendor: '{0}'")]
    UnknownVendor(String),

    #[error("invalid account id: '{0}'")]
    InvalidAccountId(String),

    #[error("invalid fiscal period: '{0}'")]
    InvalidPeriod(String),

    #[error("vendor registry misconfigured: {0}")]
    Registry(String),

    /// Source rows for the account that could not be placed
    #[error("rejected source rows: {0}")]
    RejectedRows(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn ordering(period: impl ToString, reason: impl Into<String>) -> Self {
        EngineError::InvalidPeriodOrdering {
            period: period.to_string(),
            reason: reason.into(),
        }
    }
}
