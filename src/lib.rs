// Territory Lifecycle Engine - Core Library
// Exposes all modules for use in the batch CLI and tests

pub mod error;
pub mod period;
pub mod vendor;
pub mod signals;
pub mod facts;
pub mod classifier;     // Lifecycle labels - priority-ordered rule table
pub mod orchestrator;   // Vendor × period walk
pub mod dominance;      // Dominant vendor per account
pub mod materialize;    // Flat per-account record
pub mod tags;           // Derived tag registry
pub mod db;
pub mod config;
pub mod batch;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};
pub use period::{FiscalPeriod, PeriodCalendar};
pub use vendor::{DataTier, Vendor, VendorRegistry, VendorRole};
pub use signals::{bucket, percent_change, pressure_signal, TrendBucket};
pub use facts::{
    AccountSnapshot, FactsLoad, HistoryDepth, PeriodFact, SkippedRow,
    load_facts_csv, load_signals_csv, normalize_account_id, parse_currency,
};
pub use classifier::{
    classify, classify_traced, surface, Classification, ClassifierInput,
    LifecycleLabel, LifecycleStage, Reach,
};
pub use orchestrator::{classify_account, AccountLifecycle, LifecycleCell};
pub use dominance::{DominanceCandidate, DominanceRanker, DominanceRanking};
pub use materialize::{derive_signals, export_csv, materialize, AccountRecord};
pub use tags::{derive_tags, TagCatalog, TagKind};
pub use db::{
    Event, TagSyncOutcome, UpsertOutcome,
    open_database, setup_database, upsert_account_record, sync_account_tags,
    load_records, get_account_tags,
    insert_event, get_events_for_entity,
};
pub use config::{create_config_template, load_config, save_config, EngineConfig};
pub use batch::{AccountFailure, AccountOutcome, BatchDriver, BatchReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
