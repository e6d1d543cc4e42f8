// ⚙️ Batch Driver - classify, rank, materialize and tag every account
//
// Workers (scoped threads) claim chunks of accounts from a shared queue and
// compute outcomes. They never touch the database: outcomes flow through a
// channel to the calling thread, the single SQLite writer.
//
// One account failing (bad input or a panic) never stops the run. Failures
// are logged and collected in the BatchReport, next to the source rows the
// loader could not attribute to any account.

use crate::config::EngineConfig;
use crate::db::{self, Event, UpsertOutcome};
use crate::dominance::{DominanceRanker, DominanceRanking};
use crate::error::{EngineError, EngineResult};
use crate::facts::{AccountSnapshot, FactsLoad, HistoryDepth, SkippedRow};
use crate::materialize::{derive_signals, materialize, AccountRecord};
use crate::orchestrator::{classify_account, AccountLifecycle};
use crate::period::{FiscalPeriod, PeriodCalendar};
use crate::tags::{derive_tags, TagCatalog, TagKind};
use crate::vendor::VendorRegistry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// OUTCOMES
// ============================================================================

/// Everything derived for one account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountOutcome {
    pub account_id: String,
    pub lifecycle: AccountLifecycle,
    pub ranking: DominanceRanking,
    pub record: AccountRecord,
    pub tags: BTreeSet<TagKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountFailure {
    pub account_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_accounts: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tags_added: usize,
    pub tags_removed: usize,
    pub failures: Vec<AccountFailure>,
    /// Source rows that belonged to no account
    pub skipped_rows: Vec<SkippedRow>,
}

impl BatchReport {
    fn new(run_id: String, total_accounts: usize) -> Self {
        let now = Utc::now();
        BatchReport {
            run_id,
            started_at: now,
            finished_at: now,
            total_accounts,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            tags_added: 0,
            tags_removed: 0,
            failures: Vec::new(),
            skipped_rows: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped_rows.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} accounts: {} inserted, {} updated, {} unchanged, {} failed, {} rows skipped | tags +{} -{}",
            self.total_accounts,
            self.inserted,
            self.updated,
            self.unchanged,
            self.failures.len(),
            self.skipped_rows.len(),
            self.tags_added,
            self.tags_removed
        )
    }

    fn record_failure(&mut self, account_id: &str, error: String) {
        warn!(account = %account_id, error = %error, "account failed");
        self.failures.push(AccountFailure {
            account_id: account_id.to_string(),
            error,
        });
    }
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct BatchDriver {
    registry: VendorRegistry,
    calendar: PeriodCalendar,
    current_period: FiscalPeriod,
    history: HistoryDepth,
    ranker: DominanceRanker,
    workers: usize,
    chunk_size: usize,
}

impl BatchDriver {
    pub fn new(
        registry: VendorRegistry,
        calendar: PeriodCalendar,
        current_period: FiscalPeriod,
    ) -> EngineResult<Self> {
        if !calendar.contains(current_period) {
            return Err(EngineError::ordering(
                current_period,
                "current period is not in the calendar",
            ));
        }

        Ok(BatchDriver {
            registry,
            calendar,
            current_period,
            history: HistoryDepth::Full,
            ranker: DominanceRanker::new(),
            workers: 4,
            chunk_size: 64,
        })
    }

    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        Ok(Self::new(config.registry()?, config.calendar()?, config.current_period)?
            .with_history(config.history_depth)
            .with_dominance_window(config.dominance_window)
            .with_workers(config.batch.workers)
            .with_chunk_size(config.batch.chunk_size))
    }

    /// Builder: history depth for `ever_had_revenue_before`
    pub fn with_history(mut self, history: HistoryDepth) -> Self {
        if history == HistoryDepth::ImmediatePriorOnly {
            warn!("history depth limited to the immediate prior period: winback detection is degraded");
        }
        self.history = history;
        self
    }

    pub fn with_dominance_window(mut self, window: usize) -> Self {
        self.ranker = self.ranker.with_window(window);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn current_period(&self) -> FiscalPeriod {
        self.current_period
    }

    /// Pure computation for one account (no I/O)
    pub fn process(&self, snapshot: &AccountSnapshot) -> EngineResult<AccountOutcome> {
        let lifecycle = classify_account(snapshot, &self.registry, &self.calendar, self.history)?;
        let ranking = self.ranker.rank(snapshot, &self.registry, &self.calendar)?;
        let signals = derive_signals(snapshot, &self.registry, &self.calendar, self.current_period)?;
        let record = materialize(snapshot, &lifecycle, &ranking, &signals);
        let tags = derive_tags(&lifecycle, &ranking, &signals, &self.registry, self.current_period);

        debug!(
            account = %snapshot.account_id,
            dominant = ?ranking.dominant_vendor(),
            tags = tags.len(),
            "processed account"
        );

        Ok(AccountOutcome {
            account_id: snapshot.account_id.clone(),
            lifecycle,
            ranking,
            record,
            tags,
        })
    }

    /// Classify every account on the worker pool and persist the results
    pub fn run(
        &self,
        conn: &Connection,
        catalog: &TagCatalog,
        snapshots: Vec<AccountSnapshot>,
    ) -> Result<BatchReport> {
        self.run_load(
            conn,
            catalog,
            FactsLoad {
                snapshots,
                skipped: Vec::new(),
            },
        )
    }

    /// Same as `run`, carrying the loader's skipped rows into the report
    pub fn run_load(
        &self,
        conn: &Connection,
        catalog: &TagCatalog,
        load: FactsLoad,
    ) -> Result<BatchReport> {
        let FactsLoad { snapshots, skipped } = load;
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = BatchReport::new(run_id.clone(), snapshots.len());
        report.skipped_rows = skipped;

        info!(
            run_id = %run_id,
            accounts = snapshots.len(),
            workers = self.workers,
            chunk_size = self.chunk_size,
            "batch started"
        );

        let mut queue: VecDeque<Vec<AccountSnapshot>> = VecDeque::new();
        let mut snapshots = snapshots.into_iter().peekable();
        while snapshots.peek().is_some() {
            queue.push_back(snapshots.by_ref().take(self.chunk_size).collect());
        }
        let queue = Mutex::new(queue);

        let (tx, rx) = mpsc::channel::<(String, std::result::Result<AccountOutcome, String>)>();

        std::thread::scope(|scope| {
            for _ in 0..self.workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || loop {
                    let chunk = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(poisoned) => poisoned.into_inner().pop_front(),
                    };
                    let Some(chunk) = chunk else {
                        break;
                    };

                    for snapshot in chunk {
                        let result = guarded(|| self.process(&snapshot));
                        if tx.send((snapshot.account_id.clone(), result)).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(tx);

            // Single writer: this thread
            for (account_id, result) in rx {
                match result {
                    Ok(outcome) => self.persist(conn, catalog, &outcome, &run_id, &mut report),
                    Err(error) => report.record_failure(&account_id, error),
                }
            }
        });

        report.failures.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        report.finished_at = Utc::now();

        let event = Event::new(
            "batch_completed",
            "batch",
            &run_id,
            serde_json::json!({
                "total_accounts": report.total_accounts,
                "inserted": report.inserted,
                "updated": report.updated,
                "unchanged": report.unchanged,
                "failed": report.failures.len(),
                "skipped_rows": report.skipped_rows.len(),
                "tags_added": report.tags_added,
                "tags_removed": report.tags_removed,
            }),
            "batch_driver",
        );
        db::insert_event(conn, &event)?;

        info!(run_id = %run_id, "{}", report.summary());
        Ok(report)
    }

    fn persist(
        &self,
        conn: &Connection,
        catalog: &TagCatalog,
        outcome: &AccountOutcome,
        run_id: &str,
        report: &mut BatchReport,
    ) {
        match db::upsert_account_record(conn, &outcome.record, run_id) {
            Ok(UpsertOutcome::Inserted) => report.inserted += 1,
            Ok(UpsertOutcome::Updated) => report.updated += 1,
            Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
            Err(e) => {
                report.record_failure(&outcome.account_id, format!("{:#}", e));
                return;
            }
        }

        match db::sync_account_tags(conn, catalog, &outcome.account_id, &outcome.tags) {
            Ok(sync) => {
                report.tags_added += sync.added;
                report.tags_removed += sync.removed;
            }
            Err(e) => report.record_failure(&outcome.account_id, format!("tag sync: {:#}", e)),
        }
    }

    /// On-demand recompute of one account, synchronously
    pub fn recompute_account(
        &self,
        conn: &Connection,
        catalog: &TagCatalog,
        snapshot: &AccountSnapshot,
    ) -> Result<AccountOutcome> {
        let outcome = self.process(snapshot)?;
        let run_id = format!("recompute-{}", uuid::Uuid::new_v4());

        let upsert = db::upsert_account_record(conn, &outcome.record, &run_id)?;
        let sync = db::sync_account_tags(conn, catalog, &outcome.account_id, &outcome.tags)?;

        info!(
            account = %outcome.account_id,
            upsert = ?upsert,
            tags_added = sync.added,
            tags_removed = sync.removed,
            "recomputed account"
        );
        Ok(outcome)
    }
}

/// Run one account's computation, turning errors AND panics into a message
fn guarded<F>(f: F) -> std::result::Result<AccountOutcome, String>
where
    F: FnOnce() -> EngineResult<AccountOutcome>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panic: {}", message))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
