use crate::materialize::AccountRecord;
use crate::tags::{TagCatalog, TagKind};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Account Features (one materialized record per account)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_features (
            account_id TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            dominant_vendor TEXT,
            run_id TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Tags (managed = 1 for engine-derived tags, 0 for user tags)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            color TEXT NOT NULL,
            managed INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_tags (
            account_id TEXT NOT NULL,
            tag_id INTEGER NOT NULL REFERENCES tags(id),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (account_id, tag_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_features_dominant ON account_features(dominant_vendor)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_account_tags_tag ON account_tags(tag_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNT FEATURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same fingerprint already stored; nothing written
    Unchanged,
}

/// Write one materialized record in its own transaction
pub fn upsert_account_record(
    conn: &Connection,
    record: &AccountRecord,
    run_id: &str,
) -> Result<UpsertOutcome> {
    let account_id = record.account_id();
    let fingerprint = record
        .fingerprint()
        .map(str::to_string)
        .unwrap_or_else(|| record.compute_fingerprint());

    let tx = conn.unchecked_transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT fingerprint FROM account_features WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(ref stored) if *stored == fingerprint => return Ok(UpsertOutcome::Unchanged),
        Some(_) => UpsertOutcome::Updated,
        None => UpsertOutcome::Inserted,
    };

    tx.execute(
        "INSERT INTO account_features (account_id, record, fingerprint, dominant_vendor, run_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account_id) DO UPDATE SET
            record = excluded.record,
            fingerprint = excluded.fingerprint,
            dominant_vendor = excluded.dominant_vendor,
            run_id = excluded.run_id,
            updated_at = excluded.updated_at",
        params![
            account_id,
            record.to_json()?,
            fingerprint,
            record.get_str("dominant_vendor"),
            run_id,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to upsert account {}", account_id))?;

    let event = Event::new(
        "account_materialized",
        "account",
        account_id,
        serde_json::json!({
            "fingerprint": fingerprint,
            "previous_fingerprint": existing,
            "run_id": run_id,
        }),
        "batch_driver",
    );
    insert_event(&tx, &event)?;

    tx.commit()?;
    Ok(outcome)
}

/// All materialized records, ordered by account id
pub fn load_records(conn: &Connection) -> Result<Vec<AccountRecord>> {
    let mut stmt = conn.prepare("SELECT record FROM account_features ORDER BY account_id")?;

    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.iter().map(|json| AccountRecord::from_json(json)).collect()
}

// ============================================================================
// TAG SYNC (per-account unit of work)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSyncOutcome {
    pub added: usize,
    pub removed: usize,
}

impl TagSyncOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Managed tag ids currently on an account
fn current_managed_tag_ids(conn: &Connection, account_id: &str) -> Result<BTreeSet<i64>> {
    let mut stmt = conn.prepare(
        "SELECT at.tag_id
         FROM account_tags at
         JOIN tags t ON t.id = at.tag_id
         WHERE at.account_id = ?1 AND t.managed = 1",
    )?;

    let ids = stmt
        .query_map(params![account_id], |row| row.get(0))?
        .collect::<Result<BTreeSet<i64>, _>>()?;

    Ok(ids)
}

/// Make the account's managed tags equal `desired`.
///
/// Read, diff, delete, insert, commit. Any error drops the transaction,
/// which rolls back every change for this account. User (unmanaged) tags
/// are never touched.
pub fn sync_account_tags(
    conn: &Connection,
    catalog: &TagCatalog,
    account_id: &str,
    desired: &BTreeSet<TagKind>,
) -> Result<TagSyncOutcome> {
    let desired_ids = desired
        .iter()
        .map(|kind| catalog.id(*kind))
        .collect::<Result<BTreeSet<i64>>>()?;

    let tx = conn.unchecked_transaction()?;
    let current_ids = current_managed_tag_ids(&tx, account_id)?;

    let to_remove: Vec<i64> = current_ids.difference(&desired_ids).copied().collect();
    let to_add: Vec<i64> = desired_ids.difference(&current_ids).copied().collect();

    for tag_id in &to_remove {
        tx.execute(
            "DELETE FROM account_tags WHERE account_id = ?1 AND tag_id = ?2",
            params![account_id, tag_id],
        )?;
    }

    for tag_id in &to_add {
        tx.execute(
            "INSERT INTO account_tags (account_id, tag_id) VALUES (?1, ?2)",
            params![account_id, tag_id],
        )
        .with_context(|| format!("Failed to add tag {} to account {}", tag_id, account_id))?;
    }

    let outcome = TagSyncOutcome {
        added: to_add.len(),
        removed: to_remove.len(),
    };

    if outcome.changed() {
        let names = |ids: &[i64]| -> Vec<&'static str> {
            ids.iter()
                .filter_map(|id| catalog.kind(*id))
                .map(|k| k.name())
                .collect()
        };
        let event = Event::new(
            "tags_synced",
            "account",
            account_id,
            serde_json::json!({
                "added": names(to_add.as_slice()),
                "removed": names(to_remove.as_slice()),
            }),
            "tag_sync",
        );
        insert_event(&tx, &event)?;
    }

    tx.commit()?;
    Ok(outcome)
}

/// Every tag name on an account (managed or not)
pub fn get_account_tags(conn: &Connection, account_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name
         FROM account_tags at
         JOIN tags t ON t.id = at.tag_id
         WHERE at.account_id = ?1",
    )?;

    let names = stmt
        .query_map(params![account_id], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;

    Ok(names)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
