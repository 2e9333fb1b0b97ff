//! SQLite persistence for unsettled deliveries, allowing recovery to survive
//! process restarts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use linkrec_core::{DeliveryRecord, DeliveryState, DeliveryTag, LinkIdentifier};

use crate::{DeliveryStore, StoreError, check_transition};

/// SQLite-backed delivery store.
///
/// Rows are keyed by [`LinkIdentifier::storage_key`] and the hex form of the
/// tag. The connection sits behind a mutex, which also serializes
/// read-check-write sequences for a tag.
pub struct SqliteDeliveryStore {
    conn: Mutex<Connection>,
}

impl SqliteDeliveryStore {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        debug!("opened delivery store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS unsettled_deliveries (
            terminus   TEXT NOT NULL,
            tag        TEXT NOT NULL,
            state      TEXT NOT NULL,
            resumed    INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (terminus, tag)
        );",
    )?;
    Ok(())
}

fn decode_row(
    terminus: &str,
    tag_hex: &str,
    state: &str,
    resumed: bool,
) -> Result<DeliveryRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        terminus: terminus.to_owned(),
        tag: tag_hex.to_owned(),
        reason,
    };
    let tag = DeliveryTag::from_hex(tag_hex).map_err(|e| corrupt(e.to_string()))?;
    let state: DeliveryState = state.parse().map_err(|e: linkrec_core::LinkRecoveryError| {
        corrupt(e.to_string())
    })?;
    Ok(DeliveryRecord {
        tag,
        state,
        resumed,
    })
}

fn select_one(
    conn: &Connection,
    key: &str,
    tag: &DeliveryTag,
) -> Result<Option<DeliveryRecord>, StoreError> {
    let tag_hex = tag.to_hex();
    let row: Option<(String, bool)> = conn
        .query_row(
            "SELECT state, resumed FROM unsettled_deliveries
             WHERE terminus = ?1 AND tag = ?2",
            params![key, tag_hex],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    row.map(|(state, resumed)| decode_row(key, &tag_hex, &state, resumed))
        .transpose()
}

impl DeliveryStore for SqliteDeliveryStore {
    fn save(&self, terminus: &LinkIdentifier, record: &DeliveryRecord) -> Result<(), StoreError> {
        let key = terminus.storage_key();
        let conn = self.lock();
        let existing = select_one(&conn, &key, &record.tag)?;
        check_transition(existing.as_ref(), record)?;

        conn.execute(
            "INSERT OR REPLACE INTO unsettled_deliveries
                (terminus, tag, state, resumed, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                record.tag.to_hex(),
                record.state.to_string(),
                record.resumed,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn retrieve(
        &self,
        terminus: &LinkIdentifier,
        tag: &DeliveryTag,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        select_one(&self.lock(), &terminus.storage_key(), tag)
    }

    fn retrieve_all(
        &self,
        terminus: &LinkIdentifier,
    ) -> Result<BTreeMap<DeliveryTag, DeliveryRecord>, StoreError> {
        let key = terminus.storage_key();
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT tag, state, resumed FROM unsettled_deliveries WHERE terminus = ?1",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            let tag: String = row.get(0)?;
            let state: String = row.get(1)?;
            let resumed: bool = row.get(2)?;
            Ok((tag, state, resumed))
        })?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (tag, state, resumed) = row?;
            let record = decode_row(&key, &tag, &state, resumed)?;
            result.insert(record.tag.clone(), record);
        }
        Ok(result)
    }

    fn remove(&self, terminus: &LinkIdentifier, tag: &DeliveryTag) -> Result<bool, StoreError> {
        let removed = self.lock().execute(
            "DELETE FROM unsettled_deliveries WHERE terminus = ?1 AND tag = ?2",
            params![terminus.storage_key(), tag.to_hex()],
        )?;
        Ok(removed > 0)
    }

    fn remove_all(&self, terminus: &LinkIdentifier) -> Result<usize, StoreError> {
        let removed = self.lock().execute(
            "DELETE FROM unsettled_deliveries WHERE terminus = ?1",
            params![terminus.storage_key()],
        )?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
