//! Reconciliation cursor queries.
//!
//! The cursor is a singleton row holding the last ledger whose events
//! have been durably applied. Forward movement is conditional so that a
//! slower poller instance can never regress a faster one; only a reorg
//! rollback moves it backwards, through [`reset`].

use rusqlite::Connection;

use crate::{DbError, Result};

/// Last ledger durably applied. The row is seeded at migration time.
pub fn last_ledger(conn: &Connection) -> Result<u64> {
    let ledger: i64 = conn
        .query_row(
            "SELECT last_ledger FROM event_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound("event cursor row".to_string())
            }
            other => DbError::Sqlite(other),
        })?;
    Ok(ledger as u64)
}

/// Advance the cursor to `ledger`, only if the stored value is not ahead.
///
/// Returns `true` when the write applied. `false` means another poller
/// instance already advanced past `ledger`; the caller should reload.
pub fn advance(conn: &Connection, ledger: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE event_cursor SET last_ledger = ?1 WHERE id = 1 AND last_ledger <= ?1",
        [ledger as i64],
    )?;
    Ok(updated == 1)
}

/// Reset the cursor unconditionally. Reorg rollback only.
pub fn reset(conn: &Connection, ledger: u64) -> Result<()> {
    conn.execute(
        "UPDATE event_cursor SET last_ledger = ?1 WHERE id = 1",
        [ledger as i64],
    )?;
    Ok(())
}
