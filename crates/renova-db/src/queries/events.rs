//! Contract event audit log queries.

use rusqlite::Connection;

use crate::Result;

/// An audit record produced by an event handler, not yet persisted.
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub sub_id: String,
    pub event_type: String,
    pub ledger: u64,
    pub tx_hash: String,
    /// Raw event payload as JSON text.
    pub event_data: String,
}

/// A persisted audit row.
#[derive(Clone, Debug)]
pub struct EventRow {
    pub id: i64,
    pub sub_id: String,
    pub event_type: String,
    pub ledger: u64,
    pub tx_hash: String,
    pub event_data: String,
    pub processed_at: u64,
}

/// Insert a batch of audit records in one transaction.
///
/// The poller calls this before advancing the cursor, so a crash between
/// the two re-fetches the batch instead of silently losing it.
pub fn insert_batch(
    conn: &mut Connection,
    records: &[AuditRecord],
    processed_at: u64,
) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO contract_events (sub_id, event_type, ledger, tx_hash, event_data, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for record in records {
            stmt.execute(rusqlite::params![
                record.sub_id,
                record.event_type,
                record.ledger as i64,
                record.tx_hash,
                record.event_data,
                processed_at as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// All audit rows at or above `ledger`, in batch order.
pub fn at_or_above(conn: &Connection, ledger: u64) -> Result<Vec<EventRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sub_id, event_type, ledger, tx_hash, event_data, processed_at
         FROM contract_events WHERE ledger >= ?1 ORDER BY ledger ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([ledger as i64], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Delete all audit rows at or above `ledger`. Returns the count removed.
pub fn delete_at_or_above(conn: &Connection, ledger: u64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM contract_events WHERE ledger >= ?1",
        [ledger as i64],
    )?;
    Ok(deleted)
}

/// The nearest state-transition audit row for `sub_id` strictly below
/// `ledger`, if any. Used by reorg compensation to restore the state a
/// rolled-back transition overwrote.
pub fn nearest_state_before(
    conn: &Connection,
    sub_id: &str,
    ledger: u64,
) -> Result<Option<EventRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sub_id, event_type, ledger, tx_hash, event_data, processed_at
         FROM contract_events
         WHERE sub_id = ?1 AND event_type = 'StateTransition' AND ledger < ?2
         ORDER BY ledger DESC, id DESC LIMIT 1",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![sub_id, ledger as i64], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.pop())
}

/// Recent audit rows for a subscription, newest first.
pub fn for_subscription(conn: &Connection, sub_id: &str, limit: u32) -> Result<Vec<EventRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sub_id, event_type, ledger, tx_hash, event_data, processed_at
         FROM contract_events WHERE sub_id = ?1
         ORDER BY ledger DESC, id DESC LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![sub_id, limit], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Total number of audit rows.
pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM contract_events", [], |row| row.get(0))?;
    Ok(count as u64)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        sub_id: row.get(1)?,
        event_type: row.get(2)?,
        ledger: row.get::<_, i64>(3)? as u64,
        tx_hash: row.get(4)?,
        event_data: row.get(5)?,
        processed_at: row.get::<_, i64>(6)? as u64,
    })
}
