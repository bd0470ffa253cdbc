//! Renewal lock queries.
//!
//! The partial unique index `idx_locks_active` is the mutual-exclusion
//! primitive: the insert in [`try_insert_active`] either commits atomically
//! or fails with a constraint violation, across any number of processes
//! sharing the store. Callers pass `now_ms` explicitly; nothing in this
//! module reads the clock.

use rusqlite::Connection;

use crate::{DbError, Result};

/// A renewal lock row.
#[derive(Clone, Debug)]
pub struct LockRow {
    pub id: i64,
    pub subscription_id: String,
    pub cycle_id: u32,
    pub lock_holder: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
    pub status: String,
}

/// Expire a stale active row for the exact key, if its TTL has passed.
///
/// Self-healing step run before each insert attempt, so a crashed holder
/// never blocks the next cycle attempt until the global sweep runs.
pub fn expire_stale(conn: &Connection, sub_id: &str, cycle_id: u32, now_ms: u64) -> Result<usize> {
    let expired = conn.execute(
        "UPDATE renewal_locks SET status = 'expired'
         WHERE subscription_id = ?1 AND cycle_id = ?2 AND status = 'active' AND expires_at_ms <= ?3",
        rusqlite::params![sub_id, cycle_id as i64, now_ms as i64],
    )?;
    Ok(expired)
}

/// Attempt to insert a fresh active lock row.
///
/// Returns `false` on a uniqueness violation, meaning another holder owns
/// the lock. Every other store error propagates; contention is the single
/// expected, recoverable outcome.
pub fn try_insert_active(
    conn: &Connection,
    sub_id: &str,
    cycle_id: u32,
    lock_holder: &str,
    now_ms: u64,
    expires_at_ms: u64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO renewal_locks (subscription_id, cycle_id, lock_holder, acquired_at_ms, expires_at_ms, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
        rusqlite::params![
            sub_id,
            cycle_id as i64,
            lock_holder,
            now_ms as i64,
            expires_at_ms as i64,
        ],
    );

    match inserted {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(DbError::Sqlite(e)),
    }
}

/// Transition the active row for the key to released. Returns whether a
/// row matched; no match is a no-op, not an error.
pub fn release(conn: &Connection, sub_id: &str, cycle_id: u32) -> Result<bool> {
    let released = conn.execute(
        "UPDATE renewal_locks SET status = 'released'
         WHERE subscription_id = ?1 AND cycle_id = ?2 AND status = 'active'",
        rusqlite::params![sub_id, cycle_id as i64],
    )?;
    Ok(released == 1)
}

/// Transition every active row past its expiry to expired. Returns the
/// affected count. Non-active and unexpired rows are never touched.
pub fn sweep_expired(conn: &Connection, now_ms: u64) -> Result<usize> {
    let swept = conn.execute(
        "UPDATE renewal_locks SET status = 'expired'
         WHERE status = 'active' AND expires_at_ms <= ?1",
        [now_ms as i64],
    )?;
    Ok(swept)
}

/// Whether the subscription holds any unexpired active lock.
pub fn is_locked(conn: &Connection, sub_id: &str, now_ms: u64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM renewal_locks
         WHERE subscription_id = ?1 AND status = 'active' AND expires_at_ms > ?2",
        rusqlite::params![sub_id, now_ms as i64],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Fetch the most recent lock row for a key, any status.
pub fn latest(conn: &Connection, sub_id: &str, cycle_id: u32) -> Result<Option<LockRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, subscription_id, cycle_id, lock_holder, acquired_at_ms, expires_at_ms, status
         FROM renewal_locks WHERE subscription_id = ?1 AND cycle_id = ?2
         ORDER BY id DESC LIMIT 1",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![sub_id, cycle_id as i64], |row| {
            Ok(LockRow {
                id: row.get(0)?,
                subscription_id: row.get(1)?,
                cycle_id: row.get::<_, i64>(2)? as u32,
                lock_holder: row.get(3)?,
                acquired_at_ms: row.get::<_, i64>(4)? as u64,
                expires_at_ms: row.get::<_, i64>(5)? as u64,
                status: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_insert_then_contention() {
        let conn = test_db();
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w1", 1000, 31_000).expect("insert"));
        assert!(!try_insert_active(&conn, "sub-1", 20_260_315, "w2", 1000, 31_000).expect("contended"));
    }

    #[test]
    fn test_different_cycles_do_not_contend() {
        let conn = test_db();
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w1", 1000, 31_000).expect("insert"));
        assert!(try_insert_active(&conn, "sub-1", 20_260_415, "w1", 1000, 31_000).expect("insert"));
    }

    #[test]
    fn test_release_then_reacquire() {
        let conn = test_db();
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w1", 1000, 31_000).expect("insert"));
        assert!(release(&conn, "sub-1", 20_260_315).expect("release"));
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w3", 2000, 32_000).expect("reacquire"));
    }

    #[test]
    fn test_release_without_lock_is_noop() {
        let conn = test_db();
        assert!(!release(&conn, "sub-1", 20_260_315).expect("release nothing"));
    }

    #[test]
    fn test_expire_stale_unblocks_key() {
        let conn = test_db();
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w1", 1000, 2000).expect("insert"));

        // TTL passed: the stale row is expired, the key is free again
        assert_eq!(expire_stale(&conn, "sub-1", 20_260_315, 2000).expect("expire"), 1);
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w2", 2000, 32_000).expect("insert"));
    }

    #[test]
    fn test_expire_stale_leaves_live_lock() {
        let conn = test_db();
        assert!(try_insert_active(&conn, "sub-1", 20_260_315, "w1", 1000, 31_000).expect("insert"));
        assert_eq!(expire_stale(&conn, "sub-1", 20_260_315, 2000).expect("expire"), 0);
        assert!(!try_insert_active(&conn, "sub-1", 20_260_315, "w2", 2000, 32_000).expect("contended"));
    }

    #[test]
    fn test_sweep_expired_counts_exactly() {
        let conn = test_db();
        try_insert_active(&conn, "sub-1", 1, "w1", 0, 1000).expect("insert");
        try_insert_active(&conn, "sub-2", 1, "w1", 0, 1000).expect("insert");
        try_insert_active(&conn, "sub-3", 1, "w1", 0, 99_000).expect("insert");
        release(&conn, "sub-2", 1).expect("release");

        // sub-1 expired-active, sub-2 released (untouched), sub-3 unexpired
        assert_eq!(sweep_expired(&conn, 5000).expect("sweep"), 1);

        let row = latest(&conn, "sub-2", 1).expect("get").expect("row");
        assert_eq!(row.status, "released");
        let row = latest(&conn, "sub-3", 1).expect("get").expect("row");
        assert_eq!(row.status, "active");
    }

    #[test]
    fn test_is_locked() {
        let conn = test_db();
        assert!(!is_locked(&conn, "sub-1", 1000).expect("check"));

        try_insert_active(&conn, "sub-1", 1, "w1", 1000, 31_000).expect("insert");
        assert!(is_locked(&conn, "sub-1", 1000).expect("check"));

        // An expired-but-still-active row does not count as locked
        assert!(!is_locked(&conn, "sub-1", 31_000).expect("check"));
    }
}
