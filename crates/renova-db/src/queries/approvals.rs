//! Renewal approval queries.

use rusqlite::Connection;

use crate::Result;

/// A renewal approval row.
#[derive(Clone, Debug)]
pub struct ApprovalRow {
    pub sub_id: String,
    pub approval_id: String,
    pub max_spend: i64,
    pub expires_at: Option<i64>,
    pub used: bool,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
}

/// Record an approval. Replaces any prior row for the key, so re-applying
/// the same event lands in the same state.
pub fn record(
    conn: &Connection,
    sub_id: &str,
    approval_id: &str,
    max_spend: i64,
    expires_at: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO renewal_approvals
             (blockchain_sub_id, approval_id, max_spend, expires_at, used, rejected, rejection_reason)
         VALUES (?1, ?2, ?3, ?4, 0, 0, NULL)",
        rusqlite::params![sub_id, approval_id, max_spend, expires_at],
    )?;
    Ok(())
}

/// Mark an approval rejected with an optional reason.
pub fn mark_rejected(
    conn: &Connection,
    sub_id: &str,
    approval_id: &str,
    reason: Option<&str>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE renewal_approvals SET rejected = 1, rejection_reason = ?3
         WHERE blockchain_sub_id = ?1 AND approval_id = ?2",
        rusqlite::params![sub_id, approval_id, reason],
    )?;
    Ok(updated == 1)
}

/// Mark an approval consumed by a renewal.
pub fn mark_used(conn: &Connection, sub_id: &str, approval_id: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE renewal_approvals SET used = 1
         WHERE blockchain_sub_id = ?1 AND approval_id = ?2",
        rusqlite::params![sub_id, approval_id],
    )?;
    Ok(updated == 1)
}

/// Delete an approval row. Reorg compensation for a rolled-back
/// `ApprovalCreated` event.
pub fn delete(conn: &Connection, sub_id: &str, approval_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM renewal_approvals WHERE blockchain_sub_id = ?1 AND approval_id = ?2",
        rusqlite::params![sub_id, approval_id],
    )?;
    Ok(deleted == 1)
}

/// Fetch an approval by key.
pub fn get(conn: &Connection, sub_id: &str, approval_id: &str) -> Result<Option<ApprovalRow>> {
    let mut stmt = conn.prepare(
        "SELECT blockchain_sub_id, approval_id, max_spend, expires_at, used, rejected, rejection_reason
         FROM renewal_approvals WHERE blockchain_sub_id = ?1 AND approval_id = ?2",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![sub_id, approval_id], |row| {
            Ok(ApprovalRow {
                sub_id: row.get(0)?,
                approval_id: row.get(1)?,
                max_spend: row.get(2)?,
                expires_at: row.get(3)?,
                used: row.get::<_, i64>(4)? != 0,
                rejected: row.get::<_, i64>(5)? != 0,
                rejection_reason: row.get(6)?,
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
    fn test_record_and_get() {
        let conn = test_db();
        record(&conn, "sub-1", "ap-1", 5000, Some(1_800_000_000)).expect("record");

        let row = get(&conn, "sub-1", "ap-1").expect("get").expect("row");
        assert_eq!(row.max_spend, 5000);
        assert!(!row.used);
        assert!(!row.rejected);
    }

    #[test]
    fn test_record_is_idempotent() {
        let conn = test_db();
        record(&conn, "sub-1", "ap-1", 5000, None).expect("first");
        record(&conn, "sub-1", "ap-1", 5000, None).expect("second");

        let row = get(&conn, "sub-1", "ap-1").expect("get").expect("row");
        assert_eq!(row.max_spend, 5000);
    }

    #[test]
    fn test_mark_rejected() {
        let conn = test_db();
        record(&conn, "sub-1", "ap-1", 5000, None).expect("record");
        assert!(mark_rejected(&conn, "sub-1", "ap-1", Some("over budget")).expect("reject"));

        let row = get(&conn, "sub-1", "ap-1").expect("get").expect("row");
        assert!(row.rejected);
        assert_eq!(row.rejection_reason.as_deref(), Some("over budget"));
    }

    #[test]
    fn test_mark_used() {
        let conn = test_db();
        record(&conn, "sub-1", "ap-1", 5000, None).expect("record");
        assert!(mark_used(&conn, "sub-1", "ap-1").expect("use"));
        let row = get(&conn, "sub-1", "ap-1").expect("get").expect("row");
        assert!(row.used);
    }

    #[test]
    fn test_delete() {
        let conn = test_db();
        record(&conn, "sub-1", "ap-1", 5000, None).expect("record");
        assert!(delete(&conn, "sub-1", "ap-1").expect("delete"));
        assert!(get(&conn, "sub-1", "ap-1").expect("get").is_none());

        // Deleting again is a no-op
        assert!(!delete(&conn, "sub-1", "ap-1").expect("re-delete"));
    }
}
