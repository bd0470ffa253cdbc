//! Subscription query functions.
//!
//! Handlers perform "set" mutations only: the terminal state for a given
//! event is the same whether the event is applied once or many times.
//! Mutations on a missing subscription affect zero rows; callers get the
//! `false` back and decide whether to warn.

use rusqlite::Connection;

use renova_types::status::SubscriptionStatus;

use crate::{DbError, Result};

/// A subscription row as visible to this subsystem.
#[derive(Clone, Debug)]
pub struct SubscriptionRow {
    pub sub_id: String,
    pub status: SubscriptionStatus,
    pub failure_count: u32,
    pub last_renewal_cycle_id: Option<u32>,
    /// Unix seconds of the next scheduled billing date, when known.
    pub next_billing_date: Option<i64>,
    pub updated_at: u64,
}

/// Insert or replace a subscription row. Billing-service writes and test
/// seeding go through here.
pub fn upsert(
    conn: &Connection,
    sub_id: &str,
    status: SubscriptionStatus,
    next_billing_date: Option<i64>,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (blockchain_sub_id, status, failure_count, next_billing_date, updated_at)
         VALUES (?1, ?2, 0, ?3, ?4)
         ON CONFLICT(blockchain_sub_id) DO UPDATE SET
             status = excluded.status,
             next_billing_date = excluded.next_billing_date,
             updated_at = excluded.updated_at",
        rusqlite::params![sub_id, status.as_str(), next_billing_date, now as i64],
    )?;
    Ok(())
}

/// Fetch a subscription by its on-chain id.
pub fn get(conn: &Connection, sub_id: &str) -> Result<Option<SubscriptionRow>> {
    let mut stmt = conn.prepare(
        "SELECT blockchain_sub_id, status, failure_count, last_renewal_cycle_id, next_billing_date, updated_at
         FROM subscriptions WHERE blockchain_sub_id = ?1",
    )?;

    let mut rows = stmt
        .query_map([sub_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let Some((sub_id, status, failure_count, cycle, next_billing, updated_at)) = rows.pop() else {
        return Ok(None);
    };

    let status = SubscriptionStatus::parse(&status)
        .map_err(|e| DbError::Serialization(e.to_string()))?;

    Ok(Some(SubscriptionRow {
        sub_id,
        status,
        failure_count: failure_count as u32,
        last_renewal_cycle_id: cycle.map(|c| c as u32),
        next_billing_date: next_billing,
        updated_at: updated_at as u64,
    }))
}

/// The next scheduled billing date, when the subscription exists and has one.
pub fn next_billing_date(conn: &Connection, sub_id: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT next_billing_date FROM subscriptions WHERE blockchain_sub_id = ?1",
    )?;
    let mut rows = stmt
        .query_map([sub_id], |row| row.get::<_, Option<i64>>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.pop().flatten())
}

/// Renewal succeeded: status active, failure count zero, and the billing
/// cycle recorded when known. Returns whether a row was updated.
pub fn set_renewed(
    conn: &Connection,
    sub_id: &str,
    cycle_id: Option<u32>,
    now: u64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions
         SET status = 'active', failure_count = 0,
             last_renewal_cycle_id = COALESCE(?2, last_renewal_cycle_id),
             updated_at = ?3
         WHERE blockchain_sub_id = ?1",
        rusqlite::params![sub_id, cycle_id.map(|c| c as i64), now as i64],
    )?;
    Ok(updated == 1)
}

/// Renewal failed: status retrying, failure count set to the on-chain value.
pub fn set_retrying(conn: &Connection, sub_id: &str, failure_count: u32, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions
         SET status = 'retrying', failure_count = ?2, updated_at = ?3
         WHERE blockchain_sub_id = ?1",
        rusqlite::params![sub_id, failure_count as i64, now as i64],
    )?;
    Ok(updated == 1)
}

/// Set the lifecycle status directly (state-transition events and reorg
/// compensation).
pub fn set_status(
    conn: &Connection,
    sub_id: &str,
    status: SubscriptionStatus,
    now: u64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE blockchain_sub_id = ?1",
        rusqlite::params![sub_id, status.as_str(), now as i64],
    )?;
    Ok(updated == 1)
}

/// Reorg compensation for a rolled-back renewal: back to neutral pending
/// with the recorded cycle cleared.
pub fn clear_renewal(conn: &Connection, sub_id: &str, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions
         SET status = 'pending', last_renewal_cycle_id = NULL, updated_at = ?2
         WHERE blockchain_sub_id = ?1",
        rusqlite::params![sub_id, now as i64],
    )?;
    Ok(updated == 1)
}
