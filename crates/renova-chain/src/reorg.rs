//! Reorg rollback.
//!
//! When the reported chain head moves below the stored cursor, some of the
//! history this daemon already applied is no longer canonical. The handler
//! rewinds to a safe point (`new_head − reorg_depth`), undoes the effect of
//! every audited event at or above it, deletes those audit rows, and
//! resets the cursor so the poll loop re-fetches the range from the new
//! canonical chain.

use rusqlite::Connection;

use renova_db::queries::{approvals, cursor, events, subscriptions};
use renova_types::events::{ApprovalCreatedPayload, EventKind, StateTransitionPayload};
use renova_types::status::SubscriptionStatus;
use renova_types::DEFAULT_REORG_DEPTH;

use crate::{now_secs, Result};

/// Undoes applied event effects after a ledger regression.
#[derive(Clone, Debug)]
pub struct ReorgHandler {
    reorg_depth: u64,
}

impl Default for ReorgHandler {
    fn default() -> Self {
        Self::new(DEFAULT_REORG_DEPTH)
    }
}

impl ReorgHandler {
    pub fn new(reorg_depth: u64) -> Self {
        Self { reorg_depth }
    }

    /// Roll back all applied events at or above `new_ledger − reorg_depth`.
    ///
    /// Returns the safe point. Idempotent: a second call over an
    /// already-rolled-back range finds no audit rows and mutates nothing,
    /// the cursor included.
    pub fn handle_reorg(
        &self,
        conn: &mut Connection,
        new_ledger: u64,
        old_ledger: u64,
    ) -> Result<u64> {
        let safe_point = new_ledger.saturating_sub(self.reorg_depth);

        tracing::warn!(
            new_ledger,
            old_ledger,
            safe_point,
            "ledger reorganization detected, rolling back"
        );

        let tx = conn.transaction().map_err(renova_db::DbError::Sqlite)?;

        let rows = events::at_or_above(&tx, safe_point)?;
        if rows.is_empty() {
            tracing::info!(safe_point, "nothing to roll back");
            return Ok(safe_point);
        }

        for row in &rows {
            compensate(&tx, row)?;
        }

        let removed = events::delete_at_or_above(&tx, safe_point)?;
        cursor::reset(&tx, safe_point.saturating_sub(1))?;

        tx.commit().map_err(renova_db::DbError::Sqlite)?;

        tracing::info!(
            removed,
            cursor = safe_point.saturating_sub(1),
            "rollback complete"
        );
        Ok(safe_point)
    }
}

/// Undo the effect one audited event had on the store.
fn compensate(conn: &Connection, row: &events::EventRow) -> Result<()> {
    match EventKind::parse(&row.event_type) {
        EventKind::RenewalSuccess => {
            // Back to neutral: the renewal never happened on the canonical
            // chain, so the cycle marker must not block a re-renewal.
            subscriptions::clear_renewal(conn, &row.sub_id, now_secs())?;
            tracing::debug!(sub_id = %row.sub_id, ledger = row.ledger, "reverted renewal");
        }
        EventKind::StateTransition => {
            let restored = prior_state(conn, row)?;
            subscriptions::set_status(conn, &row.sub_id, restored, now_secs())?;
            tracing::debug!(
                sub_id = %row.sub_id,
                ledger = row.ledger,
                restored = %restored,
                "reverted state transition"
            );
        }
        EventKind::ApprovalCreated => {
            if let Ok(payload) =
                serde_json::from_str::<ApprovalCreatedPayload>(&row.event_data)
            {
                approvals::delete(conn, &payload.sub_id, &payload.approval_id)?;
                tracing::debug!(
                    sub_id = %payload.sub_id,
                    approval_id = %payload.approval_id,
                    "deleted rolled-back approval"
                );
            } else {
                tracing::error!(ledger = row.ledger, "approval audit row has unreadable payload");
            }
        }
        EventKind::DuplicateRenewalRejected => {
            // The rejection never mutated local state; nothing to undo.
        }
        other => {
            // No compensation exists for this kind. The row is still
            // deleted with the rest of the range.
            tracing::debug!(kind = %other, ledger = row.ledger, "no compensation for event kind");
        }
    }
    Ok(())
}

/// The state recorded by the nearest earlier state-transition audit row
/// for this subscription, falling back to active.
fn prior_state(conn: &Connection, row: &events::EventRow) -> Result<SubscriptionStatus> {
    let prior = events::nearest_state_before(conn, &row.sub_id, row.ledger)?;

    let restored = prior
        .and_then(|p| serde_json::from_str::<StateTransitionPayload>(&p.event_data).ok())
        .and_then(|payload| SubscriptionStatus::parse(&payload.to_status).ok())
        .unwrap_or(SubscriptionStatus::Active);

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use renova_db::queries::events::AuditRecord;

    fn test_db() -> Connection {
        renova_db::open_memory().expect("open test db")
    }

    fn audit(sub_id: &str, event_type: &str, ledger: u64, data: serde_json::Value) -> AuditRecord {
        AuditRecord {
            sub_id: sub_id.to_string(),
            event_type: event_type.to_string(),
            ledger,
            tx_hash: format!("tx-{ledger}"),
            event_data: data.to_string(),
        }
    }

    fn seed(conn: &Connection, sub_id: &str, status: SubscriptionStatus) {
        subscriptions::upsert(conn, sub_id, status, None, 100).expect("seed");
    }

    #[test]
    fn test_rollback_range_and_cursor() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Active);

        events::insert_batch(
            &mut conn,
            &[
                audit("sub-1", "RenewalSuccess", 80, serde_json::json!({"sub_id": "sub-1"})),
                audit("sub-1", "RenewalSuccess", 95, serde_json::json!({"sub_id": "sub-1"})),
                audit("sub-1", "RenewalSuccess", 99, serde_json::json!({"sub_id": "sub-1"})),
            ],
            1000,
        )
        .expect("insert");
        cursor::reset(&conn, 99).expect("cursor");

        // head regresses to 100; depth 10 -> safe point 90
        let safe_point = ReorgHandler::new(10)
            .handle_reorg(&mut conn, 100, 99)
            .expect("rollback");
        assert_eq!(safe_point, 90);

        // exactly the rows at or above 90 are gone
        let remaining = events::at_or_above(&conn, 0).expect("query");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ledger, 80);

        assert_eq!(cursor::last_ledger(&conn).expect("cursor"), 89);
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Active);

        events::insert_batch(
            &mut conn,
            &[audit("sub-1", "RenewalSuccess", 95, serde_json::json!({"sub_id": "sub-1"}))],
            1000,
        )
        .expect("insert");
        cursor::reset(&conn, 95).expect("cursor");

        let handler = ReorgHandler::new(10);
        handler.handle_reorg(&mut conn, 100, 95).expect("first rollback");
        assert_eq!(cursor::last_ledger(&conn).expect("cursor"), 89);

        // advance the cursor as the poller would, then re-roll the same range
        cursor::reset(&conn, 92).expect("cursor");
        handler.handle_reorg(&mut conn, 100, 95).expect("second rollback");
        // no rows left in range: nothing mutated, cursor untouched
        assert_eq!(cursor::last_ledger(&conn).expect("cursor"), 92);
    }

    #[test]
    fn test_renewal_compensation_clears_marker() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Pending);
        subscriptions::set_renewed(&conn, "sub-1", Some(20_260_315), 110).expect("renew");

        events::insert_batch(
            &mut conn,
            &[audit("sub-1", "RenewalSuccess", 95, serde_json::json!({"sub_id": "sub-1"}))],
            1000,
        )
        .expect("insert");

        ReorgHandler::new(10).handle_reorg(&mut conn, 100, 95).expect("rollback");

        let row = subscriptions::get(&conn, "sub-1").expect("get").expect("row");
        assert_eq!(row.status, SubscriptionStatus::Pending);
        assert!(row.last_renewal_cycle_id.is_none());
    }

    #[test]
    fn test_state_transition_restores_prior_state() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Cancelled);

        events::insert_batch(
            &mut conn,
            &[
                audit(
                    "sub-1",
                    "StateTransition",
                    70,
                    serde_json::json!({"sub_id": "sub-1", "to_status": "retrying"}),
                ),
                audit(
                    "sub-1",
                    "StateTransition",
                    95,
                    serde_json::json!({"sub_id": "sub-1", "to_status": "cancelled"}),
                ),
            ],
            1000,
        )
        .expect("insert");

        ReorgHandler::new(10).handle_reorg(&mut conn, 100, 95).expect("rollback");

        // the transition at 95 is undone; the surviving row at 70 wins
        let row = subscriptions::get(&conn, "sub-1").expect("get").expect("row");
        assert_eq!(row.status, SubscriptionStatus::Retrying);
    }

    #[test]
    fn test_state_transition_fallback_active() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Cancelled);

        events::insert_batch(
            &mut conn,
            &[audit(
                "sub-1",
                "StateTransition",
                95,
                serde_json::json!({"sub_id": "sub-1", "to_status": "cancelled"}),
            )],
            1000,
        )
        .expect("insert");

        ReorgHandler::new(10).handle_reorg(&mut conn, 100, 95).expect("rollback");

        let row = subscriptions::get(&conn, "sub-1").expect("get").expect("row");
        assert_eq!(row.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_approval_compensation_deletes_row() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Active);
        approvals::record(&conn, "sub-1", "ap-1", 9000, None).expect("record");

        events::insert_batch(
            &mut conn,
            &[audit(
                "sub-1",
                "ApprovalCreated",
                95,
                serde_json::json!({"sub_id": "sub-1", "approval_id": "ap-1", "max_spend": 9000}),
            )],
            1000,
        )
        .expect("insert");

        ReorgHandler::new(10).handle_reorg(&mut conn, 100, 95).expect("rollback");
        assert!(approvals::get(&conn, "sub-1", "ap-1").expect("get").is_none());
    }

    #[test]
    fn test_unknown_kind_no_compensation_but_deleted() {
        let mut conn = test_db();
        seed(&conn, "sub-1", SubscriptionStatus::Active);

        events::insert_batch(
            &mut conn,
            &[audit("sub-1", "PlanUpgraded", 95, serde_json::json!({"sub_id": "sub-1"}))],
            1000,
        )
        .expect("insert");

        ReorgHandler::new(10).handle_reorg(&mut conn, 100, 95).expect("rollback");

        assert_eq!(events::count(&conn).expect("count"), 0);
        let row = subscriptions::get(&conn, "sub-1").expect("get").expect("row");
        assert_eq!(row.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_safe_point_clamped_at_zero() {
        let mut conn = test_db();
        let safe_point = ReorgHandler::new(10).handle_reorg(&mut conn, 4, 20).expect("rollback");
        assert_eq!(safe_point, 0);
    }
}
