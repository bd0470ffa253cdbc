//! Per-kind contract event handlers.
//!
//! Handlers are "set, not increment": they write the terminal state the
//! event describes, so applying the same event once or five times lands
//! in the same place. That is what makes the at-least-once delivery of
//! the poll loop safe: overlapping pollers and crash-replays re-apply
//! events freely.
//!
//! A handler returns the audit record to persist, or `None` for events
//! that deliberately leave no trace (informational lock lifecycle, unknown
//! kinds, unreadable payloads).

use rusqlite::Connection;
use serde::de::DeserializeOwned;

use renova_db::queries::{approvals, events::AuditRecord, subscriptions};
use renova_types::cycle;
use renova_types::events::{
    ApprovalCreatedPayload, ApprovalRejectedPayload, DuplicateRenewalPayload, EventKind,
    RenewalFailedPayload, RenewalSuccessPayload, StateTransitionPayload,
};
use renova_types::status::SubscriptionStatus;

use crate::rpc::ContractEvent;
use crate::{now_secs, Result};

/// Apply one contract event to the store.
///
/// Store errors propagate and fail the iteration (the batch will be
/// re-fetched). An unreadable payload does not: the contract emitted
/// something this build cannot interpret, which is logged and dropped the
/// same way an unknown event kind is.
pub fn apply_event(conn: &Connection, event: &ContractEvent) -> Result<Option<AuditRecord>> {
    let kind = EventKind::parse(&event.event_type);

    match kind {
        EventKind::RenewalSuccess => {
            let Some(payload) = decode::<RenewalSuccessPayload>(event, &kind) else {
                return Ok(None);
            };
            apply_renewal_success(conn, event, &payload).map(Some)
        }
        EventKind::RenewalFailed => {
            let Some(payload) = decode::<RenewalFailedPayload>(event, &kind) else {
                return Ok(None);
            };
            apply_renewal_failed(conn, event, &payload).map(Some)
        }
        EventKind::StateTransition => {
            let Some(payload) = decode::<StateTransitionPayload>(event, &kind) else {
                return Ok(None);
            };
            apply_state_transition(conn, event, &payload)
        }
        EventKind::ApprovalCreated => {
            let Some(payload) = decode::<ApprovalCreatedPayload>(event, &kind) else {
                return Ok(None);
            };
            apply_approval_created(conn, event, &payload).map(Some)
        }
        EventKind::ApprovalRejected => {
            let Some(payload) = decode::<ApprovalRejectedPayload>(event, &kind) else {
                return Ok(None);
            };
            apply_approval_rejected(conn, event, &payload).map(Some)
        }
        EventKind::DuplicateRenewalRejected => {
            let Some(payload) = decode::<DuplicateRenewalPayload>(event, &kind) else {
                return Ok(None);
            };
            // The contract refused the duplicate; local state never changed.
            // Audited so operators can see which workers raced the lock.
            tracing::warn!(
                sub_id = %payload.sub_id,
                cycle_id = payload.cycle_id,
                ledger = event.ledger,
                "chain rejected a duplicate renewal"
            );
            Ok(Some(audit(event, &payload.sub_id)))
        }
        EventKind::LockAcquired | EventKind::LockReleased | EventKind::LockExpired => {
            tracing::info!(
                kind = %kind,
                ledger = event.ledger,
                tx_hash = %event.tx_hash,
                "lock lifecycle event observed"
            );
            Ok(None)
        }
        EventKind::Unknown(ref name) => {
            tracing::warn!(
                event_type = %name,
                ledger = event.ledger,
                "unknown contract event type, dropping"
            );
            Ok(None)
        }
    }
}

fn apply_renewal_success(
    conn: &Connection,
    event: &ContractEvent,
    payload: &RenewalSuccessPayload,
) -> Result<AuditRecord> {
    // Record the billing cycle only when the subscription's schedule is
    // known; the marker is what stops a cycle being renewed twice.
    let cycle_id = subscriptions::next_billing_date(conn, &payload.sub_id)?
        .and_then(cycle::cycle_id_from_unix);

    let updated = subscriptions::set_renewed(conn, &payload.sub_id, cycle_id, now_secs())?;
    if !updated {
        tracing::warn!(sub_id = %payload.sub_id, "renewal success for unknown subscription");
    } else {
        tracing::info!(sub_id = %payload.sub_id, ?cycle_id, ledger = event.ledger, "renewal confirmed");
    }

    Ok(audit(event, &payload.sub_id))
}

fn apply_renewal_failed(
    conn: &Connection,
    event: &ContractEvent,
    payload: &RenewalFailedPayload,
) -> Result<AuditRecord> {
    let updated =
        subscriptions::set_retrying(conn, &payload.sub_id, payload.failure_count, now_secs())?;
    if !updated {
        tracing::warn!(sub_id = %payload.sub_id, "renewal failure for unknown subscription");
    } else {
        tracing::info!(
            sub_id = %payload.sub_id,
            failure_count = payload.failure_count,
            ledger = event.ledger,
            "renewal failed on-chain"
        );
    }

    Ok(audit(event, &payload.sub_id))
}

fn apply_state_transition(
    conn: &Connection,
    event: &ContractEvent,
    payload: &StateTransitionPayload,
) -> Result<Option<AuditRecord>> {
    let status = match SubscriptionStatus::parse(&payload.to_status) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(
                sub_id = %payload.sub_id,
                error = %e,
                ledger = event.ledger,
                "state transition to unknown status, dropping"
            );
            return Ok(None);
        }
    };

    let updated = subscriptions::set_status(conn, &payload.sub_id, status, now_secs())?;
    if !updated {
        tracing::warn!(sub_id = %payload.sub_id, "state transition for unknown subscription");
    }

    Ok(Some(audit(event, &payload.sub_id)))
}

fn apply_approval_created(
    conn: &Connection,
    event: &ContractEvent,
    payload: &ApprovalCreatedPayload,
) -> Result<AuditRecord> {
    approvals::record(
        conn,
        &payload.sub_id,
        &payload.approval_id,
        payload.max_spend,
        payload.expires_at,
    )?;
    tracing::info!(
        sub_id = %payload.sub_id,
        approval_id = %payload.approval_id,
        max_spend = payload.max_spend,
        "renewal approval recorded"
    );

    Ok(audit(event, &payload.sub_id))
}

fn apply_approval_rejected(
    conn: &Connection,
    event: &ContractEvent,
    payload: &ApprovalRejectedPayload,
) -> Result<AuditRecord> {
    let updated = approvals::mark_rejected(
        conn,
        &payload.sub_id,
        &payload.approval_id,
        payload.reason.as_deref(),
    )?;
    if !updated {
        tracing::warn!(
            sub_id = %payload.sub_id,
            approval_id = %payload.approval_id,
            "rejection for unknown approval"
        );
    }

    Ok(audit(event, &payload.sub_id))
}

/// Deserialize the kind-specific payload, logging and discarding on failure.
fn decode<T: DeserializeOwned>(event: &ContractEvent, kind: &EventKind) -> Option<T> {
    match serde_json::from_value(event.value.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(
                kind = %kind,
                ledger = event.ledger,
                tx_hash = %event.tx_hash,
                error = %e,
                "unreadable event payload, dropping"
            );
            None
        }
    }
}

fn audit(event: &ContractEvent, sub_id: &str) -> AuditRecord {
    AuditRecord {
        sub_id: sub_id.to_string(),
        event_type: event.event_type.clone(),
        ledger: event.ledger,
        tx_hash: event.tx_hash.clone(),
        event_data: event.value.to_string(),
    }
}
