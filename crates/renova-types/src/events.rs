//! Contract event vocabulary.
//!
//! The renewal contract emits one event per state change. The kind set is
//! closed: dispatch sites match exhaustively, and anything the contract
//! emits that this build does not know about lands in [`EventKind::Unknown`]
//! so that contract upgrades never break a running reconciler.

use serde::{Deserialize, Serialize};

/// Kinds of events emitted by the subscription renewal contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A billing cycle was renewed on-chain.
    RenewalSuccess,
    /// A renewal attempt failed; carries the on-chain failure count.
    RenewalFailed,
    /// The subscription moved to a new lifecycle state.
    StateTransition,
    /// A spending approval was granted for future renewals.
    ApprovalCreated,
    /// A spending approval was rejected.
    ApprovalRejected,
    /// The contract refused a renewal already recorded for the cycle.
    DuplicateRenewalRejected,
    /// Informational: a renewal lock was taken on-chain.
    LockAcquired,
    /// Informational: a renewal lock was released.
    LockReleased,
    /// Informational: a renewal lock lapsed.
    LockExpired,
    /// Any event name this build does not recognise. The raw name is
    /// preserved for logging.
    Unknown(String),
}

impl EventKind {
    /// Parse a wire event-type name.
    pub fn parse(name: &str) -> Self {
        match name {
            "RenewalSuccess" => EventKind::RenewalSuccess,
            "RenewalFailed" => EventKind::RenewalFailed,
            "StateTransition" => EventKind::StateTransition,
            "ApprovalCreated" => EventKind::ApprovalCreated,
            "ApprovalRejected" => EventKind::ApprovalRejected,
            "DuplicateRenewalRejected" => EventKind::DuplicateRenewalRejected,
            "LockAcquired" => EventKind::LockAcquired,
            "LockReleased" => EventKind::LockReleased,
            "LockExpired" => EventKind::LockExpired,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    /// The wire name, as stored in `contract_events.event_type`.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::RenewalSuccess => "RenewalSuccess",
            EventKind::RenewalFailed => "RenewalFailed",
            EventKind::StateTransition => "StateTransition",
            EventKind::ApprovalCreated => "ApprovalCreated",
            EventKind::ApprovalRejected => "ApprovalRejected",
            EventKind::DuplicateRenewalRejected => "DuplicateRenewalRejected",
            EventKind::LockAcquired => "LockAcquired",
            EventKind::LockReleased => "LockReleased",
            EventKind::LockExpired => "LockExpired",
            EventKind::Unknown(name) => name,
        }
    }

    /// Lock lifecycle events are informational: logged, never persisted.
    pub fn is_lock_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::LockAcquired | EventKind::LockReleased | EventKind::LockExpired
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `RenewalSuccess` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenewalSuccessPayload {
    pub sub_id: String,
    /// Amount charged, in stroops. Absent on older contract versions.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Payload of a `RenewalFailed` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenewalFailedPayload {
    pub sub_id: String,
    /// Consecutive failure count as counted on-chain. Handlers set this
    /// value verbatim, they never increment locally.
    pub failure_count: u32,
}

/// Payload of a `StateTransition` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransitionPayload {
    pub sub_id: String,
    #[serde(default)]
    pub from_status: Option<String>,
    pub to_status: String,
}

/// Payload of an `ApprovalCreated` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalCreatedPayload {
    pub sub_id: String,
    pub approval_id: String,
    pub max_spend: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Payload of an `ApprovalRejected` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRejectedPayload {
    pub sub_id: String,
    pub approval_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of a `DuplicateRenewalRejected` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateRenewalPayload {
    pub sub_id: String,
    pub cycle_id: u32,
}
