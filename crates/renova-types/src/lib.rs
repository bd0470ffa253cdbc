//! # renova-types
//!
//! Shared domain types used across the Renova workspace: subscription
//! status codes, the contract event vocabulary, and the billing-cycle
//! id codec.

pub mod cycle;
pub mod events;
pub mod status;

/// On-chain subscription identifier as reported by contract events.
pub type SubId = String;

/// Ledger sequence number (the chain's monotonically increasing block index).
pub type LedgerSeq = u64;

/// Default poll interval between reconciliation iterations (5 s).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default reorg depth: how far below a regressed chain head history is
/// considered unsafe and rolled back.
pub const DEFAULT_REORG_DEPTH: u64 = 10;

/// Ceiling for exponential RPC retry backoff (60 s).
pub const MAX_RPC_BACKOFF_MS: u64 = 60_000;

/// Default TTL for a renewal lock (30 s).
pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// Default interval for the periodic expired-lock sweep (5 min).
pub const DEFAULT_LOCK_SWEEP_INTERVAL_SECS: u64 = 300;
