//! # renova-chain
//!
//! Chain-facing reconciliation: the ledger RPC gateway, the event poll
//! loop, per-kind event handlers, and reorg rollback.
//!
//! The poll loop is the outermost error boundary. Everything beneath it
//! returns `Result` and is free to fail; a failed iteration is logged,
//! backed off, and retried. The daemon never crashes because one RPC
//! call or store write went wrong.

pub mod backoff;
pub mod handlers;
pub mod poller;
pub mod reorg;
pub mod rpc;

/// Chain reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Required configuration absent. Fatal at construction, before the
    /// loop starts.
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Transport-level RPC failure (unreachable, timeout, TLS).
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The RPC endpoint answered with an error object or a non-2xx status.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The RPC endpoint answered 2xx but the body was not the expected shape.
    #[error("malformed RPC response: {0}")]
    Malformed(String),

    /// Store failure during audit or cursor persistence.
    #[error("store error: {0}")]
    Store(#[from] renova_db::DbError),
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
