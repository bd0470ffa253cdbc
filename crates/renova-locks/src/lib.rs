//! # renova-locks
//!
//! Cross-process renewal locks over the shared billing store.
//!
//! This is the only true mutual-exclusion primitive in the system: the
//! renewal-submission workflow acquires a `(subscription, billing cycle)`
//! lock before calling the chain, so one cycle is renewed at most once no
//! matter how many worker processes run. Exclusion comes entirely from the
//! store's atomic enforcement of the partial unique index on active lock
//! rows; an in-memory mutex would only cover one process.
//!
//! Locks carry a wall-clock TTL and no heartbeat: a holder whose work
//! outlives its TTL silently loses exclusivity while still working.
//! Callers size `ttl_ms` well above their worst-case submission time.
//!
//! Every operation is one or two synchronous store round trips. Callers on
//! an async runtime should treat them as blocking I/O and offload
//! accordingly.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use renova_db::queries::locks;

/// Lock service error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("store error: {0}")]
    Store(#[from] renova_db::DbError),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Renewal lock service. Each process opens its own connection; the store
/// arbitrates between them.
pub struct RenewalLockService {
    conn: Connection,
}

impl RenewalLockService {
    /// Wrap an existing store connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open the store at `path` and wrap the connection.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(renova_db::open(path)?))
    }

    /// Try to acquire the lock for `(subscription_id, cycle_id)`.
    ///
    /// Any stale active row for the key whose TTL has passed is expired
    /// first, then a fresh active row is inserted with
    /// `expires_at = now + ttl_ms`. Returns `false` when another holder
    /// owns the lock; any other store error propagates.
    pub fn acquire(
        &self,
        subscription_id: &str,
        cycle_id: u32,
        lock_holder: &str,
        ttl_ms: u64,
    ) -> Result<bool> {
        let now_ms = now_ms();
        let healed = locks::expire_stale(&self.conn, subscription_id, cycle_id, now_ms)?;
        if healed > 0 {
            tracing::warn!(
                subscription_id,
                cycle_id,
                "expired stale renewal lock before acquire"
            );
        }

        let acquired = locks::try_insert_active(
            &self.conn,
            subscription_id,
            cycle_id,
            lock_holder,
            now_ms,
            now_ms.saturating_add(ttl_ms),
        )?;

        if acquired {
            tracing::debug!(subscription_id, cycle_id, lock_holder, ttl_ms, "renewal lock acquired");
        } else {
            tracing::debug!(subscription_id, cycle_id, lock_holder, "renewal lock contended");
        }
        Ok(acquired)
    }

    /// Release the active lock for the key. A no-op when none exists.
    pub fn release(&self, subscription_id: &str, cycle_id: u32) -> Result<()> {
        let released = locks::release(&self.conn, subscription_id, cycle_id)?;
        if released {
            tracing::debug!(subscription_id, cycle_id, "renewal lock released");
        }
        Ok(())
    }

    /// Expire every active lock past its TTL. Returns the affected count.
    ///
    /// Periodic backstop for holders that crashed without releasing;
    /// correctness does not depend on it because `acquire` self-heals.
    pub fn sweep_expired(&self) -> Result<usize> {
        let swept = locks::sweep_expired(&self.conn, now_ms())?;
        if swept > 0 {
            tracing::info!(swept, "expired abandoned renewal locks");
        }
        Ok(swept)
    }

    /// Whether the subscription holds any unexpired active lock. For
    /// callers that prefer to skip rather than block.
    pub fn is_locked(&self, subscription_id: &str) -> Result<bool> {
        Ok(locks::is_locked(&self.conn, subscription_id, now_ms())?)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
