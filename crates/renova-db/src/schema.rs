//! SQL schema definitions.

/// Complete schema for Renova v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Reconciliation cursor
-- ============================================================

-- Singleton row (id = 1). last_ledger is non-decreasing except during
-- a reorg rollback, which resets it to the safe point minus one.
CREATE TABLE IF NOT EXISTS event_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_ledger INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Contract event audit log
-- ============================================================

-- Append-only. Rows are deleted only by a reorg rollback, never edited.
CREATE TABLE IF NOT EXISTS contract_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sub_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    ledger INTEGER NOT NULL,
    tx_hash TEXT NOT NULL,
    event_data TEXT NOT NULL,
    processed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_ledger ON contract_events(ledger);
CREATE INDEX IF NOT EXISTS idx_events_sub ON contract_events(sub_id, ledger);

-- ============================================================
-- Renewal locks
-- ============================================================

-- A lock, once non-active, is never reused; each acquire attempt inserts
-- a new row. The partial unique index enforces at most one active row per
-- (subscription_id, cycle_id) and is the mutual-exclusion primitive.
CREATE TABLE IF NOT EXISTS renewal_locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subscription_id TEXT NOT NULL,
    cycle_id INTEGER NOT NULL,
    lock_holder TEXT NOT NULL,
    acquired_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'released', 'expired'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_locks_active
    ON renewal_locks(subscription_id, cycle_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_locks_expiry
    ON renewal_locks(expires_at_ms) WHERE status = 'active';

-- ============================================================
-- Subscriptions
-- ============================================================

-- Owned by the billing service; event handlers only perform "set"
-- mutations on status, failure_count and last_renewal_cycle_id.
CREATE TABLE IF NOT EXISTS subscriptions (
    blockchain_sub_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_renewal_cycle_id INTEGER,
    next_billing_date INTEGER,
    updated_at INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Renewal approvals
-- ============================================================

CREATE TABLE IF NOT EXISTS renewal_approvals (
    blockchain_sub_id TEXT NOT NULL,
    approval_id TEXT NOT NULL,
    max_spend INTEGER NOT NULL,
    expires_at INTEGER,
    used INTEGER NOT NULL DEFAULT 0,
    rejected INTEGER NOT NULL DEFAULT 0,
    rejection_reason TEXT,
    PRIMARY KEY (blockchain_sub_id, approval_id)
);
"#;
