//! The reconciliation poll loop.
//!
//! One cooperative loop per process: fetch the chain head, fetch new
//! contract events, apply them through the handlers, persist the audit
//! batch, then advance the durable cursor. The cursor only moves forward
//! after the audit batch is durable, so a crash mid-iteration re-fetches
//! instead of losing events; handler idempotency makes the replay safe.
//!
//! Several processes may run this loop against the same store. The cursor
//! write is conditional, so a slow instance can never rewind a fast one;
//! both may reprocess a recent window, which is safe for the same reason
//! replays are.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

use renova_db::queries::{cursor, events};
use renova_types::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_REORG_DEPTH, MAX_RPC_BACKOFF_MS};

use crate::reorg::ReorgHandler;
use crate::rpc::LedgerGateway;
use crate::{backoff, handlers, now_secs, Result};

/// Poll loop tuning.
#[derive(Clone, Debug)]
pub struct PollerConfig {
    /// Sleep between healthy iterations.
    pub poll_interval: Duration,
    /// Rollback depth below a regressed chain head.
    pub reorg_depth: u64,
    /// Ceiling for the failure backoff.
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reorg_depth: DEFAULT_REORG_DEPTH,
            max_backoff: Duration::from_millis(MAX_RPC_BACKOFF_MS),
        }
    }
}

/// Loop control state. Owned by the poller; everything else goes through
/// `start`, `stop` and `status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running { cursor: u64 },
}

/// What one iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// No new events past the cursor.
    Idle { cursor: u64 },
    /// A batch was applied and the cursor advanced.
    Applied {
        fetched: usize,
        recorded: usize,
        cursor: u64,
    },
    /// The chain head regressed; history was rolled back.
    ReorgHandled { safe_point: u64, cursor: u64 },
}

/// The reconciliation poller.
pub struct EventPoller {
    gateway: Arc<dyn LedgerGateway>,
    db: Arc<Mutex<Connection>>,
    config: PollerConfig,
    reorg: ReorgHandler,
    state: std::sync::Mutex<PollerState>,
}

impl EventPoller {
    pub fn new(gateway: Arc<dyn LedgerGateway>, db: Arc<Mutex<Connection>>, config: PollerConfig) -> Self {
        let reorg = ReorgHandler::new(config.reorg_depth);
        Self {
            gateway,
            db,
            config,
            reorg,
            state: std::sync::Mutex::new(PollerState::Stopped),
        }
    }

    /// Run the poll loop until [`stop`](Self::stop) is called.
    ///
    /// Idempotent: returns immediately when the loop is already running.
    pub async fn start(&self) {
        {
            let mut state = self.state_guard();
            if matches!(*state, PollerState::Running { .. }) {
                tracing::debug!("event poller already running");
                return;
            }
            *state = PollerState::Running { cursor: 0 };
        }

        let cursor = match self.durable_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::error!(error = %e, "failed to load cursor, starting from 0");
                0
            }
        };
        self.set_cursor(cursor);
        tracing::info!(cursor, "event poller started");

        let mut consecutive_failures: u32 = 0;
        loop {
            if !self.is_running() {
                break;
            }

            match self.poll_once().await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    if let PollOutcome::Applied { fetched, recorded, cursor } = outcome {
                        tracing::debug!(fetched, recorded, cursor, "iteration applied events");
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        consecutive_failures,
                        "poll iteration failed, will retry"
                    );
                }
            }

            if !self.is_running() {
                break;
            }
            let delay = backoff::delay(
                self.config.poll_interval,
                consecutive_failures,
                self.config.max_backoff,
            );
            tokio::time::sleep(delay).await;
        }

        tracing::info!("event poller stopped");
    }

    /// Ask the loop to stop. Cooperative: the in-flight iteration always
    /// finishes; the flag is honored at loop-top and before the sleep.
    pub fn stop(&self) {
        let mut state = self.state_guard();
        if matches!(*state, PollerState::Running { .. }) {
            tracing::info!("stopping event poller");
            *state = PollerState::Stopped;
        }
    }

    /// Current loop state.
    pub fn status(&self) -> PollerState {
        *self.state_guard()
    }

    /// One reconciliation iteration. The loop calls this; tests drive it
    /// directly.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let last_processed = self.durable_cursor().await?;
        let current_ledger = self.gateway.latest_ledger().await?;

        if current_ledger < last_processed {
            let safe_point = {
                let mut conn = self.db.lock().await;
                self.reorg.handle_reorg(&mut conn, current_ledger, last_processed)?
            };
            // Reload rather than compute: the rollback decided the cursor.
            let fresh = self.durable_cursor().await?;
            self.set_cursor(fresh);
            return Ok(PollOutcome::ReorgHandled { safe_point, cursor: fresh });
        }

        let batch = self.gateway.events_from(last_processed + 1).await?;
        if batch.is_empty() {
            self.set_cursor(last_processed);
            return Ok(PollOutcome::Idle { cursor: last_processed });
        }

        let fetched = batch.len();
        let mut conn = self.db.lock().await;

        let mut records = Vec::with_capacity(fetched);
        let mut max_ledger = last_processed;
        for event in &batch {
            if let Some(record) = handlers::apply_event(&conn, event)? {
                records.push(record);
            }
            max_ledger = max_ledger.max(event.ledger);
        }
        let recorded = records.len();

        // Audit first, cursor second. Crashing between the two re-fetches
        // the batch; advancing first would silently drop it.
        events::insert_batch(&mut conn, &records, now_secs())?;
        let advanced = cursor::advance(&conn, max_ledger)?;
        let new_cursor = if advanced {
            max_ledger
        } else {
            // Another poller instance is already ahead; fall in behind it.
            cursor::last_ledger(&conn)?
        };
        drop(conn);

        self.set_cursor(new_cursor);
        tracing::info!(fetched, recorded, cursor = new_cursor, "contract event batch applied");
        Ok(PollOutcome::Applied { fetched, recorded, cursor: new_cursor })
    }

    fn is_running(&self) -> bool {
        matches!(*self.state_guard(), PollerState::Running { .. })
    }

    fn set_cursor(&self, cursor: u64) {
        let mut state = self.state_guard();
        if let PollerState::Running { cursor: current } = &mut *state {
            *current = cursor;
        }
    }

    async fn durable_cursor(&self) -> Result<u64> {
        let conn = self.db.lock().await;
        Ok(cursor::last_ledger(&conn)?)
    }

    fn state_guard(&self) -> std::sync::MutexGuard<'_, PollerState> {
        // A poisoned state mutex only means a panicking thread died while
        // holding it; the enum inside is still coherent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scripted gateway for loop tests.
#[cfg(test)]
pub(crate) struct ScriptedGateway {
    heads: std::sync::Mutex<std::collections::VecDeque<u64>>,
    batches: std::sync::Mutex<std::collections::VecDeque<Vec<crate::rpc::ContractEvent>>>,
    pub fetch_starts: std::sync::Mutex<Vec<u64>>,
}

#[cfg(test)]
impl ScriptedGateway {
    pub fn new(heads: Vec<u64>, batches: Vec<Vec<crate::rpc::ContractEvent>>) -> Self {
        Self {
            heads: std::sync::Mutex::new(heads.into()),
            batches: std::sync::Mutex::new(batches.into()),
            fetch_starts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl LedgerGateway for ScriptedGateway {
    async fn latest_ledger(&self) -> Result<u64> {
        let mut heads = self.heads.lock().unwrap_or_else(|p| p.into_inner());
        match heads.len() {
            0 => Err(crate::ChainError::Rpc("script exhausted".to_string())),
            // Keep repeating the final head so idle loops stay healthy
            1 => heads.front().copied().ok_or_else(|| unreachable_script()),
            _ => heads.pop_front().ok_or_else(|| unreachable_script()),
        }
    }

    async fn events_from(&self, start_ledger: u64) -> Result<Vec<crate::rpc::ContractEvent>> {
        self.fetch_starts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(start_ledger);
        let mut batches = self.batches.lock().unwrap_or_else(|p| p.into_inner());
        Ok(batches.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
fn unreachable_script() -> crate::ChainError {
    crate::ChainError::Rpc("script underflow".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ContractEvent;
    use renova_db::queries::subscriptions;
    use renova_types::status::SubscriptionStatus;

    fn event(event_type: &str, ledger: u64, value: serde_json::Value) -> ContractEvent {
        ContractEvent {
            event_type: event_type.to_string(),
            ledger,
            tx_hash: format!("tx-{ledger}"),
            contract_id: "CCONTRACT".to_string(),
            topics: vec![],
            value,
        }
    }

    fn test_db() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(renova_db::open_memory().expect("open test db")))
    }

    fn poller(gateway: ScriptedGateway, db: Arc<Mutex<Connection>>) -> EventPoller {
        EventPoller::new(Arc::new(gateway), db, PollerConfig::default())
    }

    #[tokio::test]
    async fn test_poll_once_applies_batch() {
        let db = test_db();
        {
            let conn = db.lock().await;
            subscriptions::upsert(&conn, "sub-1", SubscriptionStatus::Pending, None, 100)
                .expect("seed");
            cursor::reset(&conn, 100).expect("cursor");
        }

        let gateway = ScriptedGateway::new(
            vec![105],
            vec![vec![
                event("RenewalFailed", 101, serde_json::json!({"sub_id": "sub-1", "failure_count": 1})),
                event("RenewalSuccess", 103, serde_json::json!({"sub_id": "sub-1"})),
            ]],
        );
        let poller = poller(gateway, db.clone());

        let outcome = poller.poll_once().await.expect("poll");
        assert_eq!(outcome, PollOutcome::Applied { fetched: 2, recorded: 2, cursor: 103 });

        let conn = db.lock().await;
        let row = subscriptions::get(&conn, "sub-1").expect("get").expect("row");
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.failure_count, 0);
        assert_eq!(cursor::last_ledger(&conn).expect("cursor"), 103);
        assert_eq!(events::count(&conn).expect("count"), 2);
    }

    #[tokio::test]
    async fn test_poll_once_idle() {
        let db = test_db();
        {
            let conn = db.lock().await;
            cursor::reset(&conn, 100).expect("cursor");
        }

        let gateway = ScriptedGateway::new(vec![100], vec![]);
        let poller = poller(gateway, db);

        let outcome = poller.poll_once().await.expect("poll");
        assert_eq!(outcome, PollOutcome::Idle { cursor: 100 });
    }

    #[tokio::test]
    async fn test_regression_takes_reorg_path_without_forward_fetch() {
        let db = test_db();
        {
            let mut conn = db.lock().await;
            subscriptions::upsert(&conn, "sub-1", SubscriptionStatus::Active, None, 100)
                .expect("seed");
            events::insert_batch(
                &mut conn,
                &[events::AuditRecord {
                    sub_id: "sub-1".to_string(),
                    event_type: "RenewalSuccess".to_string(),
                    ledger: 98,
                    tx_hash: "tx-98".to_string(),
                    event_data: serde_json::json!({"sub_id": "sub-1"}).to_string(),
                }],
                1000,
            )
            .expect("insert");
            cursor::reset(&conn, 100).expect("cursor");
        }

        // head regressed: 95 < 100; depth 10 -> safe point 85
        let gateway = ScriptedGateway::new(vec![95], vec![]);
        let poller = poller(gateway, db.clone());

        let outcome = poller.poll_once().await.expect("poll");
        assert_eq!(outcome, PollOutcome::ReorgHandled { safe_point: 85, cursor: 84 });

        let conn = db.lock().await;
        assert_eq!(cursor::last_ledger(&conn).expect("cursor"), 84);
        assert_eq!(events::count(&conn).expect("count"), 0);
    }

    #[tokio::test]
    async fn test_no_forward_fetch_during_reorg_iteration() {
        let db = test_db();
        {
            let conn = db.lock().await;
            cursor::reset(&conn, 100).expect("cursor");
        }

        let gateway = Arc::new(ScriptedGateway::new(vec![95], vec![]));
        let poller = EventPoller::new(gateway.clone(), db, PollerConfig::default());

        poller.poll_once().await.expect("poll");
        assert!(
            gateway.fetch_starts.lock().unwrap_or_else(|p| p.into_inner()).is_empty(),
            "reorg iteration must not fetch events with the stale cursor"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_is_cooperative() {
        let db = test_db();
        // A single repeating head keeps the loop idling forever
        let gateway = ScriptedGateway::new(vec![0], vec![]);
        let poller = Arc::new(EventPoller::new(Arc::new(gateway), db, PollerConfig::default()));

        let background = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.start().await })
        };

        // Let the loop claim the running state
        while poller.status() == PollerState::Stopped {
            tokio::task::yield_now().await;
        }

        // Second start returns immediately instead of spawning a second loop
        poller.start().await;
        assert!(matches!(poller.status(), PollerState::Running { .. }));

        poller.stop();
        background.await.expect("loop exits after stop");
        assert_eq!(poller.status(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_rpc_failure_is_contained() {
        let db = test_db();
        // Empty script: latest_ledger errors immediately
        let gateway = ScriptedGateway::new(vec![], vec![]);
        let poller = poller(gateway, db);

        let err = poller.poll_once().await.expect_err("should fail");
        assert!(matches!(err, crate::ChainError::Rpc(_)));
        // The loop boundary treats this as a retryable iteration failure;
        // nothing here panics or poisons state.
        assert_eq!(poller.status(), PollerState::Stopped);
    }
}
