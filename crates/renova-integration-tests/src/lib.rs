//! Integration test crate for the Renova reconciliation daemon.
//!
//! The tests exercise end-to-end flows across workspace crates: full
//! reconciliation cycles, reorg rollback, and cross-connection lock
//! contention. This library only carries the shared test support.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p renova-integration-tests
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use renova_chain::rpc::{ContractEvent, LedgerGateway};
use renova_chain::{ChainError, Result};

/// A scripted in-memory ledger.
///
/// `latest_ledger` serves the queued heads in order, repeating the final
/// one; `events_from` serves the queued batches in order and records every
/// start ledger it was asked for, so tests can assert what the poller
/// fetched.
pub struct ScriptedLedger {
    heads: Mutex<VecDeque<u64>>,
    batches: Mutex<VecDeque<Vec<ContractEvent>>>,
    fetch_starts: Mutex<Vec<u64>>,
}

impl ScriptedLedger {
    pub fn new(heads: Vec<u64>, batches: Vec<Vec<ContractEvent>>) -> Self {
        Self {
            heads: Mutex::new(heads.into()),
            batches: Mutex::new(batches.into()),
            fetch_starts: Mutex::new(Vec::new()),
        }
    }

    /// Every `startLedger` the poller fetched events with.
    pub fn fetch_starts(&self) -> Vec<u64> {
        self.fetch_starts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl LedgerGateway for ScriptedLedger {
    async fn latest_ledger(&self) -> Result<u64> {
        let mut heads = self.heads.lock().unwrap_or_else(|p| p.into_inner());
        match heads.len() {
            0 => Err(ChainError::Rpc("scripted ledger exhausted".to_string())),
            1 => heads
                .front()
                .copied()
                .ok_or_else(|| ChainError::Rpc("scripted ledger underflow".to_string())),
            _ => heads
                .pop_front()
                .ok_or_else(|| ChainError::Rpc("scripted ledger underflow".to_string())),
        }
    }

    async fn events_from(&self, start_ledger: u64) -> Result<Vec<ContractEvent>> {
        self.fetch_starts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(start_ledger);
        let mut batches = self.batches.lock().unwrap_or_else(|p| p.into_inner());
        Ok(batches.pop_front().unwrap_or_default())
    }
}

/// Build a contract event with a JSON payload.
pub fn event(event_type: &str, ledger: u64, value: serde_json::Value) -> ContractEvent {
    ContractEvent {
        event_type: event_type.to_string(),
        ledger,
        tx_hash: format!("tx-{ledger}"),
        contract_id: "CCONTRACT".to_string(),
        topics: vec![event_type.to_string()],
        value,
    }
}
