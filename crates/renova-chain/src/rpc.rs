//! Ledger RPC gateway.
//!
//! JSON-RPC 2.0 over HTTPS against the chain's event endpoint. Two calls
//! are consumed: `getLatestLedger` for the chain head and `getEvents` for
//! contract events from a start ledger. An `error` object, a non-2xx
//! status, or a body that does not parse are all the same thing to the
//! poller: a fetch failure to retry next tick.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ChainError, Result};

/// A contract event as reported by `getEvents`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub ledger: u64,
    pub tx_hash: String,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Kind-specific payload. Handlers deserialize this into their typed
    /// payload structs.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Read access to the chain's event log.
///
/// The poller and tests depend on this seam, not on the HTTP client.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Current chain head (latest ledger sequence).
    async fn latest_ledger(&self) -> Result<u64>;

    /// Contract events at or above `start_ledger`, in ledger order.
    async fn events_from(&self, start_ledger: u64) -> Result<Vec<ContractEvent>>;
}

/// JSON-RPC client for the ledger endpoint.
pub struct LedgerRpcClient {
    http: reqwest::Client,
    rpc_url: String,
    contract_address: String,
}

impl LedgerRpcClient {
    /// Build a client. Fails fast when the RPC URL or contract address is
    /// absent; a misconfigured daemon must not reach the poll loop.
    pub fn new(rpc_url: &str, contract_address: &str, timeout: Duration) -> Result<Self> {
        if rpc_url.is_empty() {
            return Err(ChainError::MissingConfig("chain.rpc_url"));
        }
        if contract_address.is_empty() {
            return Err(ChainError::MissingConfig("chain.contract_address"));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            contract_address: contract_address.to_string(),
        })
    }

    /// One JSON-RPC round trip; returns the `result` member.
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.rpc_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Rpc(format!("{method} returned HTTP {status}")));
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Malformed(format!("{method}: {e}")))?;

        extract_result(method, envelope)
    }
}

#[async_trait]
impl LedgerGateway for LedgerRpcClient {
    async fn latest_ledger(&self) -> Result<u64> {
        let result = self.call("getLatestLedger", serde_json::json!({})).await?;
        parse_latest_ledger(&result)
    }

    async fn events_from(&self, start_ledger: u64) -> Result<Vec<ContractEvent>> {
        let params = serde_json::json!({
            "startLedger": start_ledger,
            "filters": [{ "contractIds": [self.contract_address] }],
        });
        let result = self.call("getEvents", params).await?;
        parse_events(result)
    }
}

/// Pull `result` out of a JSON-RPC envelope, surfacing `error` objects.
fn extract_result(method: &str, envelope: serde_json::Value) -> Result<serde_json::Value> {
    if let Some(error) = envelope.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unspecified RPC error");
        return Err(ChainError::Rpc(format!("{method}: {message}")));
    }

    envelope
        .get("result")
        .cloned()
        .ok_or_else(|| ChainError::Malformed(format!("{method}: missing result")))
}

fn parse_latest_ledger(result: &serde_json::Value) -> Result<u64> {
    result
        .get("sequence")
        .and_then(|s| s.as_u64())
        .ok_or_else(|| ChainError::Malformed("getLatestLedger: missing sequence".to_string()))
}

fn parse_events(mut result: serde_json::Value) -> Result<Vec<ContractEvent>> {
    let events = result
        .get_mut("events")
        .map(serde_json::Value::take)
        .ok_or_else(|| ChainError::Malformed("getEvents: missing events".to_string()))?;

    serde_json::from_value(events).map_err(|e| ChainError::Malformed(format!("getEvents: {e}")))
}
