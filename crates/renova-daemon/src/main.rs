//! renova-daemon: the Renova reconciliation daemon.
//!
//! Single OS process running a Tokio async runtime. Owns the event poll
//! loop that keeps the billing store consistent with the chain, plus the
//! periodic sweep that expires abandoned renewal locks. The renewal
//! submission workflow runs elsewhere; it shares only the store.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};

use renova_chain::poller::{EventPoller, PollerConfig};
use renova_chain::rpc::{LedgerGateway, LedgerRpcClient};
use renova_locks::RenewalLockService;
use renova_types::MAX_RPC_BACKOFF_MS;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("renova=info".parse()?),
        )
        .init();

    info!("Renova daemon starting");

    // 1. Load config
    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open the store
    let db_path = data_dir.join("renova.db");
    let conn = renova_db::open(&db_path)?;
    let db = Arc::new(Mutex::new(conn));

    // 3. Build the chain gateway. Fails fast on missing configuration,
    // before any loop starts.
    let gateway: Arc<dyn LedgerGateway> = Arc::new(LedgerRpcClient::new(
        &config.chain.rpc_url,
        &config.chain.contract_address,
        Duration::from_secs(config.chain.request_timeout_secs),
    )?);

    // 4. Build the poller
    let poller = Arc::new(EventPoller::new(
        gateway,
        db,
        PollerConfig {
            poll_interval: Duration::from_millis(config.chain.poll_interval_ms),
            reorg_depth: config.chain.reorg_depth,
            max_backoff: Duration::from_millis(MAX_RPC_BACKOFF_MS),
        },
    ));

    // 5. Lock sweep on its own store connection
    let lock_service = RenewalLockService::open(&db_path)?;
    let sweep_interval = Duration::from_secs(config.locks.sweep_interval_secs);

    // 6. Shutdown channel
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    // 7. Run the poll loop
    let poll_task = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.start().await })
    };

    // 8. Run the periodic lock sweep
    let mut sweep_shutdown = shutdown_tx.subscribe();
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = lock_service.sweep_expired() {
                        error!(error = %e, "renewal lock sweep failed");
                    }
                }
                _ = sweep_shutdown.recv() => break,
            }
        }
    });

    // 9. Wait for shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown: the poller finishes its in-flight iteration
    info!("Daemon shutting down gracefully");
    poller.stop();
    let _ = shutdown_tx.send(());
    let _ = poll_task.await;
    let _ = sweep_task.await;

    info!("Daemon stopped");
    Ok(())
}
