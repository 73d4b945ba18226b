//! Scan orchestrator: one background worker per chain, polling balances
//! in index batches with checkpointing, backoff, and progress events.
//!
//! One worker per chain, tracked by an in-memory cancellation map so
//! `is_running`/`stop_scan` never touch the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::Network;
use crate::events::{ScanEvent, ScanEventHub};
use crate::models::{Chain, ScanStatus, TokenSymbol};
use crate::providers::pool::ProviderPool;
use crate::providers::tokens;
use crate::store::{SqlitePool, StoreError, addresses, balances, scan_state};

/// Crash/stop resumes are honored within this window; older or completed
/// checkpoints start fresh from index 0.
const RESUME_THRESHOLD: chrono::Duration = chrono::Duration::hours(24);
const FAILURE_CEILING: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan already running for {0}")]
    AlreadyRunning(Chain),
    #[error("no provider pool configured for {0}")]
    NoPool(Chain),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ScanOrchestrator {
    store: SqlitePool,
    network: Network,
    pools: HashMap<Chain, Arc<ProviderPool>>,
    event_hub: Arc<ScanEventHub>,
    active: Mutex<HashMap<Chain, CancellationToken>>,
}

impl ScanOrchestrator {
    pub fn new(store: SqlitePool, network: Network, pools: HashMap<Chain, Arc<ProviderPool>>, event_hub: Arc<ScanEventHub>) -> Self {
        ScanOrchestrator {
            store,
            network,
            pools,
            event_hub,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, chain: Chain) -> bool {
        self.active.lock().expect("scan orchestrator mutex poisoned").contains_key(&chain)
    }

    pub fn status(&self, chain: Chain) -> Result<Option<scan_state::ScanStateRow>, ScanError> {
        let conn = self.store.get().map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(scan_state::get(&conn, chain, self.network)?)
    }

    /// Cancels the worker's background token; it drains gracefully,
    /// persisting the last checkpoint it reached, then exits.
    pub fn stop_scan(&self, chain: Chain) {
        if let Some(token) = self.active.lock().expect("scan orchestrator mutex poisoned").get(&chain) {
            token.cancel();
        }
    }

    /// Starts a worker for `chain` up to `max_id`, using a long-lived
    /// background cancellation scope rather than the caller's own —
    /// a scan must keep running after the HTTP/CLI request that started
    /// it has returned.
    pub fn start_scan(self: &Arc<Self>, chain: Chain, max_id: i64) -> Result<(), ScanError> {
        let mut active = self.active.lock().expect("scan orchestrator mutex poisoned");
        if active.contains_key(&chain) {
            return Err(ScanError::AlreadyRunning(chain));
        }
        if !self.pools.contains_key(&chain) {
            return Err(ScanError::NoPool(chain));
        }

        let token = CancellationToken::new();
        active.insert(chain, token.clone());
        drop(active);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_worker(chain, max_id, token).await;
        });
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, chain: Chain, max_id: i64, token: CancellationToken) {
        if let Err(e) = self.scan_loop(chain, max_id, &token).await {
            warn!(chain:% = chain, error:% = e; "scan worker exited with an error");
            self.event_hub.broadcast(ScanEvent::Error { chain, reason: e.to_string() });
        }
        // Removed after final state writes so a restart can't race the
        // finalizer and see a stale "not running" while state is mid-write.
        self.active.lock().expect("scan orchestrator mutex poisoned").remove(&chain);
    }

    async fn scan_loop(&self, chain: Chain, max_id: i64, token: &CancellationToken) -> Result<(), ScanError> {
        let pool = self.pools.get(&chain).cloned().ok_or(ScanError::NoPool(chain))?;
        let batch_size = pool.max_batch_size().max(1) as i64;

        let conn = self.store.get().map_err(|e| StoreError::Connection(e.to_string()))?;
        let existing = scan_state::get(&conn, chain, self.network)?;

        let (mut index, started_at) = match &existing {
            Some(row) if row.status == ScanStatus::Scanning && Utc::now() - row.updated_at < RESUME_THRESHOLD => {
                (row.last_scanned_index, row.started_at)
            },
            _ => (0, Utc::now()),
        };

        scan_state::upsert(&conn, chain, self.network, index, max_id, ScanStatus::Scanning, started_at)?;

        let mut found = 0i64;
        let mut consecutive_failures = 0u32;
        let loop_start = Instant::now();

        while index < max_id {
            if token.is_cancelled() {
                scan_state::upsert(&conn, chain, self.network, index, max_id, ScanStatus::Scanning, started_at)?;
                self.event_hub.broadcast(ScanEvent::Error { chain, reason: "interrupted".to_string() });
                return Ok(());
            }

            if consecutive_failures > 0 {
                let backoff = ProviderPool::suggest_backoff(consecutive_failures);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {},
                    _ = token.cancelled() => {
                        scan_state::upsert(&conn, chain, self.network, index, max_id, ScanStatus::Scanning, started_at)?;
                        self.event_hub.broadcast(ScanEvent::Error { chain, reason: "interrupted".to_string() });
                        return Ok(());
                    }
                }
            }

            let end = (index + batch_size).min(max_id);
            let batch = addresses::list_range(&conn, chain, self.network, index, end)?;
            let addr_refs: Vec<crate::providers::AddressRef> = batch
                .iter()
                .map(|a| crate::providers::AddressRef { address: a.address.clone(), index: a.index })
                .collect();

            let mut writes: Vec<(i64, TokenSymbol, String)> = Vec::new();

            match pool.fetch_native_balances(&addr_refs).await {
                Ok(results) => {
                    consecutive_failures = 0;
                    for r in results {
                        if r.error.is_none() && r.amount != "0" {
                            found += 1;
                        }
                        writes.push((r.address_index, TokenSymbol::Native, r.amount));
                    }
                },
                Err(e) => {
                    consecutive_failures += 1;
                    self.event_hub.broadcast(ScanEvent::Error { chain, reason: e.to_string() });
                },
            }

            for &token_symbol in tokens::tokens_for_chain(chain) {
                let Some(contract) = tokens::contract_or_mint(chain, self.network, token_symbol) else {
                    continue;
                };
                match pool.fetch_token_balances(&addr_refs, token_symbol, contract).await {
                    Ok(results) => {
                        for r in results {
                            writes.push((r.address_index, token_symbol, r.amount));
                        }
                    },
                    Err(e) => {
                        consecutive_failures += 1;
                        self.event_hub.broadcast(ScanEvent::TokenError { chain, token: token_symbol, reason: e.to_string() });
                    },
                }
            }

            if !writes.is_empty() {
                let tx = conn.unchecked_transaction().map_err(|e| StoreError::Rusqlite(e.to_string()))?;
                let now = Utc::now();
                for (addr_index, token_symbol, amount) in &writes {
                    balances::upsert(&tx, chain, self.network, *addr_index, *token_symbol, amount, now)?;
                }
                scan_state::upsert(&tx, chain, self.network, end, max_id, ScanStatus::Scanning, started_at)?;
                tx.commit().map_err(|e| StoreError::Rusqlite(e.to_string()))?;
            } else {
                scan_state::upsert(&conn, chain, self.network, end, max_id, ScanStatus::Scanning, started_at)?;
            }

            if consecutive_failures >= FAILURE_CEILING {
                scan_state::upsert(&conn, chain, self.network, end, max_id, ScanStatus::Failed, started_at)?;
                self.event_hub.broadcast(ScanEvent::Error { chain, reason: "failure ceiling reached".to_string() });
                return Ok(());
            }

            self.event_hub.broadcast(ScanEvent::Progress {
                chain,
                scanned: end,
                total: max_id,
                found,
                elapsed: loop_start.elapsed(),
            });

            index = end;
        }

        scan_state::upsert(&conn, chain, self.network, max_id, max_id, ScanStatus::Completed, started_at)?;
        info!(chain:% = chain, found; "scan completed");
        self.event_hub.broadcast(ScanEvent::Complete {
            chain,
            scanned: max_id,
            found,
            elapsed: loop_start.elapsed(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::providers::{AddressRef, BalanceResult, Provider, ProviderError};
    use crate::store::open_in_memory_store;

    struct AlwaysOneProvider;

    #[async_trait]
    impl Provider for AlwaysOneProvider {
        fn name(&self) -> &str {
            "always-one"
        }
        fn chain(&self) -> Chain {
            Chain::Btc
        }
        fn max_batch_size(&self) -> usize {
            5
        }
        async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
            Ok(addresses.iter().map(|a| BalanceResult::ok(&a.address, a.index, "1", "always-one")).collect())
        }
        async fn fetch_token_balances(
            &self,
            _addresses: &[AddressRef],
            _token: TokenSymbol,
            _contract_or_mint: &str,
        ) -> Result<Vec<BalanceResult>, ProviderError> {
            Err(ProviderError::TokensNotSupported)
        }
    }

    fn setup() -> (Arc<ScanOrchestrator>, SqlitePool) {
        let store = open_in_memory_store().unwrap();
        {
            let conn = store.get().unwrap();
            for i in 0..10 {
                addresses::insert(&conn, Chain::Btc, Network::Testnet, i, &format!("tb1q{}", i)).unwrap();
            }
        }
        let mut pools = HashMap::new();
        pools.insert(Chain::Btc, Arc::new(ProviderPool::new(Chain::Btc, vec![Arc::new(AlwaysOneProvider) as Arc<dyn Provider>])));
        let hub = Arc::new(ScanEventHub::new());
        let orchestrator = Arc::new(ScanOrchestrator::new(store.clone(), Network::Testnet, pools, hub));
        (orchestrator, store)
    }

    #[tokio::test]
    async fn start_scan_rejects_when_already_running() {
        let (orchestrator, _store) = setup();
        orchestrator.start_scan(Chain::Btc, 10).unwrap();
        let err = orchestrator.start_scan(Chain::Btc, 10).unwrap_err();
        assert!(matches!(err, ScanError::AlreadyRunning(Chain::Btc)));
    }

    #[tokio::test]
    async fn scan_completes_and_persists_balances() {
        let (orchestrator, store) = setup();
        orchestrator.start_scan(Chain::Btc, 10).unwrap();

        for _ in 0..100 {
            if !orchestrator.is_running(Chain::Btc) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let conn = store.get().unwrap();
        let row = scan_state::get(&conn, Chain::Btc, Network::Testnet).unwrap().unwrap();
        assert_eq!(row.status, ScanStatus::Completed);

        let funded = balances::list_funded_native(&conn, Chain::Btc, Network::Testnet).unwrap();
        assert_eq!(funded.len(), 10);
    }
}
