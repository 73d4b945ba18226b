//! Startup reconciler.
//!
//! Runs once, before the HTTP surface opens. Every non-terminal `TxState`
//! row left over from a previous process lifetime is resolved against its
//! chain where possible, failed outright if it never got a tx hash and has
//! gone stale, or handed a fresh bounded confirmation poller if it's still
//! plausibly in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};

use crate::events::{TxEvent, TxEventHub};
use crate::models::{Chain, TxStatus};
use crate::providers::bsc_rpc::BscRpcProvider;
use crate::providers::btc_esplora::EsploraProvider;
use crate::providers::sol_rpc::SolRpcProvider;
use crate::store::tx_state::TxStateRow;
use crate::store::{SqlitePool, transactions, tx_state};

/// Rows with no recorded broadcast, or rows still unresolved after their
/// chain query, older than this are given up on.
const MAX_AGE: chrono::Duration = chrono::Duration::hours(1);
const POLL_INTERVAL: Duration = Duration::from_secs(15);
const PER_CHECK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

enum ChainQuery {
    Confirmed,
    Failed,
    Pending,
    QueryFailed,
}

/// Resumes tracking of every transaction still in flight when the process
/// last stopped. Holds its own copies of the read-only provider pools (no
/// need for the full sweep engines — only chain-status queries are made).
pub struct Reconciler {
    store: SqlitePool,
    btc_providers: Vec<Arc<EsploraProvider>>,
    bsc_providers: Vec<Arc<BscRpcProvider>>,
    sol_providers: Vec<Arc<SolRpcProvider>>,
    event_hub: Arc<TxEventHub>,
}

impl Reconciler {
    pub fn new(
        store: SqlitePool,
        btc_providers: Vec<Arc<EsploraProvider>>,
        bsc_providers: Vec<Arc<BscRpcProvider>>,
        sol_providers: Vec<Arc<SolRpcProvider>>,
        event_hub: Arc<TxEventHub>,
    ) -> Self {
        Reconciler {
            store,
            btc_providers,
            bsc_providers,
            sol_providers,
            event_hub,
        }
    }

    /// Sweeps every non-terminal `TxState` row. Must complete before the
    /// HTTP surface opens so a freshly started process never reports
    /// stale in-flight state as current.
    pub async fn reconcile(self: &Arc<Self>) {
        let rows = match self.conn().and_then(|c| tx_state::list_non_terminal(&c).map_err(anyhow::Error::from)) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error:% = e; "reconciler could not load non-terminal tx_state rows, skipping sweep");
                return;
            },
        };
        info!(count = rows.len(); "reconciler sweeping in-flight transactions from previous run");
        for row in rows {
            self.reconcile_row(row).await;
        }
    }

    fn conn(&self) -> anyhow::Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        Ok(self.store.get()?)
    }

    async fn reconcile_row(self: &Arc<Self>, row: TxStateRow) {
        let Some(tx_hash) = row.tx_hash.clone() else {
            let age = Utc::now() - row.created_at;
            if age > MAX_AGE {
                self.finish(&row.id, &row.sweep_id, row.chain, None, TxStatus::Failed, Some("no broadcast recorded"));
            }
            // Younger hash-less rows are left `pending` for the engine's own retry path.
            return;
        };

        match self.query_chain(row.chain, &tx_hash).await {
            ChainQuery::Confirmed => {
                self.finish(&row.id, &row.sweep_id, row.chain, Some(tx_hash.as_str()), TxStatus::Confirmed, None);
            },
            ChainQuery::Failed => {
                self.finish(&row.id, &row.sweep_id, row.chain, Some(tx_hash.as_str()), TxStatus::Failed, Some("transaction failed on-chain"));
            },
            ChainQuery::Pending | ChainQuery::QueryFailed => {
                let age = Utc::now() - row.updated_at;
                if age > MAX_AGE {
                    self.finish(&row.id, &row.sweep_id, row.chain, Some(tx_hash.as_str()), TxStatus::Uncertain, Some("unresolved after restart"));
                } else {
                    self.spawn_poller(row.id, row.sweep_id, row.chain, tx_hash);
                }
            },
        }
    }

    async fn query_chain(&self, chain: Chain, tx_hash: &str) -> ChainQuery {
        match chain {
            Chain::Btc => {
                let Some(provider) = self.btc_providers.first() else { return ChainQuery::QueryFailed };
                match provider.tx_status(tx_hash).await {
                    Ok(status) if status.confirmed => ChainQuery::Confirmed,
                    Ok(_) => ChainQuery::Pending,
                    Err(e) => {
                        warn!(tx_hash, error:% = e; "reconciler BTC status query failed");
                        ChainQuery::QueryFailed
                    },
                }
            },
            Chain::Bsc => {
                let Some(provider) = self.bsc_providers.first() else { return ChainQuery::QueryFailed };
                match provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => match receipt.status.as_deref() {
                        Some("0x1") => ChainQuery::Confirmed,
                        Some("0x0") => ChainQuery::Failed,
                        _ => ChainQuery::Pending,
                    },
                    Ok(None) => ChainQuery::Pending,
                    Err(e) => {
                        warn!(tx_hash, error:% = e; "reconciler BSC receipt query failed");
                        ChainQuery::QueryFailed
                    },
                }
            },
            Chain::Sol => {
                let Some(provider) = self.sol_providers.first() else { return ChainQuery::QueryFailed };
                match provider.signature_statuses(std::slice::from_ref(&tx_hash.to_string())).await {
                    Ok(statuses) => match statuses.into_iter().next().flatten() {
                        Some(status) if status.err.is_some() => ChainQuery::Failed,
                        Some(status) if matches!(status.confirmation_status.as_deref(), Some("confirmed") | Some("finalized")) => {
                            ChainQuery::Confirmed
                        },
                        _ => ChainQuery::Pending,
                    },
                    Err(e) => {
                        warn!(tx_hash, error:% = e; "reconciler SOL signature status query failed");
                        ChainQuery::QueryFailed
                    },
                }
            },
        }
    }

    /// Relaunches a bounded confirmation poller for a row that's still
    /// plausibly in flight and young enough to keep waiting on.
    fn spawn_poller(self: &Arc<Self>, tx_state_id: String, sweep_id: String, chain: Chain, tx_hash: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + PER_CHECK_TIMEOUT;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                match this.query_chain(chain, &tx_hash).await {
                    ChainQuery::Confirmed => {
                        this.finish(&tx_state_id, &sweep_id, chain, Some(tx_hash.as_str()), TxStatus::Confirmed, None);
                        return;
                    },
                    ChainQuery::Failed => {
                        this.finish(&tx_state_id, &sweep_id, chain, Some(tx_hash.as_str()), TxStatus::Failed, Some("transaction failed on-chain"));
                        return;
                    },
                    ChainQuery::Pending | ChainQuery::QueryFailed => {},
                }
                if Instant::now() >= deadline {
                    this.finish(&tx_state_id, &sweep_id, chain, Some(tx_hash.as_str()), TxStatus::Uncertain, Some("confirmation timed out"));
                    return;
                }
            }
        });
    }

    fn finish(&self, tx_state_id: &str, sweep_id: &str, chain: Chain, tx_hash: Option<&str>, status: TxStatus, error: Option<&str>) {
        let Ok(conn) = self.store.get() else { return };
        let _ = tx_state::transition(&conn, tx_state_id, status, tx_hash, error);
        if let Some(hash) = tx_hash {
            let _ = transactions::mark_by_tx_hash(&conn, chain, hash, &status.to_string());
        }
        match status {
            TxStatus::Confirmed => {
                self.event_hub.broadcast(TxEvent::SweepComplete { sweep_id: sweep_id.to_string(), chain });
            },
            TxStatus::Failed | TxStatus::Uncertain => {
                self.event_hub.broadcast(TxEvent::SweepError {
                    sweep_id: sweep_id.to_string(),
                    chain,
                    reason: error.unwrap_or("unresolved").to_string(),
                });
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chain, TokenSymbol};
    use crate::store::open_in_memory_store;

    fn reconciler(store: SqlitePool) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(store, Vec::new(), Vec::new(), Vec::new(), Arc::new(TxEventHub::new())))
    }

    #[tokio::test]
    async fn hash_less_row_older_than_max_age_is_failed() {
        let store = open_in_memory_store().unwrap();
        {
            let conn = store.get().unwrap();
            tx_state::insert(&conn, "tx1", "sweep1", Chain::Btc, TokenSymbol::Native, 0, "from", "to", "1000", TxStatus::Pending).unwrap();
            conn.execute(
                "UPDATE tx_state SET created_at = ?1, updated_at = ?1 WHERE id = 'tx1'",
                rusqlite::params![(Utc::now() - chrono::Duration::hours(2)).to_rfc3339()],
            )
            .unwrap();
        }
        let reconciler = reconciler(store.clone());
        reconciler.reconcile().await;

        let conn = store.get().unwrap();
        let row = tx_state::get(&conn, "tx1").unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn hash_less_row_within_max_age_is_left_pending() {
        let store = open_in_memory_store().unwrap();
        {
            let conn = store.get().unwrap();
            tx_state::insert(&conn, "tx1", "sweep1", Chain::Btc, TokenSymbol::Native, 0, "from", "to", "1000", TxStatus::Pending).unwrap();
        }
        let reconciler = reconciler(store.clone());
        reconciler.reconcile().await;

        let conn = store.get().unwrap();
        let row = tx_state::get(&conn, "tx1").unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn hashed_row_with_no_reachable_provider_and_stale_update_becomes_uncertain() {
        let store = open_in_memory_store().unwrap();
        {
            let conn = store.get().unwrap();
            tx_state::insert(&conn, "tx1", "sweep1", Chain::Btc, TokenSymbol::Native, 0, "from", "to", "1000", TxStatus::Confirming).unwrap();
            tx_state::transition(&conn, "tx1", TxStatus::Confirming, Some("abc123"), None).unwrap();
            conn.execute(
                "UPDATE tx_state SET updated_at = ?1 WHERE id = 'tx1'",
                rusqlite::params![(Utc::now() - chrono::Duration::hours(2)).to_rfc3339()],
            )
            .unwrap();
        }
        let reconciler = reconciler(store.clone());
        reconciler.reconcile().await;

        let conn = store.get().unwrap();
        let row = tx_state::get(&conn, "tx1").unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Uncertain);
    }
}
