//! Transaction engines: per-chain preview/build/sign/broadcast/confirm
//! pipelines.
//!
//! Each chain gets its own preview/build/sign/broadcast/confirm pipeline
//! (`btc_engine`, `bsc_engine`, `sol_engine`); `reconciler` resumes
//! tracking of in-flight transactions on process startup. Sweep execution
//! is serialized per chain by [`SweepLocks`] — a second concurrent sweep
//! for the same chain is refused outright rather than queued.

pub mod bsc_engine;
pub mod btc_engine;
pub mod reconciler;
pub mod sol_engine;

use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

use crate::models::Chain;

#[derive(Debug, thiserror::Error)]
pub enum TxEngineError {
    #[error("a sweep is already in progress for {0}")]
    SweepBusy(Chain),
    #[error("invalid destination address: {0}")]
    InvalidDestination(String),
    #[error("nothing to sweep: no funded addresses")]
    NothingToSweep,
    #[error("net output {net_out} is below the dust threshold {dust}")]
    BelowDust { net_out: i128, dust: i128 },
    #[error("input count {count} exceeds the maximum of {max}")]
    TooManyInputs { count: usize, max: usize },
    #[error("UTXO set changed since preview: {0}")]
    UtxoSetChanged(String),
    #[error("balance drifted since preview: {0}")]
    BalanceDrifted(String),
    #[error("gas price spiked since preview: current {current} exceeds 2x preview {preview}")]
    GasPriceSpiked { preview: u128, current: u128 },
    #[error("address {0} has insufficient balance to cover gas")]
    NoGas(String),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Pool(#[from] crate::providers::pool::PoolError),
    #[error("provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),
    #[error(transparent)]
    Key(#[from] crate::keys::KeyError),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Try-lock keyed on chain. Taking the lock never blocks: a chain already
/// mid-sweep refuses the caller immediately with [`TxEngineError::SweepBusy`].
#[derive(Default)]
pub struct SweepLocks {
    busy: Mutex<HashSet<Chain>>,
}

/// RAII guard releasing the chain's lock on drop, including on the early
/// return of a failed sweep.
pub struct SweepGuard<'a> {
    locks: &'a SweepLocks,
    chain: Chain,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.locks.busy.lock().expect("sweep lock mutex poisoned").remove(&self.chain);
    }
}

impl SweepLocks {
    pub fn new() -> Self {
        SweepLocks::default()
    }

    pub fn try_acquire(&self, chain: Chain) -> Result<SweepGuard<'_>, TxEngineError> {
        let mut busy = self.busy.lock().expect("sweep lock mutex poisoned");
        if !busy.insert(chain) {
            return Err(TxEngineError::SweepBusy(chain));
        }
        Ok(SweepGuard { locks: self, chain })
    }
}

pub fn new_sweep_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_tx_state_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_concurrent_sweep_on_same_chain_is_refused() {
        let locks = SweepLocks::new();
        let _first = locks.try_acquire(Chain::Btc).unwrap();
        let err = locks.try_acquire(Chain::Btc).unwrap_err();
        assert!(matches!(err, TxEngineError::SweepBusy(Chain::Btc)));
    }

    #[test]
    fn different_chains_do_not_contend() {
        let locks = SweepLocks::new();
        let _btc = locks.try_acquire(Chain::Btc).unwrap();
        assert!(locks.try_acquire(Chain::Bsc).is_ok());
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let locks = SweepLocks::new();
        {
            let _guard = locks.try_acquire(Chain::Sol).unwrap();
        }
        assert!(locks.try_acquire(Chain::Sol).is_ok());
    }
}
