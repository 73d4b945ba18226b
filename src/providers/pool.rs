//! Provider pool: round-robin + failover across providers for one chain.
//!
//! One pool per chain. Round-robins a rotating cursor across providers,
//! skips providers whose circuit breaker is open, and on total failure
//! returns a joined error listing every provider's failure rather than
//! just the last one tried.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use log::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::models::{Chain, CircuitState, ProviderStatus, TokenSymbol};
use crate::store::{SqlitePool, provider_health};

use super::{AddressRef, BalanceResult, Provider, ProviderError};

const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 30;

struct PoolEntry {
    provider: Arc<dyn Provider>,
    provider_type: &'static str,
    breaker: CircuitBreaker,
}

pub struct ProviderPool {
    chain: Chain,
    entries: Vec<PoolEntry>,
    cursor: AtomicUsize,
    store: Option<SqlitePool>,
}

#[derive(Debug, thiserror::Error)]
#[error("all providers failed for {chain}: {}", join_errors(.errors))]
pub struct PoolError {
    pub chain: Chain,
    pub errors: Vec<(String, ProviderError)>,
}

impl PoolError {
    /// True if any constituent failure was itself retriable — a caller
    /// can reasonably back off and try the whole pool again later.
    pub fn is_retriable(&self) -> bool {
        self.errors.iter().any(|(_, e)| e.is_retriable())
    }
}

fn join_errors(errors: &[(String, ProviderError)]) -> String {
    errors.iter().map(|(name, e)| format!("{name}: {e}")).collect::<Vec<_>>().join("; ")
}

impl ProviderPool {
    pub fn new(chain: Chain, providers: Vec<Arc<dyn Provider>>) -> Self {
        let entries = providers
            .into_iter()
            .map(|provider| {
                let breaker = CircuitBreaker::new(provider.name().to_string(), Default::default());
                let provider_type = std::any::type_name_of_val(&*provider).rsplit("::").next().unwrap_or("provider");
                PoolEntry { provider, provider_type, breaker }
            })
            .collect();
        ProviderPool {
            chain,
            entries,
            cursor: AtomicUsize::new(0),
            store: None,
        }
    }

    /// Attaches the persistent store so breaker state changes are mirrored
    /// into `provider_health` as they happen.
    pub fn with_store(mut self, store: SqlitePool) -> Self {
        self.store = Some(store);
        self
    }

    fn mirror_health(&self, entry: &PoolEntry, error_msg: Option<&str>) {
        let Some(store) = &self.store else { return };
        let Ok(conn) = store.get() else { return };
        let now = Utc::now();
        let circuit_state = entry.breaker.state();
        let consecutive_fails = entry.breaker.consecutive_failures();
        let status = match circuit_state {
            CircuitState::Closed if consecutive_fails == 0 => ProviderStatus::Healthy,
            CircuitState::Closed => ProviderStatus::Degraded,
            CircuitState::HalfOpen => ProviderStatus::Degraded,
            CircuitState::Open => ProviderStatus::Down,
        };
        let (last_success, last_error) = if error_msg.is_some() { (None, Some(now)) } else { (Some(now), None) };
        if let Err(e) = provider_health::upsert(
            &conn,
            entry.provider.name(),
            self.chain,
            entry.provider_type,
            status,
            consecutive_fails as i64,
            last_success,
            last_error,
            error_msg,
            circuit_state,
        ) {
            warn!(provider = entry.provider.name(), error:% = e; "failed to mirror provider health");
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn max_batch_size(&self) -> usize {
        self.entries.iter().map(|e| e.provider.max_batch_size()).min().unwrap_or(1)
    }

    /// Exponential backoff `min(base * 2^(n-1), max)`, base=1s, max=30s.
    pub fn suggest_backoff(n: u32) -> Duration {
        if n == 0 {
            return Duration::from_secs(0);
        }
        let exp = n.saturating_sub(1).min(5);
        let secs = BACKOFF_BASE_SECS.saturating_mul(1u64 << exp).min(BACKOFF_MAX_SECS);
        Duration::from_secs(secs)
    }

    fn rotation_order(&self) -> Vec<usize> {
        let len = self.entries.len();
        if len == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(|i| (start + i) % len).collect()
    }

    pub async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, PoolError> {
        let mut errors = Vec::new();
        for idx in self.rotation_order() {
            let entry = &self.entries[idx];
            if entry.breaker.allow().is_err() {
                continue;
            }
            match entry.provider.fetch_native_balances(addresses).await {
                Ok(results) => {
                    entry.breaker.record_success();
                    self.mirror_health(entry, None);
                    return Ok(results);
                },
                Err(e) => {
                    entry.breaker.record_failure();
                    self.mirror_health(entry, Some(&e.to_string()));
                    errors.push((entry.provider.name().to_string(), e));
                },
            }
        }
        Err(PoolError { chain: self.chain, errors })
    }

    pub async fn fetch_token_balances(
        &self,
        addresses: &[AddressRef],
        token: TokenSymbol,
        contract_or_mint: &str,
    ) -> Result<Vec<BalanceResult>, PoolError> {
        let mut errors = Vec::new();
        for idx in self.rotation_order() {
            let entry = &self.entries[idx];
            if entry.breaker.allow().is_err() {
                continue;
            }
            match entry.provider.fetch_token_balances(addresses, token, contract_or_mint).await {
                Ok(results) => {
                    entry.breaker.record_success();
                    self.mirror_health(entry, None);
                    return Ok(results);
                },
                Err(ProviderError::TokensNotSupported) => {
                    // Not a failure of the provider; it simply never
                    // serves this chain's tokens. Don't trip the breaker.
                    errors.push((entry.provider.name().to_string(), ProviderError::TokensNotSupported));
                },
                Err(e) => {
                    entry.breaker.record_failure();
                    self.mirror_health(entry, Some(&e.to_string()));
                    errors.push((entry.provider.name().to_string(), e));
                },
            }
        }
        Err(PoolError { chain: self.chain, errors })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct FlakyProvider {
        name: &'static str,
        fails: std::sync::atomic::AtomicUsize,
        fail_until: usize,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn chain(&self) -> Chain {
            Chain::Btc
        }
        fn max_batch_size(&self) -> usize {
            1
        }
        async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
            let n = self.fails.fetch_add(1, Ordering::Relaxed);
            if n < self.fail_until {
                return Err(ProviderError::Unavailable("down".to_string()));
            }
            Ok(addresses.iter().map(|a| BalanceResult::ok(&a.address, a.index, "1", self.name)).collect())
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

    #[tokio::test]
    async fn fails_over_to_second_provider() {
        let p1: Arc<dyn Provider> = Arc::new(FlakyProvider {
            name: "p1",
            fails: std::sync::atomic::AtomicUsize::new(0),
            fail_until: usize::MAX,
        });
        let p2: Arc<dyn Provider> = Arc::new(FlakyProvider {
            name: "p2",
            fails: std::sync::atomic::AtomicUsize::new(0),
            fail_until: 0,
        });
        let pool = ProviderPool::new(Chain::Btc, vec![p1, p2]);
        let addrs = vec![AddressRef { address: "a".into(), index: 0 }];
        let result = pool.fetch_native_balances(&addrs).await.unwrap();
        assert_eq!(result[0].amount, "1");
    }

    #[tokio::test]
    async fn all_providers_failing_joins_errors() {
        let p1: Arc<dyn Provider> = Arc::new(FlakyProvider {
            name: "p1",
            fails: std::sync::atomic::AtomicUsize::new(0),
            fail_until: usize::MAX,
        });
        let pool = ProviderPool::new(Chain::Btc, vec![p1]);
        let addrs = vec![AddressRef { address: "a".into(), index: 0 }];
        let err = pool.fetch_native_balances(&addrs).await.unwrap_err();
        assert!(err.to_string().contains("p1"));
    }

    #[tokio::test]
    async fn failure_mirrors_provider_health_row() {
        let store = crate::store::open_in_memory_store().unwrap();
        let p1: Arc<dyn Provider> = Arc::new(FlakyProvider {
            name: "p1",
            fails: std::sync::atomic::AtomicUsize::new(0),
            fail_until: usize::MAX,
        });
        let pool = ProviderPool::new(Chain::Btc, vec![p1]).with_store(store.clone());
        let addrs = vec![AddressRef { address: "a".into(), index: 0 }];
        let _ = pool.fetch_native_balances(&addrs).await;

        let conn = store.get().unwrap();
        let row = provider_health::get(&conn, "p1").unwrap().unwrap();
        assert_eq!(row.consecutive_fails, 1);
        assert_eq!(row.circuit_state, CircuitState::Closed);
    }

    #[test]
    fn suggest_backoff_is_exponential_and_capped() {
        assert_eq!(ProviderPool::suggest_backoff(1), Duration::from_secs(1));
        assert_eq!(ProviderPool::suggest_backoff(2), Duration::from_secs(2));
        assert_eq!(ProviderPool::suggest_backoff(3), Duration::from_secs(4));
        assert_eq!(ProviderPool::suggest_backoff(10), Duration::from_secs(30));
    }
}
