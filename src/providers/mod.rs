//! Provider contract and concrete chain providers.
//!
//! A provider exposes a uniform balance-fetch capability over one
//! blockchain API. Providers never early-return on a single address's
//! failure — they annotate that result and keep going, only returning an
//! error when every address in the batch failed.

pub mod bsc_rest;
pub mod bsc_rpc;
pub mod btc_esplora;
pub mod http;
pub mod pool;
pub mod sol_rpc;
pub mod tokens;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Chain, TokenSymbol};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent application-level rate-limit signal.
    /// Carries the `Retry-After` duration (zero if absent/unparseable).
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// Non-2xx >= 400, network error, or connect/timeout failure.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A malformed or unparseable response body. Not retriable by
    /// failover — the provider is misbehaving, not merely unreachable.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// This provider never supports the requested capability (e.g. BTC
    /// providers asked for a token balance).
    #[error("tokens not supported by this provider")]
    TokensNotSupported,

    /// The calling context was cancelled while waiting on this provider.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// True for errors a pool should fail over on rather than surface
    /// immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Unavailable(_))
    }
}

/// Outcome of fetching one address's balance within a batch. A provider
/// must produce exactly one of these per requested address, and at most
/// one of `{amount non-zero truthfully, error present}` is "truthful":
/// a zero amount accompanied by an error is an annotated placeholder,
/// not a claim that the balance is actually zero.
#[derive(Debug, Clone)]
pub struct BalanceResult {
    pub address: String,
    pub address_index: i64,
    pub amount: String,
    pub source_name: String,
    pub error: Option<String>,
}

impl BalanceResult {
    pub fn ok(address: impl Into<String>, address_index: i64, amount: impl Into<String>, source: &str) -> Self {
        BalanceResult {
            address: address.into(),
            address_index,
            amount: amount.into(),
            source_name: source.to_string(),
            error: None,
        }
    }

    pub fn annotated_zero(address: impl Into<String>, address_index: i64, source: &str, error: impl Into<String>) -> Self {
        BalanceResult {
            address: address.into(),
            address_index,
            amount: "0".to_string(),
            source_name: source.to_string(),
            error: Some(error.into()),
        }
    }
}

/// One address being queried, carrying both its on-chain string and its
/// dense derivation index (providers return results keyed by index so the
/// caller can reconcile against its own address list without re-matching
/// strings).
#[derive(Debug, Clone)]
pub struct AddressRef {
    pub address: String,
    pub index: i64,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn chain(&self) -> Chain;
    fn max_batch_size(&self) -> usize;

    async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError>;

    /// `contract_or_mint` is the BEP-20 contract address or SPL mint,
    /// ignored by BTC providers which always fail with `TokensNotSupported`.
    async fn fetch_token_balances(
        &self,
        addresses: &[AddressRef],
        token: TokenSymbol,
        contract_or_mint: &str,
    ) -> Result<Vec<BalanceResult>, ProviderError>;
}

/// Parses a `Retry-After` header value: seconds integer or an HTTP-date;
/// negative or unparseable collapses to zero rather than erroring.
pub fn parse_retry_after(raw: &str) -> Duration {
    if let Ok(secs) = raw.trim().parse::<i64>() {
        return Duration::from_secs(secs.max(0) as u64);
    }
    if let Ok(when) = httpdate::parse_http_date(raw.trim()) {
        if let Ok(remaining) = when.duration_since(std::time::SystemTime::now()) {
            return remaining;
        }
    }
    Duration::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_negative_collapses_to_zero() {
        assert_eq!(parse_retry_after("-5"), Duration::ZERO);
    }

    #[test]
    fn retry_after_garbage_collapses_to_zero() {
        assert_eq!(parse_retry_after("not-a-date"), Duration::ZERO);
    }

    #[test]
    fn balance_result_annotated_zero_carries_error() {
        let r = BalanceResult::annotated_zero("addr", 3, "bscscan", "address not returned by provider");
        assert_eq!(r.amount, "0");
        assert!(r.error.is_some());
    }
}
