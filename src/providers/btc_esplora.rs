//! BTC Esplora-compatible provider (Blockstream, Mempool.space).
//!
//! One GET `/address/{a}` per address; balance is confirmed
//! (`funded - spent`) plus mempool (`funded - spent`). Batch size 1.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{Chain, TokenSymbol};

use super::http::ProviderHttpClient;
use super::{AddressRef, BalanceResult, Provider, ProviderError};

#[derive(Debug, Deserialize)]
struct Stats {
    funded_txo_sum: i64,
    spent_txo_sum: i64,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    chain_stats: Stats,
    mempool_stats: Stats,
}

#[derive(Debug, Deserialize)]
pub struct FeeRecommendation {
    #[serde(rename = "fastestFee")]
    pub fastest_fee: u64,
    #[serde(rename = "halfHourFee")]
    pub half_hour_fee: u64,
    #[serde(rename = "hourFee")]
    pub hour_fee: u64,
}

pub struct EsploraProvider {
    name: String,
    base_url: String,
    http: ProviderHttpClient,
}

impl EsploraProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(EsploraProvider {
            name: name.into(),
            base_url: base_url.into(),
            http: ProviderHttpClient::new()?,
        })
    }

    pub async fn fee_recommendation(&self) -> Result<FeeRecommendation, ProviderError> {
        let url = format!("{}/v1/fees/recommended", self.base_url);
        self.http.get_json(&url).await
    }

    /// Confirmed UTXOs for one address, used by the BTC sweep engine.
    pub async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let raw: Vec<RawUtxo> = self.http.get_json(&url).await?;
        Ok(raw
            .into_iter()
            .filter(|u| u.status.confirmed)
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
            })
            .collect())
    }

    pub async fn broadcast(&self, raw_tx_hex: String) -> Result<String, ProviderError> {
        let url = format!("{}/tx", self.base_url);
        self.http.post_text(&url, raw_tx_hex).await
    }

    pub async fn tx_status(&self, txid: &str) -> Result<TxStatusResponse, ProviderError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        self.http.get_json(&url).await
    }
}

#[derive(Debug, Clone)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
struct RawUtxo {
    txid: String,
    vout: u32,
    value: i64,
    status: RawUtxoStatus,
}

#[derive(Debug, Deserialize)]
struct RawUtxoStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct TxStatusResponse {
    pub confirmed: bool,
}

#[async_trait]
impl Provider for EsploraProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Chain {
        Chain::Btc
    }

    fn max_batch_size(&self) -> usize {
        1
    }

    async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
        let mut results = Vec::with_capacity(addresses.len());
        let mut all_failed = true;

        for addr in addresses {
            let url = format!("{}/address/{}", self.base_url, addr.address);
            match self.http.get_json::<AddressResponse>(&url).await {
                Ok(resp) => {
                    let confirmed = resp.chain_stats.funded_txo_sum - resp.chain_stats.spent_txo_sum;
                    let mempool = resp.mempool_stats.funded_txo_sum - resp.mempool_stats.spent_txo_sum;
                    let total = (confirmed + mempool).max(0);
                    results.push(BalanceResult::ok(&addr.address, addr.index, total.to_string(), &self.name));
                    all_failed = false;
                },
                Err(e) => {
                    results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e.to_string()));
                },
            }
        }

        if all_failed && !addresses.is_empty() {
            return Err(ProviderError::Unavailable(format!("all {} addresses failed on {}", addresses.len(), self.name)));
        }
        Ok(results)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn esplora_balance_parses_confirmed_plus_mempool() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/address/bc1qexample"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "chain_stats": {"funded_txo_sum": 100000, "spent_txo_sum": 50000},
                "mempool_stats": {"funded_txo_sum": 10000, "spent_txo_sum": 0}
            })))
            .mount(&server)
            .await;

        let provider = EsploraProvider::new("blockstream", server.uri()).unwrap();
        let addrs = vec![AddressRef {
            address: "bc1qexample".to_string(),
            index: 0,
        }];
        let results = provider.fetch_native_balances(&addrs).await.unwrap();
        assert_eq!(results[0].amount, "60000");
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn esplora_token_balances_unsupported() {
        let provider = EsploraProvider::new("blockstream", "http://localhost").unwrap();
        let err = provider
            .fetch_token_balances(&[], TokenSymbol::Usdc, "n/a")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TokensNotSupported));
    }

    #[tokio::test]
    async fn rate_limit_is_classified_as_retriable() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let provider = EsploraProvider::new("blockstream", server.uri()).unwrap();
        let addrs = vec![AddressRef {
            address: "bc1qexample".to_string(),
            index: 0,
        }];
        let err = provider.fetch_native_balances(&addrs).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
