//! BSC REST provider (BscScan).
//!
//! `balancemulti` batches up to 20 addresses for native BNB; BEP-20
//! balances go through `tokenbalance`, one address per call (BscScan has
//! no multi-address token endpoint).

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Network;
use crate::models::{Chain, TokenSymbol};

use super::http::ProviderHttpClient;
use super::{AddressRef, BalanceResult, Provider, ProviderError};

const V1_MAINNET_HOST: &str = "https://api.bscscan.com/api";
const V1_TESTNET_HOST: &str = "https://api-testnet.bscscan.com/api";
const V2_HOST: &str = "https://api.etherscan.io/v2/api";

pub struct BscScanProvider {
    name: String,
    network: Network,
    api_key: Option<String>,
    http: ProviderHttpClient,
    #[cfg(test)]
    base_url_override: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanResponse<T> {
    status: String,
    message: String,
    result: T,
}

#[derive(Debug, Deserialize)]
struct BalanceMultiEntry {
    account: String,
    balance: String,
}

impl BscScanProvider {
    pub fn new(name: impl Into<String>, network: Network, api_key: Option<String>) -> Result<Self, anyhow::Error> {
        Ok(BscScanProvider {
            name: name.into(),
            network,
            api_key,
            http: ProviderHttpClient::new()?,
            #[cfg(test)]
            base_url_override: None,
        })
    }

    #[cfg(test)]
    pub fn with_base_url_override(mut self, url: impl Into<String>) -> Self {
        self.base_url_override = Some(url.into());
        self
    }

    /// V2 requires a non-empty API key and a `chainid` parameter; absent a
    /// key, fall back to the V1 per-network host.
    fn base_url_and_chain_param(&self) -> (String, Option<&'static str>) {
        #[cfg(test)]
        if let Some(url) = &self.base_url_override {
            return (url.clone(), self.api_key.as_ref().map(|_| "56"));
        }
        match (&self.api_key, self.network) {
            (Some(_), Network::Mainnet) => (V2_HOST.to_string(), Some("56")),
            (Some(_), Network::Testnet) => (V2_HOST.to_string(), Some("97")),
            (None, Network::Mainnet) => (V1_MAINNET_HOST.to_string(), None),
            (None, Network::Testnet) => (V1_TESTNET_HOST.to_string(), None),
        }
    }

    fn build_url(&self, module: &str, action: &str, extra: &[(&str, &str)]) -> String {
        let (base, chain_param) = self.base_url_and_chain_param();
        let mut url = format!("{}?module={}&action={}", base, module, action);
        if let Some(chainid) = chain_param {
            url.push_str(&format!("&chainid={}", chainid));
        }
        for (k, v) in extra {
            url.push_str(&format!("&{}={}", k, v));
        }
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }
        url
    }

    /// BscScan signals rate limiting through `status: "0"` with a message
    /// containing "rate limit" rather than an HTTP 429.
    fn classify_status(status: &str, message: &str) -> Result<(), ProviderError> {
        if status == "0" {
            if message.to_lowercase().contains("rate limit") {
                return Err(ProviderError::RateLimited(std::time::Duration::from_secs(1)));
            }
            return Err(ProviderError::Unavailable(message.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for BscScanProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Chain {
        Chain::Bsc
    }

    fn max_batch_size(&self) -> usize {
        20
    }

    async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let joined = addresses.iter().map(|a| a.address.as_str()).collect::<Vec<_>>().join(",");
        let url = self.build_url("account", "balancemulti", &[("address", &joined), ("tag", "latest")]);

        let resp: ScanResponse<Vec<BalanceMultiEntry>> =
            self.http.get_json(&url).await.map_err(|e| match e {
                ProviderError::Malformed(m) => ProviderError::Malformed(m),
                other => other,
            })?;
        Self::classify_status(&resp.status, &resp.message)?;

        let mut by_address = std::collections::HashMap::new();
        for entry in resp.result {
            by_address.insert(entry.account.to_lowercase(), entry.balance);
        }

        let mut results = Vec::with_capacity(addresses.len());
        for addr in addresses {
            match by_address.get(&addr.address.to_lowercase()) {
                Some(balance) => results.push(BalanceResult::ok(&addr.address, addr.index, balance.clone(), &self.name)),
                None => results.push(BalanceResult::annotated_zero(
                    &addr.address,
                    addr.index,
                    &self.name,
                    "address not returned by provider",
                )),
            }
        }
        Ok(results)
    }

    async fn fetch_token_balances(
        &self,
        addresses: &[AddressRef],
        _token: TokenSymbol,
        contract_or_mint: &str,
    ) -> Result<Vec<BalanceResult>, ProviderError> {
        let mut results = Vec::with_capacity(addresses.len());
        let mut all_failed = true;

        for addr in addresses {
            let url = self.build_url(
                "account",
                "tokenbalance",
                &[("contractaddress", contract_or_mint), ("address", &addr.address), ("tag", "latest")],
            );
            match self.http.get_json::<ScanResponse<String>>(&url).await {
                Ok(resp) => match Self::classify_status(&resp.status, &resp.message) {
                    Ok(()) => {
                        results.push(BalanceResult::ok(&addr.address, addr.index, resp.result, &self.name));
                        all_failed = false;
                    },
                    Err(e) => results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e.to_string())),
                },
                Err(e) => results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e.to_string())),
            }
        }

        if all_failed && !addresses.is_empty() {
            return Err(ProviderError::Unavailable(format!("all {} addresses failed on {}", addresses.len(), self.name)));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_url_requires_key_and_adds_chainid() {
        let provider = BscScanProvider::new("bscscan", Network::Mainnet, Some("KEY".into())).unwrap();
        let (base, chain) = provider.base_url_and_chain_param();
        assert_eq!(base, V2_HOST);
        assert_eq!(chain, Some("56"));
    }

    #[test]
    fn v1_url_used_without_key() {
        let provider = BscScanProvider::new("bscscan", Network::Testnet, None).unwrap();
        let (base, chain) = provider.base_url_and_chain_param();
        assert_eq!(base, V1_TESTNET_HOST);
        assert_eq!(chain, None);
    }

    #[test]
    fn rate_limit_message_is_classified() {
        let err = BscScanProvider::classify_status("0", "Max rate limit reached").unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_address_in_batch_is_annotated() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1",
                "message": "OK",
                "result": [
                    {"account": "0xAAA", "balance": "1000"},
                    {"account": "0xBBB", "balance": "2000"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = BscScanProvider::new("bscscan", Network::Testnet, None)
            .unwrap()
            .with_base_url_override(server.uri());
        let addrs = vec![
            AddressRef { address: "0xAAA".into(), index: 0 },
            AddressRef { address: "0xBBB".into(), index: 1 },
            AddressRef { address: "0xCCC".into(), index: 2 },
        ];
        let results = provider.fetch_native_balances(&addrs).await.unwrap();
        assert_eq!(results[2].error.as_deref(), Some("address not returned by provider"));
        assert_eq!(results[2].amount, "0");
        assert_eq!(results[0].amount, "1000");
    }
}
