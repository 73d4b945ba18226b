//! Solana JSON-RPC provider.
//!
//! `getMultipleAccounts` with base64 encoding reads lamports for native
//! balances; SPL token balances derive each wallet's Associated Token
//! Account and re-issue `getMultipleAccounts` with `jsonParsed` encoding.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::keys::sol_ata::derive_associated_token_address;
use crate::models::{Chain, TokenSymbol};

use super::http::ProviderHttpClient;
use super::{AddressRef, BalanceResult, Provider, ProviderError};

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResult {
    value: Vec<Option<RawAccount>>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    lamports: Option<u64>,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BlockhashResult {
    value: BlockhashValue,
}

#[derive(Debug, Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct SignatureStatusesResult {
    value: Vec<Option<SignatureStatus>>,
}

#[derive(Debug, Deserialize)]
pub struct SignatureStatus {
    pub err: Option<serde_json::Value>,
    #[serde(rename = "confirmationStatus")]
    pub confirmation_status: Option<String>,
}

pub struct SolRpcProvider {
    name: String,
    rpc_url: String,
    http: ProviderHttpClient,
}

impl SolRpcProvider {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(SolRpcProvider {
            name: name.into(),
            rpc_url: rpc_url.into(),
            http: ProviderHttpClient::new()?,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T, ProviderError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp: RpcResponse<T> = self.http.post_json(&self.rpc_url, &body).await?;
        if let Some(err) = resp.error {
            return Err(ProviderError::Unavailable(err.message));
        }
        resp.result.ok_or_else(|| ProviderError::Malformed("missing result field".to_string()))
    }

    pub async fn latest_blockhash(&self) -> Result<String, ProviderError> {
        let result: BlockhashResult = self.call("getLatestBlockhash", json!([{"commitment": "confirmed"}])).await?;
        Ok(result.value.blockhash)
    }

    pub async fn send_transaction(&self, signed_tx_base64: &str) -> Result<String, ProviderError> {
        self.call(
            "sendTransaction",
            json!([signed_tx_base64, {"encoding": "base64", "skipPreflight": false}]),
        )
        .await
    }

    pub async fn signature_statuses(&self, signatures: &[String]) -> Result<Vec<Option<SignatureStatus>>, ProviderError> {
        let result: SignatureStatusesResult = self
            .call("getSignatureStatuses", json!([signatures, {"searchTransactionHistory": true}]))
            .await?;
        Ok(result.value)
    }

    /// Whether an account exists at all (regardless of balance), used by
    /// the SOL sweep engine to decide whether an ATA needs creating.
    pub async fn account_exists(&self, address: &str) -> Result<bool, ProviderError> {
        let lamports = self.fetch_lamports(std::slice::from_ref(&address.to_string())).await?;
        Ok(matches!(lamports.first(), Some(Some(_))))
    }

    async fn fetch_lamports(&self, addresses: &[String]) -> Result<Vec<Option<u64>>, ProviderError> {
        let result: AccountsResult = self
            .call("getMultipleAccounts", json!([addresses, {"encoding": "base64", "commitment": "confirmed"}]))
            .await?;
        Ok(result
            .value
            .into_iter()
            .map(|maybe| maybe.and_then(|acc| acc.lamports))
            .collect())
    }

    async fn fetch_token_amounts(&self, atas: &[String]) -> Result<Vec<Option<String>>, ProviderError> {
        let result: AccountsResult = self
            .call(
                "getMultipleAccounts",
                json!([atas, {"encoding": "jsonParsed", "commitment": "confirmed"}]),
            )
            .await?;
        Ok(result
            .value
            .into_iter()
            .map(|maybe| {
                maybe.and_then(|acc| {
                    acc.data
                        .pointer("/parsed/info/tokenAmount/amount")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
            })
            .collect())
    }
}

#[async_trait]
impl Provider for SolRpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Chain {
        Chain::Sol
    }

    fn max_batch_size(&self) -> usize {
        100
    }

    async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let addr_strings: Vec<String> = addresses.iter().map(|a| a.address.clone()).collect();

        match self.fetch_lamports(&addr_strings).await {
            Ok(lamports) => {
                let mut results = Vec::with_capacity(addresses.len());
                for (i, addr) in addresses.iter().enumerate() {
                    match lamports.get(i) {
                        Some(Some(value)) => results.push(BalanceResult::ok(&addr.address, addr.index, value.to_string(), &self.name)),
                        Some(None) => results.push(BalanceResult::ok(&addr.address, addr.index, "0", &self.name)),
                        None => results.push(BalanceResult::annotated_zero(
                            &addr.address,
                            addr.index,
                            &self.name,
                            "missing trailing result from getMultipleAccounts",
                        )),
                    }
                }
                Ok(results)
            },
            Err(e) => Err(e),
        }
    }

    async fn fetch_token_balances(
        &self,
        addresses: &[AddressRef],
        _token: TokenSymbol,
        contract_or_mint: &str,
    ) -> Result<Vec<BalanceResult>, ProviderError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let mut atas = Vec::with_capacity(addresses.len());
        for addr in addresses {
            let ata = derive_associated_token_address(&addr.address, TOKEN_PROGRAM_ID, contract_or_mint)
                .map_err(ProviderError::Malformed)?;
            atas.push(ata);
        }

        let amounts = self.fetch_token_amounts(&atas).await?;
        let mut results = Vec::with_capacity(addresses.len());
        let mut all_failed = true;
        for (i, addr) in addresses.iter().enumerate() {
            match amounts.get(i) {
                Some(Some(amount)) => {
                    results.push(BalanceResult::ok(&addr.address, addr.index, amount.clone(), &self.name));
                    all_failed = false;
                },
                Some(None) => {
                    results.push(BalanceResult::ok(&addr.address, addr.index, "0", &self.name));
                    all_failed = false;
                },
                None => results.push(BalanceResult::annotated_zero(
                    &addr.address,
                    addr.index,
                    &self.name,
                    "missing trailing result from getMultipleAccounts",
                )),
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

    #[tokio::test]
    async fn native_balance_reads_lamports_via_wiremock() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "context": {"slot": 1},
                    "value": [
                        {"lamports": 5000000, "owner": "11111111111111111111111111111111", "data": ["", "base64"], "executable": false, "rentEpoch": 0},
                        null
                    ]
                }
            })))
            .mount(&server)
            .await;

        let provider = SolRpcProvider::new("helius", server.uri()).unwrap();
        let addrs = vec![
            AddressRef { address: "Addr1".into(), index: 0 },
            AddressRef { address: "Addr2".into(), index: 1 },
        ];
        let results = provider.fetch_native_balances(&addrs).await.unwrap();
        assert_eq!(results[0].amount, "5000000");
        assert_eq!(results[1].amount, "0");
        assert!(results[1].error.is_none());
    }

    #[tokio::test]
    async fn rpc_error_object_is_surfaced_as_unavailable() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32005, "message": "Node is behind"}
            })))
            .mount(&server)
            .await;

        let provider = SolRpcProvider::new("helius", server.uri()).unwrap();
        let addrs = vec![AddressRef { address: "Addr1".into(), index: 0 }];
        let err = provider.fetch_native_balances(&addrs).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
