//! BSC JSON-RPC provider.
//!
//! `eth_getBalance` for native BNB; `eth_call` against
//! `balanceOf(address)` (selector `keccak256("balanceOf(address)")[:4]`)
//! for BEP-20 balances.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha3::{Digest, Keccak256};

use crate::models::{Chain, TokenSymbol};

use super::http::ProviderHttpClient;
use super::{AddressRef, BalanceResult, Provider, ProviderError};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

pub struct BscRpcProvider {
    name: String,
    rpc_url: String,
    http: ProviderHttpClient,
}

impl BscRpcProvider {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(BscRpcProvider {
            name: name.into(),
            rpc_url: rpc_url.into(),
            http: ProviderHttpClient::new()?,
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<String, ProviderError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp: RpcResponse = self.http.post_json(&self.rpc_url, &body).await?;
        if let Some(err) = resp.error {
            return Err(ProviderError::Unavailable(err.message));
        }
        resp.result.ok_or_else(|| ProviderError::Malformed("missing result field".to_string()))
    }

    pub async fn suggest_gas_price(&self) -> Result<u128, ProviderError> {
        let hex = self.call("eth_gasPrice", json!([])).await?;
        hex_to_u128(&hex).map_err(ProviderError::Malformed)
    }

    pub async fn get_transaction_count(&self, address: &str) -> Result<u64, ProviderError> {
        let hex = self.call("eth_getTransactionCount", json!([address, "pending"])).await?;
        hex_to_u128(&hex).map(|v| v as u64).map_err(ProviderError::Malformed)
    }

    pub async fn get_chain_id(&self) -> Result<u64, ProviderError> {
        let hex = self.call("eth_chainId", json!([])).await?;
        hex_to_u128(&hex).map(|v| v as u64).map_err(ProviderError::Malformed)
    }

    pub async fn send_raw_transaction(&self, raw: &str) -> Result<String, ProviderError> {
        self.call("eth_sendRawTransaction", json!([raw])).await
    }

    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ProviderError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_getTransactionReceipt", "params": [tx_hash]});
        let resp: serde_json::Value = self.http.post_json(&self.rpc_url, &body).await?;
        match resp.get("result") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| ProviderError::Malformed(e.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TxReceipt {
    pub status: Option<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

fn hex_to_u128(hex: &str) -> Result<u128, String> {
    let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
    u128::from_str_radix(trimmed, 16).map_err(|e| e.to_string())
}

/// `keccak256("balanceOf(address)")[:4] || pad32(address)`.
fn balance_of_call_data(address: &str) -> Result<String, ProviderError> {
    let addr = address.strip_prefix("0x").unwrap_or(address);
    let addr_bytes = hex::decode(addr).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if addr_bytes.len() != 20 {
        return Err(ProviderError::Malformed("address must be 20 bytes".to_string()));
    }

    let mut hasher = Keccak256::new();
    hasher.update(b"balanceOf(address)");
    let selector = &hasher.finalize()[..4];

    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(selector);
    data.extend(std::iter::repeat(0u8).take(12));
    data.extend_from_slice(&addr_bytes);

    Ok(format!("0x{}", hex::encode(data)))
}

#[async_trait]
impl Provider for BscRpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Chain {
        Chain::Bsc
    }

    fn max_batch_size(&self) -> usize {
        1
    }

    async fn fetch_native_balances(&self, addresses: &[AddressRef]) -> Result<Vec<BalanceResult>, ProviderError> {
        let mut results = Vec::with_capacity(addresses.len());
        let mut all_failed = true;

        for addr in addresses {
            match self.call("eth_getBalance", json!([addr.address, "latest"])).await {
                Ok(hex) => match hex_to_u128(&hex) {
                    Ok(wei) => {
                        results.push(BalanceResult::ok(&addr.address, addr.index, wei.to_string(), &self.name));
                        all_failed = false;
                    },
                    Err(e) => results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e)),
                },
                Err(e) => results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e.to_string())),
            }
        }

        if all_failed && !addresses.is_empty() {
            return Err(ProviderError::Unavailable(format!("all {} addresses failed on {}", addresses.len(), self.name)));
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
            let outcome: Result<String, ProviderError> = async {
                let data = balance_of_call_data(&addr.address)?;
                self.call("eth_call", json!([{"to": contract_or_mint, "data": data}, "latest"])).await
            }
            .await;

            match outcome {
                Ok(hex) => {
                    let raw = hex.strip_prefix("0x").unwrap_or(&hex);
                    if raw.len() < 64 {
                        results.push(BalanceResult::annotated_zero(
                            &addr.address,
                            addr.index,
                            &self.name,
                            "malformed eth_call response: shorter than 32 bytes",
                        ));
                        continue;
                    }
                    match hex_to_u128(raw) {
                        Ok(amount) => {
                            results.push(BalanceResult::ok(&addr.address, addr.index, amount.to_string(), &self.name));
                            all_failed = false;
                        },
                        Err(e) => results.push(BalanceResult::annotated_zero(&addr.address, addr.index, &self.name, e)),
                    }
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
    fn hex_parses_u128() {
        assert_eq!(hex_to_u128("0x64").unwrap(), 100);
    }

    #[test]
    fn balance_of_selector_is_four_bytes_plus_padded_address() {
        let data = balance_of_call_data("0x000102030405060708090a0b0c0d0e0f10111213").unwrap();
        // 0x + 8 hex chars selector + 64 hex chars padded address = 2 + 8 + 64
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x"));
    }

    #[test]
    fn balance_of_rejects_short_address() {
        assert!(balance_of_call_data("0x1234").is_err());
    }
}
