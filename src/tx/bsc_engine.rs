//! BNB Smart Chain sweep engine.
//!
//! Native sweeps drain each funded address down to its gas reserve; token
//! sweeps move the full BEP-20 balance and require a pre-funded gas
//! reserve. Legacy (pre-EIP-1559) transactions are RLP-encoded by hand and
//! signed EIP-155, matching what a BscScan-era chain still accepts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use secp256k1::ecdsa::RecoverableSignature;
use secp256k1::{Message, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

use crate::config::Network;
use crate::events::{TxEvent, TxEventHub};
use crate::keys::KeyService;
use crate::models::{Chain, TokenSymbol, TxStatus};
use crate::providers::bsc_rpc::BscRpcProvider;
use crate::providers::tokens::contract_or_mint;
use crate::providers::{AddressRef, Provider};
use crate::store::{SqlitePool, addresses, balances, transactions, tx_state};

use super::{SweepLocks, TxEngineError, new_sweep_id, new_tx_state_id};

const NATIVE_GAS_LIMIT: u64 = 21_000;
const TOKEN_TRANSFER_GAS_LIMIT: u64 = 65_000;
/// No spec-mandated figure; kept under dust-for-BNB at roughly $0.60 so a
/// sweep never drains an address to the point it can't pay gas again.
const MIN_SWEEP_WEI: u128 = 1_000_000_000_000_000;
const GAS_PRESEED_AMOUNT_WEI: u128 = 5_000_000_000_000_000;
const GAS_PRICE_MARGIN_NUM: u128 = 12;
const GAS_PRICE_MARGIN_DEN: u128 = 10;
const GAS_SPIKE_MULTIPLIER: u128 = 2;
const TOKEN_BALANCE_DRIFT_PCT: f64 = 5.0;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const RECEIPT_POLL_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

pub struct BscNativeItem {
    pub address_index: i64,
    pub address: String,
    pub balance: u128,
}

pub struct BscNativePreview {
    pub items: Vec<BscNativeItem>,
    pub gas_price: u128,
    pub destination: String,
}

pub struct BscTokenItem {
    pub address_index: i64,
    pub address: String,
    pub amount: u128,
}

pub struct BscTokenPreview {
    pub items: Vec<BscTokenItem>,
    pub contract: String,
    pub gas_price: u128,
    pub destination: String,
}

pub struct BscEngine {
    store: SqlitePool,
    network: Network,
    chain_id: u64,
    key_service: Arc<KeyService>,
    rpc_endpoints: Vec<Arc<BscRpcProvider>>,
    event_hub: Arc<TxEventHub>,
    locks: Arc<SweepLocks>,
}

impl BscEngine {
    pub fn new(
        store: SqlitePool,
        network: Network,
        key_service: Arc<KeyService>,
        rpc_endpoints: Vec<Arc<BscRpcProvider>>,
        event_hub: Arc<TxEventHub>,
        locks: Arc<SweepLocks>,
    ) -> Self {
        let chain_id = match network {
            Network::Mainnet => 56,
            Network::Testnet => 97,
        };
        BscEngine {
            store,
            network,
            chain_id,
            key_service,
            rpc_endpoints,
            event_hub,
            locks,
        }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, TxEngineError> {
        self.store.get().map_err(|e| crate::store::StoreError::from(e).into())
    }

    async fn suggest_gas_price(&self) -> Result<u128, TxEngineError> {
        for rpc in &self.rpc_endpoints {
            match rpc.suggest_gas_price().await {
                Ok(p) => return Ok(p),
                Err(e) => warn!(provider = rpc.name(), error:% = e; "gas price query failed, trying next endpoint"),
            }
        }
        Err(TxEngineError::Broadcast("no BSC RPC endpoint answered eth_gasPrice".to_string()))
    }

    async fn get_nonce(&self, address: &str) -> Result<u64, TxEngineError> {
        for rpc in &self.rpc_endpoints {
            match rpc.get_transaction_count(address).await {
                Ok(n) => return Ok(n),
                Err(e) => warn!(provider = rpc.name(), address, error:% = e; "nonce query failed, trying next endpoint"),
            }
        }
        Err(TxEngineError::Broadcast(format!("no BSC RPC endpoint answered eth_getTransactionCount for {address}")))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, TxEngineError> {
        let mut last_err = None;
        for rpc in &self.rpc_endpoints {
            match rpc.send_raw_transaction(raw_hex).await {
                Ok(tx_hash) => return Ok(tx_hash),
                Err(e) => last_err = Some(e),
            }
        }
        Err(TxEngineError::Broadcast(last_err.map(|e| e.to_string()).unwrap_or_else(|| "no RPC endpoints configured".to_string())))
    }

    async fn fetch_native_balance(&self, rpc: &BscRpcProvider, address: &str, index: i64) -> Result<u128, TxEngineError> {
        let refs = [AddressRef { address: address.to_string(), index }];
        let results = rpc.fetch_native_balances(&refs).await?;
        let result = results.into_iter().next().ok_or_else(|| TxEngineError::Broadcast("empty balance response".to_string()))?;
        if let Some(err) = result.error {
            return Err(TxEngineError::Broadcast(err));
        }
        result.amount.parse::<u128>().map_err(|e| TxEngineError::Broadcast(e.to_string()))
    }

    async fn fetch_token_balance(&self, rpc: &BscRpcProvider, address: &str, index: i64, contract: &str) -> Result<u128, TxEngineError> {
        let refs = [AddressRef { address: address.to_string(), index }];
        let results = rpc.fetch_token_balances(&refs, TokenSymbol::Usdc, contract).await?;
        let result = results.into_iter().next().ok_or_else(|| TxEngineError::Broadcast("empty balance response".to_string()))?;
        if let Some(err) = result.error {
            return Err(TxEngineError::Broadcast(err));
        }
        result.amount.parse::<u128>().map_err(|e| TxEngineError::Broadcast(e.to_string()))
    }

    pub async fn preview_native(&self, destination: &str) -> Result<BscNativePreview, TxEngineError> {
        validate_bsc_address(destination)?;
        let gas_price = (self.suggest_gas_price().await? * GAS_PRICE_MARGIN_NUM) / GAS_PRICE_MARGIN_DEN;
        let gas_cost = NATIVE_GAS_LIMIT as u128 * gas_price;

        let funded = {
            let conn = self.conn()?;
            balances::list_funded_native(&conn, Chain::Bsc, self.network)?
        };
        if funded.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no BSC RPC endpoints configured".to_string()))?;
        let mut items = Vec::new();
        for row in funded {
            let address = {
                let conn = self.conn()?;
                addresses::get_by_index(&conn, Chain::Bsc, self.network, row.index)?
                    .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {}", row.index)))?
            };
            let balance = self.fetch_native_balance(primary, &address.address, row.index).await?;
            if balance < gas_cost + MIN_SWEEP_WEI {
                continue;
            }
            items.push(BscNativeItem {
                address_index: row.index,
                address: address.address,
                balance,
            });
        }
        if items.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        Ok(BscNativePreview {
            items,
            gas_price,
            destination: destination.to_string(),
        })
    }

    pub async fn execute_native(self: &Arc<Self>, preview: &BscNativePreview) -> Result<String, TxEngineError> {
        let _guard = self.locks.try_acquire(Chain::Bsc)?;

        let current_gas_price = self.suggest_gas_price().await?;
        if current_gas_price > preview.gas_price * GAS_SPIKE_MULTIPLIER {
            return Err(TxEngineError::GasPriceSpiked {
                preview: preview.gas_price,
                current: current_gas_price,
            });
        }

        let sweep_id = new_sweep_id();
        for item in &preview.items {
            let gas_cost = NATIVE_GAS_LIMIT as u128 * preview.gas_price;
            let value = item.balance.saturating_sub(gas_cost);
            if value == 0 {
                continue;
            }
            let nonce = self.get_nonce(&item.address).await?;
            let derived = self.key_service.get_private_key(Chain::Bsc, item.address_index as u32)?;

            let raw_hex = sign_legacy_transaction(
                &derived.secret_bytes,
                nonce,
                preview.gas_price,
                NATIVE_GAS_LIMIT,
                Some(&preview.destination),
                value,
                &[],
                self.chain_id,
            )?;
            let tx_hash = self.broadcast(&raw_hex).await?;

            let id = new_tx_state_id();
            let conn = self.conn()?;
            tx_state::insert(
                &conn,
                &id,
                &sweep_id,
                Chain::Bsc,
                TokenSymbol::Native,
                item.address_index,
                &item.address,
                &preview.destination,
                &value.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&tx_hash), None)?;
            transactions::insert_outbound(
                &conn,
                &id,
                Chain::Bsc,
                self.network.as_str(),
                item.address_index,
                TokenSymbol::Native,
                &value.to_string(),
                &item.address,
                &preview.destination,
            )?;
            transactions::set_tx_hash(&conn, &id, &tx_hash)?;
            drop(conn);

            info!(sweep_id, tx_hash, address = item.address; "BSC native sweep leg broadcast");
            self.spawn_receipt_poller(id, sweep_id.clone(), tx_hash);
        }

        Ok(sweep_id)
    }

    pub async fn preview_token(&self, token: TokenSymbol, destination: &str) -> Result<BscTokenPreview, TxEngineError> {
        validate_bsc_address(destination)?;
        let contract = contract_or_mint(Chain::Bsc, self.network, token)
            .ok_or_else(|| TxEngineError::InvalidDestination(format!("no contract configured for {token} on BSC")))?
            .to_string();
        let gas_price = (self.suggest_gas_price().await? * GAS_PRICE_MARGIN_NUM) / GAS_PRICE_MARGIN_DEN;

        let funded = {
            let conn = self.conn()?;
            balances::list_funded_native(&conn, Chain::Bsc, self.network)?
        };

        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no BSC RPC endpoints configured".to_string()))?;
        let gas_cost = TOKEN_TRANSFER_GAS_LIMIT as u128 * gas_price;
        let mut items = Vec::new();
        for row in funded {
            let address = {
                let conn = self.conn()?;
                addresses::get_by_index(&conn, Chain::Bsc, self.network, row.index)?
                    .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {}", row.index)))?
            };
            let token_amount = self.fetch_token_balance(primary, &address.address, row.index, &contract).await?;
            if token_amount == 0 {
                continue;
            }
            let native_balance = self.fetch_native_balance(primary, &address.address, row.index).await?;
            if native_balance < gas_cost {
                warn!(address = address.address; "skipping token sweep leg: no gas");
                continue;
            }
            items.push(BscTokenItem {
                address_index: row.index,
                address: address.address,
                amount: token_amount,
            });
        }
        if items.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        Ok(BscTokenPreview {
            items,
            contract,
            gas_price,
            destination: destination.to_string(),
        })
    }

    pub async fn execute_token(self: &Arc<Self>, preview: &BscTokenPreview, token: TokenSymbol) -> Result<String, TxEngineError> {
        let _guard = self.locks.try_acquire(Chain::Bsc)?;
        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no BSC RPC endpoints configured".to_string()))?;

        let sweep_id = new_sweep_id();
        for item in &preview.items {
            let current_amount = self.fetch_token_balance(primary, &item.address, item.address_index, &preview.contract).await?;
            let drop_pct = if item.amount == 0 {
                0.0
            } else {
                100.0 * (item.amount.saturating_sub(current_amount)) as f64 / item.amount as f64
            };
            if drop_pct > TOKEN_BALANCE_DRIFT_PCT {
                warn!(address = item.address; "skipping token sweep leg: balance drifted since preview");
                continue;
            }

            let gas_cost = TOKEN_TRANSFER_GAS_LIMIT as u128 * preview.gas_price;
            let native_balance = self.fetch_native_balance(primary, &item.address, item.address_index).await?;
            if native_balance < gas_cost {
                return Err(TxEngineError::NoGas(item.address.clone()));
            }

            let nonce = self.get_nonce(&item.address).await?;
            let derived = self.key_service.get_private_key(Chain::Bsc, item.address_index as u32)?;
            let calldata = transfer_call_data(&preview.destination, current_amount)?;

            let raw_hex = sign_legacy_transaction(
                &derived.secret_bytes,
                nonce,
                preview.gas_price,
                TOKEN_TRANSFER_GAS_LIMIT,
                Some(&preview.contract),
                0,
                &calldata,
                self.chain_id,
            )?;
            let tx_hash = self.broadcast(&raw_hex).await?;

            let id = new_tx_state_id();
            let conn = self.conn()?;
            tx_state::insert(
                &conn,
                &id,
                &sweep_id,
                Chain::Bsc,
                token,
                item.address_index,
                &item.address,
                &preview.destination,
                &current_amount.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&tx_hash), None)?;
            transactions::insert_outbound(
                &conn,
                &id,
                Chain::Bsc,
                self.network.as_str(),
                item.address_index,
                token,
                &current_amount.to_string(),
                &item.address,
                &preview.destination,
            )?;
            transactions::set_tx_hash(&conn, &id, &tx_hash)?;
            drop(conn);

            self.spawn_receipt_poller(id, sweep_id.clone(), tx_hash);
        }

        Ok(sweep_id)
    }

    /// Sends a fixed native amount from `holder_index` to each address in
    /// `targets` that needs gas for a subsequent token sweep. Idempotent per
    /// `(sweep_id, to_address)`.
    pub async fn gas_preseed(&self, holder_index: i64, sweep_id: &str, targets: &[String]) -> Result<Vec<String>, TxEngineError> {
        let holder_address = {
            let conn = self.conn()?;
            addresses::get_by_index(&conn, Chain::Bsc, self.network, holder_index)?
                .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {holder_index}")))?
        };
        let gas_price = (self.suggest_gas_price().await? * GAS_PRICE_MARGIN_NUM) / GAS_PRICE_MARGIN_DEN;
        let derived = self.key_service.get_private_key(Chain::Bsc, holder_index as u32)?;

        let mut tx_hashes = Vec::new();
        for target in targets {
            {
                let conn = self.conn()?;
                if tx_state::gas_preseed_already_confirmed(&conn, sweep_id, target)? {
                    continue;
                }
            }

            let mut nonce = self.get_nonce(&holder_address.address).await?;
            let mut attempt = 0;
            let tx_hash = loop {
                let raw_hex = sign_legacy_transaction(
                    &derived.secret_bytes,
                    nonce,
                    gas_price,
                    NATIVE_GAS_LIMIT,
                    Some(target),
                    GAS_PRESEED_AMOUNT_WEI,
                    &[],
                    self.chain_id,
                )?;
                match self.broadcast(&raw_hex).await {
                    Ok(hash) => break hash,
                    Err(e) if attempt == 0 && e.to_string().contains("nonce too low") => {
                        attempt += 1;
                        nonce = self.get_nonce(&holder_address.address).await?;
                        continue;
                    },
                    Err(e) => return Err(e),
                }
            };

            let id = new_tx_state_id();
            let conn = self.conn()?;
            tx_state::insert(
                &conn,
                &id,
                sweep_id,
                Chain::Bsc,
                TokenSymbol::Native,
                holder_index,
                &holder_address.address,
                target,
                &GAS_PRESEED_AMOUNT_WEI.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&tx_hash), None)?;
            tx_hashes.push(tx_hash);
        }
        Ok(tx_hashes)
    }

    fn spawn_receipt_poller(self: &Arc<Self>, tx_state_id: String, sweep_id: String, tx_hash: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + RECEIPT_POLL_TIMEOUT;
            loop {
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                let Some(rpc) = this.rpc_endpoints.first() else { break };
                match rpc.get_transaction_receipt(&tx_hash).await {
                    Ok(Some(receipt)) => {
                        let status = receipt.status.as_deref();
                        if status == Some("0x1") {
                            this.finish(&tx_state_id, &sweep_id, &tx_hash, TxStatus::Confirmed);
                            return;
                        } else if status == Some("0x0") {
                            this.finish(&tx_state_id, &sweep_id, &tx_hash, TxStatus::Failed);
                            this.event_hub.broadcast(TxEvent::SweepError {
                                sweep_id,
                                chain: Chain::Bsc,
                                reason: "transaction reverted".to_string(),
                            });
                            return;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => warn!(tx_hash, error:% = e; "BSC receipt poll failed, retrying"),
                }
                if Instant::now() >= deadline {
                    this.finish(&tx_state_id, &sweep_id, &tx_hash, TxStatus::Uncertain);
                    return;
                }
            }
        });
    }

    fn finish(&self, tx_state_id: &str, sweep_id: &str, tx_hash: &str, status: TxStatus) {
        let Ok(conn) = self.store.get() else { return };
        let _ = tx_state::transition(&conn, tx_state_id, status, None, None);
        let _ = transactions::mark_by_tx_hash(&conn, Chain::Bsc, tx_hash, &status.to_string());
        if status == TxStatus::Confirmed {
            self.event_hub.broadcast(TxEvent::SweepComplete {
                sweep_id: sweep_id.to_string(),
                chain: Chain::Bsc,
            });
        }
    }
}

/// Accepts all-lowercase or all-uppercase hex bodies unconditionally; a
/// mixed-case body must match its EIP-55 checksum.
fn validate_bsc_address(address: &str) -> Result<(), TxEngineError> {
    let body = address.strip_prefix("0x").ok_or_else(|| TxEngineError::InvalidDestination(address.to_string()))?;
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TxEngineError::InvalidDestination(address.to_string()));
    }
    let is_mixed_case = body.chars().any(|c| c.is_ascii_uppercase()) && body.chars().any(|c| c.is_ascii_lowercase());
    if is_mixed_case {
        let raw = hex::decode(body.to_ascii_lowercase()).map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?;
        let checksummed = crate::keys::apply_eip55_checksum(&raw);
        if checksummed != format!("0x{body}") {
            return Err(TxEngineError::InvalidDestination(format!("{address} fails EIP-55 checksum")));
        }
    }
    Ok(())
}

fn pad32_address(address: &str) -> Result<[u8; 32], TxEngineError> {
    let body = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(body).map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?;
    if bytes.len() != 20 {
        return Err(TxEngineError::InvalidDestination(format!("{address} is not a 20-byte address")));
    }
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(&bytes);
    Ok(out)
}

fn pad32_uint(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn transfer_call_data(destination: &str, amount: u128) -> Result<Vec<u8>, TxEngineError> {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&pad32_address(destination)?);
    data.extend_from_slice(&pad32_uint(amount));
    Ok(data)
}

/// RLP-encodes and EIP-155-signs a legacy transaction, returning the
/// `0x`-prefixed raw hex ready to broadcast.
#[allow(clippy::too_many_arguments)]
fn sign_legacy_transaction(
    secret_bytes: &[u8; 32],
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Option<&str>,
    value: u128,
    data: &[u8],
    chain_id: u64,
) -> Result<String, TxEngineError> {
    let to_bytes = match to {
        Some(addr) => {
            let body = addr.strip_prefix("0x").unwrap_or(addr);
            hex::decode(body).map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?
        },
        None => Vec::new(),
    };

    let unsigned = rlp_list(&[
        rlp_uint(nonce as u128),
        rlp_uint(gas_price),
        rlp_uint(gas_limit as u128),
        rlp_bytes(&to_bytes),
        rlp_uint(value),
        rlp_bytes(data),
        rlp_uint(chain_id as u128),
        rlp_bytes(&[]),
        rlp_bytes(&[]),
    ]);

    let mut hasher = Keccak256::new();
    hasher.update(&unsigned);
    let digest: [u8; 32] = hasher.finalize().into();

    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(secret_bytes).map_err(|e| TxEngineError::Signing(e.to_string()))?;
    let message = Message::from_digest(digest);
    let recoverable: RecoverableSignature = secp.sign_ecdsa_recoverable(&message, &secret_key);
    let (recovery_id, sig_bytes) = recoverable.serialize_compact();
    let r = &sig_bytes[..32];
    let s = &sig_bytes[32..];
    let v = chain_id * 2 + 35 + recovery_id.to_i32() as u64;

    let signed = rlp_list(&[
        rlp_uint(nonce as u128),
        rlp_uint(gas_price),
        rlp_uint(gas_limit as u128),
        rlp_bytes(&to_bytes),
        rlp_uint(value),
        rlp_bytes(data),
        rlp_uint(v as u128),
        rlp_bytes(r),
        rlp_bytes(s),
    ]);

    Ok(format!("0x{}", hex::encode(signed)))
}

fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }
    let mut out = rlp_length_prefix(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

fn rlp_uint(value: u128) -> Vec<u8> {
    let be = value.to_be_bytes();
    let trimmed = be.iter().skip_while(|b| **b == 0).cloned().collect::<Vec<u8>>();
    rlp_bytes(&trimmed)
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.concat();
    let mut out = rlp_length_prefix(payload.len(), 0xc0);
    out.extend(payload);
    out
}

fn rlp_length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_be = (len as u64).to_be_bytes();
        let len_bytes = len_be.iter().skip_while(|b| **b == 0).cloned().collect::<Vec<u8>>();
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend(len_bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlp_encodes_empty_string_as_single_byte() {
        assert_eq!(rlp_bytes(&[]), vec![0x80]);
    }

    #[test]
    fn rlp_uint_zero_is_empty_string() {
        assert_eq!(rlp_uint(0), vec![0x80]);
    }

    #[test]
    fn rlp_uint_small_value_is_itself_when_under_0x80() {
        assert_eq!(rlp_uint(5), vec![5]);
    }

    #[test]
    fn rlp_list_wraps_payload_with_c0_prefix() {
        let encoded = rlp_list(&[rlp_bytes(&[1, 2, 3])]);
        assert_eq!(encoded[0], 0xc0 + 4);
    }

    #[test]
    fn transfer_call_data_has_selector_and_two_32_byte_words() {
        let data = transfer_call_data("0x000102030405060708090a0b0c0d0e0f10111213", 1000).unwrap();
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[..4], &TRANSFER_SELECTOR);
    }

    #[test]
    fn bsc_address_validation_rejects_wrong_length() {
        assert!(validate_bsc_address("0x1234").is_err());
        assert!(validate_bsc_address("0x000102030405060708090a0b0c0d0e0f10111213").is_ok());
    }

    #[test]
    fn bsc_address_validation_enforces_eip55_checksum_on_mixed_case() {
        let lower = "0x000102030405060708090a0b0c0d0e0f10111213";
        let checksummed = crate::keys::apply_eip55_checksum(&hex::decode(&lower[2..]).unwrap());
        assert!(validate_bsc_address(&checksummed).is_ok());

        let mut corrupted: Vec<char> = checksummed.chars().collect();
        let flip_at = corrupted.iter().position(|c| c.is_ascii_alphabetic()).expect("has a hex letter");
        corrupted[flip_at] = if corrupted[flip_at].is_ascii_uppercase() {
            corrupted[flip_at].to_ascii_lowercase()
        } else {
            corrupted[flip_at].to_ascii_uppercase()
        };
        let corrupted: String = corrupted.into_iter().collect();
        assert!(validate_bsc_address(&corrupted).is_err());
    }

    #[test]
    fn legacy_tx_signing_round_trips_a_recoverable_signature() {
        let secret = [1u8; 32];
        let raw = sign_legacy_transaction(&secret, 0, 10_000_000_000, 21_000, Some("0x000102030405060708090a0b0c0d0e0f10111213"), 1, &[], 97).unwrap();
        assert!(raw.starts_with("0x"));
    }
}
