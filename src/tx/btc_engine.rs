//! Bitcoin sweep engine.
//!
//! Consolidates every funded address's confirmed UTXOs into a single
//! P2WPKH transaction paying one destination. Fee-rate recommendations
//! are cached for ~2 minutes; preview-to-execute divergence in the UTXO
//! set aborts the sweep rather than silently signing stale inputs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use log::{info, warn};

use crate::config::Network;
use crate::events::{TxEvent, TxEventHub};
use crate::keys::KeyService;
use crate::models::{Chain, TokenSymbol, TxStatus};
use crate::providers::btc_esplora::{EsploraProvider, FeeRecommendation, Utxo};
use crate::store::{SqlitePool, addresses, balances, transactions, tx_state};

use super::{SweepLocks, TxEngineError, new_sweep_id, new_tx_state_id};

const DUST_SATS: i128 = 546;
const MAX_INPUTS: usize = 500;
const FEE_CACHE_TTL: Duration = Duration::from_secs(120);
const SAFETY_MARGIN_PCT: f64 = 2.0;
const UTXO_COUNT_DRIFT_PCT: f64 = 5.0;
const UTXO_VALUE_DRIFT_PCT: f64 = 3.0;
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(15);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

struct SweepInput {
    address_index: i64,
    address: String,
    utxo: Utxo,
}

#[derive(Debug, Clone)]
pub struct BtcPreview {
    pub total_in: i128,
    pub fee_rate: u64,
    pub fee: i128,
    pub net_out: i128,
    pub input_count: usize,
    pub destination: String,
}

pub struct BtcEngine {
    store: SqlitePool,
    network: Network,
    key_service: Arc<KeyService>,
    providers: Vec<Arc<EsploraProvider>>,
    cursor: AtomicUsize,
    fee_cache: Mutex<Option<(Instant, FeeRecommendation)>>,
    event_hub: Arc<TxEventHub>,
    locks: Arc<SweepLocks>,
}

impl BtcEngine {
    pub fn new(
        store: SqlitePool,
        network: Network,
        key_service: Arc<KeyService>,
        providers: Vec<Arc<EsploraProvider>>,
        event_hub: Arc<TxEventHub>,
        locks: Arc<SweepLocks>,
    ) -> Self {
        BtcEngine {
            store,
            network,
            key_service,
            providers,
            cursor: AtomicUsize::new(0),
            fee_cache: Mutex::new(None),
            event_hub,
            locks,
        }
    }

    fn next_provider(&self) -> Option<&Arc<EsploraProvider>> {
        if self.providers.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.providers.len();
        self.providers.get(idx)
    }

    async fn fee_rate(&self) -> Result<u64, TxEngineError> {
        {
            let cache = self.fee_cache.lock().expect("fee cache mutex poisoned");
            if let Some((fetched_at, rec)) = cache.as_ref() {
                if fetched_at.elapsed() < FEE_CACHE_TTL {
                    return Ok(rec.half_hour_fee.max(1));
                }
            }
        }
        let provider = self.next_provider().ok_or_else(|| TxEngineError::Broadcast("no BTC providers configured".to_string()))?;
        let rec = provider.fee_recommendation().await?;
        let rate = rec.half_hour_fee.max(1);
        *self.fee_cache.lock().expect("fee cache mutex poisoned") = Some((Instant::now(), rec));
        Ok(rate)
    }

    async fn collect_inputs(&self) -> Result<Vec<SweepInput>, TxEngineError> {
        let funded = {
            let conn = self.store.get().map_err(crate::store::StoreError::from)?;
            balances::list_funded_native(&conn, Chain::Btc, self.network)?
        };
        if funded.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        let mut inputs = Vec::new();
        for balance in funded {
            let address = {
                let conn = self.store.get().map_err(crate::store::StoreError::from)?;
                addresses::get_by_index(&conn, Chain::Btc, self.network, balance.index)?
                    .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {}", balance.index)))?
            };
            let provider = self.next_provider().ok_or_else(|| TxEngineError::Broadcast("no BTC providers configured".to_string()))?;
            let utxos = provider.utxos(&address.address).await?;
            for utxo in utxos {
                inputs.push(SweepInput {
                    address_index: balance.index,
                    address: address.address.clone(),
                    utxo,
                });
            }
        }
        Ok(inputs)
    }

    /// Estimated vsize for `n_inputs` P2WPKH inputs and `n_outputs` P2WPKH
    /// outputs, with a flat safety margin applied on top.
    fn estimate_fee(n_inputs: usize, n_outputs: usize, fee_rate: u64) -> i128 {
        let base_vsize = 10.5 + 68.0 * n_inputs as f64 + 31.0 * n_outputs as f64;
        let padded = base_vsize * (1.0 + SAFETY_MARGIN_PCT / 100.0);
        (padded.ceil() as i128) * fee_rate as i128
    }

    pub async fn preview(&self, destination: &str) -> Result<BtcPreview, TxEngineError> {
        validate_btc_address(destination, self.network)?;

        let inputs = self.collect_inputs().await?;
        let total_in: i128 = inputs.iter().map(|i| i.utxo.value as i128).sum();
        let fee_rate = self.fee_rate().await?;
        let fee = Self::estimate_fee(inputs.len(), 1, fee_rate);
        let net_out = total_in - fee;

        if net_out < DUST_SATS {
            return Err(TxEngineError::BelowDust { net_out, dust: DUST_SATS });
        }
        if inputs.len() > MAX_INPUTS {
            return Err(TxEngineError::TooManyInputs { count: inputs.len(), max: MAX_INPUTS });
        }

        Ok(BtcPreview {
            total_in,
            fee_rate,
            fee,
            net_out,
            input_count: inputs.len(),
            destination: destination.to_string(),
        })
    }

    /// Re-fetches UTXOs, rejects on drift vs `preview`, then signs and
    /// broadcasts a single consolidation transaction. Returns the sweep id.
    pub async fn execute(self: &Arc<Self>, preview: &BtcPreview) -> Result<String, TxEngineError> {
        let _guard = self.locks.try_acquire(Chain::Btc)?;

        let inputs = self.collect_inputs().await?;
        let total_in: i128 = inputs.iter().map(|i| i.utxo.value as i128).sum();

        let count_drop_pct = if preview.input_count == 0 {
            0.0
        } else {
            100.0 * (preview.input_count.saturating_sub(inputs.len())) as f64 / preview.input_count as f64
        };
        let value_drop_pct = if preview.total_in == 0 {
            0.0
        } else {
            100.0 * (preview.total_in - total_in).max(0) as f64 / preview.total_in as f64
        };
        if count_drop_pct > UTXO_COUNT_DRIFT_PCT || value_drop_pct > UTXO_VALUE_DRIFT_PCT {
            return Err(TxEngineError::UtxoSetChanged(format!(
                "input count {} -> {} ({:.1}%), value {} -> {} ({:.1}%)",
                preview.input_count, inputs.len(), count_drop_pct, preview.total_in, total_in, value_drop_pct
            )));
        }

        let fee = Self::estimate_fee(inputs.len(), 1, preview.fee_rate);
        let net_out = (total_in - fee).max(0);
        if net_out < DUST_SATS {
            return Err(TxEngineError::BelowDust { net_out, dust: DUST_SATS });
        }

        let btc_network = match self.network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        };
        let destination: Address = preview
            .destination
            .parse::<Address<_>>()
            .map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?
            .require_network(btc_network)
            .map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?;

        let mut tx_ins = Vec::with_capacity(inputs.len());
        for i in &inputs {
            let txid: Txid = i.utxo.txid.parse().map_err(|e| TxEngineError::Broadcast(format!("malformed utxo txid {}: {e}", i.utxo.txid)))?;
            tx_ins.push(TxIn {
                previous_output: OutPoint { txid, vout: i.utxo.vout },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }

        let mut unsigned_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_ins,
            output: vec![TxOut {
                value: Amount::from_sat(net_out as u64),
                script_pubkey: destination.script_pubkey(),
            }],
        };

        let secp = Secp256k1::new();
        let mut witnesses = Vec::with_capacity(inputs.len());
        {
            let mut cache = SighashCache::new(&unsigned_tx);
            for (i, input) in inputs.iter().enumerate() {
                let derived = self.key_service.get_private_key(Chain::Btc, input.address_index as u32)?;
                let secret_key = bitcoin::secp256k1::SecretKey::from_slice(&*derived.secret_bytes)
                    .map_err(|e| TxEngineError::Signing(e.to_string()))?;
                let secp_public_key = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
                let public_key = bitcoin::PublicKey::new(secp_public_key);
                let owner_address = Address::p2wpkh(&public_key, btc_network).map_err(|e| TxEngineError::Signing(e.to_string()))?;

                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &owner_address.script_pubkey(),
                        Amount::from_sat(input.utxo.value as u64),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| TxEngineError::Signing(e.to_string()))?;

                let message = Message::from_digest(sighash.to_byte_array());
                let signature = secp.sign_ecdsa(&message, &secret_key);

                let mut sig_bytes = signature.serialize_der().to_vec();
                sig_bytes.push(EcdsaSighashType::All as u8);

                let mut witness = Witness::new();
                witness.push(sig_bytes);
                witness.push(public_key.to_bytes());
                witnesses.push(witness);
            }
        }
        for (i, witness) in witnesses.into_iter().enumerate() {
            unsigned_tx.input[i].witness = witness;
        }

        let raw_hex = bitcoin::consensus::encode::serialize_hex(&unsigned_tx);
        let tx_hash = self.broadcast(raw_hex).await?;

        let sweep_id = new_sweep_id();
        let conn = self.store.get().map_err(crate::store::StoreError::from)?;
        for input in &inputs {
            let id = new_tx_state_id();
            tx_state::insert(
                &conn,
                &id,
                &sweep_id,
                Chain::Btc,
                TokenSymbol::Native,
                input.address_index,
                &input.address,
                &preview.destination,
                &input.utxo.value.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&tx_hash), None)?;
            transactions::insert_outbound(
                &conn,
                &id,
                Chain::Btc,
                self.network.as_str(),
                input.address_index,
                TokenSymbol::Native,
                &input.utxo.value.to_string(),
                &input.address,
                &preview.destination,
            )?;
            transactions::set_tx_hash(&conn, &id, &tx_hash)?;
        }

        info!(sweep_id, tx_hash, inputs = inputs.len(); "BTC sweep broadcast");
        self.spawn_confirmation_poller(sweep_id.clone(), tx_hash);
        Ok(sweep_id)
    }

    async fn broadcast(&self, raw_hex: String) -> Result<String, TxEngineError> {
        let mut last_err = None;
        for _ in 0..self.providers.len().max(1) {
            let provider = self.next_provider().ok_or_else(|| TxEngineError::Broadcast("no BTC providers configured".to_string()))?;
            match provider.broadcast(raw_hex.clone()).await {
                Ok(txid) => return Ok(txid.trim().to_string()),
                Err(e @ crate::providers::ProviderError::Malformed(_)) => return Err(TxEngineError::Broadcast(e.to_string())),
                Err(e) => last_err = Some(e),
            }
        }
        Err(TxEngineError::Broadcast(last_err.map(|e| e.to_string()).unwrap_or_else(|| "no providers".to_string())))
    }

    fn spawn_confirmation_poller(self: &Arc<Self>, sweep_id: String, tx_hash: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + CONFIRM_TIMEOUT;
            loop {
                tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
                let Some(provider) = this.next_provider() else { break };
                match provider.tx_status(&tx_hash).await {
                    Ok(status) if status.confirmed => {
                        this.mark_sweep(&sweep_id, &tx_hash, TxStatus::Confirmed);
                        this.event_hub.broadcast(TxEvent::SweepComplete { sweep_id, chain: Chain::Btc });
                        return;
                    },
                    Ok(_) => {},
                    Err(e) => warn!(sweep_id, error:% = e; "BTC confirmation poll failed, retrying"),
                }
                if Instant::now() >= deadline {
                    this.mark_sweep(&sweep_id, &tx_hash, TxStatus::Uncertain);
                    this.event_hub.broadcast(TxEvent::SweepError {
                        sweep_id,
                        chain: Chain::Btc,
                        reason: "confirmation timed out".to_string(),
                    });
                    return;
                }
            }
        });
    }

    fn mark_sweep(&self, sweep_id: &str, tx_hash: &str, status: TxStatus) {
        let Ok(conn) = self.store.get() else { return };
        if let Ok(rows) = tx_state::list_by_sweep(&conn, sweep_id) {
            for row in rows {
                let _ = tx_state::transition(&conn, &row.id, status, None, None);
            }
        }
        let _ = transactions::mark_by_tx_hash(&conn, Chain::Btc, tx_hash, &status.to_string());
    }
}

fn validate_btc_address(address: &str, network: Network) -> Result<(), TxEngineError> {
    let prefix_ok = match network {
        Network::Mainnet => address.starts_with("bc1") || address.starts_with('1') || address.starts_with('3'),
        Network::Testnet => address.starts_with("tb1") || address.starts_with('m') || address.starts_with('n') || address.starts_with('2'),
    };
    if !prefix_ok {
        return Err(TxEngineError::InvalidDestination(format!("{address} does not match network {}", network.as_str())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_estimate_grows_with_input_count() {
        let one_input = BtcEngine::estimate_fee(1, 1, 10);
        let ten_inputs = BtcEngine::estimate_fee(10, 1, 10);
        assert!(ten_inputs > one_input);
    }

    #[test]
    fn mainnet_address_prefix_accepted() {
        assert!(validate_btc_address("bc1qexample", Network::Mainnet).is_ok());
        assert!(validate_btc_address("tb1qexample", Network::Mainnet).is_err());
    }

    #[test]
    fn testnet_address_prefix_accepted() {
        assert!(validate_btc_address("tb1qexample", Network::Testnet).is_ok());
        assert!(validate_btc_address("bc1qexample", Network::Testnet).is_err());
    }
}
