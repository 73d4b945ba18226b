//! Solana sweep engine.
//!
//! Transactions are built and serialized by hand to the wire format
//! (compact-u16 shortvec lengths, the standard message layout) rather than
//! via a Solana SDK, matching the crate's general avoidance of ecosystem
//! mega-dependencies for ephemeral per-address work.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use log::{info, warn};

use crate::config::Network;
use crate::events::{TxEvent, TxEventHub};
use crate::keys::KeyService;
use crate::keys::sol_ata::derive_associated_token_address;
use crate::models::{Chain, TokenSymbol, TxStatus};
use crate::providers::sol_rpc::{SolRpcProvider, TOKEN_PROGRAM_ID};
use crate::providers::tokens::contract_or_mint;
use crate::providers::{AddressRef, Provider};
use crate::store::{SqlitePool, addresses, balances, transactions, tx_state};

use super::{SweepLocks, TxEngineError, new_sweep_id, new_tx_state_id};

const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

const BLOCKHASH_CACHE_TTL: Duration = Duration::from_secs(10);
const NATIVE_FEE_LAMPORTS: u64 = 5_000;
const ATA_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ATA_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_BALANCE_DRIFT_PCT: f64 = 5.0;
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_CONSECUTIVE_RPC_ERRORS: u32 = 3;

pub struct SolNativeItem {
    pub address_index: i64,
    pub address: String,
    pub lamports: u64,
}

pub struct SolNativePreview {
    pub items: Vec<SolNativeItem>,
    pub destination: String,
}

pub struct SolTokenItem {
    pub address_index: i64,
    pub address: String,
    pub source_ata: String,
    pub amount: u64,
}

pub struct SolTokenPreview {
    pub items: Vec<SolTokenItem>,
    pub mint: String,
    pub fee_payer_index: i64,
    pub fee_payer_address: String,
    pub destination_ata: String,
    pub destination_ata_exists: bool,
}

pub struct SolEngine {
    store: SqlitePool,
    network: Network,
    key_service: Arc<KeyService>,
    rpc_endpoints: Vec<Arc<SolRpcProvider>>,
    event_hub: Arc<TxEventHub>,
    locks: Arc<SweepLocks>,
    blockhash_cache: Mutex<Option<(Instant, String)>>,
}

impl SolEngine {
    pub fn new(
        store: SqlitePool,
        network: Network,
        key_service: Arc<KeyService>,
        rpc_endpoints: Vec<Arc<SolRpcProvider>>,
        event_hub: Arc<TxEventHub>,
        locks: Arc<SweepLocks>,
    ) -> Self {
        SolEngine {
            store,
            network,
            key_service,
            rpc_endpoints,
            event_hub,
            locks,
            blockhash_cache: Mutex::new(None),
        }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, TxEngineError> {
        self.store.get().map_err(crate::store::StoreError::from).map_err(Into::into)
    }

    async fn blockhash(&self) -> Result<String, TxEngineError> {
        {
            let cache = self.blockhash_cache.lock().expect("blockhash cache mutex poisoned");
            if let Some((fetched_at, hash)) = cache.as_ref() {
                if fetched_at.elapsed() < BLOCKHASH_CACHE_TTL {
                    return Ok(hash.clone());
                }
            }
        }
        for rpc in &self.rpc_endpoints {
            if let Ok(hash) = rpc.latest_blockhash().await {
                *self.blockhash_cache.lock().expect("blockhash cache mutex poisoned") = Some((Instant::now(), hash.clone()));
                return Ok(hash);
            }
        }
        Err(TxEngineError::Broadcast("no SOL RPC endpoint answered getLatestBlockhash".to_string()))
    }

    async fn broadcast(&self, signed_tx_b64: &str) -> Result<String, TxEngineError> {
        let mut last_err = None;
        for rpc in &self.rpc_endpoints {
            match rpc.send_transaction(signed_tx_b64).await {
                Ok(sig) => return Ok(sig),
                Err(e) => last_err = Some(e),
            }
        }
        Err(TxEngineError::Broadcast(last_err.map(|e| e.to_string()).unwrap_or_else(|| "no RPC endpoints configured".to_string())))
    }

    async fn fetch_lamports(&self, rpc: &SolRpcProvider, address: &str, index: i64) -> Result<u64, TxEngineError> {
        let refs = [AddressRef { address: address.to_string(), index }];
        let results = rpc.fetch_native_balances(&refs).await?;
        let result = results.into_iter().next().ok_or_else(|| TxEngineError::Broadcast("empty balance response".to_string()))?;
        if let Some(err) = result.error {
            return Err(TxEngineError::Broadcast(err));
        }
        result.amount.parse::<u64>().map_err(|e| TxEngineError::Broadcast(e.to_string()))
    }

    async fn fetch_token_amount(
        &self,
        rpc: &SolRpcProvider,
        address: &str,
        index: i64,
        token: TokenSymbol,
        mint: &str,
    ) -> Result<u64, TxEngineError> {
        let refs = [AddressRef { address: address.to_string(), index }];
        let results = rpc.fetch_token_balances(&refs, token, mint).await?;
        let result = results.into_iter().next().ok_or_else(|| TxEngineError::Broadcast("empty balance response".to_string()))?;
        if let Some(err) = result.error {
            return Err(TxEngineError::Broadcast(err));
        }
        result.amount.parse::<u64>().map_err(|e| TxEngineError::Broadcast(e.to_string()))
    }

    pub async fn preview_native(&self, destination: &str) -> Result<SolNativePreview, TxEngineError> {
        validate_sol_address(destination)?;
        let funded = {
            let conn = self.conn()?;
            balances::list_funded_native(&conn, Chain::Sol, self.network)?
        };
        if funded.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }
        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no SOL RPC endpoints configured".to_string()))?;

        let mut items = Vec::new();
        for row in funded {
            let address = {
                let conn = self.conn()?;
                addresses::get_by_index(&conn, Chain::Sol, self.network, row.index)?
                    .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {}", row.index)))?
            };
            let lamports = self.fetch_lamports(primary, &address.address, row.index).await?;
            if lamports <= NATIVE_FEE_LAMPORTS {
                continue;
            }
            items.push(SolNativeItem {
                address_index: row.index,
                address: address.address,
                lamports: lamports - NATIVE_FEE_LAMPORTS,
            });
        }
        if items.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        Ok(SolNativePreview { items, destination: destination.to_string() })
    }

    pub async fn execute_native(self: &Arc<Self>, preview: &SolNativePreview) -> Result<String, TxEngineError> {
        let _guard = self.locks.try_acquire(Chain::Sol)?;
        let destination_bytes = decode_pubkey(&preview.destination)?;
        let system_program = decode_pubkey(SYSTEM_PROGRAM_ID)?;

        let sweep_id = new_sweep_id();
        for item in &preview.items {
            let derived = self.key_service.get_private_key(Chain::Sol, item.address_index as u32)?;
            let signing_key = SigningKey::from_bytes(&derived.secret_bytes);
            let from_bytes = decode_pubkey(&item.address)?;

            let blockhash = self.blockhash().await?;
            let blockhash_bytes = decode_pubkey32(&blockhash)?;

            let mut data = Vec::with_capacity(12);
            data.extend_from_slice(&2u32.to_le_bytes()); // SystemInstruction::Transfer
            data.extend_from_slice(&item.lamports.to_le_bytes());

            let accounts = vec![
                AccountMeta { pubkey: from_bytes, is_signer: true, is_writable: true },
                AccountMeta { pubkey: destination_bytes, is_signer: false, is_writable: true },
            ];
            let instruction = Instruction {
                program_id: system_program,
                accounts,
                data,
            };

            let message = Message::build(&[instruction], blockhash_bytes, &from_bytes);
            let wire = message.serialize();
            let signature = signing_key.sign(&wire);
            let tx_bytes = serialize_transaction(&[signature.to_bytes()], &wire);
            let tx_b64 = base64::engine::general_purpose::STANDARD.encode(tx_bytes);

            let signature_str = bs58::encode(signature.to_bytes()).into_string();
            let sent_signature = match self.broadcast(&tx_b64).await {
                Ok(sig) => sig,
                Err(e) => {
                    warn!(address = item.address, error:% = e; "SOL native sweep leg broadcast failed");
                    return Err(e);
                },
            };
            debug_assert_eq!(sent_signature, signature_str);

            let id = new_tx_state_id();
            let conn = self.conn()?;
            tx_state::insert(
                &conn,
                &id,
                &sweep_id,
                Chain::Sol,
                TokenSymbol::Native,
                item.address_index,
                &item.address,
                &preview.destination,
                &item.lamports.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&sent_signature), None)?;
            transactions::insert_outbound(
                &conn,
                &id,
                Chain::Sol,
                self.network.as_str(),
                item.address_index,
                TokenSymbol::Native,
                &item.lamports.to_string(),
                &item.address,
                &preview.destination,
            )?;
            transactions::set_tx_hash(&conn, &id, &sent_signature)?;
            drop(conn);

            info!(sweep_id, signature = sent_signature, address = item.address; "SOL native sweep leg broadcast");
            self.spawn_confirmation_poller(id, sweep_id.clone(), sent_signature);
        }

        Ok(sweep_id)
    }

    pub async fn preview_token(&self, fee_payer_index: i64, token: TokenSymbol, destination_owner: &str) -> Result<SolTokenPreview, TxEngineError> {
        validate_sol_address(destination_owner)?;
        let mint = contract_or_mint(Chain::Sol, self.network, token)
            .ok_or_else(|| TxEngineError::InvalidDestination(format!("no mint configured for {token} on SOL")))?
            .to_string();

        let fee_payer_address = {
            let conn = self.conn()?;
            addresses::get_by_index(&conn, Chain::Sol, self.network, fee_payer_index)?
                .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {fee_payer_index}")))?
                .address
        };

        let destination_ata = derive_associated_token_address(destination_owner, TOKEN_PROGRAM_ID, &mint).map_err(TxEngineError::InvalidDestination)?;
        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no SOL RPC endpoints configured".to_string()))?;
        let destination_ata_exists = primary.account_exists(&destination_ata).await?;

        let funded = {
            let conn = self.conn()?;
            balances::list_funded_native(&conn, Chain::Sol, self.network)?
        };
        let mut items = Vec::new();
        for row in funded {
            let address = {
                let conn = self.conn()?;
                addresses::get_by_index(&conn, Chain::Sol, self.network, row.index)?
                    .ok_or_else(|| crate::store::StoreError::NotFound(format!("address index {}", row.index)))?
            };
            let source_ata = derive_associated_token_address(&address.address, TOKEN_PROGRAM_ID, &mint).map_err(TxEngineError::InvalidDestination)?;
            let amount = self.fetch_token_amount(primary, &source_ata, row.index, token, &mint).await.unwrap_or(0);
            if amount == 0 {
                continue;
            }
            items.push(SolTokenItem {
                address_index: row.index,
                address: address.address,
                source_ata,
                amount,
            });
        }
        if items.is_empty() {
            return Err(TxEngineError::NothingToSweep);
        }

        Ok(SolTokenPreview {
            items,
            mint,
            fee_payer_index,
            fee_payer_address,
            destination_ata,
            destination_ata_exists,
        })
    }

    pub async fn execute_token(self: &Arc<Self>, preview: &SolTokenPreview, token: TokenSymbol, destination_owner: &str) -> Result<String, TxEngineError> {
        let _guard = self.locks.try_acquire(Chain::Sol)?;
        let primary = self.rpc_endpoints.first().ok_or_else(|| TxEngineError::Broadcast("no SOL RPC endpoints configured".to_string()))?;

        let fee_payer_key = self.key_service.get_private_key(Chain::Sol, preview.fee_payer_index as u32)?;
        let fee_payer_signing_key = SigningKey::from_bytes(&fee_payer_key.secret_bytes);
        let fee_payer_bytes = decode_pubkey(&preview.fee_payer_address)?;

        let mut destination_ata_exists = preview.destination_ata_exists;
        let sweep_id = new_sweep_id();

        for item in &preview.items {
            let current_amount = self.fetch_token_amount(primary, &item.source_ata, item.address_index, token, &preview.mint).await?;
            let drop_pct = if item.amount == 0 {
                0.0
            } else {
                100.0 * (item.amount.saturating_sub(current_amount)) as f64 / item.amount as f64
            };
            if drop_pct > TOKEN_BALANCE_DRIFT_PCT {
                warn!(address = item.address; "skipping SOL token sweep leg: balance drifted since preview");
                continue;
            }

            let derived = self.key_service.get_private_key(Chain::Sol, item.address_index as u32)?;
            let source_signing_key = SigningKey::from_bytes(&derived.secret_bytes);
            let source_owner_bytes = decode_pubkey(&item.address)?;
            let source_ata_bytes = decode_pubkey(&item.source_ata)?;
            let destination_ata_bytes = decode_pubkey(&preview.destination_ata)?;
            let destination_owner_bytes = decode_pubkey(destination_owner)?;
            let mint_bytes = decode_pubkey(&preview.mint)?;
            let token_program = decode_pubkey(TOKEN_PROGRAM_ID)?;
            let associated_token_program = decode_pubkey(ASSOCIATED_TOKEN_PROGRAM_ID)?;
            let system_program = decode_pubkey(SYSTEM_PROGRAM_ID)?;

            let mut instructions = Vec::new();
            if !destination_ata_exists {
                instructions.push(Instruction {
                    program_id: associated_token_program,
                    accounts: vec![
                        AccountMeta { pubkey: fee_payer_bytes, is_signer: true, is_writable: true },
                        AccountMeta { pubkey: destination_ata_bytes, is_signer: false, is_writable: true },
                        AccountMeta { pubkey: destination_owner_bytes, is_signer: false, is_writable: false },
                        AccountMeta { pubkey: mint_bytes, is_signer: false, is_writable: false },
                        AccountMeta { pubkey: system_program, is_signer: false, is_writable: false },
                        AccountMeta { pubkey: token_program, is_signer: false, is_writable: false },
                    ],
                    data: Vec::new(),
                });
            }

            let mut transfer_data = Vec::with_capacity(9);
            transfer_data.push(3u8); // SPL Token Instruction::Transfer
            transfer_data.extend_from_slice(&current_amount.to_le_bytes());
            instructions.push(Instruction {
                program_id: token_program,
                accounts: vec![
                    AccountMeta { pubkey: source_ata_bytes, is_signer: false, is_writable: true },
                    AccountMeta { pubkey: destination_ata_bytes, is_signer: false, is_writable: true },
                    AccountMeta { pubkey: source_owner_bytes, is_signer: true, is_writable: false },
                ],
                data: transfer_data,
            });

            let blockhash = self.blockhash().await?;
            let blockhash_bytes = decode_pubkey32(&blockhash)?;
            let message = Message::build(&instructions, blockhash_bytes, &fee_payer_bytes);
            let wire = message.serialize();

            let signers = message.ordered_signers(&[(fee_payer_bytes, &fee_payer_signing_key), (source_owner_bytes, &source_signing_key)]);
            let signatures: Vec<[u8; 64]> = signers.iter().map(|key| key.sign(&wire).to_bytes()).collect();
            let tx_bytes = serialize_transaction(&signatures, &wire);
            let tx_b64 = base64::engine::general_purpose::STANDARD.encode(tx_bytes);

            let sent_signature = self.broadcast(&tx_b64).await?;

            if !destination_ata_exists {
                self.wait_for_ata(primary, &preview.destination_ata).await;
                destination_ata_exists = true;
            }

            let id = new_tx_state_id();
            let conn = self.conn()?;
            tx_state::insert(
                &conn,
                &id,
                &sweep_id,
                Chain::Sol,
                token,
                item.address_index,
                &item.address,
                destination_owner,
                &current_amount.to_string(),
                TxStatus::Confirming,
            )?;
            tx_state::transition(&conn, &id, TxStatus::Confirming, Some(&sent_signature), None)?;
            transactions::insert_outbound(
                &conn,
                &id,
                Chain::Sol,
                self.network.as_str(),
                item.address_index,
                token,
                &current_amount.to_string(),
                &item.address,
                destination_owner,
            )?;
            transactions::set_tx_hash(&conn, &id, &sent_signature)?;
            drop(conn);

            self.spawn_confirmation_poller(id, sweep_id.clone(), sent_signature);
        }

        Ok(sweep_id)
    }

    async fn wait_for_ata(&self, rpc: &SolRpcProvider, ata: &str) {
        let deadline = Instant::now() + ATA_POLL_TIMEOUT;
        loop {
            if let Ok(true) = rpc.account_exists(ata).await {
                return;
            }
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(ATA_POLL_INTERVAL).await;
        }
    }

    fn spawn_confirmation_poller(self: &Arc<Self>, tx_state_id: String, sweep_id: String, signature: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + CONFIRM_TIMEOUT;
            let mut consecutive_errors = 0u32;
            loop {
                tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
                let Some(rpc) = this.rpc_endpoints.first() else { break };
                match rpc.signature_statuses(std::slice::from_ref(&signature)).await {
                    Ok(statuses) => {
                        consecutive_errors = 0;
                        match statuses.into_iter().next().flatten() {
                            Some(status) if status.err.is_some() => {
                                this.finish(&tx_state_id, &sweep_id, &signature, TxStatus::Failed);
                                this.event_hub.broadcast(TxEvent::SweepError {
                                    sweep_id,
                                    chain: Chain::Sol,
                                    reason: "transaction failed on-chain".to_string(),
                                });
                                return;
                            },
                            Some(status) if matches!(status.confirmation_status.as_deref(), Some("confirmed") | Some("finalized")) => {
                                this.finish(&tx_state_id, &sweep_id, &signature, TxStatus::Confirmed);
                                return;
                            },
                            _ => {},
                        }
                    },
                    Err(e) => {
                        consecutive_errors += 1;
                        warn!(signature, error:% = e; "SOL confirmation poll failed");
                        if consecutive_errors >= MAX_CONSECUTIVE_RPC_ERRORS {
                            this.finish(&tx_state_id, &sweep_id, &signature, TxStatus::Uncertain);
                            return;
                        }
                    },
                }
                if Instant::now() >= deadline {
                    this.finish(&tx_state_id, &sweep_id, &signature, TxStatus::Uncertain);
                    return;
                }
            }
        });
    }

    fn finish(&self, tx_state_id: &str, sweep_id: &str, signature: &str, status: TxStatus) {
        let Ok(conn) = self.store.get() else { return };
        let _ = tx_state::transition(&conn, tx_state_id, status, None, None);
        let _ = transactions::mark_by_tx_hash(&conn, Chain::Sol, signature, &status.to_string());
        if status == TxStatus::Confirmed {
            self.event_hub.broadcast(TxEvent::SweepComplete {
                sweep_id: sweep_id.to_string(),
                chain: Chain::Sol,
            });
        }
    }
}

fn validate_sol_address(address: &str) -> Result<(), TxEngineError> {
    let bytes = bs58::decode(address).into_vec().map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(TxEngineError::InvalidDestination(format!("{address} does not decode to a 32-byte public key")));
    }
    Ok(())
}

fn decode_pubkey(address: &str) -> Result<[u8; 32], TxEngineError> {
    decode_pubkey32(address)
}

fn decode_pubkey32(base58: &str) -> Result<[u8; 32], TxEngineError> {
    let bytes = bs58::decode(base58).into_vec().map_err(|e| TxEngineError::InvalidDestination(e.to_string()))?;
    bytes.try_into().map_err(|_| TxEngineError::InvalidDestination(format!("{base58} is not 32 bytes")))
}

struct AccountMeta {
    pubkey: [u8; 32],
    is_signer: bool,
    is_writable: bool,
}

struct Instruction {
    program_id: [u8; 32],
    accounts: Vec<AccountMeta>,
    data: Vec<u8>,
}

/// A compiled Solana message: deduplicated, ordered account keys plus the
/// instructions referencing them by index.
struct Message {
    account_keys: Vec<[u8; 32]>,
    num_required_signatures: u8,
    num_readonly_signed: u8,
    num_readonly_unsigned: u8,
    recent_blockhash: [u8; 32],
    instructions: Vec<(u8, Vec<u8>, Vec<u8>)>,
}

impl Message {
    /// Builds the account-key table (fee payer forced first and writable)
    /// and compiles each instruction's account references against it.
    fn build(instructions: &[Instruction], recent_blockhash: [u8; 32], fee_payer: &[u8; 32]) -> Message {
        let mut metas: Vec<AccountMeta> = vec![AccountMeta { pubkey: *fee_payer, is_signer: true, is_writable: true }];
        for ix in instructions {
            metas.push(AccountMeta { pubkey: ix.program_id, is_signer: false, is_writable: false });
            for acc in &ix.accounts {
                metas.push(AccountMeta { pubkey: acc.pubkey, is_signer: acc.is_signer, is_writable: acc.is_writable });
            }
        }

        let mut merged: Vec<AccountMeta> = Vec::new();
        for m in metas {
            if let Some(existing) = merged.iter_mut().find(|e| e.pubkey == m.pubkey) {
                existing.is_signer |= m.is_signer;
                existing.is_writable |= m.is_writable;
            } else {
                merged.push(m);
            }
        }
        merged.sort_by_key(|m| (!m.is_signer, !m.is_writable));

        let num_required_signatures = merged.iter().filter(|m| m.is_signer).count() as u8;
        let num_readonly_signed = merged.iter().filter(|m| m.is_signer && !m.is_writable).count() as u8;
        let num_readonly_unsigned = merged.iter().filter(|m| !m.is_signer && !m.is_writable).count() as u8;
        let account_keys: Vec<[u8; 32]> = merged.iter().map(|m| m.pubkey).collect();

        let compiled = instructions
            .iter()
            .map(|ix| {
                let program_id_index = account_keys.iter().position(|k| k == &ix.program_id).expect("program id registered as an account") as u8;
                let account_indexes = ix
                    .accounts
                    .iter()
                    .map(|a| account_keys.iter().position(|k| k == &a.pubkey).expect("instruction account registered") as u8)
                    .collect();
                (program_id_index, account_indexes, ix.data.clone())
            })
            .collect();

        Message {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash,
            instructions: compiled,
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.num_required_signatures);
        out.push(self.num_readonly_signed);
        out.push(self.num_readonly_unsigned);
        out.extend(compact_u16(self.account_keys.len() as u16));
        for key in &self.account_keys {
            out.extend_from_slice(key);
        }
        out.extend_from_slice(&self.recent_blockhash);
        out.extend(compact_u16(self.instructions.len() as u16));
        for (program_id_index, accounts, data) in &self.instructions {
            out.push(*program_id_index);
            out.extend(compact_u16(accounts.len() as u16));
            out.extend_from_slice(accounts);
            out.extend(compact_u16(data.len() as u16));
            out.extend_from_slice(data);
        }
        out
    }

    /// Returns the signing keys in the order their accounts appear among
    /// the message's `num_required_signatures` signer slots.
    fn ordered_signers<'a>(&self, candidates: &[([u8; 32], &'a SigningKey)]) -> Vec<&'a SigningKey> {
        self.account_keys[..self.num_required_signatures as usize]
            .iter()
            .map(|key| {
                candidates
                    .iter()
                    .find(|(pubkey, _)| pubkey == key)
                    .map(|(_, signing_key)| *signing_key)
                    .expect("every signer slot has a matching key")
            })
            .collect()
    }
}

fn serialize_transaction(signatures: &[[u8; 64]], message: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(compact_u16(signatures.len() as u16));
    for sig in signatures {
        out.extend_from_slice(sig);
    }
    out.extend_from_slice(message);
    out
}

fn compact_u16(value: u16) -> Vec<u8> {
    let mut n = value;
    let mut out = Vec::new();
    loop {
        let mut byte = (n & 0x7f) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_u16_small_values_are_one_byte() {
        assert_eq!(compact_u16(5), vec![5]);
        assert_eq!(compact_u16(127), vec![127]);
    }

    #[test]
    fn compact_u16_large_values_use_continuation_bit() {
        let encoded = compact_u16(300);
        assert_eq!(encoded.len(), 2);
        assert!(encoded[0] & 0x80 != 0);
    }

    #[test]
    fn message_orders_fee_payer_first_as_signer_writable() {
        let fee_payer = [1u8; 32];
        let program = [2u8; 32];
        let other = [3u8; 32];
        let instruction = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta { pubkey: fee_payer, is_signer: true, is_writable: true },
                AccountMeta { pubkey: other, is_signer: false, is_writable: true },
            ],
            data: vec![1, 2, 3],
        };
        let message = Message::build(&[instruction], [9u8; 32], &fee_payer);
        assert_eq!(message.account_keys[0], fee_payer);
        assert_eq!(message.num_required_signatures, 1);
    }

    #[test]
    fn decode_pubkey_rejects_wrong_length() {
        assert!(decode_pubkey("abc").is_err());
    }
}
