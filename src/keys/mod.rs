//! HD key derivation: per-chain paths derived on demand from a BIP-39
//! mnemonic file.
//!
//! Keys are derived on demand from the mnemonic file and never cached.
//! `DerivedKey` wraps its secret bytes in `Zeroizing` so the buffer is
//! wiped when the caller's signing scope ends, on every exit path
//! including early returns and panics during unwind.

pub mod sol_ata;

use std::fs;
use std::path::Path;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::config::Network;
use crate::models::Chain;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read mnemonic file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("address encoding failed: {0}")]
    Address(String),
}

/// One derived key: 32 secret bytes plus the address they control.
/// `secret_bytes` zeroizes on drop; callers should hold this for the
/// shortest span that covers signing and then let it fall out of scope.
pub struct DerivedKey {
    pub secret_bytes: Zeroizing<[u8; 32]>,
    pub address: String,
}

/// Reads the mnemonic file and derives per-chain keys on demand.
pub struct KeyService {
    mnemonic_file: std::path::PathBuf,
    network: Network,
}

impl KeyService {
    pub fn new(mnemonic_file: impl AsRef<Path>, network: Network) -> Self {
        KeyService {
            mnemonic_file: mnemonic_file.as_ref().to_path_buf(),
            network,
        }
    }

    fn load_seed(&self) -> Result<Zeroizing<[u8; 64]>, KeyError> {
        let raw = fs::read_to_string(&self.mnemonic_file)?;
        let phrase = raw.trim();
        let mnemonic = Mnemonic::parse(phrase).map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;
        Ok(Zeroizing::new(mnemonic.to_seed("")))
    }

    /// Derives the key for `chain` at `index` along that chain's HD path.
    pub fn get_private_key(&self, chain: Chain, index: u32) -> Result<DerivedKey, KeyError> {
        let seed = self.load_seed()?;
        match chain {
            Chain::Btc => self.derive_btc(&seed, index),
            Chain::Bsc => self.derive_bsc(&seed, index),
            Chain::Sol => self.derive_sol(&seed, index),
        }
    }

    /// BIP-32 master, BIP-84 path `m/84'/0'/0'/0/N` (testnet coin type 1).
    fn derive_btc(&self, seed: &[u8; 64], index: u32) -> Result<DerivedKey, KeyError> {
        let secp = Secp256k1::new();
        let btc_network = match self.network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        };
        let coin_type = match self.network {
            Network::Mainnet => 0,
            Network::Testnet => 1,
        };

        let master = Xpriv::new_master(btc_network, seed).map_err(|e| KeyError::Derivation(e.to_string()))?;
        let path = DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(84).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_hardened_idx(coin_type).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_hardened_idx(0).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_normal_idx(0).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_normal_idx(index).map_err(|e| KeyError::Derivation(e.to_string()))?,
        ]);
        let child = master.derive_priv(&secp, &path).map_err(|e| KeyError::Derivation(e.to_string()))?;

        let private_key = child.to_priv();
        let public_key = private_key.public_key(&secp);
        let address = bitcoin::Address::p2wpkh(&public_key, btc_network)
            .map_err(|e| KeyError::Address(e.to_string()))?
            .to_string();

        Ok(DerivedKey {
            secret_bytes: Zeroizing::new(child.private_key.secret_bytes()),
            address,
        })
    }

    /// BIP-44 path `m/44'/60'/0'/0/N`, secp256k1, EIP-55 checksummed address.
    fn derive_bsc(&self, seed: &[u8; 64], index: u32) -> Result<DerivedKey, KeyError> {
        let secp = Secp256k1::new();
        // bitcoin's bip32 derivation is network-agnostic for the key material
        // itself; the network tag only affects extended-key serialization,
        // which we never use here.
        let master = Xpriv::new_master(bitcoin::Network::Bitcoin, seed).map_err(|e| KeyError::Derivation(e.to_string()))?;
        let path = DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(44).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_hardened_idx(60).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_hardened_idx(0).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_normal_idx(0).map_err(|e| KeyError::Derivation(e.to_string()))?,
            ChildNumber::from_normal_idx(index).map_err(|e| KeyError::Derivation(e.to_string()))?,
        ]);
        let child = master.derive_priv(&secp, &path).map_err(|e| KeyError::Derivation(e.to_string()))?;

        let secret_key = child.private_key;
        let address = eip55_address(&secp, &secret_key);

        Ok(DerivedKey {
            secret_bytes: Zeroizing::new(secret_key.secret_bytes()),
            address,
        })
    }

    /// SLIP-10 ed25519, fully hardened path `m/44'/501'/N'/0'`.
    fn derive_sol(&self, seed: &[u8; 64], index: u32) -> Result<DerivedKey, KeyError> {
        let (mut key, mut chain_code) = slip10_master(seed);
        for segment in [44u32, 501, index, 0] {
            let (child_key, child_chain_code) = slip10_derive_hardened(&key, &chain_code, segment);
            key = child_key;
            chain_code = child_chain_code;
        }
        use zeroize::Zeroize;
        chain_code.zeroize();

        let signing_key = SigningKey::from_bytes(&key);
        let address = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();

        Ok(DerivedKey {
            secret_bytes: Zeroizing::new(key),
            address,
        })
    }
}

/// SLIP-10 master key: `HMAC-SHA512(key="ed25519 seed", data=seed)`.
fn slip10_master(seed: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut mac = HmacSha512::new_from_slice(b"ed25519 seed").expect("HMAC accepts any key length");
    mac.update(seed);
    let result = mac.finalize().into_bytes();
    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&result[..32]);
    chain_code.copy_from_slice(&result[32..]);
    (key, chain_code)
}

/// SLIP-10 hardened child: ed25519 supports only hardened derivation, so
/// the index is always offset by 2^31 regardless of the caller's intent.
fn slip10_derive_hardened(key: &[u8; 32], chain_code: &[u8; 32], index: u32) -> ([u8; 32], [u8; 32]) {
    let hardened_index = index | 0x8000_0000;
    let mut mac = HmacSha512::new_from_slice(chain_code).expect("HMAC accepts any key length");
    mac.update(&[0u8]);
    mac.update(key);
    mac.update(&hardened_index.to_be_bytes());
    let result = mac.finalize().into_bytes();
    let mut child_key = [0u8; 32];
    let mut child_chain_code = [0u8; 32];
    child_key.copy_from_slice(&result[..32]);
    child_chain_code.copy_from_slice(&result[32..]);
    (child_key, child_chain_code)
}

/// `keccak256(uncompressed_pubkey[1..])[12..]`, EIP-55 checksummed.
fn eip55_address(secp: &Secp256k1<bitcoin::secp256k1::All>, secret_key: &SecretKey) -> String {
    let public_key = Secp256k1PublicKey::from_secret_key(secp, secret_key);
    let uncompressed = public_key.serialize_uncompressed();

    let mut hasher = Keccak256::new();
    hasher.update(&uncompressed[1..]);
    let hash = hasher.finalize();
    let raw_address = &hash[12..];

    apply_eip55_checksum(raw_address)
}

pub fn apply_eip55_checksum(raw_address: &[u8]) -> String {
    let lower_hex = hex::encode(raw_address);

    let mut hasher = Keccak256::new();
    hasher.update(lower_hex.as_bytes());
    let hash = hasher.finalize();

    let mut checksummed = String::with_capacity(2 + lower_hex.len());
    checksummed.push_str("0x");
    for (i, c) in lower_hex.chars().enumerate() {
        let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
        if c.is_ascii_digit() || nibble < 8 {
            checksummed.push(c);
        } else {
            checksummed.push(c.to_ascii_uppercase());
        }
    }
    checksummed
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn write_mnemonic_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), TEST_MNEMONIC).unwrap();
        file
    }

    #[test]
    fn btc_derivation_is_deterministic_across_calls() {
        let file = write_mnemonic_file();
        let service = KeyService::new(file.path(), Network::Mainnet);
        let a = service.get_private_key(Chain::Btc, 0).unwrap();
        let b = service.get_private_key(Chain::Btc, 0).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(*a.secret_bytes, *b.secret_bytes);
    }

    #[test]
    fn btc_different_indices_derive_different_addresses() {
        let file = write_mnemonic_file();
        let service = KeyService::new(file.path(), Network::Mainnet);
        let a = service.get_private_key(Chain::Btc, 0).unwrap();
        let b = service.get_private_key(Chain::Btc, 1).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn bsc_address_is_eip55_checksummed_mixed_case() {
        let file = write_mnemonic_file();
        let service = KeyService::new(file.path(), Network::Mainnet);
        let key = service.get_private_key(Chain::Bsc, 0).unwrap();
        assert!(key.address.starts_with("0x"));
        assert_eq!(key.address.len(), 42);
        assert!(key.address.chars().any(|c| c.is_ascii_uppercase()) || key.address.chars().all(|c| !c.is_alphabetic()));
    }

    #[test]
    fn sol_derivation_is_deterministic_and_produces_base58_address() {
        let file = write_mnemonic_file();
        let service = KeyService::new(file.path(), Network::Mainnet);
        let a = service.get_private_key(Chain::Sol, 0).unwrap();
        let b = service.get_private_key(Chain::Sol, 0).unwrap();
        assert_eq!(a.address, b.address);
        assert!(bs58::decode(&a.address).into_vec().is_ok());
    }

    #[test]
    fn slip10_master_matches_known_test_vector_seed_length() {
        let seed = [0u8; 64];
        let (key, chain_code) = slip10_master(&seed);
        assert_eq!(key.len(), 32);
        assert_eq!(chain_code.len(), 32);
    }
}
