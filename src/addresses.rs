//! Address generation.
//!
//! Derives and persists the dense `[0, count)` window of receive addresses
//! for a chain, skipping indices already on disk so repeated calls (e.g. a
//! UI asking to "extend to 100k") are cheap and idempotent. Addresses are
//! derived through the same [`KeyService`] the sweep engines use — this is
//! the address-generation step that creates `Address` rows, never the scan
//! loop itself (which only ever reads `addresses`).

use log::info;
use rusqlite::Connection;

use crate::config::Network;
use crate::keys::{KeyError, KeyService};
use crate::models::Chain;
use crate::store::{StoreError, addresses};

#[derive(Debug, thiserror::Error)]
pub enum AddressGenerationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Ensures addresses `[0, count)` exist for `chain`/`network`, deriving and
/// inserting whichever indices are missing. Returns the number newly
/// created. Existing indices are left untouched — addresses are never
/// mutated once created.
pub fn ensure_addresses(
    conn: &Connection,
    key_service: &KeyService,
    chain: Chain,
    network: Network,
    count: i64,
) -> Result<i64, AddressGenerationError> {
    let next = match addresses::max_index(conn, chain, network)? {
        Some(max) => max + 1,
        None => 0,
    };
    if next >= count {
        return Ok(0);
    }

    let mut created = 0i64;
    for index in next..count {
        let derived = key_service.get_private_key(chain, index as u32)?;
        addresses::insert(conn, chain, network, index, &derived.address)?;
        created += 1;
    }
    info!(chain:% = chain, network:% = network.as_str(), created, total = count; "generated receive addresses");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn key_service() -> (tempfile::NamedTempFile, KeyService) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), TEST_MNEMONIC).unwrap();
        let service = KeyService::new(file.path(), Network::Testnet);
        (file, service)
    }

    #[test]
    fn generates_dense_indices_from_zero() {
        let (_file, key_service) = key_service();
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();

        let created = ensure_addresses(&conn, &key_service, Chain::Btc, Network::Testnet, 5).unwrap();
        assert_eq!(created, 5);
        assert_eq!(addresses::max_index(&conn, Chain::Btc, Network::Testnet).unwrap(), Some(4));
    }

    #[test]
    fn second_call_only_creates_the_extension() {
        let (_file, key_service) = key_service();
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();

        ensure_addresses(&conn, &key_service, Chain::Btc, Network::Testnet, 5).unwrap();
        let created = ensure_addresses(&conn, &key_service, Chain::Btc, Network::Testnet, 8).unwrap();
        assert_eq!(created, 3);
        assert_eq!(addresses::max_index(&conn, Chain::Btc, Network::Testnet).unwrap(), Some(7));
    }

    #[test]
    fn already_satisfied_count_creates_nothing() {
        let (_file, key_service) = key_service();
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();

        ensure_addresses(&conn, &key_service, Chain::Btc, Network::Testnet, 5).unwrap();
        let created = ensure_addresses(&conn, &key_service, Chain::Btc, Network::Testnet, 3).unwrap();
        assert_eq!(created, 0);
    }
}
