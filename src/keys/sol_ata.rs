//! Associated Token Account (PDA) derivation.
//!
//! `seeds = [wallet, token_program_id, mint]`, program =
//! associated-token-program. Bump search runs 255 down to 0; a candidate
//! is a valid PDA iff its SHA-256 digest is *not* a point on the Ed25519
//! curve. We reuse `curve25519-dalek`'s compressed-point decompression for
//! that test rather than hand-rolling field arithmetic — a `None` result
//! from `decompress()` is exactly "not on the curve".

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Derives the Associated Token Account address for (wallet, mint) under
/// the given token program, returning its base58 encoding.
pub fn derive_associated_token_address(wallet: &str, token_program_id: &str, mint: &str) -> Result<String, String> {
    let wallet_bytes = bs58::decode(wallet).into_vec().map_err(|e| format!("invalid wallet address: {e}"))?;
    let token_program_bytes = bs58::decode(token_program_id)
        .into_vec()
        .map_err(|e| format!("invalid token program id: {e}"))?;
    let mint_bytes = bs58::decode(mint).into_vec().map_err(|e| format!("invalid mint address: {e}"))?;
    let program_bytes = bs58::decode(ASSOCIATED_TOKEN_PROGRAM_ID)
        .into_vec()
        .map_err(|e| format!("invalid associated token program id: {e}"))?;

    let seeds: [&[u8]; 3] = [&wallet_bytes, &token_program_bytes, &mint_bytes];
    let (address, _bump) = find_program_address(&seeds, &program_bytes)?;
    Ok(bs58::encode(address).into_string())
}

/// Finds the canonical PDA for `seeds` under `program_id`, scanning bump
/// bytes from 255 down to 0 and returning the first candidate that is not
/// a valid Ed25519 curve point, along with the bump used.
pub fn find_program_address(seeds: &[&[u8]], program_id: &[u8]) -> Result<([u8; 32], u8), String> {
    for bump in (0..=255u8).rev() {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(program_id);
        hasher.update(PDA_MARKER);
        let digest: [u8; 32] = hasher.finalize().into();

        if !is_on_curve(&digest) {
            return Ok((digest, bump));
        }
    }
    Err("unable to find a valid program address (bump search exhausted)".to_string())
}

fn is_on_curve(candidate: &[u8; 32]) -> bool {
    CompressedEdwardsY(*candidate).decompress().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    #[test]
    fn is_deterministic_for_the_same_inputs() {
        let wallet = "4Nd1mYWPgXxB7Wz1P6RpY1Hm2g5FgN5L2a5jH3wRXy2c";
        let mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

        let a = derive_associated_token_address(wallet, TOKEN_PROGRAM_ID, mint).unwrap();
        let b = derive_associated_token_address(wallet, TOKEN_PROGRAM_ID, mint).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_mints_derive_different_atas() {
        let wallet = "4Nd1mYWPgXxB7Wz1P6RpY1Hm2g5FgN5L2a5jH3wRXy2c";

        let usdc = derive_associated_token_address(wallet, TOKEN_PROGRAM_ID, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
        let usdt = derive_associated_token_address(wallet, TOKEN_PROGRAM_ID, "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB").unwrap();
        assert_ne!(usdc, usdt);
    }

    #[test]
    fn rejects_invalid_base58_input() {
        let err = derive_associated_token_address("not-valid-base58-!!!", TOKEN_PROGRAM_ID, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        assert!(err.is_err());
    }

    #[test]
    fn find_program_address_returns_a_bump_in_range() {
        let seeds: [&[u8]; 1] = [b"test-seed"];
        let program_id = bs58::decode(ASSOCIATED_TOKEN_PROGRAM_ID).into_vec().unwrap();
        let (_addr, bump) = find_program_address(&seeds, &program_id).unwrap();
        assert!(bump <= 255);
    }
}
