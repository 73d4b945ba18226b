//! Per-chain, per-network token contract/mint addresses configured for
//! the scan loop. BTC has none; BSC and SOL each carry USDC and USDT.

use crate::config::Network;
use crate::models::{Chain, TokenSymbol};

/// The tokens scanned/swept for a chain, empty for BTC.
pub fn tokens_for_chain(chain: Chain) -> &'static [TokenSymbol] {
    match chain {
        Chain::Btc => &[],
        Chain::Bsc | Chain::Sol => &[TokenSymbol::Usdc, TokenSymbol::Usdt],
    }
}

/// The BEP-20 contract / SPL mint address for a token on a chain+network.
/// Returns `None` for BTC or `TokenSymbol::Native`.
pub fn contract_or_mint(chain: Chain, network: Network, token: TokenSymbol) -> Option<&'static str> {
    match (chain, network, token) {
        (Chain::Bsc, Network::Mainnet, TokenSymbol::Usdc) => Some("0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"),
        (Chain::Bsc, Network::Mainnet, TokenSymbol::Usdt) => Some("0x55d398326f99059fF775485246999027B3197955"),
        (Chain::Bsc, Network::Testnet, TokenSymbol::Usdc) => Some("0x64544969ed7EBf5f083679233325356EbE738930"),
        (Chain::Bsc, Network::Testnet, TokenSymbol::Usdt) => Some("0x337610d27c682E347C9cD60BD4b3b107C9d34dDd"),
        (Chain::Sol, Network::Mainnet, TokenSymbol::Usdc) => Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        (Chain::Sol, Network::Mainnet, TokenSymbol::Usdt) => Some("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
        (Chain::Sol, Network::Testnet, TokenSymbol::Usdc) => Some("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"),
        (Chain::Sol, Network::Testnet, TokenSymbol::Usdt) => None,
        _ => None,
    }
}
