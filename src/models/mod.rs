use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three blockchains HDPay derives addresses on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Chain {
    Btc,
    Bsc,
    Sol,
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chain::Btc => write!(f, "BTC"),
            Chain::Bsc => write!(f, "BSC"),
            Chain::Sol => write!(f, "SOL"),
        }
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" => Ok(Chain::Btc),
            "BSC" => Ok(Chain::Bsc),
            "SOL" => Ok(Chain::Sol),
            _ => Err(format!("invalid chain: {}", s)),
        }
    }
}

/// Balance/transfer token symbol. Every chain supports `Native`; BSC and SOL
/// additionally support the two stablecoins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TokenSymbol {
    Native,
    Usdc,
    Usdt,
}

impl std::fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSymbol::Native => write!(f, "NATIVE"),
            TokenSymbol::Usdc => write!(f, "USDC"),
            TokenSymbol::Usdt => write!(f, "USDT"),
        }
    }
}

impl FromStr for TokenSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NATIVE" => Ok(TokenSymbol::Native),
            "USDC" => Ok(TokenSymbol::Usdc),
            "USDT" => Ok(TokenSymbol::Usdt),
            _ => Err(format!("invalid token symbol: {}", s)),
        }
    }
}

/// Lifecycle state of a per-chain scan, persisted in `scan_state.status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Scanning,
    Completed,
    Failed,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Idle => write!(f, "idle"),
            ScanStatus::Scanning => write!(f, "scanning"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ScanStatus::Idle),
            "scanning" => Ok(ScanStatus::Scanning),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(format!("invalid scan status: {}", s)),
        }
    }
}

/// Status lattice for an in-flight sweep transaction (`tx_state.status`).
/// Terminal states `{Confirmed, Failed, Dismissed}` never change once set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Broadcasting,
    Confirming,
    Confirmed,
    Failed,
    Uncertain,
    Dismissed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::Dismissed)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Broadcasting => "broadcasting",
            TxStatus::Confirming => "confirming",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Uncertain => "uncertain",
            TxStatus::Dismissed => "dismissed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "broadcasting" => Ok(TxStatus::Broadcasting),
            "confirming" => Ok(TxStatus::Confirming),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            "uncertain" => Ok(TxStatus::Uncertain),
            "dismissed" => Ok(TxStatus::Dismissed),
            _ => Err(format!("invalid tx status: {}", s)),
        }
    }
}

/// Three-state circuit breaker state, mirrored into `provider_health.circuit_state`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("invalid circuit state: {}", s)),
        }
    }
}

/// Provider health summary surfaced for observability (`provider_health.status`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderStatus::Healthy => write!(f, "healthy"),
            ProviderStatus::Degraded => write!(f, "degraded"),
            ProviderStatus::Down => write!(f, "down"),
        }
    }
}

impl FromStr for ProviderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(ProviderStatus::Healthy),
            "degraded" => Ok(ProviderStatus::Degraded),
            "down" => Ok(ProviderStatus::Down),
            _ => Err(format!("invalid provider status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_round_trips_through_display_and_fromstr() {
        for chain in [Chain::Btc, Chain::Bsc, Chain::Sol] {
            let s = chain.to_string();
            assert_eq!(Chain::from_str(&s).unwrap(), chain);
        }
    }

    #[test]
    fn tx_status_terminal_states() {
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Dismissed.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Uncertain.is_terminal());
    }
}
