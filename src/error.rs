//! Error taxonomy for balance-slot probing.
//!
//! Errors are `Clone` because a coalesced probe hands the same outcome to every
//! waiter. Opaque adapter errors are kept behind an `Arc`.

use alloy_primitives::Address;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BalanceSlotError {
    /// The RPC node failed or returned something we could not decode.
    #[error("rpc transport: {0}")]
    Transport(Arc<eyre::Report>),

    /// A strategy ran but the evidence was missing or ambiguous.
    #[error("[{strategy}] could not probe: {reason}")]
    CouldNotProbe {
        strategy: &'static str,
        reason: String,
    },

    /// Every strategy has already been attempted for this token.
    #[error("no more strategies to try for token {0:#x}")]
    NoMoreStrategies(Address),

    /// Probing finished without finding a usable balance override.
    #[error("balance slot not found for token {0:#x}")]
    NotFound(Address),

    #[error("repository: {0}")]
    Repository(Arc<eyre::Report>),

    #[error("snapshot: {0}")]
    Snapshot(String),
}

impl BalanceSlotError {
    pub fn transport(err: impl Into<eyre::Report>) -> Self {
        Self::Transport(Arc::new(err.into()))
    }

    pub fn repository(err: impl Into<eyre::Report>) -> Self {
        Self::Repository(Arc::new(err.into()))
    }

    pub fn could_not_probe(strategy: &'static str, reason: impl Into<String>) -> Self {
        Self::CouldNotProbe {
            strategy,
            reason: reason.into(),
        }
    }

    /// True for the errors that carry no new information about the token
    /// (exhaustion or a cached not-found outcome).
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::NoMoreStrategies(_) | Self::NotFound(_))
    }
}

pub type Result<T, E = BalanceSlotError> = std::result::Result<T, E>;
