//! Multi-strategy orchestration with memory of prior attempts.

use crate::error::{BalanceSlotError, Result};
use crate::holders::{HoldersList, Watchlist};
use crate::rpc::RpcTransport;
use crate::strategy::{
    DoubleFromSourceStrategy, HoldersListStrategy, ProbeExtraParams, Strategy,
    WholeSlotStrategy, WholeSlotWithFStrategy,
};
use crate::types::BalanceSlotRecord;
use alloy_primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces a record for a token, given what earlier rounds already tried.
#[async_trait]
pub trait BalanceSlotProbe: Send + Sync {
    /// Runs every strategy not listed in `prior.strategies_attempted`, stopping
    /// at the first success. Exhausting them yields a `found == false` record.
    ///
    /// Returns [`BalanceSlotError::NoMoreStrategies`] when nothing is left to
    /// try.
    async fn probe(
        &self,
        token: Address,
        prior: Option<&BalanceSlotRecord>,
        extra: &ProbeExtraParams,
    ) -> Result<BalanceSlotRecord>;
}

/// Fixed, ordered list of strategies.
pub struct MultiStrategy {
    strategies: Vec<Strategy>,
}

impl MultiStrategy {
    /// WholeSlot, WholeSlotWithF, DoubleFromSource, then HoldersList as the
    /// last resort.
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        wallet: Address,
        holders: Arc<dyn HoldersList>,
        watchlist: Arc<dyn Watchlist>,
    ) -> Self {
        Self::from_strategies(vec![
            Strategy::WholeSlot(WholeSlotStrategy::new(transport.clone(), wallet)),
            Strategy::WholeSlotWithF(WholeSlotWithFStrategy::new(transport.clone(), wallet)),
            Strategy::DoubleFromSource(DoubleFromSourceStrategy::new(transport)),
            Strategy::HoldersList(HoldersListStrategy::new(holders, watchlist)),
        ])
    }

    pub fn from_strategies(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }
}

#[async_trait]
impl BalanceSlotProbe for MultiStrategy {
    async fn probe(
        &self,
        token: Address,
        prior: Option<&BalanceSlotRecord>,
        extra: &ProbeExtraParams,
    ) -> Result<BalanceSlotRecord> {
        let pending: Vec<(&Strategy, String)> = self
            .strategies
            .iter()
            .filter_map(|strategy| strategy.name(extra).map(|name| (strategy, name)))
            .filter(|(_, name)| !prior.is_some_and(|record| record.has_attempted(name)))
            .collect();

        let mut attempted = prior
            .map(|record| record.strategies_attempted.clone())
            .unwrap_or_default();

        if pending.is_empty() {
            debug!(token = %token, "all strategies already attempted");
            return Err(BalanceSlotError::NoMoreStrategies(token));
        }

        for (strategy, name) in pending {
            attempted.push(name.clone());

            match strategy.probe(token, extra).await {
                Ok(mut record) => {
                    record.strategies_attempted = attempted;
                    return Ok(record);
                }
                Err(e @ BalanceSlotError::Transport(_)) => {
                    // Recorded anyway; a transient failure burns this strategy for the token.
                    warn!(token = %token, strategy = %name, error = %e, "strategy failed on transport error");
                }
                Err(e) => {
                    info!(token = %token, strategy = %name, error = %e, "strategy failed");
                }
            }
        }

        info!(token = %token, attempted = ?attempted, "all strategies failed");
        Ok(BalanceSlotRecord {
            strategies_attempted: attempted,
            ..BalanceSlotRecord::unresolved(token)
        })
    }
}
