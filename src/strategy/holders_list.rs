//! HoldersList: fall back to real holders from an external index.

use crate::error::{BalanceSlotError, Result};
use crate::holders::{HoldersError, HoldersList, Watchlist};
use crate::types::BalanceSlotRecord;
use alloy_primitives::Address;
use std::sync::Arc;
use tracing::{info, warn};

pub const NAME: &str = "holders_list";

pub struct HoldersListStrategy {
    holders: Arc<dyn HoldersList>,
    watchlist: Arc<dyn Watchlist>,
}

impl HoldersListStrategy {
    pub fn new(holders: Arc<dyn HoldersList>, watchlist: Arc<dyn Watchlist>) -> Self {
        Self { holders, watchlist }
    }

    pub async fn probe(&self, token: Address) -> Result<BalanceSlotRecord> {
        info!(strategy = NAME, token = %token, "probing holders list");

        match self.holders.get(token).await {
            Ok(holders) if !holders.is_empty() => {
                info!(strategy = NAME, token = %token, holders = holders.len(), "found holders");
                Ok(BalanceSlotRecord::with_holders(token, holders))
            }
            Ok(_) | Err(HoldersError::NotFound(_)) => {
                if let Err(e) = self.watchlist.notify(token).await {
                    warn!(token = %token, error = %e, "failed to add token to holders watchlist");
                }
                Err(BalanceSlotError::could_not_probe(
                    NAME,
                    format!("no holders indexed for {token:#x}"),
                ))
            }
            Err(HoldersError::Store(e)) => Err(BalanceSlotError::Repository(e)),
        }
    }
}
