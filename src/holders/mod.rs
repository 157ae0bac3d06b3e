// Holders Index and Watchlist
//
// The holders index maps a token to real addresses known to hold it. It is
// populated out of band; tokens it does not know yet are pushed onto the
// watchlist so the indexer picks them up.

mod cache;
mod postgres;
mod watchlist;

pub use cache::CachedHoldersList;
pub use postgres::PgHoldersList;
pub use watchlist::{NatsWatchlist, WatchlistMessage};

use alloy_primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HoldersError {
    /// The index has no entry for this token yet.
    #[error("no holders indexed for token {0:#x}")]
    NotFound(Address),

    #[error("holders store: {0}")]
    Store(Arc<eyre::Report>),
}

impl HoldersError {
    pub fn store(err: impl Into<eyre::Report>) -> Self {
        Self::Store(Arc::new(err.into()))
    }
}

/// Read access to the holders index.
#[async_trait]
pub trait HoldersList: Send + Sync {
    async fn get(&self, token: Address) -> Result<Vec<Address>, HoldersError>;
}

/// Publish-only queue of tokens the holders indexer should pick up.
#[async_trait]
pub trait Watchlist: Send + Sync {
    async fn notify(&self, token: Address) -> eyre::Result<()>;
}
