// NATS Watchlist Publisher
//
// Publishes tokens the holders indexer does not know yet.
// Subject: holders.watchlist.{chain_id}

use super::Watchlist;
use crate::types::token_key;
use alloy_primitives::Address;
use async_nats::Client;
use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Watchlist message, JSON encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistMessage {
    pub token: String, // lower-case hex
    pub chain_id: u64,
    pub ts: u64, // unix seconds
}

impl WatchlistMessage {
    pub fn new(token: Address, chain_id: u64) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            token: token_key(&token),
            chain_id,
            ts,
        }
    }
}

pub struct NatsWatchlist {
    client: Client,
    chain_id: u64,
}

impl NatsWatchlist {
    /// Connect to NATS server
    pub async fn connect(nats_url: &str, chain_id: u64) -> Result<Self> {
        let client = async_nats::connect(nats_url).await?;
        info!("Connected to NATS at {}", nats_url);
        Ok(Self { client, chain_id })
    }

    pub fn subject(&self) -> String {
        format!("holders.watchlist.{}", self.chain_id)
    }
}

#[async_trait]
impl Watchlist for NatsWatchlist {
    async fn notify(&self, token: Address) -> Result<()> {
        let message = WatchlistMessage::new(token, self.chain_id);
        let payload = serde_json::to_vec(&message)?;
        self.client.publish(self.subject(), payload.into()).await?;
        debug!(token = %token, subject = %self.subject(), "published watchlist entry");
        Ok(())
    }
}
