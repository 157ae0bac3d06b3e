use super::{HoldersError, HoldersList};
use crate::types::token_key;
use alloy_primitives::Address;
use async_trait::async_trait;
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{info, warn};

/// Holders index stored in Postgres, one row per (chain, token).
pub struct PgHoldersList {
    pool: PgPool,
    chain_id: u64,
}

impl PgHoldersList {
    pub async fn new(pool: PgPool, chain_id: u64) -> eyre::Result<Self> {
        let list = Self { pool, chain_id };
        list.init_schema().await?;
        Ok(list)
    }

    async fn init_schema(&self) -> eyre::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_holders (
                chain_id    BIGINT NOT NULL,
                token       TEXT NOT NULL,
                holders     TEXT[] NOT NULL DEFAULT '{}',
                updated_at  BIGINT NOT NULL DEFAULT 0,
                CONSTRAINT token_holders_pkey PRIMARY KEY (chain_id, token)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Holders schema initialized");
        Ok(())
    }
}

#[async_trait]
impl HoldersList for PgHoldersList {
    async fn get(&self, token: Address) -> Result<Vec<Address>, HoldersError> {
        let row: Option<Vec<String>> = sqlx::query_scalar(
            "SELECT holders FROM token_holders WHERE chain_id = $1 AND token = $2",
        )
        .bind(self.chain_id as i64)
        .bind(token_key(&token))
        .fetch_optional(&self.pool)
        .await
        .map_err(HoldersError::store)?;

        let Some(raw) = row else {
            return Err(HoldersError::NotFound(token));
        };

        let mut holders = Vec::with_capacity(raw.len());
        for holder in &raw {
            match Address::from_str(holder) {
                Ok(address) => holders.push(address),
                Err(e) => warn!(token = %token, holder = %holder, error = %e, "skipping malformed holder"),
            }
        }
        Ok(holders)
    }
}
