// Balance Slot Repository
//
// Durable store of probed records, one logical hash table per chain keyed by
// the lower-cased token address. Reads are paginated scans, writes are
// idempotent upserts, so a failed flush can simply be retried.

use crate::types::{token_key, BalanceSlotRecord};
use alloy_primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Rows per upsert statement (4 binds per row).
const UPSERT_CHUNK: usize = 500;

#[async_trait]
pub trait BalanceSlotRepository: Send + Sync {
    /// Every record stored for this repository's chain.
    async fn get_all(&self) -> eyre::Result<BTreeMap<Address, BalanceSlotRecord>>;

    /// Insert or replace `records`. All-or-nothing from the caller's view: an
    /// error means none of them may be considered written.
    async fn put_many(&self, records: &[BalanceSlotRecord]) -> eyre::Result<()>;
}

pub struct PgBalanceSlotRepository {
    pool: PgPool,
    chain_id: u64,
    page_size: usize,
}

impl PgBalanceSlotRepository {
    pub async fn connect(database_url: &str) -> eyre::Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(pool)
    }

    pub async fn new(pool: PgPool, chain_id: u64, page_size: usize) -> eyre::Result<Self> {
        let repo = Self {
            pool,
            chain_id,
            page_size: page_size.max(1),
        };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> eyre::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS erc20_balance_slots (
                chain_id    BIGINT NOT NULL,
                token       TEXT NOT NULL,
                record      JSONB NOT NULL,
                updated_at  BIGINT NOT NULL,
                CONSTRAINT erc20_balance_slots_pkey PRIMARY KEY (chain_id, token)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Balance slot schema initialized");
        Ok(())
    }
}

#[async_trait]
impl BalanceSlotRepository for PgBalanceSlotRepository {
    /// Keyset pagination on `token`, so tables of any size are read in
    /// bounded pages.
    async fn get_all(&self) -> eyre::Result<BTreeMap<Address, BalanceSlotRecord>> {
        let mut records = BTreeMap::new();
        let mut cursor = String::new();

        loop {
            let page: Vec<(String, Json<BalanceSlotRecord>)> = sqlx::query_as(
                r#"
                SELECT token, record FROM erc20_balance_slots
                WHERE chain_id = $1 AND token > $2
                ORDER BY token
                LIMIT $3
                "#,
            )
            .bind(self.chain_id as i64)
            .bind(&cursor)
            .bind(self.page_size as i64)
            .fetch_all(&self.pool)
            .await?;

            let fetched = page.len();
            for (token, Json(record)) in page {
                records.insert(record.token, record);
                cursor = token;
            }
            debug!(chain_id = self.chain_id, fetched, total = records.len(), "scanned balance slot page");

            if fetched < self.page_size {
                break;
            }
        }

        Ok(records)
    }

    async fn put_many(&self, records: &[BalanceSlotRecord]) -> eyre::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        // One transaction so a failed chunk leaves nothing half-written.
        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(UPSERT_CHUNK) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO erc20_balance_slots (chain_id, token, record, updated_at) ",
            );

            qb.push_values(chunk, |mut b, r| {
                b.push_bind(self.chain_id as i64)
                    .push_bind(r.key())
                    .push_bind(Json(r))
                    .push_bind(now);
            });

            qb.push(
                " ON CONFLICT (chain_id, token) DO UPDATE SET record = EXCLUDED.record, updated_at = EXCLUDED.updated_at",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(chain_id = self.chain_id, count = records.len(), "upserted balance slots");
        Ok(())
    }
}

/// Process-local repository, for tests and for running without a database.
#[derive(Default)]
pub struct MemoryBalanceSlotRepository {
    records: DashMap<String, BalanceSlotRecord>,
}

impl MemoryBalanceSlotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, token: &Address) -> Option<BalanceSlotRecord> {
        self.records.get(&token_key(token)).map(|r| r.clone())
    }
}

#[async_trait]
impl BalanceSlotRepository for MemoryBalanceSlotRepository {
    async fn get_all(&self) -> eyre::Result<BTreeMap<Address, BalanceSlotRecord>> {
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.token, entry.value().clone()))
            .collect())
    }

    async fn put_many(&self, records: &[BalanceSlotRecord]) -> eyre::Result<()> {
        for record in records {
            self.records.insert(record.key(), record.clone());
        }
        Ok(())
    }
}
