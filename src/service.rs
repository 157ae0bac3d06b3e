// Service Wiring
//
// Builds a ready-to-use cache from configuration:
//   RPC transport + holders index + watchlist → MultiStrategy ─┐
//   Postgres repository ───────────────────────────────────────┼→ BalanceSlotCache
//   predefined records + snapshot directories ─────────────────┘

use crate::cache::BalanceSlotCache;
use crate::config::{load_predefined, Config};
use crate::holders::{CachedHoldersList, NatsWatchlist, PgHoldersList};
use crate::orchestrator::{BalanceSlotProbe, MultiStrategy};
use crate::repository::PgBalanceSlotRepository;
use crate::rpc::{AlloyTransport, RpcTransport};
use std::sync::Arc;
use tracing::info;

/// Connect every adapter named in `config` and build the cache. Nothing is
/// preloaded; call [`BalanceSlotCache::preload_all`] afterwards.
pub async fn build_cache(config: &Config) -> eyre::Result<BalanceSlotCache> {
    let transport: Arc<dyn RpcTransport> =
        Arc::new(AlloyTransport::connect_http(&config.rpc_url, config.rpc_timeout)?);

    let pool = PgBalanceSlotRepository::connect(&config.database_url).await?;
    let repository =
        PgBalanceSlotRepository::new(pool.clone(), config.chain_id, config.scan_page_size).await?;

    let store = PgHoldersList::new(pool, config.chain_id).await?;
    let holders = CachedHoldersList::new(Arc::new(store), config.holders_cache_ttl);
    let watchlist = NatsWatchlist::connect(&config.nats_url, config.chain_id).await?;
    let probe: Arc<dyn BalanceSlotProbe> = Arc::new(MultiStrategy::new(
        transport,
        config.fake_wallet,
        Arc::new(holders),
        Arc::new(watchlist),
    ));

    let mut builder = BalanceSlotCache::builder(config.chain_id, probe, Arc::new(repository));
    if let Some(path) = &config.predefined_path {
        let records = load_predefined(path)?;
        info!(path = %path.display(), records = records.len(), "loaded predefined balance slots");
        builder = builder.predefined(records);
    }
    for dir in [&config.preloaded_dir, &config.embedded_dir].into_iter().flatten() {
        builder = builder.snapshot_dir(dir);
    }

    info!(
        chain_id = config.chain_id,
        wallet = %config.fake_wallet,
        "balance slot cache ready"
    );
    Ok(builder.build())
}
