//! Balance-slot cache: the public entry point for consumers.
//!
//! Lookups go predefined table → in-memory records → a deduplicated probe.
//! Concurrent lookups of one token share a single in-flight probe and all
//! receive its outcome. Probed records are marked pending and reach the
//! repository only through [`BalanceSlotCache::commit_pending`].

use crate::error::{BalanceSlotError, Result};
use crate::orchestrator::BalanceSlotProbe;
use crate::repository::BalanceSlotRepository;
use crate::snapshot::{self, Snapshot};
use crate::strategy::ProbeExtraParams;
use crate::types::BalanceSlotRecord;
use alloy_primitives::Address;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedProbe = Shared<BoxFuture<'static, Result<Arc<BalanceSlotRecord>>>>;

/// Record counts from [`BalanceSlotCache::preload_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadStats {
    pub snapshot_records: usize,
    pub repository_records: usize,
    /// Distinct tokens in memory afterwards
    pub total: usize,
}

#[derive(Clone)]
pub struct BalanceSlotCache {
    inner: Arc<Inner>,
}

struct Inner {
    chain_id: u64,
    probe: Arc<dyn BalanceSlotProbe>,
    repository: Arc<dyn BalanceSlotRepository>,
    predefined: HashMap<Address, Arc<BalanceSlotRecord>>,
    /// Searched in order, later directories win.
    snapshot_dirs: Vec<PathBuf>,

    records: DashMap<Address, Arc<BalanceSlotRecord>>,
    /// token → generation of the write that made it pending
    pending: DashMap<Address, u64>,
    generation: AtomicU64,
    in_flight: DashMap<Address, SharedProbe>,
}

pub struct BalanceSlotCacheBuilder {
    chain_id: u64,
    probe: Arc<dyn BalanceSlotProbe>,
    repository: Arc<dyn BalanceSlotRepository>,
    predefined: HashMap<Address, Arc<BalanceSlotRecord>>,
    snapshot_dirs: Vec<PathBuf>,
}

impl BalanceSlotCacheBuilder {
    /// Operator-curated records. They are returned as-is and never probed or
    /// persisted.
    pub fn predefined(mut self, records: impl IntoIterator<Item = BalanceSlotRecord>) -> Self {
        self.predefined
            .extend(records.into_iter().map(|r| (r.token, Arc::new(r))));
        self
    }

    /// Directory holding `<chain_id>.bin` snapshots. May be called more than
    /// once; directories are loaded in call order.
    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dirs.push(dir.into());
        self
    }

    pub fn build(self) -> BalanceSlotCache {
        BalanceSlotCache {
            inner: Arc::new(Inner {
                chain_id: self.chain_id,
                probe: self.probe,
                repository: self.repository,
                predefined: self.predefined,
                snapshot_dirs: self.snapshot_dirs,
                records: DashMap::new(),
                pending: DashMap::new(),
                generation: AtomicU64::new(0),
                in_flight: DashMap::new(),
            }),
        }
    }
}

impl BalanceSlotCache {
    pub fn builder(
        chain_id: u64,
        probe: Arc<dyn BalanceSlotProbe>,
        repository: Arc<dyn BalanceSlotRepository>,
    ) -> BalanceSlotCacheBuilder {
        BalanceSlotCacheBuilder {
            chain_id,
            probe,
            repository,
            predefined: HashMap::new(),
            snapshot_dirs: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    /// Record for `token`, probing it if nothing conclusive is known yet.
    ///
    /// `pool_hint` is the pool the caller is simulating; it holds the token and
    /// serves as the balance source for DoubleFromSource. A record that ends up
    /// not found is cached but reported as [`BalanceSlotError::NotFound`].
    pub async fn get(
        &self,
        token: Address,
        pool_hint: Option<Address>,
    ) -> Result<Arc<BalanceSlotRecord>> {
        if let Some(record) = self.inner.predefined.get(&token) {
            return found_or_not_found(record.clone());
        }

        if let Some(record) = self.cached_found(&token) {
            return Ok(record);
        }

        let probe = match self.inner.in_flight.entry(token) {
            Entry::Occupied(entry) => {
                debug!(token = %token, "joining in-flight probe");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let extra = ProbeExtraParams::from_pool_hint(pool_hint);
                let probe = Inner::probe_and_store(self.inner.clone(), token, extra)
                    .boxed()
                    .shared();
                entry.insert(probe.clone());
                probe
            }
        };

        probe.await
    }

    /// Load snapshots, then the full repository, into memory. Later sources
    /// overwrite earlier ones.
    pub async fn preload_all(&self) -> Result<PreloadStats> {
        let inner = &self.inner;
        let mut stats = PreloadStats::default();

        for dir in &inner.snapshot_dirs {
            if let Some(records) = snapshot::load_for_chain(dir, inner.chain_id).await? {
                stats.snapshot_records += records.len();
                for (token, record) in records {
                    inner.records.insert(token, Arc::new(record));
                }
            }
        }

        let stored = inner
            .repository
            .get_all()
            .await
            .map_err(BalanceSlotError::repository)?;
        stats.repository_records = stored.len();
        for (token, record) in stored {
            inner.records.insert(token, Arc::new(record));
        }

        stats.total = inner.records.len();
        info!(
            chain_id = inner.chain_id,
            snapshot = stats.snapshot_records,
            repository = stats.repository_records,
            total = stats.total,
            "preloaded balance slots"
        );
        Ok(stats)
    }

    /// Write every pending record to the repository.
    ///
    /// Entries leave the pending set only after a successful write, and only
    /// if they were not replaced by a newer probe in the meantime. Returns the
    /// number of records written.
    pub async fn commit_pending(&self) -> Result<usize> {
        let inner = &self.inner;

        let marks: Vec<(Address, u64)> = inner
            .pending
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        let mut batch = Vec::with_capacity(marks.len());
        let mut written = Vec::with_capacity(marks.len());
        for (token, generation) in marks {
            match inner.records.get(&token) {
                Some(record) => {
                    batch.push(record.as_ref().clone());
                    written.push((token, generation));
                }
                None => {
                    inner.pending.remove_if(&token, |_, g| *g == generation);
                }
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = inner.repository.put_many(&batch).await {
            warn!(count = batch.len(), error = %e, "failed to commit balance slots");
            return Err(BalanceSlotError::repository(e));
        }

        for (token, generation) in &written {
            inner.pending.remove_if(token, |_, g| g == generation);
        }
        info!(count = batch.len(), remaining = inner.pending.len(), "committed balance slots");
        Ok(batch.len())
    }

    /// Tokens with a record in memory.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Copy of the in-memory records, e.g. to build a snapshot.
    pub fn records(&self) -> Snapshot {
        self.inner
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().as_ref().clone()))
            .collect()
    }

    fn cached_found(&self, token: &Address) -> Option<Arc<BalanceSlotRecord>> {
        self.inner
            .records
            .get(token)
            .filter(|record| record.is_terminal())
            .map(|record| Arc::clone(record.value()))
    }
}

impl Inner {
    async fn probe_and_store(
        self: Arc<Self>,
        token: Address,
        extra: ProbeExtraParams,
    ) -> Result<Arc<BalanceSlotRecord>> {
        let outcome = self.clone().probe_once(token, extra).await;
        self.in_flight.remove(&token);
        outcome
    }

    async fn probe_once(
        self: Arc<Self>,
        token: Address,
        extra: ProbeExtraParams,
    ) -> Result<Arc<BalanceSlotRecord>> {
        let prior = self.records.get(&token).map(|r| Arc::clone(r.value()));
        // A probe that finished just before this one was registered.
        if let Some(record) = prior.as_ref().filter(|r| r.is_terminal()) {
            return Ok(record.clone());
        }

        let record = Arc::new(self.probe.probe(token, prior.as_deref(), &extra).await?);
        self.records.insert(token, record.clone());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.insert(token, generation);

        found_or_not_found(record)
    }
}

fn found_or_not_found(record: Arc<BalanceSlotRecord>) -> Result<Arc<BalanceSlotRecord>> {
    if record.found {
        Ok(record)
    } else {
        Err(BalanceSlotError::NotFound(record.token))
    }
}
