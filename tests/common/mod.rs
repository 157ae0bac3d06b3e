// Shared test doubles
//
// `MockToken` is an in-memory ERC-20 served through `RpcTransport`. It honours
// storage overrides, reports SLOADs for the read tracer and pre/post storage for
// the prestate diff tracer, so strategies run against it unchanged.

#![allow(dead_code)]

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use erc20_balance_slot::holders::{HoldersError, HoldersList, Watchlist};
use erc20_balance_slot::rpc::{
    CallParams, CallReverted, ReadTrace, RpcTransport, StateDiff, StorageRead, TraceResult,
    TracerSpec,
};
use erc20_balance_slot::{MultiStrategy, SlotMap, StorageOverrides};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub const BLOCK: u64 = 19_000_000;
pub const TOTAL_SUPPLY_SLOT: B256 = B256::ZERO;
/// Pause flag read by `Accounting::Pausable`.
pub const PAUSED_SLOT: B256 = B256::with_last_byte(1);
/// Largest balance `Capped` and `Saturating` tokens let a holder reach.
pub const BALANCE_CAP: u64 = 10_000;
const BALANCES_SLOT: u8 = 2;
const MIRROR_SLOT: u8 = 3;

const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the mock maps storage to balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accounting {
    /// `balances[holder]` is the balance.
    Plain,
    /// `balances[holder]` holds shares, balance = shares * 3 / 1000. Reverts on overflow.
    Shares,
    /// Balance kept in two mappings, `balanceOf` returns the larger one.
    Mirrored,
    /// Every call reverts.
    Broken,
    /// `balanceOf` reads a pause flag first and reverts while it is set.
    Pausable,
    /// A transfer reverts when the recipient would exceed [`BALANCE_CAP`].
    Capped,
    /// The recipient's balance is clamped at [`BALANCE_CAP`].
    Saturating,
    /// Balance = `U256::MAX - raw`, decreasing in the slot value. Transfers revert.
    Inverted,
}

pub struct MockToken {
    pub address: Address,
    pub accounting: Accounting,
    storage: SlotMap,
    calls: AtomicUsize,
}

fn mapping_slot(holder: Address, base: u8) -> B256 {
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(holder.as_slice());
    preimage[63] = base;
    keccak256(preimage)
}

fn word(value: U256) -> Bytes {
    Bytes::copy_from_slice(B256::from(value).as_slice())
}

impl MockToken {
    pub fn new(address: Address, accounting: Accounting) -> Self {
        let mut storage = SlotMap::new();
        storage.insert(TOTAL_SUPPLY_SLOT, B256::from(U256::from(1_000_000_000u64)));
        Self {
            address,
            accounting,
            storage,
            calls: AtomicUsize::new(0),
        }
    }

    /// Give `holder` a raw slot value (balance or shares).
    pub fn with_holder(mut self, holder: Address, value: u64) -> Self {
        let value = B256::from(U256::from(value));
        self.storage.insert(self.balance_slot(holder), value);
        if self.accounting == Accounting::Mirrored {
            self.storage.insert(mapping_slot(holder, MIRROR_SLOT), value);
        }
        self
    }

    pub fn balance_slot(&self, holder: Address) -> B256 {
        mapping_slot(holder, BALANCES_SLOT)
    }

    /// Transport calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn load(&self, overrides: &StorageOverrides, slot: B256) -> U256 {
        let value = overrides
            .get(&self.address)
            .and_then(|slots| slots.get(&slot))
            .or_else(|| self.storage.get(&slot))
            .copied()
            .unwrap_or_default();
        U256::from_be_bytes(value.0)
    }

    fn holder_slots(&self, holder: Address) -> Vec<B256> {
        match self.accounting {
            Accounting::Mirrored => vec![
                mapping_slot(holder, BALANCES_SLOT),
                mapping_slot(holder, MIRROR_SLOT),
            ],
            _ => vec![mapping_slot(holder, BALANCES_SLOT)],
        }
    }

    /// `balanceOf(owner)` plus the SLOADs it performed.
    pub fn balance_of(
        &self,
        owner: Address,
        overrides: &StorageOverrides,
    ) -> eyre::Result<(U256, Vec<StorageRead>)> {
        let mut reads = Vec::new();
        let mut read = |slot: B256| {
            let value = self.load(overrides, slot);
            reads.push(StorageRead {
                address: self.address,
                slot,
                value: B256::from(value),
            });
            value
        };

        read(TOTAL_SUPPLY_SLOT);
        let balance = match self.accounting {
            Accounting::Broken => eyre::bail!("execution reverted"),
            Accounting::Plain | Accounting::Capped | Accounting::Saturating => {
                read(self.balance_slot(owner))
            }
            Accounting::Inverted => U256::MAX - read(self.balance_slot(owner)),
            Accounting::Pausable => {
                if !read(PAUSED_SLOT).is_zero() {
                    eyre::bail!("execution reverted: paused");
                }
                read(self.balance_slot(owner))
            }
            Accounting::Shares => {
                let shares = read(self.balance_slot(owner));
                shares
                    .checked_mul(U256::from(3u64))
                    .ok_or_else(|| eyre::eyre!("execution reverted: arithmetic overflow"))?
                    / U256::from(1000u64)
            }
            Accounting::Mirrored => {
                let a = read(mapping_slot(owner, BALANCES_SLOT));
                let b = read(mapping_slot(owner, MIRROR_SLOT));
                a.max(b)
            }
        };
        Ok((balance, reads))
    }

    /// Simulated `transfer`, returning (pre, post) storage of touched slots.
    /// Zero values are left out as the prestate tracer does.
    fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
        overrides: &StorageOverrides,
    ) -> eyre::Result<(SlotMap, SlotMap)> {
        if self.accounting == Accounting::Inverted {
            eyre::bail!("execution reverted: transfers disabled");
        }
        let (balance, _) = self.balance_of(from, overrides)?;
        if balance < amount {
            eyre::bail!("execution reverted: transfer amount exceeds balance");
        }

        let units = match self.accounting {
            Accounting::Shares => amount * U256::from(1000u64) / U256::from(3u64),
            _ => amount,
        };

        let mut pre = SlotMap::new();
        let mut post = SlotMap::new();
        let mut touch = |slot: B256, before: U256, after: U256| {
            if !before.is_zero() {
                pre.insert(slot, B256::from(before));
            }
            if !after.is_zero() {
                post.insert(slot, B256::from(after));
            }
        };

        for slot in self.holder_slots(from) {
            let before = self.load(overrides, slot);
            let after = before.saturating_sub(units);
            touch(slot, before, after);
        }
        let cap = U256::from(BALANCE_CAP);
        for slot in self.holder_slots(to) {
            let before = self.load(overrides, slot);
            let mut after = before
                .checked_add(units)
                .ok_or_else(|| eyre::eyre!("execution reverted: arithmetic overflow"))?;
            match self.accounting {
                Accounting::Capped if after > cap => {
                    eyre::bail!("execution reverted: recipient balance above cap")
                }
                Accounting::Saturating => after = after.min(cap),
                _ => {}
            }
            touch(slot, before, after);
        }
        Ok((pre, post))
    }

    fn decode(&self, call: &CallParams) -> eyre::Result<Call> {
        if call.to != self.address {
            eyre::bail!("no code at {:#x}", call.to);
        }
        let data = &call.data;
        if data.len() < 36 {
            eyre::bail!("execution reverted: short calldata");
        }
        let arg0 = Address::from_slice(&data[16..36]);
        match <[u8; 4]>::try_from(&data[..4])? {
            BALANCE_OF => Ok(Call::BalanceOf(arg0)),
            TRANSFER if data.len() >= 68 => {
                Ok(Call::Transfer(arg0, U256::from_be_slice(&data[36..68])))
            }
            _ => eyre::bail!("execution reverted: unknown selector"),
        }
    }
}

enum Call {
    BalanceOf(Address),
    Transfer(Address, U256),
}

#[async_trait]
impl RpcTransport for MockToken {
    async fn block_number(&self) -> eyre::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BLOCK)
    }

    async fn eth_call(
        &self,
        call: &CallParams,
        block: u64,
        overrides: &StorageOverrides,
    ) -> eyre::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(block, BLOCK);
        let result = match self.decode(call) {
            Ok(Call::BalanceOf(owner)) => self
                .balance_of(owner, overrides)
                .map(|(balance, _)| word(balance)),
            Ok(Call::Transfer(to, amount)) => self
                .transfer(call.from, to, amount, overrides)
                .map(|_| word(U256::from(1u64))),
            Err(e) => Err(e),
        };
        // The node answers a failing call with an error response.
        result.map_err(|e| CallReverted::new(e.to_string()).into())
    }

    async fn debug_trace_call(
        &self,
        call: &CallParams,
        block: u64,
        tracer: TracerSpec,
        overrides: &StorageOverrides,
    ) -> eyre::Result<TraceResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(block, BLOCK);
        match (tracer, self.decode(call)?) {
            (TracerSpec::StorageReads, Call::BalanceOf(owner)) => {
                let (balance, reads) = self.balance_of(owner, overrides)?;
                Ok(TraceResult::StorageReads(ReadTrace {
                    reads,
                    output: word(balance),
                }))
            }
            (TracerSpec::PrestateDiff, Call::Transfer(to, amount)) => {
                let (pre, post) = self.transfer(call.from, to, amount, overrides)?;
                Ok(TraceResult::StateDiff(StateDiff {
                    pre: BTreeMap::from([(self.address, pre)]),
                    post: BTreeMap::from([(self.address, post)]),
                }))
            }
            _ => eyre::bail!("unsupported trace"),
        }
    }
}

/// Holders index double: `Some` is a hit, `None` a miss.
pub struct FixedHolders(pub Option<Vec<Address>>);

#[async_trait]
impl HoldersList for FixedHolders {
    async fn get(&self, token: Address) -> Result<Vec<Address>, HoldersError> {
        self.0.clone().ok_or(HoldersError::NotFound(token))
    }
}

/// Watchlist double that remembers every notified token.
#[derive(Default)]
pub struct RecordingWatchlist {
    pub notified: Mutex<Vec<Address>>,
}

#[async_trait]
impl Watchlist for RecordingWatchlist {
    async fn notify(&self, token: Address) -> eyre::Result<()> {
        self.notified.lock().unwrap().push(token);
        Ok(())
    }
}

/// Standard strategy ordering over `token` with an empty holders index.
pub fn multi_strategy(token: Arc<MockToken>, wallet: Address) -> MultiStrategy {
    MultiStrategy::new(
        token,
        wallet,
        Arc::new(FixedHolders(None)),
        Arc::new(RecordingWatchlist::default()),
    )
}
