//! Helpers that turn raw traces into what the probing strategies need.

use super::{CallParams, RpcTransport, TraceResult, TracerSpec};
use crate::abi;
use crate::types::{SlotMap, StorageOverrides};
use alloy_primitives::{Address, U256};
use eyre::{eyre, Result};

/// Storage reads performed by `balanceOf(wallet)` against the token itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceOfTrace {
    /// Value returned by `balanceOf`
    pub balance: U256,
    /// Unique slots read from the token contract → value at first read
    pub reads: SlotMap,
}

/// Trace `balanceOf(wallet)` and keep the unique SLOADs against `token`.
///
/// Reads from other contracts (proxies delegating storage elsewhere, oracles)
/// are dropped since an override on them is not an override of the token.
pub async fn balance_of_reads(
    transport: &dyn RpcTransport,
    block: u64,
    token: Address,
    wallet: Address,
) -> Result<BalanceOfTrace> {
    let call = CallParams::new(Address::ZERO, token, abi::encode_balance_of(wallet));
    let trace = match transport
        .debug_trace_call(&call, block, TracerSpec::StorageReads, &StorageOverrides::new())
        .await?
    {
        TraceResult::StorageReads(trace) => trace,
        TraceResult::StateDiff(_) => return Err(eyre!("expected a storage read trace")),
    };

    let mut reads = SlotMap::new();
    for read in trace.reads.into_iter().filter(|r| r.address == token) {
        reads.entry(read.slot).or_insert(read.value);
    }

    Ok(BalanceOfTrace {
        balance: abi::decode_uint(&trace.output),
        reads,
    })
}

/// Storage of `contract` before and after `call`.
pub async fn contract_storage_diff(
    transport: &dyn RpcTransport,
    call: &CallParams,
    block: u64,
    overrides: &StorageOverrides,
    contract: Address,
) -> Result<(SlotMap, SlotMap)> {
    let mut diff = match transport
        .debug_trace_call(call, block, TracerSpec::PrestateDiff, overrides)
        .await?
    {
        TraceResult::StateDiff(diff) => diff,
        TraceResult::StorageReads(_) => return Err(eyre!("expected a prestate diff trace")),
    };

    let pre = diff.pre.remove(&contract).unwrap_or_default();
    let post = diff.post.remove(&contract).unwrap_or_default();
    Ok((pre, post))
}
