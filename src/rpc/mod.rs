//! JSON-RPC transport boundary.
//!
//! Probing only needs three node capabilities: the latest block number,
//! `eth_call` with storage overrides, and `debug_traceCall` with either a
//! storage-read tracer or the prestate tracer in diff mode. Every call is a pure
//! function of its inputs, the transport keeps no state between calls.

mod provider;
pub mod trace;

pub use provider::AlloyTransport;

use crate::types::{SlotMap, StorageOverrides};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Gas limit for every simulated call.
pub const GAS_LIMIT: u64 = 10_000_000;

/// Geth JS tracer that records every SLOAD together with the loaded value.
///
/// The loaded value is only on the stack at the step after the SLOAD, so the
/// pending read is completed on the next step.
pub const STORAGE_READ_TRACER: &str = r#"{
    reads: [],
    pending: null,
    step: function(log, db) {
        if (this.pending !== null) {
            this.pending.value = '0x' + log.stack.peek(0).toString(16);
            this.reads.push(this.pending);
            this.pending = null;
        }
        if (log.op.toString() === 'SLOAD') {
            this.pending = {
                address: toHex(log.contract.getAddress()),
                slot: '0x' + log.stack.peek(0).toString(16)
            };
        }
    },
    fault: function(log, db) {},
    result: function(ctx, db) {
        return { reads: this.reads, output: toHex(ctx.output) };
    }
}"#;

/// A simulated message call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParams {
    pub from: Address,
    pub to: Address,
    pub gas: u64,
    pub data: Bytes,
}

impl CallParams {
    pub fn new(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to,
            gas: GAS_LIMIT,
            data,
        }
    }
}

/// Which tracer `debug_traceCall` should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerSpec {
    /// [`STORAGE_READ_TRACER`]
    StorageReads,
    /// Built-in `prestateTracer` with `diffMode: true`
    PrestateDiff,
}

/// One SLOAD observed while tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRead {
    pub address: Address,
    pub slot: B256,
    pub value: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadTrace {
    pub reads: Vec<StorageRead>,
    pub output: Bytes,
}

/// Storage before and after a call, per touched contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    pub pre: BTreeMap<Address, SlotMap>,
    pub post: BTreeMap<Address, SlotMap>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceResult {
    StorageReads(ReadTrace),
    StateDiff(StateDiff),
}

/// The node executed the call and it reverted.
///
/// Transports return this inside the `eyre::Report` so strategies can tell a
/// contract rejecting a call apart from an unreachable or misbehaving node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution reverted: {reason}")]
pub struct CallReverted {
    pub reason: String,
}

impl CallReverted {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Whether `err` is a [`CallReverted`] rather than a transport failure.
pub fn is_revert(err: &eyre::Report) -> bool {
    err.downcast_ref::<CallReverted>().is_some()
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn block_number(&self) -> eyre::Result<u64>;

    /// `eth_call` at `block`. Empty `overrides` means no state override.
    /// A revert is reported as [`CallReverted`].
    async fn eth_call(
        &self,
        call: &CallParams,
        block: u64,
        overrides: &StorageOverrides,
    ) -> eyre::Result<Bytes>;

    async fn debug_trace_call(
        &self,
        call: &CallParams,
        block: u64,
        tracer: TracerSpec,
        overrides: &StorageOverrides,
    ) -> eyre::Result<TraceResult>;
}
