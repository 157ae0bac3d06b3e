// Alloy-backed RPC transport
//
// Wraps any alloy `Provider` (the debug namespace comes from `DebugApi`) and
// bounds each request with a timeout.

use super::{
    CallParams, CallReverted, ReadTrace, RpcTransport, StateDiff, StorageRead, TraceResult, TracerSpec,
    STORAGE_READ_TRACER,
};
use crate::types::{SlotMap, StorageOverrides};
use alloy_primitives::{Address, Bytes, U256, B256};
use alloy_provider::{ext::DebugApi, DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{
    state::{AccountOverride, StateOverride, StateOverridesBuilder},
    BlockId, TransactionRequest,
};
use alloy_rpc_types_trace::geth::{
    AccountState, DiffMode, GethDebugBuiltInTracerType, GethDebugTracerConfig,
    GethDebugTracerType, GethDebugTracingCallOptions, GethDebugTracingOptions, GethTrace,
    PreStateFrame,
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct AlloyTransport<P> {
    provider: P,
    timeout: Duration,
}

impl AlloyTransport<DynProvider> {
    /// Connect over HTTP.
    pub fn connect_http(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| eyre!("invalid rpc url {rpc_url}: {e}"))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        info!(rpc_url, timeout_ms = timeout.as_millis() as u64, "rpc transport ready");
        Ok(Self::new(provider, timeout))
    }
}

impl<P> AlloyTransport<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T, F>(&self, method: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| eyre!("{method} timed out after {:?}", self.timeout))?
    }
}

fn transaction_request(call: &CallParams) -> TransactionRequest {
    TransactionRequest::default()
        .from(call.from)
        .to(call.to)
        .gas_limit(call.gas)
        .input(call.data.clone().into())
}

fn state_override(overrides: &StorageOverrides) -> StateOverride {
    let mut builder = StateOverridesBuilder::with_capacity(overrides.len());
    for (address, slots) in overrides {
        builder = builder.append(
            *address,
            AccountOverride::default().with_state_diff(slots.iter().map(|(k, v)| (*k, *v))),
        );
    }
    builder.build()
}

fn tracing_options(tracer: TracerSpec) -> GethDebugTracingOptions {
    match tracer {
        TracerSpec::StorageReads => GethDebugTracingOptions {
            tracer: Some(GethDebugTracerType::JsTracer(STORAGE_READ_TRACER.to_string())),
            ..Default::default()
        },
        TracerSpec::PrestateDiff => GethDebugTracingOptions {
            tracer: Some(GethDebugTracerType::BuiltInTracer(
                GethDebugBuiltInTracerType::PreStateTracer,
            )),
            tracer_config: GethDebugTracerConfig(serde_json::json!({ "diffMode": true })),
            ..Default::default()
        },
    }
}

/// Output shape of [`STORAGE_READ_TRACER`]. Stack words are not zero-padded.
#[derive(Debug, Deserialize)]
struct RawReadTrace {
    reads: Vec<RawRead>,
    output: Bytes,
}

#[derive(Debug, Deserialize)]
struct RawRead {
    address: Address,
    slot: String,
    value: String,
}

fn parse_word(word: &str) -> Result<B256> {
    let value = U256::from_str(word).map_err(|e| eyre!("invalid stack word {word}: {e}"))?;
    Ok(B256::from(value))
}

fn parse_read_trace(value: serde_json::Value) -> Result<ReadTrace> {
    let raw: RawReadTrace =
        serde_json::from_value(value).wrap_err("unexpected storage read tracer output")?;
    let reads = raw
        .reads
        .into_iter()
        .map(|read| {
            Ok(StorageRead {
                address: read.address,
                slot: parse_word(&read.slot)?,
                value: parse_word(&read.value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ReadTrace {
        reads,
        output: raw.output,
    })
}

fn storage_by_account(accounts: BTreeMap<Address, AccountState>) -> BTreeMap<Address, SlotMap> {
    accounts
        .into_iter()
        .map(|(address, account)| (address, account.storage.into_iter().collect()))
        .collect()
}

fn parse_state_diff(trace: GethTrace) -> Result<StateDiff> {
    let diff = match trace {
        GethTrace::PreStateTracer(PreStateFrame::Diff(diff)) => diff,
        GethTrace::JS(value) => serde_json::from_value::<DiffMode>(value)
            .wrap_err("unexpected prestate tracer output")?,
        other => return Err(eyre!("prestate tracer returned a non-diff frame: {other:?}")),
    };
    Ok(StateDiff {
        pre: storage_by_account(diff.pre),
        post: storage_by_account(diff.post),
    })
}

#[async_trait]
impl<P> RpcTransport for AlloyTransport<P>
where
    P: Provider + Send + Sync + 'static,
{
    async fn block_number(&self) -> Result<u64> {
        self.bounded("eth_blockNumber", async {
            self.provider
                .get_block_number()
                .await
                .wrap_err("eth_blockNumber failed")
        })
        .await
    }

    async fn eth_call(
        &self,
        call: &CallParams,
        block: u64,
        overrides: &StorageOverrides,
    ) -> Result<Bytes> {
        let mut request = self
            .provider
            .call(transaction_request(call))
            .block(BlockId::number(block));
        if !overrides.is_empty() {
            request = request.overrides(state_override(overrides));
        }
        self.bounded("eth_call", async move {
            request.into_future().await.map_err(|err| match err.as_error_resp() {
                // The node answered with a JSON-RPC error: the call itself failed.
                Some(payload) => eyre::Report::new(CallReverted::new(payload.message.to_string())),
                None => eyre::Report::new(err).wrap_err("eth_call failed"),
            })
        })
        .await
    }

    async fn debug_trace_call(
        &self,
        call: &CallParams,
        block: u64,
        tracer: TracerSpec,
        overrides: &StorageOverrides,
    ) -> Result<TraceResult> {
        let options = GethDebugTracingCallOptions {
            tracing_options: tracing_options(tracer),
            state_overrides: (!overrides.is_empty()).then(|| state_override(overrides)),
            ..Default::default()
        };
        let trace = self
            .bounded("debug_traceCall", async {
                self.provider
                    .debug_trace_call(transaction_request(call), BlockId::number(block), options)
                    .await
                    .wrap_err("debug_traceCall failed")
            })
            .await?;
        debug!(to = %call.to, ?tracer, "traced call");

        match tracer {
            TracerSpec::StorageReads => match trace {
                GethTrace::JS(value) => Ok(TraceResult::StorageReads(parse_read_trace(value)?)),
                other => Err(eyre!("storage read tracer returned {other:?}")),
            },
            TracerSpec::PrestateDiff => Ok(TraceResult::StateDiff(parse_state_diff(trace)?)),
        }
    }
}
