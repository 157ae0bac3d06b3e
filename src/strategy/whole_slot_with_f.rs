//! WholeSlotWithF: the balance is a monotonic function of one slot's value.
//!
//! Share-based tokens store something other than the balance in the holder's
//! slot. Writing a raw amount there yields garbage, so instead we look for a
//! slot value that produces a large balance which can still be transferred.
//!
//! Three phases:
//! 1. Isolate the wallet's slot as the only SLOAD that differs between
//!    `balanceOf(wallet)` and `balanceOf(other)`.
//! 2. Sample `f(v) = balanceOf(wallet)` with the slot overridden to a geometric
//!    sequence of values and find one strictly monotonic, strictly positive run.
//!    Failed calls count as `f(v) = 0`.
//! 3. Binary search inside the run's bounds for the value with the largest
//!    spendable balance.

use crate::abi;
use crate::error::{BalanceSlotError, Result};
use crate::rpc::{trace::balance_of_reads, CallParams, RpcTransport};
use crate::types::{BalanceSlotRecord, SlotMap, StorageOverrides};
use alloy_primitives::{Address, B256, U256};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "whole_slot_with_f";

/// Sample counts tried, densest last.
const SAMPLE_SIZES: [usize; 4] = [4, 8, 16, 32];

/// A run must be strictly longer than this to be trusted.
const MIN_RUN_LENGTH: usize = 4;

const MAX_REFINE_STEPS: usize = 256;

pub struct WholeSlotWithFStrategy {
    transport: Arc<dyn RpcTransport>,
    wallet: Address,
}

/// Contiguous window of a sample vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub begin: usize,
    pub len: usize,
}

impl Run {
    fn end_inclusive(&self) -> usize {
        self.begin + self.len - 1
    }
}

struct Discovery {
    values: Vec<U256>,
    balances: Vec<U256>,
    increasing: bool,
    run: Run,
}

impl WholeSlotWithFStrategy {
    pub fn new(transport: Arc<dyn RpcTransport>, wallet: Address) -> Self {
        Self { transport, wallet }
    }

    pub async fn probe(&self, token: Address) -> Result<BalanceSlotRecord> {
        info!(strategy = NAME, token = %token, wallet = %self.wallet, "probing balance slot");

        let block = self
            .transport
            .block_number()
            .await
            .map_err(BalanceSlotError::transport)?;

        let slot = self.isolate_slot(block, token).await?;
        debug!(token = %token, slot = %slot, "isolated wallet slot");

        let discovery = self.discover(block, token, slot).await.ok_or_else(|| {
            BalanceSlotError::could_not_probe(
                NAME,
                "no monotonic relationship between slot value and balanceOf()",
            )
        })?;

        let preferred = self
            .refine(block, token, slot, &discovery)
            .await
            .ok_or_else(|| {
                BalanceSlotError::could_not_probe(NAME, format!("no spendable value for {token:#x}"))
            })?;

        info!(strategy = NAME, token = %token, slot = %slot, value = %preferred, "found balance slot");
        let mut record = BalanceSlotRecord::with_slot(token, self.wallet, slot);
        record.preferred_value = Some(B256::from(preferred));
        Ok(record)
    }

    async fn isolate_slot(&self, block: u64, token: Address) -> Result<B256> {
        let own = balance_of_reads(self.transport.as_ref(), block, token, self.wallet)
            .await
            .map_err(BalanceSlotError::transport)?;
        let other = balance_of_reads(self.transport.as_ref(), block, token, Address::random())
            .await
            .map_err(BalanceSlotError::transport)?;

        let mut remaining = own
            .reads
            .keys()
            .filter(|slot| !other.reads.contains_key(*slot));
        match (remaining.next(), remaining.next()) {
            (Some(slot), None) => Ok(*slot),
            _ => Err(BalanceSlotError::could_not_probe(
                NAME,
                "expected exactly one wallet-specific SLOAD",
            )),
        }
    }

    async fn discover(&self, block: u64, token: Address, slot: B256) -> Option<Discovery> {
        for increasing in [true, false] {
            for n in SAMPLE_SIZES {
                let values = geometric_sequence(n, U256::MAX);
                let balances = join_all(
                    values
                        .iter()
                        .map(|value| self.balance_with_override(block, token, slot, *value)),
                )
                .await;

                let Some(run) = monotonic_positive_run(&balances, increasing) else {
                    // Not well-behaved outside the observed range, denser
                    // sampling would not help.
                    debug!(token = %token, n, increasing, "pattern broken");
                    break;
                };
                if run.len > MIN_RUN_LENGTH {
                    return Some(Discovery {
                        values,
                        balances,
                        increasing,
                        run,
                    });
                }
            }
        }
        None
    }

    async fn refine(
        &self,
        block: u64,
        token: Address,
        slot: B256,
        discovery: &Discovery,
    ) -> Option<U256> {
        let Discovery {
            values,
            balances,
            increasing,
            run,
        } = discovery;
        let end = run.end_inclusive();

        let (mut lower, mut upper) = if *increasing {
            (
                values[run.begin],
                values.get(end + 1).copied().unwrap_or(U256::MAX),
            )
        } else {
            let lower = match run.begin {
                0 => U256::ZERO,
                begin => values[begin - 1],
            };
            (lower, values[end])
        };

        let receiver = Address::random();
        // Both directions start from the balance at `run.begin`. For a
        // decreasing run that is already the largest sample, so nothing below
        // it is accepted and decreasing tokens are never refined.
        let mut best_balance = balances[run.begin];
        let mut best_value = None;

        for _ in 0..MAX_REFINE_STEPS {
            if lower >= upper {
                break;
            }
            let mid = lower + ((upper - lower) >> 1);
            let balance = self.balance_with_override(block, token, slot, mid).await;

            let improves = balance > best_balance
                && self
                    .can_transfer(block, token, slot, mid, receiver, balance)
                    .await;
            if improves {
                best_balance = balance;
                best_value = Some(mid);
            }
            // Move towards larger balances when accepted, away otherwise.
            if improves == *increasing {
                lower = mid;
            } else {
                upper = mid;
            }
        }

        best_value
    }

    /// `balanceOf(wallet)` with `slot` set to `value`. A failed call is zero.
    async fn balance_with_override(
        &self,
        block: u64,
        token: Address,
        slot: B256,
        value: U256,
    ) -> U256 {
        let call = CallParams::new(Address::ZERO, token, abi::encode_balance_of(self.wallet));
        let overrides = slot_override(token, slot, value);
        match self.transport.eth_call(&call, block, &overrides).await {
            Ok(output) => {
                let balance = abi::decode_uint(&output);
                debug!(value = %value, balance = %balance, "sampled slot value");
                balance
            }
            Err(e) => {
                debug!(value = %value, error = %e, "balanceOf reverted");
                U256::ZERO
            }
        }
    }

    async fn can_transfer(
        &self,
        block: u64,
        token: Address,
        slot: B256,
        value: U256,
        to: Address,
        amount: U256,
    ) -> bool {
        let call = CallParams::new(self.wallet, token, abi::encode_transfer(to, amount));
        let overrides = slot_override(token, slot, value);
        match self.transport.eth_call(&call, block, &overrides).await {
            Ok(output) => abi::decode_success(&output),
            Err(e) => {
                debug!(amount = %amount, error = %e, "transfer reverted");
                false
            }
        }
    }
}

fn slot_override(token: Address, slot: B256, value: U256) -> StorageOverrides {
    StorageOverrides::from([(token, SlotMap::from([(slot, B256::from(value))]))])
}

/// `n` values `1, c, c^2, ..., c^(n-1)` with `c^(n-1) = end`.
///
/// The ratio is taken in log space so intermediate values land on
/// `2^(log2(end) * i / (n - 1))`. The last element is exactly `end`.
pub(crate) fn geometric_sequence(n: usize, end: U256) -> Vec<U256> {
    assert!(n >= 2, "geometric sequence needs at least two elements");
    let log_end = log2(end);
    let steps = (n - 1) as f64;

    let mut seq = Vec::with_capacity(n);
    seq.push(U256::from(1u64));
    for i in 1..n - 1 {
        seq.push(pow2(log_end * i as f64 / steps));
    }
    seq.push(end);
    seq
}

fn log2(value: U256) -> f64 {
    let bits = value.bit_len();
    if bits <= 64 {
        return (value.to::<u64>() as f64).log2();
    }
    let shift = bits - 64;
    let top = (value >> shift).to::<u64>();
    shift as f64 + (top as f64).log2()
}

/// `floor(2^exponent)`, saturating at `U256::MAX`.
fn pow2(exponent: f64) -> U256 {
    if exponent >= 256.0 {
        return U256::MAX;
    }
    if exponent < 0.0 {
        return U256::ZERO;
    }
    let whole = exponent.floor();
    // 53 significant bits of 2^fraction, scaled by 2^52
    let mantissa = ((exponent - whole).exp2() * (1u64 << 52) as f64) as u64;
    let whole = whole as usize;
    if whole >= 52 {
        U256::from(mantissa) << (whole - 52)
    } else {
        U256::from(mantissa >> (52 - whole))
    }
}

/// Longest strictly monotonic run of positive samples.
///
/// Returns `None` when positive samples also exist outside that run: `f` is
/// expected to be positive on a single interval only. All-zero input yields an
/// empty run.
pub(crate) fn monotonic_positive_run(samples: &[U256], increasing: bool) -> Option<Run> {
    let mut lens = vec![0usize; samples.len()];
    for i in 0..samples.len() {
        if samples[i].is_zero() {
            continue;
        }
        lens[i] = 1;
        if i > 0 {
            let ordered = if increasing {
                samples[i] > samples[i - 1]
            } else {
                samples[i] < samples[i - 1]
            };
            if ordered {
                lens[i] = lens[i - 1] + 1;
            }
        }
    }

    let mut best_len = 0;
    let mut best_end = None;
    for (i, len) in lens.iter().enumerate() {
        if *len > best_len {
            best_len = *len;
            best_end = Some(i);
        }
    }
    let Some(end) = best_end else {
        return Some(Run { begin: 0, len: 0 });
    };

    let begin = end + 1 - best_len;
    let outside_positive = lens
        .iter()
        .enumerate()
        .any(|(i, len)| (i < begin || i > end) && *len > 0);
    if outside_positive {
        return None;
    }
    Some(Run {
        begin,
        len: best_len,
    })
}
