//! WholeSlot: the balance is the raw value of exactly one storage slot.
//!
//! Every slot read by `balanceOf(wallet)` whose value equals the returned
//! balance is overridden with a random word. If the call then echoes that word,
//! the slot is a candidate. A random 256-bit value makes accidental matches
//! negligible, so exactly one candidate is accepted as proof. A slot whose
//! override makes the call revert is not a candidate.

use crate::abi;
use crate::error::{BalanceSlotError, Result};
use crate::rpc::{is_revert, trace::balance_of_reads, CallParams, RpcTransport};
use crate::types::{BalanceSlotRecord, SlotMap, StorageOverrides};
use alloy_primitives::{Address, B256, U256};
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "whole_slot";

pub struct WholeSlotStrategy {
    transport: Arc<dyn RpcTransport>,
    wallet: Address,
}

impl WholeSlotStrategy {
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
        let trace = balance_of_reads(self.transport.as_ref(), block, token, self.wallet)
            .await
            .map_err(BalanceSlotError::transport)?;
        let returned = B256::from(trace.balance);

        let call = CallParams::new(Address::ZERO, token, abi::encode_balance_of(self.wallet));
        let mut candidates = Vec::new();
        for (slot, value) in &trace.reads {
            if *value != returned {
                continue;
            }
            let injected = B256::random();
            let overrides = StorageOverrides::from([(token, SlotMap::from([(*slot, injected)]))]);
            let output = match self.transport.eth_call(&call, block, &overrides).await {
                Ok(output) => output,
                // Guard slots (pause flags, blocklists) reject arbitrary values.
                Err(e) if is_revert(&e) => {
                    debug!(token = %token, slot = %slot, error = %e, "override reverted, not a candidate");
                    continue;
                }
                Err(e) => return Err(BalanceSlotError::transport(e)),
            };
            if abi::decode_uint(&output) == U256::from_be_slice(injected.as_slice()) {
                debug!(token = %token, slot = %slot, "slot echoes injected balance");
                candidates.push(*slot);
            }
        }

        match candidates.as_slice() {
            [slot] => {
                info!(strategy = NAME, token = %token, slot = %slot, "found balance slot");
                Ok(BalanceSlotRecord::with_slot(token, self.wallet, *slot))
            }
            [] => Err(BalanceSlotError::could_not_probe(
                NAME,
                format!("no slot of {token:#x} encodes the balance directly"),
            )),
            many => Err(BalanceSlotError::could_not_probe(
                NAME,
                format!("{} candidate slots for {token:#x}", many.len()),
            )),
        }
    }
}
