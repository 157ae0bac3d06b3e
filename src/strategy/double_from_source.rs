//! DoubleFromSource: grow a balance out of a known holder by simulated transfers.
//!
//! Used when no slot can be isolated but some address (normally the pool being
//! simulated) holds the token. Each round clones the current holder's balance
//! into two fresh wallets and merges both into a third, so the balance doubles.
//! The output is a recipe: the storage slots that reproduce the final wallet's
//! balance from a clean state.

use super::merge_slots;
use crate::abi;
use crate::error::{BalanceSlotError, Result};
use crate::rpc::{is_revert, trace::contract_storage_diff, CallParams, RpcTransport};
use crate::types::{BalanceSlotRecord, SlotMap, StorageOverrides};
use alloy_primitives::{Address, B256, U256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "double_from_source";

const MAX_DOUBLING_ROUNDS: usize = 256;

/// 2^127
const BALANCE_THRESHOLD: U256 = U256::from_limbs([0, 1 << 63, 0, 0]);

/// The holder whose balance is cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleFromSourceParams {
    pub source: Address,
}

pub struct DoubleFromSourceStrategy {
    transport: Arc<dyn RpcTransport>,
}

/// Result of one doubling round.
struct Doubled {
    balance: U256,
    holder: Address,
    overrides: SlotMap,
}

impl DoubleFromSourceStrategy {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Attempt name, scoped to the source so another source is a new attempt.
    pub fn name(params: &DoubleFromSourceParams) -> String {
        format!("{NAME},source={:#x}", params.source)
    }

    pub async fn probe(
        &self,
        token: Address,
        params: &DoubleFromSourceParams,
    ) -> Result<BalanceSlotRecord> {
        let name = Self::name(params);
        info!(strategy = %name, token = %token, "probing balance slot");

        let block = self
            .transport
            .block_number()
            .await
            .map_err(BalanceSlotError::transport)?;

        let source_balance = self
            .balance_of(block, token, params.source, &SlotMap::new())
            .await
            .map_err(BalanceSlotError::transport)?;
        if source_balance.is_zero() {
            return Err(BalanceSlotError::could_not_probe(
                NAME,
                format!("source {:#x} holds no balance", params.source),
            ));
        }

        let mut holder = params.source;
        let mut overrides = SlotMap::new();
        let mut balance = U256::ZERO;

        for round in 0..MAX_DOUBLING_ROUNDS {
            let doubled = match self.double_balance(block, token, holder, &overrides).await {
                Ok(doubled) => doubled,
                Err(e) => {
                    warn!(token = %token, round, error = %e, "could not double balance");
                    break;
                }
            };
            if doubled.balance <= balance {
                break;
            }
            debug!(token = %token, round, balance = %doubled.balance, "balance doubled");

            balance = doubled.balance;
            holder = doubled.holder;
            overrides = doubled.overrides;
            if balance >= BALANCE_THRESHOLD {
                break;
            }
        }

        if balance.is_zero() {
            return Err(BalanceSlotError::could_not_probe(
                NAME,
                format!("could not double balance of {token:#x}"),
            ));
        }

        info!(strategy = %name, token = %token, wallet = %holder, balance = %balance, slots = overrides.len(), "found balance recipe");
        Ok(BalanceSlotRecord::with_recipe(token, holder, overrides))
    }

    /// source → w1, source → w2, then w1 → w3 and w2 → w3.
    async fn double_balance(
        &self,
        block: u64,
        token: Address,
        source: Address,
        source_overrides: &SlotMap,
    ) -> eyre::Result<Doubled> {
        let none = BTreeSet::new();

        let wallet1 = Address::random();
        let overrides1 = self
            .transfer_and_extract(block, token, source, wallet1, source_overrides, &none)
            .await?;

        let wallet2 = Address::random();
        let overrides2 = self
            .transfer_and_extract(block, token, source, wallet2, source_overrides, &none)
            .await?;

        let wallet3 = Address::random();
        let overrides31 = self
            .transfer_and_extract(block, token, wallet1, wallet3, &overrides1, &none)
            .await?;

        // w3 already holds w1's share, so its slots are no longer fresh.
        let included = overrides31.keys().copied().collect();
        let overrides32 = self
            .transfer_and_extract(
                block,
                token,
                wallet2,
                wallet3,
                &merge_slots(&overrides2, &overrides31),
                &included,
            )
            .await?;
        let overrides3 = merge_slots(&overrides31, &overrides32);

        let balance = self.balance_of(block, token, wallet3, &overrides3).await?;
        if !self
            .transfer(block, token, wallet3, Address::random(), balance, &overrides3)
            .await?
        {
            eyre::bail!("transfer of {balance} from doubled wallet failed");
        }

        Ok(Doubled {
            balance,
            holder: wallet3,
            overrides: overrides3,
        })
    }

    /// Move the whole balance of `from` to `to` and return the token slots
    /// that now describe `to`'s balance.
    async fn transfer_and_extract(
        &self,
        block: u64,
        token: Address,
        from: Address,
        to: Address,
        overrides: &SlotMap,
        included: &BTreeSet<B256>,
    ) -> eyre::Result<SlotMap> {
        let amount = self.balance_of(block, token, from, overrides).await?;
        if !self.transfer(block, token, from, to, amount, overrides).await? {
            eyre::bail!("transfer of {amount} from {from:#x} failed");
        }

        let call = CallParams::new(from, token, abi::encode_transfer(to, amount));
        let (pre, post) = contract_storage_diff(
            self.transport.as_ref(),
            &call,
            block,
            &token_overrides(token, overrides),
            token,
        )
        .await?;

        Ok(extract_carried_slots(&pre, &post, included))
    }

    async fn balance_of(
        &self,
        block: u64,
        token: Address,
        owner: Address,
        overrides: &SlotMap,
    ) -> eyre::Result<U256> {
        let call = CallParams::new(owner, token, abi::encode_balance_of(owner));
        let output = self
            .transport
            .eth_call(&call, block, &token_overrides(token, overrides))
            .await?;
        Ok(abi::decode_uint(&output))
    }

    /// Whether `transfer(to, amount)` from `from` returns `true`. Reverts are
    /// reported as `false`, transport failures as errors.
    async fn transfer(
        &self,
        block: u64,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        overrides: &SlotMap,
    ) -> eyre::Result<bool> {
        let call = CallParams::new(from, token, abi::encode_transfer(to, amount));
        match self
            .transport
            .eth_call(&call, block, &token_overrides(token, overrides))
            .await
        {
            Ok(output) => Ok(abi::decode_success(&output)),
            Err(e) if is_revert(&e) => {
                debug!(from = %from, amount = %amount, error = %e, "transfer reverted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn token_overrides(token: Address, slots: &SlotMap) -> StorageOverrides {
    if slots.is_empty() {
        return StorageOverrides::new();
    }
    StorageOverrides::from([(token, slots.clone())])
}

/// Post-state slots that belong to the receiver: freshly populated ones (absent
/// or zero before the call) and any slot listed in `included`.
pub(crate) fn extract_carried_slots(
    pre: &SlotMap,
    post: &SlotMap,
    included: &BTreeSet<B256>,
) -> SlotMap {
    post.iter()
        .filter(|(slot, _)| {
            included.contains(*slot) || pre.get(*slot).map_or(true, |value| value.is_zero())
        })
        .map(|(slot, value)| (*slot, *value))
        .collect()
}
