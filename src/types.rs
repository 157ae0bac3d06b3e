// Balance Slot Record Types
//
// The unit of knowledge about one token: how to fabricate a balance for it,
// and which probing strategies have already been tried.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage slot → value overrides for a single contract.
pub type SlotMap = BTreeMap<B256, B256>;

/// Per-contract storage overrides applied to one simulated call.
pub type StorageOverrides = BTreeMap<Address, SlotMap>;

/// Outcome of probing one token.
///
/// Serialized as JSON in the repository and with bincode inside snapshots, so
/// no field may be skipped during serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSlotRecord {
    /// Token contract
    pub token: Address,

    /// Wallet whose balance is fabricated. `None` for holders-list results.
    #[serde(default)]
    pub wallet: Option<Address>,

    pub found: bool,

    /// Slot that holds the wallet balance directly (or through a monotonic transform)
    #[serde(default)]
    pub balance_slot: Option<B256>,

    /// Slot value known to produce a large, spendable balance
    #[serde(default)]
    pub preferred_value: Option<B256>,

    /// Additional slots needed to make the balance consistent
    #[serde(default)]
    pub extra_overrides: SlotMap,

    /// Real addresses known to hold a positive balance
    #[serde(default)]
    pub holders: Vec<Address>,

    /// Strategy names already tried, in order. Append-only.
    #[serde(default)]
    pub strategies_attempted: Vec<String>,
}

/// How a record resolves the token, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A single slot encodes the balance.
    Slot,
    /// A set of overrides reproduces a balance for `wallet`.
    Recipe,
    /// Only real holders are known.
    Holders,
    Unresolved,
}

impl BalanceSlotRecord {
    /// Empty, not-found record for `token`.
    pub fn unresolved(token: Address) -> Self {
        Self {
            token,
            ..Default::default()
        }
    }

    pub fn with_slot(token: Address, wallet: Address, slot: B256) -> Self {
        Self {
            token,
            wallet: Some(wallet),
            found: true,
            balance_slot: Some(slot),
            ..Default::default()
        }
    }

    pub fn with_recipe(token: Address, wallet: Address, overrides: SlotMap) -> Self {
        Self {
            token,
            wallet: Some(wallet),
            found: true,
            extra_overrides: overrides,
            ..Default::default()
        }
    }

    pub fn with_holders(token: Address, holders: Vec<Address>) -> Self {
        Self {
            token,
            found: true,
            holders,
            ..Default::default()
        }
    }

    /// Lower-cased hex key used for persistence.
    pub fn key(&self) -> String {
        token_key(&self.token)
    }

    pub fn resolution(&self) -> Resolution {
        if !self.found {
            Resolution::Unresolved
        } else if self.balance_slot.is_some() {
            Resolution::Slot
        } else if !self.holders.is_empty() {
            Resolution::Holders
        } else if self.wallet.is_some() {
            Resolution::Recipe
        } else {
            Resolution::Unresolved
        }
    }

    /// A found record is never probed again by the cache.
    pub fn is_terminal(&self) -> bool {
        self.found
    }

    pub fn has_attempted(&self, strategy: &str) -> bool {
        self.strategies_attempted.iter().any(|s| s == strategy)
    }

    /// Storage overrides for the token contract that give `wallet` at least
    /// `amount` tokens.
    ///
    /// With a `preferred_value` the slot is set to that value instead of
    /// `amount`, since the slot content is not the raw balance. Returns `None`
    /// when the record only carries holders or was not found.
    pub fn storage_overrides(&self, amount: U256) -> Option<SlotMap> {
        match self.resolution() {
            Resolution::Slot | Resolution::Recipe => {}
            Resolution::Holders | Resolution::Unresolved => return None,
        }

        let mut overrides = SlotMap::new();
        if let Some(slot) = self.balance_slot {
            let value = self.preferred_value.unwrap_or(B256::from(amount));
            overrides.insert(slot, value);
        }
        for (slot, value) in &self.extra_overrides {
            overrides.insert(*slot, *value);
        }
        Some(overrides)
    }
}

/// `0x`-prefixed lower-case hex of an address.
pub fn token_key(token: &Address) -> String {
    format!("{token:#x}")
}
