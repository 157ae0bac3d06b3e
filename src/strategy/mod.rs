//! Balance-slot probing strategies.
//!
//! Each strategy is one self-contained technique for fabricating a balance.
//! They are a closed set, so they are modelled as an enum and every variant
//! projects its own typed slice out of [`ProbeExtraParams`].

pub mod double_from_source;
pub mod holders_list;
pub mod whole_slot;
pub mod whole_slot_with_f;

pub use double_from_source::{DoubleFromSourceParams, DoubleFromSourceStrategy};
pub use holders_list::HoldersListStrategy;
pub use whole_slot::WholeSlotStrategy;
pub use whole_slot_with_f::WholeSlotWithFStrategy;

use crate::error::Result;
use crate::types::{BalanceSlotRecord, SlotMap};
use alloy_primitives::Address;

/// Strategy-specific inputs for one probe round.
///
/// A field left as `None` makes the strategies that need it inapplicable for
/// the round; they are neither run nor recorded as attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeExtraParams {
    pub double_from_source: Option<DoubleFromSourceParams>,
}

impl ProbeExtraParams {
    /// Params derived from the pool a consumer is simulating. The pool holds
    /// the token, so it is a natural source for balance doubling.
    pub fn from_pool_hint(pool: Option<Address>) -> Self {
        Self {
            double_from_source: pool
                .filter(|pool| !pool.is_zero())
                .map(|source| DoubleFromSourceParams { source }),
        }
    }
}

pub enum Strategy {
    WholeSlot(WholeSlotStrategy),
    WholeSlotWithF(WholeSlotWithFStrategy),
    DoubleFromSource(DoubleFromSourceStrategy),
    HoldersList(HoldersListStrategy),
}

impl Strategy {
    /// Name recorded in `strategies_attempted`, or `None` when the params this
    /// strategy needs are missing.
    pub fn name(&self, extra: &ProbeExtraParams) -> Option<String> {
        match self {
            Strategy::WholeSlot(_) => Some(whole_slot::NAME.to_string()),
            Strategy::WholeSlotWithF(_) => Some(whole_slot_with_f::NAME.to_string()),
            Strategy::DoubleFromSource(_) => extra
                .double_from_source
                .as_ref()
                .map(DoubleFromSourceStrategy::name),
            Strategy::HoldersList(_) => Some(holders_list::NAME.to_string()),
        }
    }

    pub async fn probe(
        &self,
        token: Address,
        extra: &ProbeExtraParams,
    ) -> Result<BalanceSlotRecord> {
        match self {
            Strategy::WholeSlot(s) => s.probe(token).await,
            Strategy::WholeSlotWithF(s) => s.probe(token).await,
            Strategy::DoubleFromSource(s) => match &extra.double_from_source {
                Some(params) => s.probe(token, params).await,
                None => Err(crate::error::BalanceSlotError::could_not_probe(
                    double_from_source::NAME,
                    "missing source",
                )),
            },
            Strategy::HoldersList(s) => s.probe(token).await,
        }
    }
}

/// Union of two slot maps, entries of `b` win.
pub(crate) fn merge_slots(a: &SlotMap, b: &SlotMap) -> SlotMap {
    let mut merged = a.clone();
    merged.extend(b.iter().map(|(k, v)| (*k, *v)));
    merged
}
