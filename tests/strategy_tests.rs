// Strategy scenarios against an in-memory ERC-20
//
// Each test runs a real strategy end to end through the `RpcTransport` trait.

mod common;

use alloy_primitives::{address, Address, U256};
use common::{
    Accounting, FixedHolders, MockToken, RecordingWatchlist, BALANCE_CAP, PAUSED_SLOT,
};
use erc20_balance_slot::strategy::{
    DoubleFromSourceParams, DoubleFromSourceStrategy, WholeSlotStrategy, WholeSlotWithFStrategy,
};
use erc20_balance_slot::{
    BalanceSlotError, BalanceSlotProbe, BalanceSlotRecord, MultiStrategy, ProbeExtraParams,
    Resolution, StorageOverrides,
};
use std::sync::Arc;

const TOKEN: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
const WALLET: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
const POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

mod whole_slot {
    use super::*;

    #[tokio::test]
    async fn test_direct_mapping_is_found() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Plain).with_holder(POOL, 5_000));
        let record = WholeSlotStrategy::new(token.clone(), WALLET)
            .probe(TOKEN)
            .await
            .unwrap();

        assert!(record.found);
        assert_eq!(record.wallet, Some(WALLET));
        assert_eq!(record.balance_slot, Some(token.balance_slot(WALLET)));
        assert!(record.preferred_value.is_none());
        assert_eq!(record.resolution(), Resolution::Slot);
    }

    #[tokio::test]
    async fn test_two_echoing_slots_are_ambiguous() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Mirrored));
        let err = WholeSlotStrategy::new(token, WALLET)
            .probe(TOKEN)
            .await
            .unwrap_err();

        match err {
            BalanceSlotError::CouldNotProbe { strategy, reason } => {
                assert_eq!(strategy, "whole_slot");
                assert!(reason.contains("2 candidate slots"), "{reason}");
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reverting_guard_slot_is_skipped() {
        common::init_tracing();
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Pausable));
        let record = WholeSlotStrategy::new(token.clone(), WALLET)
            .probe(TOKEN)
            .await
            .unwrap();

        assert!(record.found);
        assert_eq!(record.balance_slot, Some(token.balance_slot(WALLET)));
        assert_ne!(record.balance_slot, Some(PAUSED_SLOT));
    }

    #[tokio::test]
    async fn test_reverting_token_is_a_transport_error() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Broken));
        let err = WholeSlotStrategy::new(token, WALLET)
            .probe(TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, BalanceSlotError::Transport(_)));
    }
}

mod whole_slot_with_f {
    use super::*;

    #[tokio::test]
    async fn test_share_accounting_yields_preferred_value() {
        common::init_tracing();
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Shares));
        let record = WholeSlotWithFStrategy::new(token.clone(), WALLET)
            .probe(TOKEN)
            .await
            .unwrap();

        assert!(record.found);
        let slot = token.balance_slot(WALLET);
        assert_eq!(record.balance_slot, Some(slot));

        // The preferred value must produce a large balance without overflowing.
        let preferred = record.preferred_value.expect("preferred value");
        let overrides = StorageOverrides::from([(TOKEN, [(slot, preferred)].into())]);
        let (balance, _) = token.balance_of(WALLET, &overrides).unwrap();
        assert!(balance > U256::from(1u64) << 200, "balance {balance}");
    }

    #[tokio::test]
    async fn test_plain_mapping_is_also_monotonic() {
        // Identity is a monotonic function too; the search settles near the
        // largest spendable value.
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Plain));
        let record = WholeSlotWithFStrategy::new(token.clone(), WALLET)
            .probe(TOKEN)
            .await
            .unwrap();
        assert_eq!(record.balance_slot, Some(token.balance_slot(WALLET)));
        assert!(record.preferred_value.is_some());
    }

    #[tokio::test]
    async fn test_decreasing_relationship_is_not_refined() {
        // Discovery settles on the decreasing direction, but refinement starts
        // from the largest sampled balance and never accepts a value.
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Inverted));
        let err = WholeSlotWithFStrategy::new(token, WALLET)
            .probe(TOKEN)
            .await
            .unwrap_err();

        match err {
            BalanceSlotError::CouldNotProbe { strategy, reason } => {
                assert_eq!(strategy, "whole_slot_with_f");
                assert!(reason.contains("no spendable value"), "{reason}");
            }
            other => panic!("expected refinement failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_wallet_slots_fail_isolation() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Mirrored));
        let err = WholeSlotWithFStrategy::new(token, WALLET)
            .probe(TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BalanceSlotError::CouldNotProbe { strategy: "whole_slot_with_f", .. }
        ));
    }
}

mod double_from_source {
    use super::*;

    #[tokio::test]
    async fn test_doubles_pool_balance_into_recipe() {
        common::init_tracing();
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Plain).with_holder(POOL, 1_000));
        let record = DoubleFromSourceStrategy::new(token.clone())
            .probe(TOKEN, &DoubleFromSourceParams { source: POOL })
            .await
            .unwrap();

        assert!(record.found);
        assert_eq!(record.resolution(), Resolution::Recipe);
        assert!(record.balance_slot.is_none());

        let wallet = record.wallet.expect("doubled wallet");
        assert_ne!(wallet, POOL);

        // The recipe alone reproduces a balance of at least 2^127.
        let overrides = StorageOverrides::from([(TOKEN, record.extra_overrides.clone())]);
        let (balance, _) = token.balance_of(wallet, &overrides).unwrap();
        assert!(balance >= U256::from(1u64) << 127, "balance {balance}");
        assert_eq!(
            record.extra_overrides.get(&token.balance_slot(wallet)),
            Some(&balance.into())
        );
    }

    /// Balance of `record.wallet` under the recipe alone.
    fn recipe_balance(token: &MockToken, record: &BalanceSlotRecord) -> U256 {
        let wallet = record.wallet.expect("doubled wallet");
        let overrides = StorageOverrides::from([(TOKEN, record.extra_overrides.clone())]);
        token.balance_of(wallet, &overrides).unwrap().0
    }

    #[tokio::test]
    async fn test_reverting_round_keeps_last_recipe() {
        // 1_000 doubles to 8_000; the next merge would pass the cap and reverts.
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Capped).with_holder(POOL, 1_000));
        let record = DoubleFromSourceStrategy::new(token.clone())
            .probe(TOKEN, &DoubleFromSourceParams { source: POOL })
            .await
            .unwrap();

        assert!(record.found);
        assert_eq!(record.resolution(), Resolution::Recipe);
        let balance = recipe_balance(&token, &record);
        assert_eq!(balance, U256::from(8_000u64));
        assert!(balance < U256::from(1u64) << 127);
    }

    #[tokio::test]
    async fn test_stops_when_balance_stops_growing() {
        let token =
            Arc::new(MockToken::new(TOKEN, Accounting::Saturating).with_holder(POOL, 1_000));
        let record = DoubleFromSourceStrategy::new(token.clone())
            .probe(TOKEN, &DoubleFromSourceParams { source: POOL })
            .await
            .unwrap();

        assert!(record.found);
        let balance = recipe_balance(&token, &record);
        assert_eq!(balance, U256::from(BALANCE_CAP));
        assert!(balance < U256::from(1u64) << 127);
    }

    #[tokio::test]
    async fn test_empty_source_fails() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Plain));
        let err = DoubleFromSourceStrategy::new(token)
            .probe(TOKEN, &DoubleFromSourceParams { source: POOL })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BalanceSlotError::CouldNotProbe { strategy: "double_from_source", .. }
        ));
    }
}

mod orchestration {
    use super::*;

    #[tokio::test]
    async fn test_falls_through_to_monotonic_strategy() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Shares));
        let record = common::multi_strategy(token, WALLET)
            .probe(TOKEN, None, &ProbeExtraParams::default())
            .await
            .unwrap();

        assert!(record.found);
        assert!(record.preferred_value.is_some());
        assert_eq!(
            record.strategies_attempted,
            vec!["whole_slot", "whole_slot_with_f"]
        );
    }

    #[tokio::test]
    async fn test_mirrored_token_resolved_from_pool() {
        let token =
            Arc::new(MockToken::new(TOKEN, Accounting::Mirrored).with_holder(POOL, 10_000));
        let extra = ProbeExtraParams::from_pool_hint(Some(POOL));
        let record = common::multi_strategy(token, WALLET)
            .probe(TOKEN, None, &extra)
            .await
            .unwrap();

        assert_eq!(record.resolution(), Resolution::Recipe);
        assert_eq!(record.strategies_attempted.len(), 3);
        assert_eq!(
            record.strategies_attempted[2],
            "double_from_source,source=0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640"
        );
    }

    #[tokio::test]
    async fn test_holders_list_runs_after_rpc_strategies() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Broken));
        let watchlist = Arc::new(RecordingWatchlist::default());
        let record = MultiStrategy::new(
            token,
            WALLET,
            Arc::new(FixedHolders(None)),
            watchlist.clone(),
        )
        .probe(TOKEN, None, &ProbeExtraParams::default())
        .await
        .unwrap();

        assert!(!record.found);
        assert_eq!(
            record.strategies_attempted,
            vec!["whole_slot", "whole_slot_with_f", "holders_list"]
        );
        assert_eq!(*watchlist.notified.lock().unwrap(), vec![TOKEN]);
    }

    #[tokio::test]
    async fn test_known_holders_resolve_unprobeable_token() {
        let token = Arc::new(MockToken::new(TOKEN, Accounting::Broken));
        let record = MultiStrategy::new(
            token,
            WALLET,
            Arc::new(FixedHolders(Some(vec![POOL]))),
            Arc::new(RecordingWatchlist::default()),
        )
        .probe(TOKEN, None, &ProbeExtraParams::default())
        .await
        .unwrap();

        assert!(record.found);
        assert_eq!(record.resolution(), Resolution::Holders);
        assert_eq!(record.holders, vec![POOL]);
    }
}
