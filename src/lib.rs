// ERC-20 Balance Slot Library
//
// Finds, for any ERC-20 token, the storage override that gives a wallet a
// balance, so simulations can fund test wallets through state overrides.
//
// Architecture:
//   BalanceSlotCache → MultiStrategy → strategies → RpcTransport (eth_call / debug_traceCall)
//         ↓
//   Repository (Postgres) + snapshots

pub mod abi;
pub mod cache;
pub mod config;
pub mod error;
pub mod holders;
pub mod orchestrator;
pub mod repository;
pub mod rpc;
pub mod service;
pub mod snapshot;
pub mod strategy;
pub mod types;

pub use cache::{BalanceSlotCache, BalanceSlotCacheBuilder, PreloadStats};
pub use config::Config;
pub use error::{BalanceSlotError, Result};
pub use orchestrator::{BalanceSlotProbe, MultiStrategy};
pub use repository::{BalanceSlotRepository, MemoryBalanceSlotRepository, PgBalanceSlotRepository};
pub use strategy::{DoubleFromSourceParams, ProbeExtraParams};
pub use types::{BalanceSlotRecord, Resolution, SlotMap, StorageOverrides};
