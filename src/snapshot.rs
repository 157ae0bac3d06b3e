//! Binary snapshots of a chain's full token → record map.
//!
//! A snapshot is the bincode encoding of a `BTreeMap`, so the same map always
//! encodes to the same bytes. Snapshots are files named `<chain_id>.bin`.

use crate::error::{BalanceSlotError, Result};
use crate::types::BalanceSlotRecord;
use alloy_primitives::Address;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub type Snapshot = BTreeMap<Address, BalanceSlotRecord>;

pub fn encode(records: &Snapshot) -> Result<Vec<u8>> {
    bincode::serialize(records).map_err(|e| BalanceSlotError::Snapshot(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    bincode::deserialize(bytes).map_err(|e| BalanceSlotError::Snapshot(e.to_string()))
}

pub fn path_for_chain(dir: &Path, chain_id: u64) -> PathBuf {
    dir.join(format!("{chain_id}.bin"))
}

/// Snapshot for `chain_id` under `dir`, or `None` if there is none.
pub async fn load_for_chain(dir: &Path, chain_id: u64) -> Result<Option<Snapshot>> {
    let path = path_for_chain(dir, chain_id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot");
            return Ok(None);
        }
        Err(e) => {
            return Err(BalanceSlotError::Snapshot(format!(
                "reading {}: {e}",
                path.display()
            )))
        }
    };

    let snapshot = decode(&bytes)?;
    info!(path = %path.display(), records = snapshot.len(), "loaded snapshot");
    Ok(Some(snapshot))
}

pub async fn write_for_chain(dir: &Path, chain_id: u64, records: &Snapshot) -> Result<PathBuf> {
    let path = path_for_chain(dir, chain_id);
    let bytes = encode(records)?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| BalanceSlotError::Snapshot(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}
