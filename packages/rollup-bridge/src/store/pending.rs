//! Pending NFT transfer registry
//!
//! A JSON array of [`PendingTransferRecord`] under one fixed key. Unique by
//! transaction hash; `add` of a known hash is a no-op. Every read-modify-write
//! runs under one lock so concurrent adds never lose or duplicate records.
//!
//! The store is a cache, not the source of truth: records can be rebuilt from
//! chain history by the scanner.

use alloy::primitives::{Address, B256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::kv::KeyValueStore;
use crate::error::Result;
use crate::metrics;
use crate::types::PendingTransferRecord;

/// Storage key holding the pending NFT withdrawals
pub const PENDING_TRANSFERS_KEY: &str = "pending-nft-withdrawals";

pub struct PendingTransferStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl PendingTransferStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<PendingTransferRecord>> {
        match self.kv.get(PENDING_TRANSFERS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, records: &[PendingTransferRecord]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.kv.set(PENDING_TRANSFERS_KEY, &raw).await?;
        metrics::set_pending_transfers(records.len());
        Ok(())
    }

    /// Append `record` unless its hash is already present. Returns whether it was added.
    pub async fn add(&self, record: PendingTransferRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        if records.iter().any(|r| r.tx_hash == record.tx_hash) {
            debug!(tx_hash = %record.tx_hash, "Pending transfer already recorded");
            return Ok(false);
        }

        info!(
            tx_hash = %record.tx_hash,
            token_id = %record.token_id,
            owner = %record.owner,
            "Recorded pending transfer"
        );
        records.push(record);
        self.save(&records).await?;
        Ok(true)
    }

    /// Add several records, skipping known hashes. Returns how many were added.
    pub async fn add_all(&self, new_records: Vec<PendingTransferRecord>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();

        for record in new_records {
            if !records.iter().any(|r| r.tx_hash == record.tx_hash) {
                records.push(record);
            }
        }

        let added = records.len() - before;
        if added > 0 {
            self.save(&records).await?;
        }
        Ok(added)
    }

    /// Drop the record for `tx_hash`. Returns whether one was removed.
    pub async fn remove(&self, tx_hash: B256) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.tx_hash != tx_hash);

        if records.len() == before {
            return Ok(false);
        }
        info!(tx_hash = %tx_hash, "Removed pending transfer");
        self.save(&records).await?;
        Ok(true)
    }

    pub async fn list_all(&self) -> Result<Vec<PendingTransferRecord>> {
        self.load().await
    }

    pub async fn list_for(&self, owner: Address) -> Result<Vec<PendingTransferRecord>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    pub async fn contains(&self, tx_hash: B256) -> Result<bool> {
        Ok(self.load().await?.iter().any(|r| r.tx_hash == tx_hash))
    }
}
