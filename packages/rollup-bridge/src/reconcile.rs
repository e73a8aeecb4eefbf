//! Store reconciliation
//!
//! The pending store is a cache. Each pass re-resolves every record against
//! chain state: executed messages and records that point at nothing are
//! removed, everything else stays. An owner with no records is re-seeded from
//! an event log scan.

use alloy::primitives::{Address, B256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, MissingReason, Result};
use crate::metrics;
use crate::resolver::MessageStateResolver;
use crate::scanner::EventLogScanner;
use crate::store::PendingTransferStore;
use crate::types::{MessageStatus, PendingTransferRecord};

/// A pending record with its freshly resolved status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub record: PendingTransferRecord,
    /// `None` when resolution failed transiently or the receipt is not visible yet
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: Vec<PendingTransfer>,
    pub executed: Vec<B256>,
    pub stale: Vec<B256>,
}

pub struct Reconciler {
    resolver: Arc<MessageStateResolver>,
    store: Arc<PendingTransferStore>,
    scanner: Arc<EventLogScanner>,
}

impl Reconciler {
    pub fn new(
        resolver: Arc<MessageStateResolver>,
        store: Arc<PendingTransferStore>,
        scanner: Arc<EventLogScanner>,
    ) -> Self {
        Self {
            resolver,
            store,
            scanner,
        }
    }

    /// Re-resolve every stored record
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.store.list_all().await? {
            let tx_hash = record.tx_hash;
            match self.resolver.status(tx_hash).await {
                Ok(MessageStatus::Success) => {
                    self.store.remove(tx_hash).await?;
                    info!(tx_hash = %tx_hash, "Removed executed transfer from store");
                    report.executed.push(tx_hash);
                }
                Ok(status) => {
                    metrics::record_status(status.as_str());
                    report.kept.push(PendingTransfer {
                        record,
                        status: Some(status),
                    });
                }
                // A fresh submission may not have a receipt yet
                Err(BridgeError::NoMessageFound {
                    reason: MissingReason::ReceiptNotFound,
                    ..
                }) => {
                    debug!(tx_hash = %tx_hash, "Receipt not visible yet, keeping record");
                    report.kept.push(PendingTransfer {
                        record,
                        status: None,
                    });
                }
                Err(BridgeError::NoMessageFound { reason, .. }) => {
                    let stale = BridgeError::StaleCacheEntry(tx_hash);
                    metrics::record_error(&stale);
                    warn!(tx_hash = %tx_hash, reason = %reason, error = %stale, "Removing record");
                    self.store.remove(tx_hash).await?;
                    report.stale.push(tx_hash);
                }
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %e, "Status lookup failed, keeping record");
                    report.kept.push(PendingTransfer {
                        record,
                        status: None,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Reconciled pending transfers of `owner`. When the store holds none for
    /// them, chain history is scanned and the store re-seeded.
    pub async fn pending_for(&self, owner: Address) -> Result<Vec<PendingTransfer>> {
        let report = self.reconcile().await?;
        let mine: Vec<PendingTransfer> = report
            .kept
            .into_iter()
            .filter(|p| p.record.owner == owner)
            .collect();
        if !mine.is_empty() {
            return Ok(mine);
        }

        info!(owner = %owner, "No stored transfers, scanning chain history");
        let scan = self.scanner.scan(owner).await?;
        for skipped in &scan.skipped {
            debug!(
                tx_hash = %skipped.tx_hash,
                position = skipped.position,
                reason = ?skipped.reason,
                "Scan skipped record"
            );
        }

        let found: Vec<PendingTransfer> = scan
            .transfers
            .into_iter()
            .filter(|t| t.status != Some(MessageStatus::Success))
            .map(|t| PendingTransfer {
                record: t.record,
                status: t.status,
            })
            .collect();

        let added = self
            .store
            .add_all(found.iter().map(|p| p.record.clone()).collect())
            .await?;
        info!(owner = %owner, found = found.len(), added = added, "Re-seeded pending store");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{NftBridgeAddresses, ScanConfig};
    use crate::store::MemoryKvStore;
    use crate::testing::{
        eth_withdrawal_receipt, nft_withdrawal_receipt, scenario_hash, MockChain,
        NftBridgeFixture, ScriptedOutbox, StaticMetadataFetcher,
    };
    use crate::types::{OutboxState, TokenMetadata};
    use alloy::primitives::U256;

    const OWNER: Address = Address::repeat_byte(0x11);

    struct Harness {
        child: Arc<MockChain>,
        outbox: Arc<ScriptedOutbox>,
        store: Arc<PendingTransferStore>,
        reconciler: Reconciler,
        fixture: NftBridgeFixture,
    }

    fn harness() -> Harness {
        let fixture = NftBridgeFixture::default();
        let child = Arc::new(MockChain::new(42161));
        let outbox = Arc::new(ScriptedOutbox::new());
        let resolver = Arc::new(MessageStateResolver::new(child.clone(), outbox.clone()));
        let store = Arc::new(PendingTransferStore::new(Arc::new(MemoryKvStore::new())));
        let scanner = Arc::new(EventLogScanner::new(
            child.clone(),
            outbox.clone(),
            Arc::new(StaticMetadataFetcher),
            NftBridgeAddresses {
                child_bridge: fixture.child_bridge,
                parent_gateway: fixture.parent_gateway,
            },
            ScanConfig::default(),
        ));
        Harness {
            reconciler: Reconciler::new(resolver, store.clone(), scanner),
            child,
            outbox,
            store,
            fixture,
        }
    }

    fn record(tx: B256) -> PendingTransferRecord {
        PendingTransferRecord::new(tx, U256::from(1u64), OWNER, TokenMetadata::default())
    }

    #[tokio::test]
    async fn test_reconcile_sorts_records() {
        let h = harness();
        let executed = scenario_hash(0x01);
        let claimable = scenario_hash(0x02);
        let reverted = scenario_hash(0x03);
        let unseen = scenario_hash(0x04);

        h.child
            .add_receipt(eth_withdrawal_receipt(executed, 5, 1, OWNER, U256::from(1u64)));
        h.child
            .add_receipt(eth_withdrawal_receipt(claimable, 6, 2, OWNER, U256::from(1u64)));
        let mut failed = eth_withdrawal_receipt(reverted, 7, 3, OWNER, U256::from(1u64));
        failed.status = false;
        h.child.add_receipt(failed);
        h.outbox.set_state(1, OutboxState::Executed);
        h.outbox.set_state(2, OutboxState::Confirmed);

        for tx in [executed, claimable, reverted, unseen] {
            h.store.add(record(tx)).await.unwrap();
        }

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.executed, vec![executed]);
        assert_eq!(report.stale, vec![reverted]);
        assert_eq!(report.kept.len(), 2);
        assert_eq!(report.kept[0].status, Some(MessageStatus::Claimable));
        assert_eq!(report.kept[1].status, None);

        let remaining: Vec<B256> = h
            .store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.tx_hash)
            .collect();
        assert_eq!(remaining, vec![claimable, unseen]);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_record() {
        let h = harness();
        let tx = scenario_hash(0x05);
        h.child
            .add_receipt(eth_withdrawal_receipt(tx, 5, 1, OWNER, U256::from(1u64)));
        h.store.add(record(tx)).await.unwrap();
        h.outbox.fail_next(BridgeError::RpcTimeout("outbox".into()));

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.kept.len(), 1);
        assert!(h.store.contains(tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_for_reseeds_from_scan() {
        let h = harness();
        let pending = scenario_hash(0x10);
        let done = scenario_hash(0x11);
        h.child.add_receipt(nft_withdrawal_receipt(
            &h.fixture,
            pending,
            20,
            1,
            OWNER,
            U256::from(7u64),
            "ipfs://seven",
        ));
        h.child.add_receipt(nft_withdrawal_receipt(
            &h.fixture,
            done,
            21,
            2,
            OWNER,
            U256::from(8u64),
            "ipfs://eight",
        ));
        h.outbox.set_state(2, OutboxState::Executed);

        let found = h.reconciler.pending_for(OWNER).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.tx_hash, pending);
        assert_eq!(found[0].record.token_id, "7");
        assert_eq!(found[0].status, Some(MessageStatus::Pending));

        // Second call is served from the store, no new scan
        let logs_calls = h.child.get_logs_calls();
        let again = h.reconciler.pending_for(OWNER).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(h.child.get_logs_calls(), logs_calls);
    }
}
