//! Event log scanner
//!
//! Rebuilds a user's outgoing NFT transfers from chain history when the local
//! store is empty or untrusted.
//!
//! 1. `L2ToL1Tx` logs from ArbSys whose destination is the parent NFT gateway,
//!    fetched in chunks.
//! 2. Per transaction, the child NFT bridge's application events are decoded
//!    against [`APP_EVENT_TABLE`] and joined to the protocol records by ordinal
//!    (both ordered by log index). A count mismatch makes the join ambiguous for
//!    that transaction only.
//! 3. Records owned by the user get display metadata (best effort) and their
//!    outbox state; executed ones are dropped.
//!
//! [`APP_EVENT_TABLE`]: crate::evm::events::APP_EVENT_TABLE

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::{ChainConnector, LogFilter};
use crate::error::Result;
use crate::evm::contracts::{ArbSys, ARB_SYS_ADDRESS};
use crate::evm::events::{parse_app_log, parse_outgoing_log, NftTransferEvent};
use crate::evm::watcher::{LogWatcher, WatcherConfig};
use crate::metadata::{token_metadata, MetadataFetcher};
use crate::metrics;
use crate::outbox::OutboxStateSource;
use crate::types::{MessageStatus, OutboxState, OutgoingMessage, PendingTransferRecord};

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// First child block to scan
    pub from_block: u64,
    /// Maximum block range per `eth_getLogs`
    pub max_block_range: u64,
    /// Transactions enriched concurrently
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            from_block: 0,
            max_block_range: 10_000,
            concurrency: 8,
        }
    }
}

/// Child NFT bridge and its parent-side counterpart
#[derive(Debug, Clone, Copy)]
pub struct NftBridgeAddresses {
    pub child_bridge: Address,
    pub parent_gateway: Address,
}

/// A transfer found in chain history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTransfer {
    pub record: PendingTransferRecord,
    pub outgoing: OutgoingMessage,
    /// `None` when the state lookup failed
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Application event matched the table but did not decode; owner unknown
    Undecodable,
    /// Application and protocol record counts differ within the transaction
    Ambiguous(String),
    /// Receipt could not be fetched
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub tx_hash: B256,
    pub position: u64,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub transfers: Vec<ScannedTransfer>,
    pub skipped: Vec<SkippedRecord>,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.transfers.extend(other.transfers);
        self.skipped.extend(other.skipped);
    }
}

pub struct EventLogScanner {
    child: Arc<dyn ChainConnector>,
    outbox: Arc<dyn OutboxStateSource>,
    metadata: Arc<dyn MetadataFetcher>,
    addresses: NftBridgeAddresses,
    config: ScanConfig,
}

impl EventLogScanner {
    pub fn new(
        child: Arc<dyn ChainConnector>,
        outbox: Arc<dyn OutboxStateSource>,
        metadata: Arc<dyn MetadataFetcher>,
        addresses: NftBridgeAddresses,
        config: ScanConfig,
    ) -> Self {
        Self {
            child,
            outbox,
            metadata,
            addresses,
            config,
        }
    }

    /// Scan from the configured start block to the child head
    pub async fn scan(&self, owner: Address) -> Result<ScanReport> {
        let head = self.child.block_number().await?;
        self.scan_range(owner, self.config.from_block, head).await
    }

    pub async fn scan_range(&self, owner: Address, from_block: u64, to_block: u64) -> Result<ScanReport> {
        let watcher = LogWatcher::new(
            Arc::clone(&self.child),
            WatcherConfig {
                max_block_range: self.config.max_block_range,
                ..WatcherConfig::default()
            },
        );
        let filter = LogFilter::new()
            .address(ARB_SYS_ADDRESS)
            .event_signature(ArbSys::L2ToL1Tx::SIGNATURE_HASH)
            .topic1(self.addresses.parent_gateway.into_word());
        let logs = watcher.get_logs_chunked(filter, from_block, to_block).await?;

        // Group protocol records by transaction, keeping first-seen order
        let mut order: Vec<B256> = Vec::new();
        let mut by_tx: HashMap<B256, Vec<OutgoingMessage>> = HashMap::new();
        for log in &logs {
            let Some(message) = parse_outgoing_log(log) else {
                warn!(tx = ?log.tx_hash, "Failed to parse L2ToL1Tx event from log");
                continue;
            };
            let entry = by_tx.entry(message.tx_hash).or_default();
            if entry.is_empty() {
                order.push(message.tx_hash);
            }
            entry.push(message);
        }

        info!(
            owner = %owner,
            from = from_block,
            to = to_block,
            messages = logs.len(),
            transactions = order.len(),
            "Scanning outgoing NFT messages"
        );

        let groups: Vec<(B256, Vec<OutgoingMessage>)> = order
            .into_iter()
            .filter_map(|tx| by_tx.remove(&tx).map(|msgs| (tx, msgs)))
            .collect();

        let partials: Vec<ScanReport> = stream::iter(groups)
            .map(|(tx_hash, messages)| self.scan_transaction(owner, tx_hash, messages))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = ScanReport::default();
        for partial in partials {
            report.merge(partial);
        }
        report
            .transfers
            .sort_by_key(|t| (t.outgoing.child_block, t.outgoing.log_index));

        info!(
            owner = %owner,
            transfers = report.transfers.len(),
            skipped = report.skipped.len(),
            "Scan complete"
        );
        Ok(report)
    }

    async fn scan_transaction(
        &self,
        owner: Address,
        tx_hash: B256,
        mut messages: Vec<OutgoingMessage>,
    ) -> ScanReport {
        let mut report = ScanReport::default();
        messages.sort_by_key(|m| m.log_index);

        let skip_all = |report: &mut ScanReport, messages: &[OutgoingMessage], reason: SkipReason| {
            for m in messages {
                metrics::record_scan_record("skipped");
                report.skipped.push(SkippedRecord {
                    tx_hash,
                    position: m.position,
                    reason: reason.clone(),
                });
            }
        };

        let receipt = match self.child.get_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                skip_all(&mut report, &messages, SkipReason::Unavailable("receipt not found".into()));
                return report;
            }
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "Failed to fetch receipt during scan");
                skip_all(&mut report, &messages, SkipReason::Unavailable(e.to_string()));
                return report;
            }
        };

        let mut app_logs: Vec<_> = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.addresses.child_bridge)
            .filter_map(|log| match parse_app_log(log) {
                Ok(None) => None,
                Ok(Some(event)) => Some((log.log_index, Some(event))),
                Err(()) => Some((log.log_index, None)),
            })
            .collect();
        app_logs.sort_by_key(|(index, _)| *index);

        if app_logs.len() != messages.len() {
            let detail = format!(
                "{} application events for {} outgoing messages",
                app_logs.len(),
                messages.len()
            );
            warn!(tx_hash = %tx_hash, detail = %detail, "Ambiguous join");
            skip_all(&mut report, &messages, SkipReason::Ambiguous(detail));
            return report;
        }

        for (message, (_, event)) in messages.into_iter().zip(app_logs) {
            let Some(event) = event else {
                metrics::record_scan_record("skipped");
                report.skipped.push(SkippedRecord {
                    tx_hash,
                    position: message.position,
                    reason: SkipReason::Undecodable,
                });
                continue;
            };
            if event.owner != owner {
                continue;
            }

            let status = match self.outbox.outbox_state(&message).await {
                Ok(OutboxState::Executed) => {
                    debug!(tx_hash = %tx_hash, position = message.position, "Skipping executed transfer");
                    metrics::record_scan_record("executed");
                    continue;
                }
                Ok(state) => Some(MessageStatus::from(state)),
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %e, "State lookup failed, keeping record");
                    None
                }
            };

            let record = self.build_record(&event).await;
            metrics::record_scan_record("found");
            report.transfers.push(ScannedTransfer {
                record,
                outgoing: message,
                status,
            });
        }
        report
    }

    async fn build_record(&self, event: &NftTransferEvent) -> PendingTransferRecord {
        let hint = (!event.token_uri.is_empty()).then_some(event.token_uri.as_str());
        let metadata = token_metadata(
            self.child.as_ref(),
            self.addresses.child_bridge,
            self.metadata.as_ref(),
            event.token_id,
            hint,
        )
        .await;
        PendingTransferRecord::new(event.tx_hash, event.token_id, event.owner, metadata)
    }
}
