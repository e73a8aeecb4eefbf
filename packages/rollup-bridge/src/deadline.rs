//! Claim-readiness deadline estimation
//!
//! Deadlines are display estimates: the block time of the initiating
//! transaction plus a fixed confirmation buffer. Nothing gates on them.

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::connector::ChainConnector;
use crate::error::{BridgeError, MissingReason, Result};

/// Default confirmation buffer in minutes
pub const DEFAULT_BUFFER_MINUTES: u64 = 70;
/// Default challenge period (display only)
pub const DEFAULT_CHALLENGE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `block_timestamp + buffer_minutes * 60`
pub fn claim_ready_at(block_timestamp: u64, buffer_minutes: u64) -> u64 {
    block_timestamp.saturating_add(buffer_minutes.saturating_mul(60))
}

/// Seconds left until `deadline`, zero once passed
pub fn remaining(deadline: u64, now: u64) -> u64 {
    deadline.saturating_sub(now)
}

/// Human readable UTC rendering of a unix timestamp
pub fn format_timestamp(ts: u64) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub struct DeadlineEstimator {
    connector: Arc<dyn ChainConnector>,
    buffer_minutes: u64,
    challenge_period: Duration,
}

impl DeadlineEstimator {
    pub fn new(
        connector: Arc<dyn ChainConnector>,
        buffer_minutes: u64,
        challenge_period: Duration,
    ) -> Self {
        Self {
            connector,
            buffer_minutes,
            challenge_period,
        }
    }

    pub fn buffer_minutes(&self) -> u64 {
        self.buffer_minutes
    }

    /// Timestamp of the block that included `tx_hash`
    pub async fn initiated_at(&self, tx_hash: B256) -> Result<u64> {
        let receipt = self
            .connector
            .get_receipt(tx_hash)
            .await?
            .ok_or(BridgeError::NoMessageFound {
                tx_hash,
                reason: MissingReason::ReceiptNotFound,
            })?;
        let block = self.connector.get_block(receipt.block_number).await?;
        Ok(block.timestamp)
    }

    /// Expected claim-ready unix timestamp for a transaction
    pub async fn estimate(&self, tx_hash: B256) -> Result<u64> {
        Ok(claim_ready_at(
            self.initiated_at(tx_hash).await?,
            self.buffer_minutes,
        ))
    }

    /// End of the challenge period for a message initiated at `initiated_at`
    pub fn challenge_period_end(&self, initiated_at: u64) -> u64 {
        initiated_at.saturating_add(self.challenge_period.as_secs())
    }
}
