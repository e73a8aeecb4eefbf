//! Chain connector capability
//!
//! A [`ChainConnector`] is the only way the tracker touches a chain. The
//! alloy-backed implementation lives in [`crate::evm::client`]; tests use the
//! in-memory `MockChain` from the `testing` module.
//!
//! Receipts, blocks and logs are converted into the plain types below so that
//! nothing above this layer depends on alloy's RPC response shapes.

pub mod registry;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{BridgeError, Result};

pub use registry::{ConnectorFactory, ConnectorRegistry};

// ============================================================================
// Plain chain types
// ============================================================================

/// Event log as seen in a receipt or a `eth_getLogs` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl Log {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// `true` when execution succeeded
    pub status: bool,
    pub logs: Vec<Log>,
}

/// Block header fields the tracker needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    /// Nitro chains store the outbox send count in the first 8 bytes
    pub mix_hash: B256,
    pub extra_data: Bytes,
    pub base_fee_per_gas: Option<u128>,
}

impl Block {
    /// Number of outgoing messages sent up to and including this child block
    pub fn send_count(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.mix_hash[..8]);
        u64::from_be_bytes(raw)
    }
}

/// Log query. `None` block bounds mean "latest".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topic0: Option<B256>,
    pub topic1: Option<B256>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn event_signature(mut self, topic0: B256) -> Self {
        self.topic0 = Some(topic0);
        self
    }

    pub fn topic1(mut self, topic1: B256) -> Self {
        self.topic1 = Some(topic1);
        self
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    /// Whether a log satisfies this filter (block bounds included)
    pub fn matches(&self, log: &Log) -> bool {
        if let Some(address) = self.address {
            if log.address != address {
                return false;
            }
        }
        if let Some(topic0) = self.topic0 {
            if log.topics.first() != Some(&topic0) {
                return false;
            }
        }
        if let Some(topic1) = self.topic1 {
            if log.topics.get(1) != Some(&topic1) {
                return false;
            }
        }
        let block = log.block_number.unwrap_or_default();
        if self.from_block.is_some_and(|from| block < from) {
            return false;
        }
        if self.to_block.is_some_and(|to| block > to) {
            return false;
        }
        true
    }
}

/// Call or transaction request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl TxRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

// ============================================================================
// Capability
// ============================================================================

/// Thin capability over one chain endpoint
#[async_trait]
pub trait ChainConnector: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Address transactions are sent from, if this connector can sign
    fn signer_address(&self) -> Option<Address>;

    async fn block_number(&self) -> Result<u64>;

    /// `Ok(None)` when the chain has no receipt for this hash
    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>>;

    async fn get_block(&self, number: u64) -> Result<Block>;

    async fn get_block_by_hash(&self, hash: B256) -> Result<Block>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    async fn get_balance(&self, address: Address) -> Result<U256>;

    async fn get_gas_price(&self) -> Result<u128>;

    async fn call(&self, request: &TxRequest) -> Result<Bytes>;

    async fn estimate_gas(&self, request: &TxRequest) -> Result<u64>;

    /// Sign and broadcast; returns as soon as the node accepts the transaction
    async fn send_transaction(&self, request: TxRequest) -> Result<B256>;
}

/// Poll until `tx_hash` has `confirmations` blocks on top of it.
///
/// A reverted receipt fails with [`BridgeError::Reverted`]; running past
/// `timeout` fails with [`BridgeError::TimedOut`].
pub async fn wait_for_confirmations(
    connector: &dyn ChainConnector,
    tx_hash: B256,
    confirmations: u64,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Receipt> {
    let start = Instant::now();

    loop {
        if let Some(receipt) = connector.get_receipt(tx_hash).await? {
            if !receipt.status {
                return Err(BridgeError::Reverted(tx_hash));
            }
            let head = connector.block_number().await?;
            let depth = head.saturating_sub(receipt.block_number) + 1;
            if depth >= confirmations {
                return Ok(receipt);
            }
            debug!(
                tx_hash = %tx_hash,
                depth = depth,
                required = confirmations,
                "Waiting for confirmations"
            );
        }

        if start.elapsed() >= timeout {
            return Err(BridgeError::TimedOut(format!(
                "{} confirmation(s) of {} after {:?}",
                confirmations, tx_hash, timeout
            )));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
