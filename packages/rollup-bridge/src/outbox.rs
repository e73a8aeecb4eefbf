//! Outbox state source
//!
//! Answers "where is this outgoing message in its lifecycle" from protocol
//! contracts, and builds the parent-chain call that executes it.
//!
//! - `Executed` iff `Outbox.isSpent(position)`.
//! - `Confirmed` iff the child block committed by the latest confirmed rollup
//!   node has a send count greater than `position`.
//! - otherwise `Unconfirmed`.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connector::{ChainConnector, LogFilter, TxRequest};
use crate::error::{BridgeError, Result};
use crate::evm::contracts::{NodeInterface, Outbox, Rollup, NODE_INTERFACE_ADDRESS};
use crate::evm::events::parse_node_created_block_hash;
use crate::types::{MessageStatus, OutboxState, OutgoingMessage};

#[async_trait]
pub trait OutboxStateSource: Send + Sync {
    /// Raw protocol state of an outgoing message
    async fn outbox_state(&self, message: &OutgoingMessage) -> Result<OutboxState>;

    /// Parent-chain `executeTransaction` request for a confirmed message
    async fn build_execute(&self, message: &OutgoingMessage) -> Result<TxRequest>;
}

/// [`OutboxStateSource`] backed by the rollup, outbox and NodeInterface contracts
pub struct RollupOutbox {
    parent: Arc<dyn ChainConnector>,
    child: Arc<dyn ChainConnector>,
    outbox: Address,
    rollup: Address,
    /// (node number, send count) of the last confirmed node looked up
    confirmed: Mutex<Option<(u64, u64)>>,
}

impl RollupOutbox {
    pub fn new(
        parent: Arc<dyn ChainConnector>,
        child: Arc<dyn ChainConnector>,
        outbox: Address,
        rollup: Address,
    ) -> Self {
        Self {
            parent,
            child,
            outbox,
            rollup,
            confirmed: Mutex::new(None),
        }
    }

    pub async fn is_spent(&self, position: u64) -> Result<bool> {
        let call = Outbox::isSpentCall {
            index: U256::from(position),
        };
        let raw = self
            .parent
            .call(&TxRequest::new(self.outbox, call.abi_encode()))
            .await?;
        Ok(Outbox::isSpentCall::abi_decode_returns(&raw, true)?._0)
    }

    /// Send count of the child block committed by the latest confirmed node
    pub async fn confirmed_send_count(&self) -> Result<u64> {
        let raw = self
            .parent
            .call(&TxRequest::new(
                self.rollup,
                Rollup::latestConfirmedCall {}.abi_encode(),
            ))
            .await?;
        let node_num = Rollup::latestConfirmedCall::abi_decode_returns(&raw, true)?._0;

        let cached = *self.confirmed.lock().await;
        if let Some((num, count)) = cached {
            if num == node_num {
                return Ok(count);
            }
        }

        let raw = self
            .parent
            .call(&TxRequest::new(
                self.rollup,
                Rollup::getNodeCall { nodeNum: node_num }.abi_encode(),
            ))
            .await?;
        let node = Rollup::getNodeCall::abi_decode_returns(&raw, true)?._0;

        let filter = LogFilter::new()
            .address(self.rollup)
            .event_signature(Rollup::NodeCreated::SIGNATURE_HASH)
            .topic1(B256::from(U256::from(node_num)))
            .from_block(node.createdAtBlock)
            .to_block(node.createdAtBlock);
        let logs = self.parent.get_logs(&filter).await?;

        let block_hash = logs
            .iter()
            .filter_map(parse_node_created_block_hash)
            .find(|(num, _)| *num == node_num)
            .map(|(_, hash)| hash);

        let send_count = match block_hash {
            Some(hash) => self.child.get_block_by_hash(hash).await?.send_count(),
            // Genesis node has no NodeCreated event and commits no sends
            None if node_num == 0 => 0,
            None => {
                return Err(BridgeError::Decode(format!(
                    "no NodeCreated event for node {} at block {}",
                    node_num, node.createdAtBlock
                )))
            }
        };

        debug!(
            node = node_num,
            created_at = node.createdAtBlock,
            send_count = send_count,
            "Latest confirmed node"
        );
        let mut cached = self.confirmed.lock().await;
        // A concurrent lookup may have cached a newer node meanwhile
        if cached.map_or(true, |(num, _)| num <= node_num) {
            *cached = Some((node_num, send_count));
        }
        Ok(send_count)
    }
}

#[async_trait]
impl OutboxStateSource for RollupOutbox {
    async fn outbox_state(&self, message: &OutgoingMessage) -> Result<OutboxState> {
        if self.is_spent(message.position).await? {
            return Ok(OutboxState::Executed);
        }
        let send_count = self.confirmed_send_count().await?;
        if send_count > message.position {
            Ok(OutboxState::Confirmed)
        } else {
            Ok(OutboxState::Unconfirmed)
        }
    }

    async fn build_execute(&self, message: &OutgoingMessage) -> Result<TxRequest> {
        let size = self.confirmed_send_count().await?;
        if size <= message.position {
            return Err(BridgeError::NotClaimable {
                tx_hash: message.tx_hash,
                status: MessageStatus::Pending,
            });
        }

        let proof_call = NodeInterface::constructOutboxProofCall {
            size,
            leaf: message.position,
        };
        let raw = self
            .child
            .call(&TxRequest::new(NODE_INTERFACE_ADDRESS, proof_call.abi_encode()))
            .await?;
        let proof = NodeInterface::constructOutboxProofCall::abi_decode_returns(&raw, true)?.proof;

        debug!(
            position = message.position,
            size = size,
            proof_len = proof.len(),
            "Constructed outbox proof"
        );

        let execute = Outbox::executeTransactionCall {
            proof,
            index: U256::from(message.position),
            l2Sender: message.caller,
            to: message.destination,
            l2Block: U256::from(message.child_block),
            l1Block: U256::from(message.parent_block),
            l2Timestamp: U256::from(message.timestamp),
            value: message.callvalue,
            data: message.data.clone(),
        };
        Ok(TxRequest::new(self.outbox, execute.abi_encode()))
    }
}
