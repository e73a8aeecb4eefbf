//! Message state resolution
//!
//! Given a child-chain transaction hash, find the single outgoing message it
//! created and report where that message is in its lifecycle.

use alloy::primitives::B256;
use std::sync::Arc;
use tracing::debug;

use crate::connector::ChainConnector;
use crate::error::{BridgeError, MissingReason, Result};
use crate::evm::events::outgoing_messages;
use crate::outbox::OutboxStateSource;
use crate::types::{Message, MessageStatus, OutboxState, OutgoingMessage};

/// Outgoing message together with its current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMessage {
    pub outgoing: OutgoingMessage,
    pub state: OutboxState,
    pub status: MessageStatus,
}

impl ResolvedMessage {
    pub fn message(&self) -> Message {
        Message::from_outgoing(&self.outgoing, self.status)
    }
}

pub struct MessageStateResolver {
    child: Arc<dyn ChainConnector>,
    outbox: Arc<dyn OutboxStateSource>,
}

impl MessageStateResolver {
    pub fn new(child: Arc<dyn ChainConnector>, outbox: Arc<dyn OutboxStateSource>) -> Self {
        Self { child, outbox }
    }

    /// The outgoing message created by `tx_hash`.
    ///
    /// Fails with `NoMessageFound` when there is no receipt, the transaction
    /// reverted or it emitted no `L2ToL1Tx`, and with `AmbiguousMessage` when it
    /// emitted more than one.
    pub async fn find_message(&self, tx_hash: B256) -> Result<OutgoingMessage> {
        let receipt = self
            .child
            .get_receipt(tx_hash)
            .await?
            .ok_or(BridgeError::NoMessageFound {
                tx_hash,
                reason: MissingReason::ReceiptNotFound,
            })?;

        if !receipt.status {
            return Err(BridgeError::NoMessageFound {
                tx_hash,
                reason: MissingReason::Reverted,
            });
        }

        let mut messages = outgoing_messages(&receipt);
        match messages.len() {
            0 => Err(BridgeError::NoMessageFound {
                tx_hash,
                reason: MissingReason::NoOutgoingLog,
            }),
            1 => Ok(messages.remove(0)),
            n => Err(BridgeError::AmbiguousMessage {
                tx_hash,
                detail: format!("{} outgoing messages in one transaction", n),
            }),
        }
    }

    /// State of an already located message
    pub async fn state_of(&self, message: &OutgoingMessage) -> Result<OutboxState> {
        self.outbox.outbox_state(message).await
    }

    pub async fn resolve(&self, tx_hash: B256) -> Result<ResolvedMessage> {
        let outgoing = self.find_message(tx_hash).await?;
        let state = self.state_of(&outgoing).await?;
        let status = MessageStatus::from_raw(state.as_raw())?;

        debug!(
            tx_hash = %tx_hash,
            position = outgoing.position,
            state = ?state,
            status = %status,
            "Resolved message"
        );

        Ok(ResolvedMessage {
            outgoing,
            state,
            status,
        })
    }

    pub async fn outbox_state(&self, tx_hash: B256) -> Result<OutboxState> {
        Ok(self.resolve(tx_hash).await?.state)
    }

    pub async fn status(&self, tx_hash: B256) -> Result<MessageStatus> {
        Ok(self.resolve(tx_hash).await?.status)
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStateSource> {
        &self.outbox
    }
}
