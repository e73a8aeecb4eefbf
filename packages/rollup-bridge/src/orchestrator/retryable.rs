//! Parent → child execution tracking
//!
//! A parent-chain deposit delivers a message through the Bridge. The child
//! chain executes it as a transaction whose hash is derived from the message
//! contents:
//!
//! - ETH deposits (kind 12) become a `0x64`-typed deposit transaction
//! - retryable submissions (kind 9) become a `0x69`-typed ticket creation,
//!   whose auto-redeem is announced by `RedeemScheduled`

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rlp::{Encodable, Header};
use alloy::sol_types::{SolCall, SolEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connector::{ChainConnector, LogFilter, TxRequest};
use crate::error::{BridgeError, MissingReason, Result};
use crate::evm::contracts::{ArbRetryableTx, ARB_RETRYABLE_TX_ADDRESS};
use crate::evm::events::{
    delivered_messages, parse_redeem_scheduled, redeem_scheduled, DeliveredMessage,
    DeliveryContracts, MESSAGE_KIND_ETH_DEPOSIT, MESSAGE_KIND_RETRYABLE,
};
use crate::evm::watcher::{LogWatcher, WatcherConfig};

const ETH_DEPOSIT_TX_TYPE: u8 = 0x64;
const SUBMIT_RETRYABLE_TX_TYPE: u8 = 0x69;

/// Child-side execution status, numbered as the protocol numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum ChildExecutionStatus {
    NotYetCreated = 1,
    CreationFailed = 2,
    FundsDepositedOnChild = 3,
    Redeemed = 4,
    Expired = 5,
}

impl ChildExecutionStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Decoded retryable submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableTicket {
    pub message_index: U256,
    pub sender: Address,
    pub base_fee: U256,
    pub to: Address,
    pub l2_call_value: U256,
    pub deposit: U256,
    pub max_submission_fee: U256,
    pub excess_fee_refund: Address,
    pub call_value_refund: Address,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub data: Bytes,
}

impl RetryableTicket {
    /// Parse the inbox payload: nine 32-byte words followed by the call data
    pub fn from_delivered(message: &DeliveredMessage) -> Result<Self> {
        let raw = message.data.as_ref();
        let word = |i: usize| -> Result<U256> {
            raw.get(i * 32..(i + 1) * 32)
                .map(U256::from_be_slice)
                .ok_or_else(|| BridgeError::Decode("retryable payload too short".into()))
        };
        let address = |i: usize| -> Result<Address> {
            let w = word(i)?.to_be_bytes::<32>();
            Ok(Address::from_slice(&w[12..]))
        };

        let data_len = usize::try_from(word(8)?)
            .map_err(|_| BridgeError::Decode("retryable data length overflow".into()))?;
        let data_end = (9 * 32usize)
            .checked_add(data_len)
            .ok_or_else(|| BridgeError::Decode("retryable data length overflow".into()))?;
        let data = raw
            .get(9 * 32..data_end)
            .ok_or_else(|| BridgeError::Decode("retryable call data truncated".into()))?;

        Ok(Self {
            message_index: message.message_index,
            sender: message.sender,
            base_fee: message.base_fee,
            to: address(0)?,
            l2_call_value: word(1)?,
            deposit: word(2)?,
            max_submission_fee: word(3)?,
            excess_fee_refund: address(4)?,
            call_value_refund: address(5)?,
            gas_limit: word(6)?,
            max_fee_per_gas: word(7)?,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Hash of the ticket creation transaction on the child chain
    pub fn ticket_id(&self, child_chain_id: u64) -> B256 {
        let dest = if self.to == Address::ZERO {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(self.to.as_slice())
        };
        let msg_num = B256::from(self.message_index.to_be_bytes::<32>());
        let chain_id = U256::from(child_chain_id);
        typed_hash(
            SUBMIT_RETRYABLE_TX_TYPE,
            &[
                &chain_id,
                &msg_num,
                &self.sender,
                &self.base_fee,
                &self.deposit,
                &self.max_fee_per_gas,
                &self.gas_limit,
                &dest,
                &self.l2_call_value,
                &self.call_value_refund,
                &self.max_submission_fee,
                &self.excess_fee_refund,
                &self.data,
            ],
        )
    }
}

/// Decoded ETH deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthDeposit {
    pub message_index: U256,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl EthDeposit {
    /// Inbox payload is the 20-byte recipient followed by a 32-byte value
    pub fn from_delivered(message: &DeliveredMessage) -> Result<Self> {
        let raw = message.data.as_ref();
        if raw.len() < 52 {
            return Err(BridgeError::Decode(format!(
                "ETH deposit payload is {} bytes, expected 52",
                raw.len()
            )));
        }
        Ok(Self {
            message_index: message.message_index,
            from: message.sender,
            to: Address::from_slice(&raw[..20]),
            value: U256::from_be_slice(&raw[20..52]),
        })
    }

    /// Hash of the deposit transaction on the child chain
    pub fn tx_id(&self, child_chain_id: u64) -> B256 {
        let msg_num = B256::from(self.message_index.to_be_bytes::<32>());
        let chain_id = U256::from(child_chain_id);
        typed_hash(
            ETH_DEPOSIT_TX_TYPE,
            &[&chain_id, &msg_num, &self.from, &self.to, &self.value],
        )
    }
}

fn typed_hash(tx_type: u8, fields: &[&dyn Encodable]) -> B256 {
    let payload_length: usize = fields.iter().map(|f| f.length()).sum();
    let mut out = vec![tx_type];
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    keccak256(&out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentToChildMessage {
    EthDeposit(EthDeposit),
    Retryable(RetryableTicket),
}

impl ParentToChildMessage {
    pub fn message_index(&self) -> U256 {
        match self {
            Self::EthDeposit(d) => d.message_index,
            Self::Retryable(t) => t.message_index,
        }
    }

    /// Child transaction created for this message
    pub fn child_tx_id(&self, child_chain_id: u64) -> B256 {
        match self {
            Self::EthDeposit(d) => d.tx_id(child_chain_id),
            Self::Retryable(t) => t.ticket_id(child_chain_id),
        }
    }
}

/// Where a parent → child message stands on the child chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExecution {
    pub message: ParentToChildMessage,
    pub status: ChildExecutionStatus,
    /// Deposit transaction, or the successful redeem of a ticket
    pub child_tx: Option<B256>,
}

impl ChildExecution {
    /// Fully executed: a deposit landed, or a ticket was redeemed
    pub fn is_complete(&self) -> bool {
        match self.message {
            ParentToChildMessage::EthDeposit(_) => {
                self.status == ChildExecutionStatus::FundsDepositedOnChild
            }
            ParentToChildMessage::Retryable(_) => self.status == ChildExecutionStatus::Redeemed,
        }
    }
}

pub struct RetryableTracker {
    parent: Arc<dyn ChainConnector>,
    child: Arc<dyn ChainConnector>,
    delivery: DeliveryContracts,
    watcher: LogWatcher,
}

impl RetryableTracker {
    pub fn new(
        parent: Arc<dyn ChainConnector>,
        child: Arc<dyn ChainConnector>,
        delivery: DeliveryContracts,
        watcher_config: WatcherConfig,
    ) -> Self {
        let watcher = LogWatcher::new(child.clone(), watcher_config);
        Self {
            parent,
            child,
            delivery,
            watcher,
        }
    }

    /// Messages a parent transaction delivered, in message index order
    pub async fn messages(&self, parent_tx: B256) -> Result<Vec<ParentToChildMessage>> {
        let receipt = self
            .parent
            .get_receipt(parent_tx)
            .await?
            .ok_or(BridgeError::NoMessageFound {
                tx_hash: parent_tx,
                reason: MissingReason::ReceiptNotFound,
            })?;
        if !receipt.status {
            return Err(BridgeError::NoMessageFound {
                tx_hash: parent_tx,
                reason: MissingReason::Reverted,
            });
        }

        let mut messages = Vec::new();
        for delivered in delivered_messages(&receipt, &self.delivery) {
            match delivered.kind {
                MESSAGE_KIND_ETH_DEPOSIT => messages.push(ParentToChildMessage::EthDeposit(
                    EthDeposit::from_delivered(&delivered)?,
                )),
                MESSAGE_KIND_RETRYABLE => messages.push(ParentToChildMessage::Retryable(
                    RetryableTicket::from_delivered(&delivered)?,
                )),
                other => debug!(
                    tx_hash = %parent_tx,
                    kind = other,
                    "Skipping delivered message of untracked kind"
                ),
            }
        }
        Ok(messages)
    }

    /// The single message a deposit transaction delivered
    pub async fn message(&self, parent_tx: B256) -> Result<ParentToChildMessage> {
        let mut messages = self.messages(parent_tx).await?;
        match messages.len() {
            0 => Err(BridgeError::NoMessageFound {
                tx_hash: parent_tx,
                reason: MissingReason::NoOutgoingLog,
            }),
            1 => Ok(messages.remove(0)),
            n => Err(BridgeError::AmbiguousMessage {
                tx_hash: parent_tx,
                detail: format!("{} delivered messages in one transaction", n),
            }),
        }
    }

    pub async fn status(&self, message: &ParentToChildMessage) -> Result<ChildExecution> {
        let child_chain_id = self.child.chain_id();
        let (status, child_tx) = match message {
            ParentToChildMessage::EthDeposit(deposit) => {
                let tx_id = deposit.tx_id(child_chain_id);
                match self.child.get_receipt(tx_id).await? {
                    None => (ChildExecutionStatus::NotYetCreated, None),
                    Some(r) if !r.status => (ChildExecutionStatus::CreationFailed, Some(tx_id)),
                    Some(_) => (ChildExecutionStatus::FundsDepositedOnChild, Some(tx_id)),
                }
            }
            ParentToChildMessage::Retryable(ticket) => {
                self.ticket_status(ticket.ticket_id(child_chain_id)).await?
            }
        };

        Ok(ChildExecution {
            message: message.clone(),
            status,
            child_tx,
        })
    }

    async fn ticket_status(&self, ticket_id: B256) -> Result<(ChildExecutionStatus, Option<B256>)> {
        let creation = match self.child.get_receipt(ticket_id).await? {
            None => return Ok((ChildExecutionStatus::NotYetCreated, None)),
            Some(r) if !r.status => return Ok((ChildExecutionStatus::CreationFailed, None)),
            Some(r) => r,
        };

        // Auto-redeem is scheduled in the creation transaction itself
        let mut retries: Vec<B256> = redeem_scheduled(&creation)
            .into_iter()
            .filter(|r| r.ticket_id == ticket_id)
            .map(|r| r.retry_tx_hash)
            .collect();

        // Manual redeems after it
        let head = self.child.block_number().await?;
        let filter = LogFilter::new()
            .address(ARB_RETRYABLE_TX_ADDRESS)
            .event_signature(ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH)
            .topic1(ticket_id);
        for log in self
            .watcher
            .get_logs_chunked(filter, creation.block_number, head)
            .await?
        {
            if let Some(redeem) = parse_redeem_scheduled(&log) {
                if !retries.contains(&redeem.retry_tx_hash) {
                    retries.push(redeem.retry_tx_hash);
                }
            }
        }

        for retry in retries {
            if let Some(receipt) = self.child.get_receipt(retry).await? {
                if receipt.status {
                    return Ok((ChildExecutionStatus::Redeemed, Some(retry)));
                }
            }
        }

        // Unredeemed: alive until its timeout, then gone
        let call = ArbRetryableTx::getTimeoutCall { ticketId: ticket_id };
        match self
            .child
            .call(&TxRequest::new(ARB_RETRYABLE_TX_ADDRESS, call.abi_encode()))
            .await
        {
            Ok(_) => Ok((ChildExecutionStatus::FundsDepositedOnChild, None)),
            Err(BridgeError::RpcError(msg)) if msg.contains("revert") => {
                Ok((ChildExecutionStatus::Expired, None))
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the child chain has created the execution for `parent_tx`.
    ///
    /// Fails with [`BridgeError::TimedOut`] once `timeout` has passed.
    pub async fn wait_for_execution(
        &self,
        parent_tx: B256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ChildExecution> {
        let start = Instant::now();
        let message = self.message(parent_tx).await?;

        loop {
            match self.status(&message).await {
                Ok(execution) if execution.status != ChildExecutionStatus::NotYetCreated => {
                    info!(
                        parent_tx = %parent_tx,
                        status = ?execution.status,
                        child_tx = ?execution.child_tx,
                        "Child execution observed"
                    );
                    return Ok(execution);
                }
                Ok(_) => debug!(parent_tx = %parent_tx, "Child execution not yet created"),
                Err(e) if e.is_transient() => {
                    warn!(parent_tx = %parent_tx, error = %e, "Child status poll failed")
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= timeout {
                return Err(BridgeError::TimedOut(format!(
                    "child execution of {} after {:?}",
                    parent_tx, timeout
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
