//! Retryable gas parameters
//!
//! The child chain prices a retryable in three parts: a submission fee paid on
//! the parent chain, an execution gas limit and a max fee per gas. The values
//! come from the protocol's own estimation endpoints; margins are applied on
//! top so a base fee rise between estimate and inclusion does not strand the
//! ticket.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::connector::{ChainConnector, TxRequest};
use crate::error::{BridgeError, Result};
use crate::evm::contracts::{Inbox, NodeInterface, NODE_INTERFACE_ADDRESS};

/// Parent base fee used when the latest block carries none
const FALLBACK_BASE_FEE: u128 = 1_000_000_000;

/// Inputs to a retryable estimate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableRequest {
    /// Parent-chain address submitting the retryable. NodeInterface aliases it.
    pub from: Address,
    pub to: Address,
    pub l2_call_value: U256,
    pub excess_fee_refund: Address,
    pub call_value_refund: Address,
    pub data: Bytes,
    /// Snapshot of the parent base fee; read from the latest block when `None`
    pub parent_base_fee: Option<u128>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryableGasParams {
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_submission_cost: U256,
    /// Value the parent submission must carry
    pub deposit: U256,
}

#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate_retryable(&self, request: &RetryableRequest) -> Result<RetryableGasParams>;
}

/// Percentage margins added to raw estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasMargins {
    pub base_fee_percent: u64,
    pub submission_fee_percent: u64,
    pub gas_limit_percent: u64,
    /// Multiplier applied to the child gas price
    pub max_fee_multiplier: u64,
}

impl Default for GasMargins {
    fn default() -> Self {
        Self {
            base_fee_percent: 200,
            submission_fee_percent: 300,
            gas_limit_percent: 0,
            max_fee_multiplier: 2,
        }
    }
}

fn with_margin(value: U256, percent: u64) -> U256 {
    value + value * U256::from(percent) / U256::from(100)
}

/// Simulated ticket for `estimateRetryableTicket`, sent with the unaliased sender
fn estimate_call(request: &RetryableRequest) -> NodeInterface::estimateRetryableTicketCall {
    // A generous deposit so the simulation never runs short
    let deposit = request.l2_call_value + U256::from(10u64).pow(U256::from(18));
    NodeInterface::estimateRetryableTicketCall {
        sender: request.from,
        deposit,
        to: request.to,
        l2CallValue: request.l2_call_value,
        excessFeeRefundAddress: request.excess_fee_refund,
        callValueRefundAddress: request.call_value_refund,
        data: request.data.clone(),
    }
}

/// Estimates through the parent Inbox and the child NodeInterface
pub struct NodeInterfaceGasEstimator {
    parent: Arc<dyn ChainConnector>,
    child: Arc<dyn ChainConnector>,
    inbox: Address,
    margins: GasMargins,
}

impl NodeInterfaceGasEstimator {
    pub fn new(
        parent: Arc<dyn ChainConnector>,
        child: Arc<dyn ChainConnector>,
        inbox: Address,
        margins: GasMargins,
    ) -> Self {
        Self {
            parent,
            child,
            inbox,
            margins,
        }
    }

    async fn parent_base_fee(&self, snapshot: Option<u128>) -> Result<u128> {
        if let Some(fee) = snapshot {
            return Ok(fee);
        }
        let head = self.parent.block_number().await?;
        let block = self.parent.get_block(head).await?;
        Ok(block.base_fee_per_gas.unwrap_or(FALLBACK_BASE_FEE))
    }

    async fn submission_cost(&self, data_len: usize, base_fee: u128) -> Result<U256> {
        let base_fee = with_margin(U256::from(base_fee), self.margins.base_fee_percent);
        let call = Inbox::calculateRetryableSubmissionFeeCall {
            dataLength: U256::from(data_len),
            baseFee: base_fee,
        };
        let raw = self
            .parent
            .call(&TxRequest::new(self.inbox, call.abi_encode()))
            .await?;
        let fee = Inbox::calculateRetryableSubmissionFeeCall::abi_decode_returns(&raw, true)?._0;
        Ok(with_margin(fee, self.margins.submission_fee_percent))
    }

    async fn gas_limit(&self, request: &RetryableRequest) -> Result<U256> {
        let call = estimate_call(request);
        let gas = self
            .child
            .estimate_gas(&TxRequest::new(NODE_INTERFACE_ADDRESS, call.abi_encode()))
            .await?;
        Ok(with_margin(U256::from(gas), self.margins.gas_limit_percent))
    }
}

#[async_trait]
impl GasEstimator for NodeInterfaceGasEstimator {
    async fn estimate_retryable(&self, request: &RetryableRequest) -> Result<RetryableGasParams> {
        let base_fee = self.parent_base_fee(request.parent_base_fee).await?;
        let max_submission_cost = self.submission_cost(request.data.len(), base_fee).await?;
        let gas_limit = self.gas_limit(request).await?;
        let child_gas_price = self.child.get_gas_price().await?;
        let max_fee_per_gas =
            U256::from(child_gas_price) * U256::from(self.margins.max_fee_multiplier);

        let deposit = gas_limit
            .checked_mul(max_fee_per_gas)
            .and_then(|execution| execution.checked_add(max_submission_cost))
            .and_then(|total| total.checked_add(request.l2_call_value))
            .ok_or_else(|| BridgeError::Decode("retryable deposit overflow".into()))?;

        debug!(
            gas_limit = %gas_limit,
            max_fee_per_gas = %max_fee_per_gas,
            max_submission_cost = %max_submission_cost,
            deposit = %deposit,
            "Estimated retryable parameters"
        );

        Ok(RetryableGasParams {
            gas_limit,
            max_fee_per_gas,
            max_submission_cost,
            deposit,
        })
    }
}
