//! Testing utilities
//!
//! In-memory chain connector, scripted outbox state and receipt fixtures for
//! driving the tracker without a node. Compiled for unit tests and behind the
//! `testing` feature for the integration scenarios.

pub mod mock_chain;

pub use mock_chain::{MockChain, MOCK_BLOCK_TIME, MOCK_GENESIS_TIMESTAMP};

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::connector::{Log, Receipt, TxRequest};
use crate::error::{BridgeError, Result};
use crate::evm::contracts::{
    ArbSys, Bridge, ChildNftBridge, Inbox, Outbox, ParentNftGateway, ARB_SYS_ADDRESS,
};
use crate::evm::events::{
    log_from_event, DeliveredMessage, DeliveryContracts, MESSAGE_KIND_ETH_DEPOSIT,
    MESSAGE_KIND_RETRYABLE,
};
use crate::metadata::MetadataFetcher;
use crate::orchestrator::retryable::RetryableTicket;
use crate::outbox::OutboxStateSource;
use crate::types::{OutboxState, OutgoingMessage, TokenMetadata};

/// Outbox address used by [`ScriptedOutbox::build_execute`]
pub const SCRIPTED_OUTBOX_ADDRESS: Address = Address::repeat_byte(0x0b);

/// [`OutboxStateSource`] whose answers are set by the test, keyed by message position.
/// Unknown positions are `Unconfirmed`.
#[derive(Default)]
pub struct ScriptedOutbox {
    states: Mutex<HashMap<u64, OutboxState>>,
    errors: Mutex<VecDeque<BridgeError>>,
    queries: Mutex<usize>,
}

impl ScriptedOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, position: u64, state: OutboxState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(position, state);
    }

    /// Fail the next state query with `error`
    pub fn fail_next(&self, error: BridgeError) {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_of(&self, position: u64) -> OutboxState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&position)
            .copied()
            .unwrap_or(OutboxState::Unconfirmed)
    }
}

#[async_trait]
impl OutboxStateSource for ScriptedOutbox {
    async fn outbox_state(&self, message: &OutgoingMessage) -> Result<OutboxState> {
        *self.queries.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if let Some(err) = self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }
        Ok(self.state_of(message.position))
    }

    async fn build_execute(&self, message: &OutgoingMessage) -> Result<TxRequest> {
        let state = self.state_of(message.position);
        if state != OutboxState::Confirmed {
            return Err(BridgeError::NotClaimable {
                tx_hash: message.tx_hash,
                status: state.into(),
            });
        }
        let call = Outbox::executeTransactionCall {
            proof: Vec::new(),
            index: U256::from(message.position),
            l2Sender: message.caller,
            to: message.destination,
            l2Block: U256::from(message.child_block),
            l1Block: U256::from(message.parent_block),
            l2Timestamp: U256::from(message.timestamp),
            value: message.callvalue,
            data: message.data.clone(),
        };
        Ok(TxRequest::new(SCRIPTED_OUTBOX_ADDRESS, call.abi_encode()))
    }
}

/// Metadata "fetched" without HTTP: the name echoes the URI. URIs containing
/// `broken` fail like an unreachable server.
pub struct StaticMetadataFetcher;

#[async_trait]
impl MetadataFetcher for StaticMetadataFetcher {
    async fn fetch(&self, token_uri: &str) -> Result<TokenMetadata> {
        if token_uri.contains("broken") {
            return Err(BridgeError::RpcError("502".into()));
        }
        Ok(TokenMetadata {
            name: Some(format!("name of {}", token_uri)),
            image: None,
            description: None,
        })
    }
}

// ============================================================================
// Receipt fixtures
// ============================================================================

/// Child-chain NFT bridge contracts used by the fixtures
#[derive(Debug, Clone, Copy)]
pub struct NftBridgeFixture {
    pub child_bridge: Address,
    pub parent_gateway: Address,
}

impl Default for NftBridgeFixture {
    fn default() -> Self {
        Self {
            child_bridge: Address::repeat_byte(0xb0),
            parent_gateway: Address::repeat_byte(0xa0),
        }
    }
}

/// Hash with every byte set to `byte` (0xAA, 0xBB... scenario hashes)
pub fn scenario_hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

/// Receipt of an ETH withdrawal: a single `L2ToL1Tx` with no calldata
pub fn eth_withdrawal_receipt(
    tx_hash: B256,
    block: u64,
    position: u64,
    from: Address,
    amount: U256,
) -> Receipt {
    let event = ArbSys::L2ToL1Tx {
        caller: from,
        destination: from,
        hash: U256::from(position) + U256::from(1_000_000u64),
        position: U256::from(position),
        arbBlockNum: U256::from(block),
        ethBlockNum: U256::from(block / 4),
        timestamp: U256::from(MOCK_GENESIS_TIMESTAMP + block * MOCK_BLOCK_TIME),
        callvalue: amount,
        data: Bytes::new(),
    };
    Receipt {
        tx_hash,
        block_number: block,
        status: true,
        logs: vec![log_from_event(ARB_SYS_ADDRESS, &event, block, tx_hash, 0)],
    }
}

/// Receipt of an NFT withdrawal: `WithdrawalCreated` from the child bridge
/// followed by the `L2ToL1Tx` it caused
pub fn nft_withdrawal_receipt(
    fixture: &NftBridgeFixture,
    tx_hash: B256,
    block: u64,
    position: u64,
    owner: Address,
    token_id: U256,
    token_uri: &str,
) -> Receipt {
    let app = ChildNftBridge::WithdrawalCreated {
        owner,
        tokenId: token_id,
        parentRecipient: owner,
        tokenUri: token_uri.to_string(),
    };
    let finalize = ParentNftGateway::finalizeWithdrawalCall {
        to: owner,
        tokenId: token_id,
    };
    let outgoing = ArbSys::L2ToL1Tx {
        caller: fixture.child_bridge,
        destination: fixture.parent_gateway,
        hash: U256::from(position) + U256::from(1_000_000u64),
        position: U256::from(position),
        arbBlockNum: U256::from(block),
        ethBlockNum: U256::from(block / 4),
        timestamp: U256::from(MOCK_GENESIS_TIMESTAMP + block * MOCK_BLOCK_TIME),
        callvalue: U256::ZERO,
        data: finalize.abi_encode().into(),
    };
    Receipt {
        tx_hash,
        block_number: block,
        status: true,
        logs: vec![
            log_from_event(fixture.child_bridge, &app, block, tx_hash, 0),
            log_from_event(ARB_SYS_ADDRESS, &outgoing, block, tx_hash, 1),
        ],
    }
}

// ============================================================================
// Parent → child delivery fixtures
// ============================================================================

/// Bridge contract emitting `MessageDelivered` in the fixtures
pub const FIXTURE_BRIDGE_ADDRESS: Address = Address::repeat_byte(0x0c);
/// Inbox contract emitting `InboxMessageDelivered` in the fixtures
pub const FIXTURE_INBOX_ADDRESS: Address = Address::repeat_byte(0x0d);
/// Delivery contracts matching the fixture emitters
pub const FIXTURE_DELIVERY: DeliveryContracts = DeliveryContracts {
    bridge: FIXTURE_BRIDGE_ADDRESS,
    inbox: FIXTURE_INBOX_ADDRESS,
};

fn delivery_logs(
    message_index: U256,
    kind: u8,
    sender: Address,
    base_fee: U256,
    data: Vec<u8>,
    tx_hash: B256,
    block: u64,
) -> Vec<Log> {
    let delivered = Bridge::MessageDelivered {
        messageIndex: message_index,
        beforeInboxAcc: B256::ZERO,
        inbox: FIXTURE_INBOX_ADDRESS,
        kind,
        sender,
        messageDataHash: alloy::primitives::keccak256(&data),
        baseFeeL1: base_fee,
        timestamp: MOCK_GENESIS_TIMESTAMP + block * MOCK_BLOCK_TIME,
    };
    let payload = Inbox::InboxMessageDelivered {
        messageNum: message_index,
        data: data.into(),
    };
    vec![
        log_from_event(FIXTURE_BRIDGE_ADDRESS, &delivered, block, tx_hash, 0),
        log_from_event(FIXTURE_INBOX_ADDRESS, &payload, block, tx_hash, 1),
    ]
}

/// Logs of a `depositEth` transaction
pub fn eth_deposit_logs(
    message_index: U256,
    sender: Address,
    to: Address,
    value: U256,
    tx_hash: B256,
    block: u64,
) -> Vec<Log> {
    let mut data = to.to_vec();
    data.extend_from_slice(&value.to_be_bytes::<32>());
    delivery_logs(
        message_index,
        MESSAGE_KIND_ETH_DEPOSIT,
        sender,
        U256::ZERO,
        data,
        tx_hash,
        block,
    )
}

/// Parameters of a retryable submission
#[derive(Debug, Clone)]
pub struct RetryableFixture {
    pub message_index: U256,
    /// Aliased sender
    pub sender: Address,
    pub to: Address,
    pub refund: Address,
    pub l2_call_value: U256,
    pub deposit: U256,
    pub max_submission_fee: U256,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub base_fee: U256,
    pub data: Bytes,
}

impl Default for RetryableFixture {
    fn default() -> Self {
        Self {
            message_index: U256::from(77),
            sender: Address::repeat_byte(0xa1),
            to: Address::repeat_byte(0xb0),
            refund: Address::repeat_byte(0x11),
            l2_call_value: U256::ZERO,
            deposit: U256::from(1_000_000_000_000_000u64),
            max_submission_fee: U256::from(50_000_000_000_000u64),
            gas_limit: U256::from(300_000u64),
            max_fee_per_gas: U256::from(200_000_000u64),
            base_fee: U256::from(30_000_000_000u64),
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x01]),
        }
    }
}

impl RetryableFixture {
    /// Inbox payload: nine words then the raw call data
    pub fn payload(&self) -> Vec<u8> {
        let mut data = (
            self.to,
            self.l2_call_value,
            self.deposit,
            self.max_submission_fee,
            self.refund,
            self.refund,
            self.gas_limit,
            self.max_fee_per_gas,
            U256::from(self.data.len()),
        )
            .abi_encode_params();
        data.extend_from_slice(&self.data);
        data
    }

    pub fn ticket_id(&self, child_chain_id: u64) -> B256 {
        let delivered = DeliveredMessage {
            message_index: self.message_index,
            kind: MESSAGE_KIND_RETRYABLE,
            sender: self.sender,
            base_fee: self.base_fee,
            timestamp: 0,
            data: self.payload().into(),
        };
        match RetryableTicket::from_delivered(&delivered) {
            Ok(ticket) => ticket.ticket_id(child_chain_id),
            Err(e) => panic!("fixture payload must decode: {}", e),
        }
    }
}

/// Logs of a transaction that submitted one retryable
pub fn retryable_logs(fixture: &RetryableFixture, tx_hash: B256, block: u64) -> Vec<Log> {
    delivery_logs(
        fixture.message_index,
        MESSAGE_KIND_RETRYABLE,
        fixture.sender,
        fixture.base_fee,
        fixture.payload(),
        tx_hash,
        block,
    )
}
