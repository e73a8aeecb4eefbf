//! Event parsing
//!
//! Typed decoding of the protocol logs the tracker reads (outgoing messages,
//! inbox deliveries, retryable redeems, rollup nodes) and of the NFT bridge's
//! application events.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connector::{Log, Receipt};
use crate::evm::contracts::{
    ArbRetryableTx, ArbSys, Bridge, ChildNftBridge, Inbox, Rollup, ARB_RETRYABLE_TX_ADDRESS,
    ARB_SYS_ADDRESS,
};
use crate::types::OutgoingMessage;

fn decode<E: SolEvent>(log: &Log) -> Option<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).ok()
}

fn to_u64(value: U256) -> Option<u64> {
    u64::try_from(value).ok()
}

// ============================================================================
// Outgoing messages (ArbSys L2ToL1Tx)
// ============================================================================

/// Parse an `L2ToL1Tx` log. Emitter address is not checked here.
pub fn parse_outgoing_log(log: &Log) -> Option<OutgoingMessage> {
    if log.topic0() != Some(&ArbSys::L2ToL1Tx::SIGNATURE_HASH) {
        return None;
    }
    let event: ArbSys::L2ToL1Tx = decode(log)?;

    Some(OutgoingMessage {
        caller: event.caller,
        destination: event.destination,
        hash: event.hash,
        position: to_u64(event.position)?,
        child_block: to_u64(event.arbBlockNum)?,
        parent_block: to_u64(event.ethBlockNum)?,
        timestamp: to_u64(event.timestamp)?,
        callvalue: event.callvalue,
        data: event.data,
        tx_hash: log.tx_hash.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    })
}

/// All outgoing messages recorded by the ArbSys precompile in a receipt, in log order
pub fn outgoing_messages(receipt: &Receipt) -> Vec<OutgoingMessage> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == ARB_SYS_ADDRESS)
        .filter_map(|log| {
            let parsed = parse_outgoing_log(log);
            if parsed.is_none() && log.topic0() == Some(&ArbSys::L2ToL1Tx::SIGNATURE_HASH) {
                warn!(
                    tx = %receipt.tx_hash,
                    data_len = log.data.len(),
                    topics = log.topics.len(),
                    "Failed to parse L2ToL1Tx event from log"
                );
            }
            parsed
        })
        .map(|mut msg| {
            msg.tx_hash = receipt.tx_hash;
            msg
        })
        .collect()
}

// ============================================================================
// NFT bridge application events
// ============================================================================

/// Application events the scanner knows how to join to outgoing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppEventKind {
    WithdrawalCreated,
    TransferCreated,
}

/// topic-0 → application event. Logs matching no entry are ignored.
pub const APP_EVENT_TABLE: [(B256, AppEventKind); 2] = [
    (
        <ChildNftBridge::WithdrawalCreated as SolEvent>::SIGNATURE_HASH,
        AppEventKind::WithdrawalCreated,
    ),
    (
        <ChildNftBridge::TransferCreated as SolEvent>::SIGNATURE_HASH,
        AppEventKind::TransferCreated,
    ),
];

/// Look up a log's topic-0 in [`APP_EVENT_TABLE`]
pub fn app_event_kind(log: &Log) -> Option<AppEventKind> {
    let topic0 = log.topic0()?;
    APP_EVENT_TABLE
        .iter()
        .find(|(sig, _)| sig == topic0)
        .map(|(_, kind)| *kind)
}

/// Decoded NFT bridge event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftTransferEvent {
    pub kind: AppEventKind,
    pub owner: Address,
    pub token_id: U256,
    /// Only present on withdrawals
    pub parent_recipient: Option<Address>,
    pub token_uri: String,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Decode an application log that matched the table.
///
/// `Ok(None)` means the log is not an application event at all; `Err(())`
/// means it matched a table entry but its payload did not decode.
#[allow(clippy::result_unit_err)]
pub fn parse_app_log(log: &Log) -> Result<Option<NftTransferEvent>, ()> {
    let Some(kind) = app_event_kind(log) else {
        return Ok(None);
    };
    let tx_hash = log.tx_hash.unwrap_or_default();
    let log_index = log.log_index.unwrap_or_default();

    let event = match kind {
        AppEventKind::WithdrawalCreated => {
            let e: ChildNftBridge::WithdrawalCreated = decode(log).ok_or(())?;
            NftTransferEvent {
                kind,
                owner: e.owner,
                token_id: e.tokenId,
                parent_recipient: Some(e.parentRecipient),
                token_uri: e.tokenUri,
                tx_hash,
                log_index,
            }
        }
        AppEventKind::TransferCreated => {
            let e: ChildNftBridge::TransferCreated = decode(log).ok_or(())?;
            NftTransferEvent {
                kind,
                owner: e.owner,
                token_id: e.tokenId,
                parent_recipient: None,
                token_uri: e.tokenUri,
                tx_hash,
                log_index,
            }
        }
    };
    Ok(Some(event))
}

// ============================================================================
// Parent → child delivery
// ============================================================================

/// Bridge message kind for a retryable ticket submission
pub const MESSAGE_KIND_RETRYABLE: u8 = 9;
/// Bridge message kind for a plain ETH deposit
pub const MESSAGE_KIND_ETH_DEPOSIT: u8 = 12;

/// A parent → child message, joined from Bridge `MessageDelivered` and Inbox
/// `InboxMessageDelivered` by message index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_index: U256,
    pub kind: u8,
    /// Aliased sender as seen by the bridge
    pub sender: Address,
    pub base_fee: U256,
    pub timestamp: u64,
    pub data: Bytes,
}

/// Parent-chain contracts whose delivery events are trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryContracts {
    pub bridge: Address,
    pub inbox: Address,
}

/// Extract delivered messages from a parent receipt, ordered by message index.
/// Logs emitted by anything other than `contracts` are ignored.
pub fn delivered_messages(
    receipt: &Receipt,
    contracts: &DeliveryContracts,
) -> Vec<DeliveredMessage> {
    let mut deliveries = Vec::new();
    let mut payloads: Vec<(U256, Bytes)> = Vec::new();

    for log in &receipt.logs {
        match log.topic0() {
            Some(sig)
                if *sig == Bridge::MessageDelivered::SIGNATURE_HASH
                    && log.address == contracts.bridge =>
            {
                if let Some(e) = decode::<Bridge::MessageDelivered>(log) {
                    deliveries.push(e);
                }
            }
            Some(sig)
                if *sig == Inbox::InboxMessageDelivered::SIGNATURE_HASH
                    && log.address == contracts.inbox =>
            {
                if let Some(e) = decode::<Inbox::InboxMessageDelivered>(log) {
                    payloads.push((e.messageNum, e.data));
                }
            }
            _ => {}
        }
    }

    let mut messages: Vec<DeliveredMessage> = deliveries
        .into_iter()
        .filter_map(|d| {
            let data = payloads
                .iter()
                .find(|(num, _)| *num == d.messageIndex)
                .map(|(_, data)| data.clone());
            if data.is_none() {
                warn!(
                    tx = %receipt.tx_hash,
                    message_index = %d.messageIndex,
                    "MessageDelivered without matching InboxMessageDelivered"
                );
            }
            Some(DeliveredMessage {
                message_index: d.messageIndex,
                kind: d.kind,
                sender: d.sender,
                base_fee: d.baseFeeL1,
                timestamp: d.timestamp,
                data: data?,
            })
        })
        .collect();
    messages.sort_by_key(|m| m.message_index);
    messages
}

// ============================================================================
// Child retryable redeems
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemScheduledEvent {
    pub ticket_id: B256,
    pub retry_tx_hash: B256,
    pub sequence_num: u64,
}

/// Parse a `RedeemScheduled` log from the ArbRetryableTx precompile
pub fn parse_redeem_scheduled(log: &Log) -> Option<RedeemScheduledEvent> {
    if log.address != ARB_RETRYABLE_TX_ADDRESS
        || log.topic0() != Some(&ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH)
    {
        return None;
    }
    let e: ArbRetryableTx::RedeemScheduled = decode(log)?;
    Some(RedeemScheduledEvent {
        ticket_id: e.ticketId,
        retry_tx_hash: e.retryTxHash,
        sequence_num: e.sequenceNum,
    })
}

/// `RedeemScheduled` logs in a receipt
pub fn redeem_scheduled(receipt: &Receipt) -> Vec<RedeemScheduledEvent> {
    receipt.logs.iter().filter_map(parse_redeem_scheduled).collect()
}

// ============================================================================
// Rollup nodes
// ============================================================================

/// Child block hash committed by a `NodeCreated` assertion
pub fn parse_node_created_block_hash(log: &Log) -> Option<(u64, B256)> {
    if log.topic0() != Some(&Rollup::NodeCreated::SIGNATURE_HASH) {
        return None;
    }
    let event: Rollup::NodeCreated = decode(log)?;
    Some((
        event.nodeNum,
        event.assertion.afterState.globalState.bytes32Vals[0],
    ))
}

/// Convert an alloy log data payload into a crate log (test and mock helper)
pub fn log_from_event<E: SolEvent>(
    address: Address,
    event: &E,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    let data = event.encode_log_data();
    Log {
        address,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number: Some(block_number),
        tx_hash: Some(tx_hash),
        log_index: Some(log_index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::contracts::{Assertion, ExecutionState, GlobalState};

    fn l2_to_l1(position: u64) -> ArbSys::L2ToL1Tx {
        ArbSys::L2ToL1Tx {
            caller: Address::repeat_byte(0xca),
            destination: Address::repeat_byte(0xde),
            hash: U256::from(999),
            position: U256::from(position),
            arbBlockNum: U256::from(100),
            ethBlockNum: U256::from(50),
            timestamp: U256::from(1_700_000_000u64),
            callvalue: U256::from(7),
            data: Bytes::new(),
        }
    }

    fn receipt(logs: Vec<Log>) -> Receipt {
        Receipt {
            tx_hash: B256::repeat_byte(0xaa),
            block_number: 100,
            status: true,
            logs,
        }
    }

    #[test]
    fn test_parse_outgoing_log() {
        let log = log_from_event(ARB_SYS_ADDRESS, &l2_to_l1(12), 100, B256::ZERO, 3);
        let msg = parse_outgoing_log(&log).unwrap();
        assert_eq!(msg.position, 12);
        assert_eq!(msg.child_block, 100);
        assert_eq!(msg.parent_block, 50);
        assert_eq!(msg.destination, Address::repeat_byte(0xde));
        assert_eq!(msg.log_index, 3);
    }

    #[test]
    fn test_outgoing_messages_ignores_other_emitters() {
        let spoofed = log_from_event(Address::repeat_byte(1), &l2_to_l1(1), 100, B256::ZERO, 0);
        let genuine = log_from_event(ARB_SYS_ADDRESS, &l2_to_l1(2), 100, B256::ZERO, 1);
        let msgs = outgoing_messages(&receipt(vec![spoofed, genuine]));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].position, 2);
        assert_eq!(msgs[0].tx_hash, B256::repeat_byte(0xaa));
    }

    #[test]
    fn test_app_event_table_lookup() {
        let event = ChildNftBridge::WithdrawalCreated {
            owner: Address::repeat_byte(0x11),
            tokenId: U256::from(42),
            parentRecipient: Address::repeat_byte(0x22),
            tokenUri: "ipfs://meta/42".into(),
        };
        let log = log_from_event(Address::repeat_byte(0xb0), &event, 5, B256::ZERO, 0);
        assert_eq!(app_event_kind(&log), Some(AppEventKind::WithdrawalCreated));

        let parsed = parse_app_log(&log).unwrap().unwrap();
        assert_eq!(parsed.owner, Address::repeat_byte(0x11));
        assert_eq!(parsed.token_id, U256::from(42));
        assert_eq!(parsed.parent_recipient, Some(Address::repeat_byte(0x22)));
        assert_eq!(parsed.token_uri, "ipfs://meta/42");
    }

    #[test]
    fn test_unknown_app_log_ignored_and_corrupt_log_flagged() {
        let unrelated = log_from_event(ARB_SYS_ADDRESS, &l2_to_l1(1), 1, B256::ZERO, 0);
        assert_eq!(parse_app_log(&unrelated), Ok(None));

        let mut corrupt = log_from_event(
            Address::repeat_byte(0xb0),
            &ChildNftBridge::TransferCreated {
                owner: Address::ZERO,
                tokenId: U256::from(1),
                tokenUri: String::new(),
            },
            1,
            B256::ZERO,
            0,
        );
        corrupt.data = Bytes::from(vec![0u8; 3]);
        assert_eq!(parse_app_log(&corrupt), Err(()));
    }

    #[test]
    fn test_delivered_messages_join_by_index() {
        let delivered = Bridge::MessageDelivered {
            messageIndex: U256::from(77),
            beforeInboxAcc: B256::ZERO,
            inbox: Address::repeat_byte(0x1b),
            kind: MESSAGE_KIND_ETH_DEPOSIT,
            sender: Address::repeat_byte(0x5e),
            messageDataHash: B256::ZERO,
            baseFeeL1: U256::from(10),
            timestamp: 1_700_000_000,
        };
        let payload = Inbox::InboxMessageDelivered {
            messageNum: U256::from(77),
            data: Bytes::from(vec![1u8; 52]),
        };
        let contracts = DeliveryContracts {
            bridge: Address::repeat_byte(0xb1),
            inbox: Address::repeat_byte(0x1b),
        };
        let r = receipt(vec![
            log_from_event(contracts.bridge, &delivered, 1, B256::ZERO, 0),
            log_from_event(contracts.inbox, &payload, 1, B256::ZERO, 1),
        ]);
        let msgs = delivered_messages(&r, &contracts);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MESSAGE_KIND_ETH_DEPOSIT);
        assert_eq!(msgs[0].data.len(), 52);
    }

    #[test]
    fn test_delivered_messages_ignore_foreign_emitters() {
        let contracts = DeliveryContracts {
            bridge: Address::repeat_byte(0xb1),
            inbox: Address::repeat_byte(0x1b),
        };
        let delivered = Bridge::MessageDelivered {
            messageIndex: U256::from(5),
            beforeInboxAcc: B256::ZERO,
            inbox: contracts.inbox,
            kind: MESSAGE_KIND_ETH_DEPOSIT,
            sender: Address::repeat_byte(0x5e),
            messageDataHash: B256::ZERO,
            baseFeeL1: U256::from(10),
            timestamp: 1_700_000_000,
        };
        let payload = Inbox::InboxMessageDelivered {
            messageNum: U256::from(5),
            data: Bytes::from(vec![1u8; 52]),
        };
        let impostor = Address::repeat_byte(0x66);

        // Both halves from an unknown contract
        let r = receipt(vec![
            log_from_event(impostor, &delivered, 1, B256::ZERO, 0),
            log_from_event(impostor, &payload, 1, B256::ZERO, 1),
        ]);
        assert!(delivered_messages(&r, &contracts).is_empty());

        // Genuine delivery, forged payload
        let r = receipt(vec![
            log_from_event(contracts.bridge, &delivered, 1, B256::ZERO, 0),
            log_from_event(impostor, &payload, 1, B256::ZERO, 1),
        ]);
        assert!(delivered_messages(&r, &contracts).is_empty());
    }

    #[test]
    fn test_node_created_block_hash() {
        let state = |hash: B256| ExecutionState {
            globalState: GlobalState {
                bytes32Vals: [hash, B256::ZERO],
                u64Vals: [0, 0],
            },
            machineStatus: 1,
        };
        let event = Rollup::NodeCreated {
            nodeNum: 9,
            parentNodeHash: B256::ZERO,
            nodeHash: B256::ZERO,
            executionHash: B256::ZERO,
            assertion: Assertion {
                beforeState: state(B256::ZERO),
                afterState: state(B256::repeat_byte(0xcb)),
                numBlocks: 10,
            },
            afterInboxBatchAcc: B256::ZERO,
            wasmModuleRoot: B256::ZERO,
            inboxMaxCount: U256::from(1),
        };
        let log = log_from_event(Address::repeat_byte(0x70), &event, 1, B256::ZERO, 0);
        assert_eq!(
            parse_node_created_block_hash(&log),
            Some((9, B256::repeat_byte(0xcb)))
        );
    }
}
