//! Common types for bridge message tracking
//!
//! Shared by the resolver, scanner, store and orchestrator.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BridgeError;

// ============================================================================
// Chains
// ============================================================================

/// Role a chain plays in the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    /// Settlement layer
    Parent,
    /// Rollup
    Child,
}

impl ChainRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRole::Parent => "parent",
            ChainRole::Child => "child",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Externally configured endpoint for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub chain_id: u64,
    pub rpc_url: String,
    pub role: ChainRole,
}

// ============================================================================
// Messages
// ============================================================================

/// Asset carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    NativeValue,
    Nft,
}

/// Transfer direction, derived from the source chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Parent → child
    Deposit,
    /// Child → parent
    Withdrawal,
}

impl From<ChainRole> for Direction {
    fn from(source: ChainRole) -> Self {
        match source {
            ChainRole::Parent => Direction::Deposit,
            ChainRole::Child => Direction::Withdrawal,
        }
    }
}

/// Raw protocol state of an outgoing message.
///
/// Discriminants are the raw on-wire values used by the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutboxState {
    /// The state commitment covering the message is not final on the parent chain
    Unconfirmed = 0,
    /// Final and eligible for execution
    Confirmed = 1,
    /// Consumed by a claim transaction (terminal)
    Executed = 2,
}

impl OutboxState {
    pub fn as_raw(&self) -> u8 {
        *self as u8
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(OutboxState::Unconfirmed),
            1 => Some(OutboxState::Confirmed),
            2 => Some(OutboxState::Executed),
            _ => None,
        }
    }
}

/// UI-stable message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Claimable,
    Success,
}

/// Raw outbox state (index) → display status. Order is fixed: never reorder.
pub const STATUS_TABLE: [MessageStatus; 3] = [
    MessageStatus::Pending,
    MessageStatus::Claimable,
    MessageStatus::Success,
];

impl MessageStatus {
    /// Map a raw protocol state through [`STATUS_TABLE`]
    pub fn from_raw(raw: u8) -> Result<Self, BridgeError> {
        STATUS_TABLE
            .get(raw as usize)
            .copied()
            .ok_or_else(|| BridgeError::Decode(format!("unknown outbox state {}", raw)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "Pending",
            MessageStatus::Claimable => "Claimable",
            MessageStatus::Success => "Success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Success)
    }
}

impl From<OutboxState> for MessageStatus {
    fn from(state: OutboxState) -> Self {
        STATUS_TABLE[state.as_raw() as usize]
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outgoing (child → parent) message as recorded by the `L2ToL1Tx` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Child-chain caller that sent the message
    pub caller: Address,
    /// Parent-chain destination
    pub destination: Address,
    /// Message hash assigned by the chain
    pub hash: U256,
    /// Chain-assigned index in the outbox merkle accumulator
    pub position: u64,
    /// Child block that included the message
    pub child_block: u64,
    /// Parent block number seen by the child chain at inclusion
    pub parent_block: u64,
    /// Child block timestamp
    pub timestamp: u64,
    /// Native value carried
    pub callvalue: U256,
    /// Calldata executed on the parent chain
    pub data: Bytes,
    /// Child transaction that created the message
    pub tx_hash: B256,
    /// Log index within the child block
    pub log_index: u64,
}

/// The unit of cross-chain transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub source: ChainRole,
    pub kind: MessageKind,
    pub tx_hash: B256,
    /// Wei amount or token id
    pub amount_or_token_id: U256,
    /// Unix timestamp of the source block
    pub initiated_at: u64,
    pub status: MessageStatus,
}

impl Message {
    pub fn direction(&self) -> Direction {
        self.source.into()
    }

    /// Build a withdrawal message from its outgoing record.
    ///
    /// Plain value transfers carry no calldata; anything with calldata is an
    /// application message (NFT). The token id of an NFT message is not part of
    /// the protocol record and is left zero unless the caller overrides it.
    pub fn from_outgoing(outgoing: &OutgoingMessage, status: MessageStatus) -> Self {
        let (kind, amount_or_token_id) = if outgoing.data.is_empty() {
            (MessageKind::NativeValue, outgoing.callvalue)
        } else {
            (MessageKind::Nft, U256::ZERO)
        };
        Self {
            source: ChainRole::Child,
            kind,
            tx_hash: outgoing.tx_hash,
            amount_or_token_id,
            initiated_at: outgoing.timestamp,
            status,
        }
    }
}

// ============================================================================
// Pending NFT transfers
// ============================================================================

/// Display metadata of a token (`{name, image, description}` document)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Locally persisted outgoing NFT transfer, unique by `tx_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransferRecord {
    #[serde(rename = "hash")]
    pub tx_hash: B256,
    /// Decimal token id
    #[serde(rename = "tokenId")]
    pub token_id: String,
    pub owner: Address,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PendingTransferRecord {
    pub fn new(tx_hash: B256, token_id: U256, owner: Address, metadata: TokenMetadata) -> Self {
        Self {
            tx_hash,
            token_id: token_id.to_string(),
            owner,
            image: metadata.image,
            name: metadata.name,
            description: metadata.description,
        }
    }

    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            name: self.name.clone(),
            image: self.image.clone(),
            description: self.description.clone(),
        }
    }
}

/// Parse a 0x-prefixed 32-byte hash
pub fn parse_tx_hash(hex_str: &str) -> Result<B256, BridgeError> {
    let trimmed = hex_str.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes =
        hex::decode(stripped).map_err(|e| BridgeError::Decode(format!("invalid hash: {}", e)))?;
    if bytes.len() != 32 {
        return Err(BridgeError::Decode(format!(
            "hash must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table_order() {
        assert_eq!(MessageStatus::from_raw(0).unwrap(), MessageStatus::Pending);
        assert_eq!(MessageStatus::from_raw(1).unwrap(), MessageStatus::Claimable);
        assert_eq!(MessageStatus::from_raw(2).unwrap(), MessageStatus::Success);
        assert!(MessageStatus::from_raw(3).is_err());
        assert!(MessageStatus::from_raw(255).is_err());
    }

    #[test]
    fn test_outbox_state_maps_through_table() {
        for raw in 0u8..=2 {
            let state = OutboxState::from_raw(raw).unwrap();
            assert_eq!(state.as_raw(), raw);
            assert_eq!(
                MessageStatus::from(state),
                MessageStatus::from_raw(raw).unwrap()
            );
        }
        assert!(OutboxState::from_raw(3).is_none());
    }

    #[test]
    fn test_status_ordering_is_lifecycle_order() {
        assert!(MessageStatus::Pending < MessageStatus::Claimable);
        assert!(MessageStatus::Claimable < MessageStatus::Success);
    }

    #[test]
    fn test_direction_from_role() {
        assert_eq!(Direction::from(ChainRole::Parent), Direction::Deposit);
        assert_eq!(Direction::from(ChainRole::Child), Direction::Withdrawal);
    }

    #[test]
    fn test_pending_record_json_field_names() {
        let record = PendingTransferRecord::new(
            B256::repeat_byte(0xbb),
            U256::from(7),
            Address::repeat_byte(0x11),
            TokenMetadata {
                name: Some("Seven".into()),
                image: Some("ipfs://img".into()),
                description: None,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tokenId"], "7");
        assert!(json["hash"].as_str().unwrap().starts_with("0xbbbb"));
        assert_eq!(json["name"], "Seven");
        assert!(json.get("owner").is_some());
    }

    #[test]
    fn test_message_from_outgoing_kind() {
        let mut outgoing = OutgoingMessage {
            caller: Address::ZERO,
            destination: Address::ZERO,
            hash: U256::from(1),
            position: 3,
            child_block: 10,
            parent_block: 5,
            timestamp: 1_700_000_000,
            callvalue: U256::from(1_000),
            data: Bytes::new(),
            tx_hash: B256::repeat_byte(1),
            log_index: 0,
        };
        let msg = Message::from_outgoing(&outgoing, MessageStatus::Pending);
        assert_eq!(msg.kind, MessageKind::NativeValue);
        assert_eq!(msg.amount_or_token_id, U256::from(1_000));
        assert_eq!(msg.direction(), Direction::Withdrawal);
        assert_eq!(msg.initiated_at, 1_700_000_000);

        outgoing.data = Bytes::from(vec![0xde, 0xad]);
        let msg = Message::from_outgoing(&outgoing, MessageStatus::Claimable);
        assert_eq!(msg.kind, MessageKind::Nft);
    }

    #[test]
    fn test_parse_tx_hash() {
        let hash = parse_tx_hash(&format!("0x{}", "aa".repeat(32))).unwrap();
        assert_eq!(hash, B256::repeat_byte(0xaa));
        assert!(parse_tx_hash("0xaa").is_err());
        assert!(parse_tx_hash("zz").is_err());
    }
}
