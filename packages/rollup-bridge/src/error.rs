//! Bridge error taxonomy
//!
//! Every fallible operation in the tracker returns [`BridgeError`]. Transport
//! failures are classified from the RPC error text, and the orchestrator turns
//! errors into a short [`ErrorReport`] for display.

use alloy::primitives::B256;
use std::fmt;
use thiserror::Error;

use crate::types::MessageStatus;

/// Maximum number of characters of raw error detail kept in an [`ErrorReport`]
pub const MAX_DETAIL_CHARS: usize = 240;

/// Why a transaction hash yielded no outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// No receipt on chain (not mined yet, dropped, or wrong chain)
    ReceiptNotFound,
    /// Transaction reverted
    Reverted,
    /// Receipt exists but carries no outgoing-message log
    NoOutgoingLog,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReason::ReceiptNotFound => write!(f, "receipt not found"),
            MissingReason::Reverted => write!(f, "transaction reverted"),
            MissingReason::NoOutgoingLog => write!(f, "no outgoing message in receipt"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wallet signature declined. Not an error state; callers abort silently.
    #[error("user rejected the request")]
    UserRejected,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("RPC request timed out: {0}")]
    RpcTimeout(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("no outgoing message for {tx_hash}: {reason}")]
    NoMessageFound { tx_hash: B256, reason: MissingReason },

    #[error("ambiguous message for {tx_hash}: {detail}")]
    AmbiguousMessage { tx_hash: B256, detail: String },

    #[error("stale pending transfer {0}")]
    StaleCacheEntry(B256),

    #[error("wrong network: active chain {active}, switch to chain {required}")]
    WrongNetwork { required: u64, active: u64 },

    #[error("message {tx_hash} is not claimable yet (status {status})")]
    NotClaimable { tx_hash: B256, status: MessageStatus },

    #[error("another submission is already in flight ({0})")]
    SubmissionInFlight(String),

    #[error("timed out waiting for {0}")]
    TimedOut(String),

    #[error("transaction {0} reverted")]
    Reverted(B256),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

impl BridgeError {
    /// Classify a raw transport/provider error message.
    pub fn from_rpc(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_error(&message) {
            ErrorClass::UserRejected => BridgeError::UserRejected,
            ErrorClass::InsufficientFunds => BridgeError::InsufficientFunds(message),
            ErrorClass::Timeout => BridgeError::RpcTimeout(message),
            ErrorClass::Other => BridgeError::RpcError(message),
        }
    }

    /// Short, stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::UserRejected => "user_rejected",
            BridgeError::InsufficientFunds(_) => "insufficient_funds",
            BridgeError::RpcTimeout(_) => "rpc_timeout",
            BridgeError::RpcError(_) => "rpc_error",
            BridgeError::NoMessageFound { .. } => "no_message_found",
            BridgeError::AmbiguousMessage { .. } => "ambiguous_message",
            BridgeError::StaleCacheEntry(_) => "stale_cache_entry",
            BridgeError::WrongNetwork { .. } => "wrong_network",
            BridgeError::NotClaimable { .. } => "not_claimable",
            BridgeError::SubmissionInFlight(_) => "submission_in_flight",
            BridgeError::TimedOut(_) => "timed_out",
            BridgeError::Reverted(_) => "reverted",
            BridgeError::Decode(_) => "decode",
            BridgeError::Storage(_) => "storage",
            BridgeError::Config(_) => "config",
        }
    }

    /// Transport-level failures that are worth retrying with the same hash
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::RpcTimeout(_) | BridgeError::RpcError(_))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Storage(e.to_string())
    }
}

impl From<alloy::sol_types::Error> for BridgeError {
    fn from(e: alloy::sol_types::Error) -> Self {
        BridgeError::Decode(e.to_string())
    }
}

/// Coarse classes for raw RPC error text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UserRejected,
    InsufficientFunds,
    Timeout,
    Other,
}

/// Classify an error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("user rejected")
        || error_lower.contains("user denied")
        || error_lower.contains("rejected by user")
        || error_lower.contains("code: 4001")
    {
        return ErrorClass::UserRejected;
    }

    if error_lower.contains("insufficient funds") {
        return ErrorClass::InsufficientFunds;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("deadline has elapsed")
    {
        return ErrorClass::Timeout;
    }

    ErrorClass::Other
}

/// User-facing rendering of an error: a short summary and truncated raw detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub summary: String,
    pub detail: String,
}

impl ErrorReport {
    /// Build a report for an error, or `None` for a silent abort (user rejection).
    pub fn from_error(error: &BridgeError) -> Option<Self> {
        let summary = match error {
            BridgeError::UserRejected => return None,
            BridgeError::InsufficientFunds(_) => "Insufficient funds for this transfer",
            BridgeError::RpcTimeout(_) => "The network did not respond in time, try again",
            BridgeError::RpcError(_) => "The transaction failed",
            BridgeError::NoMessageFound { .. } => "No bridge message found for this transaction",
            BridgeError::AmbiguousMessage { .. } => {
                "This transaction created more than one bridge message"
            }
            BridgeError::StaleCacheEntry(_) => "This pending transfer no longer exists on chain",
            BridgeError::WrongNetwork { .. } => "Switch network to continue",
            BridgeError::NotClaimable { .. } => "This transfer cannot be claimed yet",
            BridgeError::SubmissionInFlight(_) => "A transfer is already being submitted",
            BridgeError::TimedOut(_) => "Still waiting on the destination chain",
            BridgeError::Reverted(_) => "The transaction reverted",
            BridgeError::Decode(_) => "Unexpected data returned by the chain",
            BridgeError::Storage(_) => "Could not update local transfer records",
            BridgeError::Config(_) => "Bridge is misconfigured",
        };

        Some(Self {
            summary: summary.to_string(),
            detail: truncate_detail(&error.to_string()),
        })
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.summary, self.detail)
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= MAX_DETAIL_CHARS {
        return detail.to_string();
    }
    let mut out: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
    out.push('…');
    out
}
