//! Rollup-Bridge: Message Lifecycle Tracker for a Parent Chain and its Rollup
//!
//! Cross-chain transfers are not atomic. A source-chain transaction only records
//! an outgoing message; the destination chain must later confirm it and someone
//! must execute (claim) it there. This crate tracks that lifecycle:
//!
//! - **Resolver** - state of the message created by a child-chain transaction
//! - **Deadline** - claim-ready estimate for display
//! - **Store** - idempotent registry of locally submitted NFT withdrawals
//! - **Scanner** - rebuilds a user's outgoing transfers from event logs
//! - **Orchestrator** - deposit, withdrawal and claim flows for ETH and NFTs
//! - **Reconcile** - keeps the store in line with chain state
//! - **Poller** - cancellable status and countdown watches
//! - **Testing Module** - in-memory chain and outbox for tests
//!
//! ## Feature Flags
//!
//! - `testing` - Enable testing utilities for the integration scenarios

pub mod addresses;
pub mod app;
pub mod config;
pub mod connector;
pub mod deadline;
pub mod error;
pub mod evm;
pub mod metadata;
pub mod metrics;
pub mod orchestrator;
pub mod outbox;
pub mod poller;
pub mod reconcile;
pub mod redact;
pub mod resolver;
pub mod scanner;
pub mod store;
pub mod types;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at the crate root
pub use addresses::{AddressRegistry, BridgeContracts};
pub use app::App;
pub use config::Config;
pub use connector::{ChainConnector, ConnectorRegistry};
pub use deadline::DeadlineEstimator;
pub use error::{BridgeError, ErrorReport, Result};
pub use orchestrator::{FlowKind, TransferEvent, TransferOrchestrator};
pub use poller::{PollHandle, StatusPoller};
pub use reconcile::{PendingTransfer, Reconciler};
pub use resolver::MessageStateResolver;
pub use scanner::EventLogScanner;
pub use store::PendingTransferStore;
pub use types::{
    ChainEndpoint, ChainRole, Message, MessageStatus, OutboxState, OutgoingMessage,
    PendingTransferRecord, TokenMetadata,
};
