//! EVM Chain Support Module
//!
//! Alloy-backed pieces of the tracker.
//!
//! ## Submodules
//!
//! - `client` - [`ChainConnector`](crate::connector::ChainConnector) over an alloy HTTP provider
//! - `contracts` - rollup protocol and NFT bridge bindings using alloy sol! macro
//! - `events` - typed decoding of protocol and application logs
//! - `watcher` - chunked `eth_getLogs`

pub mod client;
pub mod contracts;
pub mod events;
pub mod watcher;

// Re-export commonly used items
pub use client::EvmConnector;
pub use events::{AppEventKind, DeliveredMessage, DeliveryContracts, NftTransferEvent, APP_EVENT_TABLE};
pub use watcher::{LogWatcher, WatcherConfig};
