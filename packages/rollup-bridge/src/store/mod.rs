//! Local transfer storage

pub mod kv;
pub mod pending;

pub use kv::{FileKvStore, KeyValueStore, MemoryKvStore};
pub use pending::{PendingTransferStore, PENDING_TRANSFERS_KEY};
