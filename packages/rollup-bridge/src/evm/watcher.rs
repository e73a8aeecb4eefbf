//! Chunked log fetching
//!
//! RPC providers cap the block range of `eth_getLogs`; queries spanning more
//! than `max_block_range` blocks are split into consecutive windows.
//!
//! ## Usage
//!
//! ```ignore
//! let watcher = LogWatcher::new(child.clone(), WatcherConfig::default());
//! let logs = watcher.get_logs_chunked(filter, from_block, to_block).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::connector::{ChainConnector, Log, LogFilter};
use crate::error::{BridgeError, Result};

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Poll interval for wait loops
    pub poll_interval: Duration,
    /// Maximum block range per query (to avoid RPC limits)
    pub max_block_range: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_block_range: 10_000,
        }
    }
}

pub struct LogWatcher {
    connector: Arc<dyn ChainConnector>,
    config: WatcherConfig,
}

impl LogWatcher {
    pub fn new(connector: Arc<dyn ChainConnector>, config: WatcherConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Get all logs matching `filter` over `[from_block, to_block]`, in chain order.
    ///
    /// The filter's own block bounds are replaced by each window's.
    pub async fn get_logs_chunked(
        &self,
        filter: LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        if self.config.max_block_range == 0 {
            return Err(BridgeError::Config("max_block_range must be > 0".into()));
        }

        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            let current_to = std::cmp::min(
                current_from.saturating_add(self.config.max_block_range - 1),
                to_block,
            );

            let window = filter.clone().from_block(current_from).to_block(current_to);
            let logs = self.connector.get_logs(&window).await?;

            if !logs.is_empty() {
                debug!(
                    count = logs.len(),
                    from = current_from,
                    to = current_to,
                    "Fetched logs"
                );
            }

            all_logs.extend(logs);
            if current_to == u64::MAX {
                break;
            }
            current_from = current_to + 1;
        }

        all_logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(all_logs)
    }
}
