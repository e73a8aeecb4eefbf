//! Status and deadline polling
//!
//! Each watch runs as its own tokio task and publishes into a
//! [`tokio::sync::watch`] channel. Cancelling (or dropping) the [`PollHandle`]
//! stops further requests; a request already in flight finishes and its
//! result is discarded.

use alloy::primitives::B256;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::deadline::{remaining, DeadlineEstimator};
use crate::metrics;
use crate::resolver::MessageStateResolver;
use crate::types::MessageStatus;

/// Default interval between status polls
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_DEADLINE_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_DEADLINE_INTERVAL: Duration = Duration::from_secs(60);

/// Only lets a status through when it is ahead of everything published so far
#[derive(Debug, Default)]
pub struct MonotonicStatus {
    last: Option<MessageStatus>,
}

impl MonotonicStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(status)` when it should be published
    pub fn observe(&mut self, status: MessageStatus) -> Option<MessageStatus> {
        match self.last {
            Some(last) if status <= last => {
                if status < last {
                    warn!(
                        observed = %status,
                        published = %last,
                        "Suppressing status regression"
                    );
                }
                None
            }
            _ => {
                self.last = Some(status);
                Some(status)
            }
        }
    }

    pub fn last(&self) -> Option<MessageStatus> {
        self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineUpdate {
    /// Expected claim-ready unix timestamp
    pub deadline: u64,
    /// Seconds left, zero once passed
    pub remaining: u64,
}

/// Handle to a running watch
pub struct PollHandle<T> {
    updates: watch::Receiver<Option<T>>,
    shutdown: Option<mpsc::Sender<()>>,
    task: JoinHandle<()>,
}

impl<T: Clone> PollHandle<T> {
    /// Most recent published value
    pub fn latest(&self) -> Option<T> {
        self.updates.borrow().clone()
    }

    /// Wait for the next published value. `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.updates.changed().await.ok()?;
        self.updates.borrow_and_update().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.updates.clone()
    }

    /// Stop scheduling further polls
    pub fn cancel(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
    }
}

fn cancelled(shutdown: &mut mpsc::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

pub struct StatusPoller {
    resolver: Arc<MessageStateResolver>,
    deadlines: Arc<DeadlineEstimator>,
}

impl StatusPoller {
    pub fn new(resolver: Arc<MessageStateResolver>, deadlines: Arc<DeadlineEstimator>) -> Self {
        Self {
            resolver,
            deadlines,
        }
    }

    /// Poll the status of `tx_hash` every `interval` until it is terminal
    pub fn watch_status(&self, tx_hash: B256, interval: Duration) -> PollHandle<MessageStatus> {
        let (tx, rx) = watch::channel(None);
        let (shutdown_tx, mut shutdown) = mpsc::channel::<()>(1);
        let resolver = Arc::clone(&self.resolver);

        let task = tokio::spawn(async move {
            let mut guard = MonotonicStatus::new();
            loop {
                let result = resolver.status(tx_hash).await;
                if cancelled(&mut shutdown) {
                    debug!(tx_hash = %tx_hash, "Status watch cancelled");
                    break;
                }

                match result {
                    Ok(status) => {
                        metrics::record_status(status.as_str());
                        if let Some(status) = guard.observe(status) {
                            debug!(tx_hash = %tx_hash, status = %status, "Status changed");
                            if tx.send(Some(status)).is_err() {
                                break;
                            }
                        }
                        if status.is_terminal() {
                            break;
                        }
                    }
                    Err(e) => {
                        metrics::record_error(&e);
                        warn!(tx_hash = %tx_hash, error = %e, "Status poll failed");
                    }
                }

                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(tx_hash = %tx_hash, "Status watch cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        PollHandle {
            updates: rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Publish the claim countdown of `tx_hash` every `interval` (clamped to
    /// 1-60 s) until it reaches zero
    pub fn watch_deadline(&self, tx_hash: B256, interval: Duration) -> PollHandle<DeadlineUpdate> {
        let interval = interval.clamp(MIN_DEADLINE_INTERVAL, MAX_DEADLINE_INTERVAL);
        let (tx, rx) = watch::channel(None);
        let (shutdown_tx, mut shutdown) = mpsc::channel::<()>(1);
        let deadlines = Arc::clone(&self.deadlines);

        let task = tokio::spawn(async move {
            let mut deadline = None;
            loop {
                if deadline.is_none() {
                    let result = deadlines.estimate(tx_hash).await;
                    if cancelled(&mut shutdown) {
                        break;
                    }
                    match result {
                        Ok(at) => deadline = Some(at),
                        Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Deadline estimate failed"),
                    }
                }

                if let Some(at) = deadline {
                    let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
                    let update = DeadlineUpdate {
                        deadline: at,
                        remaining: remaining(at, now),
                    };
                    if tx.send(Some(update)).is_err() || update.remaining == 0 {
                        break;
                    }
                }

                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(tx_hash = %tx_hash, "Deadline watch cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        PollHandle {
            updates: rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::{DEFAULT_BUFFER_MINUTES, DEFAULT_CHALLENGE_PERIOD};
    use crate::error::BridgeError;
    use crate::testing::{
        eth_withdrawal_receipt, scenario_hash, MockChain, ScriptedOutbox, MOCK_BLOCK_TIME,
        MOCK_GENESIS_TIMESTAMP,
    };
    use crate::types::OutboxState;
    use alloy::primitives::{Address, U256};

    fn poller() -> (Arc<MockChain>, Arc<ScriptedOutbox>, StatusPoller) {
        let child = Arc::new(MockChain::new(42161));
        let outbox = Arc::new(ScriptedOutbox::new());
        let resolver = Arc::new(MessageStateResolver::new(child.clone(), outbox.clone()));
        let deadlines = Arc::new(DeadlineEstimator::new(
            child.clone(),
            DEFAULT_BUFFER_MINUTES,
            DEFAULT_CHALLENGE_PERIOD,
        ));
        (child, outbox, StatusPoller::new(resolver, deadlines))
    }

    #[test]
    fn test_monotonic_guard() {
        let mut guard = MonotonicStatus::new();
        assert_eq!(guard.observe(MessageStatus::Claimable), Some(MessageStatus::Claimable));
        assert_eq!(guard.observe(MessageStatus::Pending), None);
        assert_eq!(guard.observe(MessageStatus::Claimable), None);
        assert_eq!(guard.observe(MessageStatus::Success), Some(MessageStatus::Success));
        assert_eq!(guard.observe(MessageStatus::Claimable), None);
        assert_eq!(guard.last(), Some(MessageStatus::Success));
    }

    #[tokio::test]
    async fn test_watch_status_until_success() {
        let (child, outbox, poller) = poller();
        let tx = scenario_hash(0x31);
        child.add_receipt(eth_withdrawal_receipt(tx, 3, 1, Address::ZERO, U256::from(1u64)));

        let mut handle = poller.watch_status(tx, Duration::from_millis(10));
        assert_eq!(handle.next().await, Some(MessageStatus::Pending));

        outbox.set_state(1, OutboxState::Confirmed);
        assert_eq!(handle.next().await, Some(MessageStatus::Claimable));

        // A flaky source reporting an older state is never published
        outbox.set_state(1, OutboxState::Unconfirmed);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(handle.latest(), Some(MessageStatus::Claimable));

        outbox.set_state(1, OutboxState::Executed);
        assert_eq!(handle.next().await, Some(MessageStatus::Success));

        // Terminal: the task ends and the channel closes
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_watch_survives_errors() {
        let (child, outbox, poller) = poller();
        let tx = scenario_hash(0x32);
        child.add_receipt(eth_withdrawal_receipt(tx, 3, 2, Address::ZERO, U256::from(1u64)));
        outbox.fail_next(BridgeError::RpcTimeout("slow".into()));

        let mut handle = poller.watch_status(tx, Duration::from_millis(5));
        assert_eq!(handle.next().await, Some(MessageStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let (child, outbox, poller) = poller();
        let tx = scenario_hash(0x33);
        child.add_receipt(eth_withdrawal_receipt(tx, 3, 3, Address::ZERO, U256::from(1u64)));

        let mut handle = poller.watch_status(tx, Duration::from_millis(5));
        assert_eq!(handle.next().await, Some(MessageStatus::Pending));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let queries = outbox.queries();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(outbox.queries(), queries);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_drop_stops_polling() {
        let (child, outbox, poller) = poller();
        let tx = scenario_hash(0x34);
        child.add_receipt(eth_withdrawal_receipt(tx, 3, 4, Address::ZERO, U256::from(1u64)));

        let handle = poller.watch_status(tx, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let queries = outbox.queries();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(outbox.queries(), queries);
    }

    #[tokio::test]
    async fn test_watch_deadline_past_deadline() {
        let (child, _outbox, poller) = poller();
        let tx = scenario_hash(0x35);
        child.add_receipt(eth_withdrawal_receipt(tx, 10, 1, Address::ZERO, U256::from(1u64)));

        // Sub-second intervals are clamped up; the first update is immediate
        let mut handle = poller.watch_deadline(tx, Duration::from_millis(1));
        let update = handle.next().await.unwrap();
        assert_eq!(
            update.deadline,
            MOCK_GENESIS_TIMESTAMP + 10 * MOCK_BLOCK_TIME + 4200
        );
        // Mock block times are in the past
        assert_eq!(update.remaining, 0);
        assert_eq!(handle.next().await, None);
    }
}
