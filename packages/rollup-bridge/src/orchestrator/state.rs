//! Transfer flow state machines
//!
//! Each flow is linear. A state's [`FlowStep::step`] index only ever grows
//! within one run; [`FlowTracker`] refuses to move to a lower or equal index.

use alloy::primitives::B256;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::retryable::ChildExecutionStatus;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    EthDeposit,
    EthWithdrawal,
    NftDeposit,
    NftWithdrawal,
    Claim,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::EthDeposit => "eth_deposit",
            FlowKind::EthWithdrawal => "eth_withdrawal",
            FlowKind::NftDeposit => "nft_deposit",
            FlowKind::NftWithdrawal => "nft_withdrawal",
            FlowKind::Claim => "claim",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position of a state within its flow
pub trait FlowStep {
    fn step(&self) -> u8;

    fn is_terminal(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EthDepositState {
    Idle,
    Estimating,
    Submitted { parent_tx: B256 },
    WaitingChildReceipt { parent_tx: B256 },
    Completed { parent_tx: B256, child_tx: B256 },
    Failed {
        parent_tx: B256,
        status: ChildExecutionStatus,
    },
    TimedOut { parent_tx: B256 },
}

impl FlowStep for EthDepositState {
    fn step(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Estimating => 1,
            Self::Submitted { .. } => 2,
            Self::WaitingChildReceipt { .. } => 3,
            Self::Completed { .. } | Self::Failed { .. } | Self::TimedOut { .. } => 4,
        }
    }

    fn is_terminal(&self) -> bool {
        self.step() == 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EthWithdrawalState {
    Idle,
    Submitted { child_tx: B256 },
    Initiated { child_tx: B256 },
}

impl FlowStep for EthWithdrawalState {
    fn step(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Submitted { .. } => 1,
            Self::Initiated { .. } => 2,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Initiated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NftDepositState {
    Idle,
    EstimatingGas,
    Submitted { parent_tx: B256 },
    WaitingFinality { parent_tx: B256 },
    Redeemed { parent_tx: B256, child_tx: B256 },
    Failed {
        parent_tx: B256,
        status: ChildExecutionStatus,
    },
    TimedOut { parent_tx: B256 },
}

impl FlowStep for NftDepositState {
    fn step(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::EstimatingGas => 1,
            Self::Submitted { .. } => 2,
            Self::WaitingFinality { .. } => 3,
            Self::Redeemed { .. } | Self::Failed { .. } | Self::TimedOut { .. } => 4,
        }
    }

    fn is_terminal(&self) -> bool {
        self.step() == 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NftWithdrawalState {
    Idle,
    Submitted { child_tx: B256 },
    RecordedPending { child_tx: B256 },
}

impl FlowStep for NftWithdrawalState {
    fn step(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Submitted { .. } => 1,
            Self::RecordedPending { .. } => 2,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::RecordedPending { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClaimState {
    Idle,
    Resolving { child_tx: B256 },
    Submitted { child_tx: B256, parent_tx: B256 },
    /// `parent_tx` is `None` when the message had already been executed
    Success {
        child_tx: B256,
        parent_tx: Option<B256>,
    },
}

impl FlowStep for ClaimState {
    fn step(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Resolving { .. } => 1,
            Self::Submitted { .. } => 2,
            Self::Success { .. } => 3,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A state of any flow, as broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlowState {
    EthDeposit(EthDepositState),
    EthWithdrawal(EthWithdrawalState),
    NftDeposit(NftDepositState),
    NftWithdrawal(NftWithdrawalState),
    Claim(ClaimState),
}

impl From<EthDepositState> for FlowState {
    fn from(state: EthDepositState) -> Self {
        FlowState::EthDeposit(state)
    }
}

impl From<EthWithdrawalState> for FlowState {
    fn from(state: EthWithdrawalState) -> Self {
        FlowState::EthWithdrawal(state)
    }
}

impl From<NftDepositState> for FlowState {
    fn from(state: NftDepositState) -> Self {
        FlowState::NftDeposit(state)
    }
}

impl From<NftWithdrawalState> for FlowState {
    fn from(state: NftWithdrawalState) -> Self {
        FlowState::NftWithdrawal(state)
    }
}

impl From<ClaimState> for FlowState {
    fn from(state: ClaimState) -> Self {
        FlowState::Claim(state)
    }
}

/// One published transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub flow: FlowKind,
    pub state: FlowState,
}

/// Current state of one flow run. Publishes every forward transition.
pub(crate) struct FlowTracker<S> {
    flow: FlowKind,
    current: S,
    events: broadcast::Sender<TransferEvent>,
}

impl<S> FlowTracker<S>
where
    S: FlowStep + Clone + fmt::Debug + Into<FlowState>,
{
    pub(crate) fn start(flow: FlowKind, initial: S, events: broadcast::Sender<TransferEvent>) -> Self {
        metrics::record_flow_step(flow.as_str(), initial.step());
        Self {
            flow,
            current: initial,
            events,
        }
    }

    pub(crate) fn current(&self) -> &S {
        &self.current
    }

    /// Move to `next`. Returns `false` (and publishes nothing) when `next` is
    /// not strictly after the current state.
    pub(crate) fn advance(&mut self, next: S) -> bool {
        if self.current.is_terminal() || next.step() <= self.current.step() {
            warn!(
                flow = %self.flow,
                current = ?self.current,
                rejected = ?next,
                "Ignoring backward flow transition"
            );
            return false;
        }

        debug!(flow = %self.flow, state = ?next, "Flow transition");
        metrics::record_flow_step(self.flow.as_str(), next.step());
        self.current = next.clone();
        // No subscribers is fine
        let _ = self.events.send(TransferEvent {
            flow: self.flow,
            state: next.into(),
        });
        true
    }

    pub(crate) fn into_state(self) -> S {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_share_last_step() {
        let tx = B256::repeat_byte(1);
        assert_eq!(
            EthDepositState::Completed {
                parent_tx: tx,
                child_tx: tx
            }
            .step(),
            EthDepositState::TimedOut { parent_tx: tx }.step()
        );
        assert!(NftDepositState::Failed {
            parent_tx: tx,
            status: ChildExecutionStatus::Expired
        }
        .is_terminal());
        assert!(!NftDepositState::WaitingFinality { parent_tx: tx }.is_terminal());
    }

    #[test]
    fn test_tracker_rejects_backward_moves() {
        let (tx, mut rx) = broadcast::channel(16);
        let hash = B256::repeat_byte(2);
        let mut tracker = FlowTracker::start(FlowKind::EthWithdrawal, EthWithdrawalState::Idle, tx);

        assert!(tracker.advance(EthWithdrawalState::Submitted { child_tx: hash }));
        assert!(!tracker.advance(EthWithdrawalState::Idle));
        assert!(tracker.advance(EthWithdrawalState::Initiated { child_tx: hash }));
        assert!(!tracker.advance(EthWithdrawalState::Submitted { child_tx: hash }));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.flow, FlowKind::EthWithdrawal);
        assert_eq!(
            first.state,
            FlowState::EthWithdrawal(EthWithdrawalState::Submitted { child_tx: hash })
        );
        assert!(matches!(
            rx.try_recv().unwrap().state,
            FlowState::EthWithdrawal(EthWithdrawalState::Initiated { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let (tx, _rx) = broadcast::channel(4);
        let hash = B256::repeat_byte(3);
        let mut tracker = FlowTracker::start(FlowKind::EthDeposit, EthDepositState::Idle, tx);
        tracker.advance(EthDepositState::Submitted { parent_tx: hash });
        tracker.advance(EthDepositState::TimedOut { parent_tx: hash });
        assert!(!tracker.advance(EthDepositState::Completed {
            parent_tx: hash,
            child_tx: hash
        }));
        assert_eq!(
            tracker.into_state(),
            EthDepositState::TimedOut { parent_tx: hash }
        );
    }

    #[test]
    fn test_flow_kind_labels() {
        assert_eq!(FlowKind::NftWithdrawal.to_string(), "nft_withdrawal");
        assert_eq!(FlowKind::Claim.as_str(), "claim");
    }
}
