//! Transfer orchestration
//!
//! Drives the five user-facing flows. Each flow is a linear state machine
//! (see [`state`]) whose transitions are broadcast to subscribers. One
//! submission runs at a time per orchestrator.
//!
//! ## Flows
//!
//! | flow | source | terminal states |
//! |---|---|---|
//! | ETH deposit | parent | `Completed`, `Failed`, `TimedOut` |
//! | ETH withdrawal | child | `Initiated` |
//! | NFT deposit | parent | `Redeemed`, `Failed`, `TimedOut` |
//! | NFT withdrawal | child | `RecordedPending` |
//! | claim | parent | `Success` |

pub mod gas;
pub mod retryable;
pub mod state;

pub use gas::{GasEstimator, GasMargins, NodeInterfaceGasEstimator, RetryableRequest};
pub use retryable::{ChildExecution, ChildExecutionStatus, RetryableTracker};
pub use state::{
    ClaimState, EthDepositState, EthWithdrawalState, FlowKind, FlowState, FlowStep,
    NftDepositState, NftWithdrawalState, TransferEvent,
};

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::addresses::BridgeContracts;
use crate::connector::{wait_for_confirmations, ChainConnector, Receipt, TxRequest};
use crate::error::{BridgeError, ErrorReport, Result};
use crate::evm::contracts::{ArbSys, ChildNftBridge, Inbox, ParentNftGateway, ARB_SYS_ADDRESS};
use crate::evm::events::DeliveryContracts;
use crate::evm::watcher::WatcherConfig;
use crate::metadata::{token_metadata, token_uri, MetadataFetcher};
use crate::metrics;
use crate::resolver::MessageStateResolver;
use crate::store::PendingTransferStore;
use crate::types::{MessageStatus, PendingTransferRecord};
use state::FlowTracker;

/// Default bound on waiting for a deposit to execute on the child chain
pub const DEPOSIT_FINALITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Blocks on top of a submission before it counts as landed
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub deposit_finality_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(10 * 60),
            deposit_finality_timeout: DEPOSIT_FINALITY_TIMEOUT,
        }
    }
}

/// Releases the single-flight slot on drop
struct InFlight<'a> {
    slot: &'a Mutex<Option<FlowKind>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

pub struct TransferOrchestrator {
    parent: Arc<dyn ChainConnector>,
    child: Arc<dyn ChainConnector>,
    contracts: BridgeContracts,
    resolver: Arc<MessageStateResolver>,
    store: Arc<PendingTransferStore>,
    gas: Arc<dyn GasEstimator>,
    metadata: Arc<dyn MetadataFetcher>,
    retryables: RetryableTracker,
    config: OrchestratorConfig,
    active_chain: AtomicU64,
    in_flight: Mutex<Option<FlowKind>>,
    events: broadcast::Sender<TransferEvent>,
}

impl TransferOrchestrator {
    /// The active network starts out as the parent chain.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: Arc<dyn ChainConnector>,
        child: Arc<dyn ChainConnector>,
        contracts: BridgeContracts,
        resolver: Arc<MessageStateResolver>,
        store: Arc<PendingTransferStore>,
        gas: Arc<dyn GasEstimator>,
        metadata: Arc<dyn MetadataFetcher>,
        config: OrchestratorConfig,
    ) -> Self {
        let retryables = RetryableTracker::new(
            parent.clone(),
            child.clone(),
            DeliveryContracts {
                bridge: contracts.bridge,
                inbox: contracts.inbox,
            },
            WatcherConfig {
                poll_interval: config.poll_interval,
                ..WatcherConfig::default()
            },
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            active_chain: AtomicU64::new(parent.chain_id()),
            parent,
            child,
            contracts,
            resolver,
            store,
            gas,
            metadata,
            retryables,
            config,
            in_flight: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    pub fn active_chain(&self) -> u64 {
        self.active_chain.load(Ordering::SeqCst)
    }

    /// Select the network the wallet is on. Only the two bridged chains are valid.
    pub fn switch_network(&self, chain_id: u64) -> Result<()> {
        if chain_id != self.parent.chain_id() && chain_id != self.child.chain_id() {
            return Err(BridgeError::Config(format!(
                "chain {} is neither the parent ({}) nor the child ({})",
                chain_id,
                self.parent.chain_id(),
                self.child.chain_id()
            )));
        }
        let previous = self.active_chain.swap(chain_id, Ordering::SeqCst);
        if previous != chain_id {
            info!(from = previous, to = chain_id, "Switched active network");
        }
        Ok(())
    }

    // ========================================================================
    // Flows
    // ========================================================================

    /// Deposit `amount` wei through `Inbox.depositEth`
    pub async fn deposit_eth(&self, amount: U256) -> Result<EthDepositState> {
        let flow = FlowKind::EthDeposit;
        let _slot = self.begin(flow)?;
        let mut tracker = FlowTracker::start(flow, EthDepositState::Idle, self.events.clone());
        let result = self.run_eth_deposit(&mut tracker, amount).await;
        self.finish(flow, result.map(|()| tracker.into_state()), |s| match s {
            EthDepositState::Completed { .. } => "success",
            EthDepositState::TimedOut { .. } => "timed_out",
            _ => "failed",
        })
    }

    async fn run_eth_deposit(
        &self,
        tracker: &mut FlowTracker<EthDepositState>,
        amount: U256,
    ) -> Result<()> {
        let account = self.account(self.parent.as_ref())?;
        tracker.advance(EthDepositState::Estimating);

        let request = TxRequest::new(self.contracts.inbox, Inbox::depositEthCall {}.abi_encode())
            .with_value(amount)
            .with_from(account);
        self.ensure_funds(self.parent.as_ref(), account, &request).await?;

        let parent_tx = self.parent.send_transaction(request).await?;
        info!(parent_tx = %parent_tx, amount = %amount, "Submitted ETH deposit");
        tracker.advance(EthDepositState::Submitted { parent_tx });

        if self.await_landed(self.parent.as_ref(), parent_tx).await?.is_none() {
            tracker.advance(EthDepositState::TimedOut { parent_tx });
            return Ok(());
        }
        tracker.advance(EthDepositState::WaitingChildReceipt { parent_tx });

        let next = match self.await_child_execution(parent_tx).await? {
            Some(execution) if execution.is_complete() => EthDepositState::Completed {
                parent_tx,
                child_tx: execution.child_tx.unwrap_or_default(),
            },
            Some(execution) => EthDepositState::Failed {
                parent_tx,
                status: execution.status,
            },
            None => EthDepositState::TimedOut { parent_tx },
        };
        tracker.advance(next);
        Ok(())
    }

    /// Withdraw `amount` wei to `destination` on the parent chain
    pub async fn withdraw_eth(
        &self,
        destination: Address,
        amount: U256,
    ) -> Result<EthWithdrawalState> {
        let flow = FlowKind::EthWithdrawal;
        let _slot = self.begin(flow)?;
        let mut tracker = FlowTracker::start(flow, EthWithdrawalState::Idle, self.events.clone());
        let result = self.run_eth_withdrawal(&mut tracker, destination, amount).await;
        self.finish(flow, result.map(|()| tracker.into_state()), |_| "success")
    }

    async fn run_eth_withdrawal(
        &self,
        tracker: &mut FlowTracker<EthWithdrawalState>,
        destination: Address,
        amount: U256,
    ) -> Result<()> {
        let account = self.account(self.child.as_ref())?;
        let call = ArbSys::withdrawEthCall { destination };
        let request = TxRequest::new(ARB_SYS_ADDRESS, call.abi_encode())
            .with_value(amount)
            .with_from(account);
        self.ensure_funds(self.child.as_ref(), account, &request).await?;

        let child_tx = self.child.send_transaction(request).await?;
        info!(
            child_tx = %child_tx,
            destination = %destination,
            amount = %amount,
            "Submitted ETH withdrawal"
        );
        tracker.advance(EthWithdrawalState::Submitted { child_tx });
        tracker.advance(EthWithdrawalState::Initiated { child_tx });
        Ok(())
    }

    /// Bridge parent-chain token `token_id` to `to` on the child chain
    pub async fn deposit_nft(&self, token_id: U256, to: Address) -> Result<NftDepositState> {
        let flow = FlowKind::NftDeposit;
        let _slot = self.begin(flow)?;
        let mut tracker = FlowTracker::start(flow, NftDepositState::Idle, self.events.clone());
        let result = self.run_nft_deposit(&mut tracker, token_id, to).await;
        self.finish(flow, result.map(|()| tracker.into_state()), |s| match s {
            NftDepositState::Redeemed { .. } => "success",
            NftDepositState::TimedOut { .. } => "timed_out",
            _ => "failed",
        })
    }

    async fn run_nft_deposit(
        &self,
        tracker: &mut FlowTracker<NftDepositState>,
        token_id: U256,
        to: Address,
    ) -> Result<()> {
        let account = self.account(self.parent.as_ref())?;
        tracker.advance(NftDepositState::EstimatingGas);

        let uri = token_uri(self.parent.as_ref(), self.contracts.parent_nft, token_id).await?;
        let mint = ChildNftBridge::mintCall {
            to,
            tokenId: token_id,
            tokenUri: uri,
        }
        .abi_encode();

        let head = self.parent.block_number().await?;
        let base_fee = self.parent.get_block(head).await?.base_fee_per_gas;
        let params = self
            .gas
            .estimate_retryable(&RetryableRequest {
                from: self.contracts.parent_nft_gateway,
                to: self.contracts.child_nft_bridge,
                l2_call_value: U256::ZERO,
                excess_fee_refund: account,
                call_value_refund: account,
                data: mint.clone().into(),
                parent_base_fee: base_fee,
            })
            .await?;

        let call = ParentNftGateway::depositNftCall {
            tokenId: token_id,
            to,
            childCallData: mint.into(),
            maxSubmissionCost: params.max_submission_cost,
            maxGas: params.gas_limit,
            gasPriceBid: params.max_fee_per_gas,
        };
        let request = TxRequest::new(self.contracts.parent_nft_gateway, call.abi_encode())
            .with_value(params.deposit)
            .with_from(account);
        self.ensure_funds(self.parent.as_ref(), account, &request).await?;

        let parent_tx = self.parent.send_transaction(request).await?;
        info!(
            parent_tx = %parent_tx,
            token_id = %token_id,
            to = %to,
            deposit = %params.deposit,
            "Submitted NFT deposit"
        );
        tracker.advance(NftDepositState::Submitted { parent_tx });

        if self.await_landed(self.parent.as_ref(), parent_tx).await?.is_none() {
            tracker.advance(NftDepositState::TimedOut { parent_tx });
            return Ok(());
        }
        tracker.advance(NftDepositState::WaitingFinality { parent_tx });

        let next = match self.await_child_execution(parent_tx).await? {
            Some(execution) if execution.is_complete() => NftDepositState::Redeemed {
                parent_tx,
                child_tx: execution.child_tx.unwrap_or_default(),
            },
            Some(execution) => NftDepositState::Failed {
                parent_tx,
                status: execution.status,
            },
            None => NftDepositState::TimedOut { parent_tx },
        };
        tracker.advance(next);
        Ok(())
    }

    /// Start withdrawing child token `token_id` and record it as pending
    pub async fn withdraw_nft(
        &self,
        token_id: U256,
        parent_recipient: Address,
    ) -> Result<PendingTransferRecord> {
        let flow = FlowKind::NftWithdrawal;
        let _slot = self.begin(flow)?;
        let mut tracker = FlowTracker::start(flow, NftWithdrawalState::Idle, self.events.clone());
        let result = self
            .run_nft_withdrawal(&mut tracker, token_id, parent_recipient)
            .await;
        self.finish(flow, result, |_| "success")
    }

    async fn run_nft_withdrawal(
        &self,
        tracker: &mut FlowTracker<NftWithdrawalState>,
        token_id: U256,
        parent_recipient: Address,
    ) -> Result<PendingTransferRecord> {
        let account = self.account(self.child.as_ref())?;
        let bridge = self.contracts.child_nft_bridge;

        // The token is burnt by the withdrawal, read its URI first
        let uri = token_uri(self.child.as_ref(), bridge, token_id).await.ok();

        let call = ChildNftBridge::withdrawCall {
            tokenId: token_id,
            parentRecipient: parent_recipient,
        };
        let request = TxRequest::new(bridge, call.abi_encode()).with_from(account);
        self.ensure_funds(self.child.as_ref(), account, &request).await?;

        let child_tx = self.child.send_transaction(request).await?;
        info!(
            child_tx = %child_tx,
            token_id = %token_id,
            parent_recipient = %parent_recipient,
            "Submitted NFT withdrawal"
        );
        tracker.advance(NftWithdrawalState::Submitted { child_tx });

        let metadata = token_metadata(
            self.child.as_ref(),
            bridge,
            self.metadata.as_ref(),
            token_id,
            uri.as_deref(),
        )
        .await;
        let record = PendingTransferRecord::new(child_tx, token_id, account, metadata);
        self.store.add(record.clone()).await?;
        tracker.advance(NftWithdrawalState::RecordedPending { child_tx });
        Ok(record)
    }

    /// Execute the outgoing message created by `child_tx` on the parent chain.
    ///
    /// Safe to retry: a message that is already executed returns `Success`
    /// without submitting anything.
    pub async fn claim(&self, child_tx: B256) -> Result<ClaimState> {
        let flow = FlowKind::Claim;
        let _slot = self.begin(flow)?;
        let mut tracker = FlowTracker::start(flow, ClaimState::Idle, self.events.clone());
        let result = self.run_claim(&mut tracker, child_tx).await;
        self.finish(flow, result.map(|()| tracker.into_state()), |s| match s {
            ClaimState::Success {
                parent_tx: None, ..
            } => "already_executed",
            _ => "success",
        })
    }

    async fn run_claim(&self, tracker: &mut FlowTracker<ClaimState>, child_tx: B256) -> Result<()> {
        let required = self.parent.chain_id();
        let active = self.active_chain();
        if active != required {
            return Err(BridgeError::WrongNetwork { required, active });
        }

        tracker.advance(ClaimState::Resolving { child_tx });
        let resolved = self.resolver.resolve(child_tx).await?;
        metrics::record_status(resolved.status.as_str());

        match resolved.status {
            MessageStatus::Success => {
                info!(child_tx = %child_tx, "Message already executed");
                self.store.remove(child_tx).await?;
                tracker.advance(ClaimState::Success {
                    child_tx,
                    parent_tx: None,
                });
            }
            MessageStatus::Pending => {
                return Err(BridgeError::NotClaimable {
                    tx_hash: child_tx,
                    status: resolved.status,
                });
            }
            MessageStatus::Claimable => {
                let account = self.account(self.parent.as_ref())?;
                let request = self
                    .resolver
                    .outbox()
                    .build_execute(&resolved.outgoing)
                    .await?
                    .with_from(account);

                let parent_tx = self.parent.send_transaction(request).await?;
                info!(
                    child_tx = %child_tx,
                    parent_tx = %parent_tx,
                    position = resolved.outgoing.position,
                    "Submitted claim"
                );
                tracker.advance(ClaimState::Submitted {
                    child_tx,
                    parent_tx,
                });

                wait_for_confirmations(
                    self.parent.as_ref(),
                    parent_tx,
                    self.config.confirmations,
                    self.config.poll_interval,
                    self.config.confirmation_timeout,
                )
                .await?;
                self.store.remove(child_tx).await?;
                tracker.advance(ClaimState::Success {
                    child_tx,
                    parent_tx: Some(parent_tx),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn begin(&self, flow: FlowKind) -> Result<InFlight<'_>> {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = *slot {
            metrics::record_submission(flow.as_str(), "rejected_in_flight");
            return Err(BridgeError::SubmissionInFlight(current.to_string()));
        }
        *slot = Some(flow);
        Ok(InFlight {
            slot: &self.in_flight,
        })
    }

    fn finish<T>(
        &self,
        flow: FlowKind,
        result: Result<T>,
        outcome: impl Fn(&T) -> &'static str,
    ) -> Result<T> {
        match &result {
            Ok(value) => metrics::record_submission(flow.as_str(), outcome(value)),
            Err(BridgeError::UserRejected) => {
                metrics::record_submission(flow.as_str(), "user_rejected");
                info!(flow = %flow, "Submission rejected by user");
            }
            Err(e) => {
                metrics::record_submission(flow.as_str(), "error");
                metrics::record_error(e);
                if let Some(report) = ErrorReport::from_error(e) {
                    warn!(
                        flow = %flow,
                        kind = e.kind(),
                        summary = %report.summary,
                        detail = %report.detail,
                        "Transfer flow failed"
                    );
                }
            }
        }
        result
    }

    fn account(&self, connector: &dyn ChainConnector) -> Result<Address> {
        connector.signer_address().ok_or_else(|| {
            BridgeError::Config(format!(
                "no signing key configured for chain {}",
                connector.chain_id()
            ))
        })
    }

    /// Fail early with `InsufficientFunds` when value plus gas exceeds the balance
    async fn ensure_funds(
        &self,
        connector: &dyn ChainConnector,
        account: Address,
        request: &TxRequest,
    ) -> Result<()> {
        let gas = connector.estimate_gas(request).await?;
        let gas_price = connector.get_gas_price().await?;
        let cost = U256::from(gas) * U256::from(gas_price) + request.value;
        let balance = connector.get_balance(account).await?;
        if balance < cost {
            return Err(BridgeError::InsufficientFunds(format!(
                "{} holds {} wei, needs {} on chain {}",
                account,
                balance,
                cost,
                connector.chain_id()
            )));
        }
        Ok(())
    }

    /// Wait for the configured confirmations. `None` when the wait timed out.
    async fn await_landed(
        &self,
        connector: &dyn ChainConnector,
        tx_hash: B256,
    ) -> Result<Option<Receipt>> {
        match wait_for_confirmations(
            connector,
            tx_hash,
            self.config.confirmations,
            self.config.poll_interval,
            self.config.confirmation_timeout,
        )
        .await
        {
            Ok(receipt) => Ok(Some(receipt)),
            Err(BridgeError::TimedOut(what)) => {
                warn!(tx_hash = %tx_hash, waiting_for = %what, "Confirmation wait timed out");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `None` when the child chain did not act within the finality bound
    async fn await_child_execution(&self, parent_tx: B256) -> Result<Option<ChildExecution>> {
        match self
            .retryables
            .wait_for_execution(
                parent_tx,
                self.config.poll_interval,
                self.config.deposit_finality_timeout,
            )
            .await
        {
            Ok(execution) => Ok(Some(execution)),
            Err(BridgeError::TimedOut(what)) => {
                warn!(parent_tx = %parent_tx, waiting_for = %what, "Deposit finality wait timed out");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;
    use crate::testing::{
        eth_deposit_logs, eth_withdrawal_receipt, retryable_logs, scenario_hash, MockChain,
        RetryableFixture, ScriptedOutbox, StaticMetadataFetcher, FIXTURE_BRIDGE_ADDRESS,
        FIXTURE_DELIVERY, FIXTURE_INBOX_ADDRESS, SCRIPTED_OUTBOX_ADDRESS,
    };
    use crate::types::{OutboxState, TokenMetadata};
    use async_trait::async_trait;
    use gas::RetryableGasParams;

    const PARENT: u64 = 1;
    const CHILD: u64 = 42161;
    const USER: Address = Address::repeat_byte(0x11);

    struct FixedGas;

    #[async_trait]
    impl GasEstimator for FixedGas {
        async fn estimate_retryable(&self, _: &RetryableRequest) -> Result<RetryableGasParams> {
            Ok(RetryableGasParams {
                gas_limit: U256::from(300_000u64),
                max_fee_per_gas: U256::from(200_000_000u64),
                max_submission_cost: U256::from(1_000u64),
                deposit: U256::from(60_000_001_000u64),
            })
        }
    }

    fn contracts() -> BridgeContracts {
        BridgeContracts {
            inbox: FIXTURE_INBOX_ADDRESS,
            bridge: FIXTURE_BRIDGE_ADDRESS,
            outbox: SCRIPTED_OUTBOX_ADDRESS,
            rollup: Address::repeat_byte(0x0e),
            parent_nft: Address::repeat_byte(0xa5),
            parent_nft_gateway: Address::repeat_byte(0xa0),
            child_nft_bridge: Address::repeat_byte(0xb0),
        }
    }

    struct Harness {
        parent: Arc<MockChain>,
        child: Arc<MockChain>,
        outbox: Arc<ScriptedOutbox>,
        store: Arc<PendingTransferStore>,
        orchestrator: Arc<TransferOrchestrator>,
    }

    fn harness() -> Harness {
        let parent = Arc::new(MockChain::with_signer(PARENT, USER));
        let child = Arc::new(MockChain::with_signer(CHILD, USER));
        parent.mine(1);
        child.mine(1);
        parent.set_balance(USER, U256::from(10u64).pow(U256::from(20)));
        child.set_balance(USER, U256::from(10u64).pow(U256::from(20)));
        let outbox = Arc::new(ScriptedOutbox::new());
        let resolver = Arc::new(MessageStateResolver::new(child.clone(), outbox.clone()));
        let store = Arc::new(PendingTransferStore::new(Arc::new(MemoryKvStore::new())));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            parent.clone(),
            child.clone(),
            contracts(),
            resolver,
            store.clone(),
            Arc::new(FixedGas),
            Arc::new(StaticMetadataFetcher),
            OrchestratorConfig {
                confirmations: 1,
                poll_interval: Duration::from_millis(5),
                confirmation_timeout: Duration::from_millis(200),
                deposit_finality_timeout: Duration::from_millis(50),
            },
        ));
        Harness {
            parent,
            child,
            outbox,
            store,
            orchestrator,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<TransferEvent>) -> Vec<FlowState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            states.push(event.state);
        }
        states
    }

    #[tokio::test]
    async fn test_eth_deposit_completes() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();
        let amount = U256::from(1_000_000u64);

        let logs = eth_deposit_logs(U256::from(4), USER, USER, amount, B256::ZERO, 0);
        h.parent.queue_receipt_logs(logs.clone());

        // The child executes the deposit under its derived id
        let receipt = Receipt {
            tx_hash: B256::ZERO,
            block_number: 1,
            status: true,
            logs,
        };
        let delivered = crate::evm::events::delivered_messages(&receipt, &FIXTURE_DELIVERY);
        let deposit = retryable::EthDeposit::from_delivered(&delivered[0]).unwrap();
        let child_tx = deposit.tx_id(CHILD);
        h.child.add_receipt(Receipt {
            tx_hash: child_tx,
            block_number: 3,
            status: true,
            logs: vec![],
        });

        let state = h.orchestrator.deposit_eth(amount).await.unwrap();
        let parent_tx = match state {
            EthDepositState::Completed {
                parent_tx,
                child_tx: executed,
            } => {
                assert_eq!(executed, child_tx);
                parent_tx
            }
            other => panic!("unexpected {:?}", other),
        };

        let sent = h.parent.sent();
        assert_eq!(sent[0].to, contracts().inbox);
        assert_eq!(sent[0].value, amount);

        let states = drain(&mut rx);
        assert_eq!(
            states,
            vec![
                FlowState::from(EthDepositState::Estimating),
                FlowState::from(EthDepositState::Submitted { parent_tx }),
                FlowState::from(EthDepositState::WaitingChildReceipt { parent_tx }),
                FlowState::from(EthDepositState::Completed {
                    parent_tx,
                    child_tx
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_eth_deposit_times_out_without_child_execution() {
        let h = harness();
        h.parent.queue_receipt_logs(eth_deposit_logs(
            U256::from(5),
            USER,
            USER,
            U256::from(1u64),
            B256::ZERO,
            0,
        ));
        let state = h.orchestrator.deposit_eth(U256::from(1u64)).await.unwrap();
        assert!(matches!(state, EthDepositState::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_eth_deposit_fails_when_child_tx_reverts() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();
        let amount = U256::from(7u64);
        let logs = eth_deposit_logs(U256::from(6), USER, USER, amount, B256::ZERO, 0);
        h.parent.queue_receipt_logs(logs.clone());

        let receipt = Receipt {
            tx_hash: B256::ZERO,
            block_number: 1,
            status: true,
            logs,
        };
        let delivered = crate::evm::events::delivered_messages(&receipt, &FIXTURE_DELIVERY);
        let deposit = retryable::EthDeposit::from_delivered(&delivered[0]).unwrap();
        h.child.add_receipt(Receipt {
            tx_hash: deposit.tx_id(CHILD),
            block_number: 3,
            status: false,
            logs: vec![],
        });

        let state = h.orchestrator.deposit_eth(amount).await.unwrap();
        let parent_tx = match state {
            EthDepositState::Failed { parent_tx, status } => {
                assert_eq!(status, retryable::ChildExecutionStatus::CreationFailed);
                parent_tx
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            drain(&mut rx).last(),
            Some(&FlowState::from(EthDepositState::Failed {
                parent_tx,
                status: retryable::ChildExecutionStatus::CreationFailed,
            }))
        );
    }

    #[tokio::test]
    async fn test_deposit_insufficient_funds() {
        let h = harness();
        h.parent.set_balance(USER, U256::from(10u64));
        let err = h
            .orchestrator
            .deposit_eth(U256::from(1_000u64))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::InsufficientFunds(_)));
        assert!(h.parent.sent().is_empty());
    }

    #[tokio::test]
    async fn test_user_rejection_aborts_without_report() {
        let h = harness();
        h.child.fail_next_send(BridgeError::UserRejected);
        let err = h
            .orchestrator
            .withdraw_eth(USER, U256::from(5u64))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::UserRejected));
        assert!(ErrorReport::from_error(&err).is_none());

        // Slot released: the retry goes through
        let state = h.orchestrator.withdraw_eth(USER, U256::from(5u64)).await.unwrap();
        assert!(matches!(state, EthWithdrawalState::Initiated { .. }));
    }

    #[tokio::test]
    async fn test_eth_withdrawal_calls_arbsys() {
        let h = harness();
        let destination = Address::repeat_byte(0x22);
        let state = h
            .orchestrator
            .withdraw_eth(destination, U256::from(9u64))
            .await
            .unwrap();
        let child_tx = match state {
            EthWithdrawalState::Initiated { child_tx } => child_tx,
            other => panic!("unexpected {:?}", other),
        };
        let sent = h.child.sent();
        assert_eq!(sent[0].to, ARB_SYS_ADDRESS);
        assert_eq!(sent[0].value, U256::from(9u64));
        let decoded = ArbSys::withdrawEthCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(decoded.destination, destination);
        assert_ne!(child_tx, B256::ZERO);
    }

    #[tokio::test]
    async fn test_nft_deposit_redeemed() {
        use crate::evm::contracts::{ArbRetryableTx, ARB_RETRYABLE_TX_ADDRESS};
        use crate::evm::events::log_from_event;
        use alloy::sol_types::SolValue;

        let h = harness();
        h.parent.set_call_response(
            contracts().parent_nft,
            ChildNftBridge::tokenURICall::SELECTOR,
            ("ipfs://token/3".to_string(),).abi_encode_params(),
        );
        let fixture = RetryableFixture::default();
        h.parent
            .queue_receipt_logs(retryable_logs(&fixture, B256::ZERO, 0));

        let ticket_id = fixture.ticket_id(CHILD);
        let retry_tx = B256::repeat_byte(0x77);
        let redeem = ArbRetryableTx::RedeemScheduled {
            ticketId: ticket_id,
            retryTxHash: retry_tx,
            sequenceNum: 0,
            donatedGas: 0,
            gasDonor: Address::ZERO,
            maxRefund: U256::ZERO,
            submissionFeeRefund: U256::ZERO,
        };
        h.child.add_receipt(Receipt {
            tx_hash: ticket_id,
            block_number: 2,
            status: true,
            logs: vec![log_from_event(ARB_RETRYABLE_TX_ADDRESS, &redeem, 2, ticket_id, 0)],
        });
        h.child.add_receipt(Receipt {
            tx_hash: retry_tx,
            block_number: 2,
            status: true,
            logs: vec![],
        });

        let state = h
            .orchestrator
            .deposit_nft(U256::from(3u64), USER)
            .await
            .unwrap();
        assert!(matches!(
            state,
            NftDepositState::Redeemed { child_tx, .. } if child_tx == retry_tx
        ));

        let sent = h.parent.sent();
        assert_eq!(sent[0].to, contracts().parent_nft_gateway);
        assert_eq!(sent[0].value, U256::from(60_000_001_000u64));
        let call = ParentNftGateway::depositNftCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(call.tokenId, U256::from(3u64));
        let mint = ChildNftBridge::mintCall::abi_decode(&call.childCallData, true).unwrap();
        assert_eq!(mint.tokenUri, "ipfs://token/3");
        assert_eq!(mint.to, USER);
    }

    #[tokio::test]
    async fn test_nft_deposit_fails_when_ticket_expired() {
        use alloy::sol_types::SolValue;

        let h = harness();
        h.parent.set_call_response(
            contracts().parent_nft,
            ChildNftBridge::tokenURICall::SELECTOR,
            ("ipfs://token/4".to_string(),).abi_encode_params(),
        );
        let fixture = RetryableFixture::default();
        h.parent
            .queue_receipt_logs(retryable_logs(&fixture, B256::ZERO, 0));

        // Ticket created but never redeemed; getTimeout reverts
        h.child.add_receipt(Receipt {
            tx_hash: fixture.ticket_id(CHILD),
            block_number: 2,
            status: true,
            logs: vec![],
        });

        let state = h
            .orchestrator
            .deposit_nft(U256::from(4u64), USER)
            .await
            .unwrap();
        assert!(matches!(
            state,
            NftDepositState::Failed {
                status: retryable::ChildExecutionStatus::Expired,
                ..
            }
        ));
        assert!(h.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nft_withdrawal_records_pending() {
        use alloy::sol_types::SolValue;

        let h = harness();
        h.child.set_call_response(
            contracts().child_nft_bridge,
            ChildNftBridge::tokenURICall::SELECTOR,
            ("https://meta.example/8".to_string(),).abi_encode_params(),
        );

        let record = h
            .orchestrator
            .withdraw_nft(U256::from(8u64), USER)
            .await
            .unwrap();
        assert_eq!(record.token_id, "8");
        assert_eq!(record.owner, USER);
        assert_eq!(record.name.as_deref(), Some("name of https://meta.example/8"));
        assert!(h.store.contains(record.tx_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_nft_withdrawal_records_without_metadata() {
        let h = harness();
        let record = h
            .orchestrator
            .withdraw_nft(U256::from(9u64), USER)
            .await
            .unwrap();
        assert_eq!(record.metadata(), TokenMetadata::default());
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }

    fn seed_withdrawal(h: &Harness, byte: u8, position: u64) -> B256 {
        let tx = scenario_hash(byte);
        h.child.add_receipt(eth_withdrawal_receipt(
            tx,
            10,
            position,
            USER,
            U256::from(1u64),
        ));
        tx
    }

    #[tokio::test]
    async fn test_claim_requires_parent_network() {
        let h = harness();
        let tx = seed_withdrawal(&h, 0xa1, 1);
        h.outbox.set_state(1, OutboxState::Confirmed);
        h.orchestrator.switch_network(CHILD).unwrap();

        let err = h.orchestrator.claim(tx).await.err().unwrap();
        assert!(matches!(
            err,
            BridgeError::WrongNetwork {
                required: PARENT,
                active: CHILD
            }
        ));
        assert!(h.parent.sent().is_empty());

        h.orchestrator.switch_network(PARENT).unwrap();
        assert!(matches!(
            h.orchestrator.claim(tx).await.unwrap(),
            ClaimState::Success {
                parent_tx: Some(_),
                ..
            }
        ));
        assert!(h.orchestrator.switch_network(5).is_err());
    }

    #[tokio::test]
    async fn test_claim_pending_is_rejected() {
        let h = harness();
        let tx = seed_withdrawal(&h, 0xa2, 2);
        let err = h.orchestrator.claim(tx).await.err().unwrap();
        assert!(matches!(
            err,
            BridgeError::NotClaimable {
                status: MessageStatus::Pending,
                ..
            }
        ));
        assert!(h.parent.sent().is_empty());
    }

    #[tokio::test]
    async fn test_claim_executes_and_removes_record() {
        let h = harness();
        let tx = seed_withdrawal(&h, 0xa3, 3);
        h.outbox.set_state(3, OutboxState::Confirmed);
        h.store
            .add(PendingTransferRecord::new(
                tx,
                U256::from(1u64),
                USER,
                TokenMetadata::default(),
            ))
            .await
            .unwrap();

        let state = h.orchestrator.claim(tx).await.unwrap();
        assert!(matches!(state, ClaimState::Success { parent_tx: Some(_), .. }));
        assert_eq!(h.parent.sent()[0].to, SCRIPTED_OUTBOX_ADDRESS);
        assert!(!h.store.contains(tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_already_executed_is_idempotent() {
        let h = harness();
        let tx = seed_withdrawal(&h, 0xa4, 4);
        h.outbox.set_state(4, OutboxState::Executed);
        h.store
            .add(PendingTransferRecord::new(
                tx,
                U256::from(1u64),
                USER,
                TokenMetadata::default(),
            ))
            .await
            .unwrap();

        for _ in 0..2 {
            let state = h.orchestrator.claim(tx).await.unwrap();
            assert_eq!(
                state,
                ClaimState::Success {
                    child_tx: tx,
                    parent_tx: None
                }
            );
        }
        assert!(h.parent.sent().is_empty());
        assert!(h.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight() {
        let h = harness();
        let tx = seed_withdrawal(&h, 0xa5, 5);
        h.outbox.set_state(5, OutboxState::Confirmed);
        // Claim tx never mines, so the first claim holds the slot until it times out
        h.parent.set_manual_mining(true);

        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.claim(tx).await });
        // Wait for the first claim to submit
        while h.parent.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let err = h
            .orchestrator
            .withdraw_eth(USER, U256::from(1u64))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::SubmissionInFlight(ref f) if f == "claim"));

        let first = first.await.unwrap();
        assert!(matches!(first, Err(BridgeError::TimedOut(_))));
        assert!(h
            .orchestrator
            .withdraw_eth(USER, U256::from(1u64))
            .await
            .is_ok());
    }
}
