//! Message Lifecycle Scenarios
//!
//! Drives the tracker end to end over the in-memory chain from the `testing`
//! module: resolution, deadlines, claims, reconciliation and concurrent store
//! use.
//!
//! ## Running
//!
//! ```bash
//! cd packages/rollup-bridge
//! cargo test --features testing --test lifecycle_scenarios
//! ```
//!
//! The live-node test is ignored by default and needs the same environment as
//! the CLI (`PARENT_RPC_URL`, `CHILD_RPC_URL`, chain ids, `ADDRESS_REGISTRY_PATH`)
//! plus `LIFECYCLE_TX_HASH`, a child transaction that sent a message:
//!
//! ```bash
//! cargo test --features testing --test lifecycle_scenarios -- --ignored --nocapture
//! ```

use alloy::primitives::{Address, B256, U256};
use std::sync::Arc;
use std::time::Duration;

use rollup_bridge::addresses::BridgeContracts;
use rollup_bridge::deadline::{DeadlineEstimator, DEFAULT_BUFFER_MINUTES, DEFAULT_CHALLENGE_PERIOD};
use rollup_bridge::orchestrator::{
    ClaimState, GasMargins, NodeInterfaceGasEstimator, OrchestratorConfig, TransferOrchestrator,
};
use rollup_bridge::poller::StatusPoller;
use rollup_bridge::reconcile::Reconciler;
use rollup_bridge::resolver::MessageStateResolver;
use rollup_bridge::scanner::{EventLogScanner, NftBridgeAddresses, ScanConfig};
use rollup_bridge::store::{FileKvStore, KeyValueStore, MemoryKvStore, PendingTransferStore};
use rollup_bridge::testing::{
    eth_withdrawal_receipt, nft_withdrawal_receipt, scenario_hash, MockChain, NftBridgeFixture,
    ScriptedOutbox, StaticMetadataFetcher, MOCK_BLOCK_TIME, MOCK_GENESIS_TIMESTAMP,
    SCRIPTED_OUTBOX_ADDRESS,
};
use rollup_bridge::types::{OutboxState, PendingTransferRecord, TokenMetadata};
use rollup_bridge::{App, BridgeError, Config, MessageStatus};

const PARENT: u64 = 1;
const CHILD: u64 = 42161;
const OWNER: Address = Address::repeat_byte(0x11);

/// Tracker components over a mock parent and child chain
struct Tracker {
    parent: Arc<MockChain>,
    child: Arc<MockChain>,
    outbox: Arc<ScriptedOutbox>,
    fixture: NftBridgeFixture,
    resolver: Arc<MessageStateResolver>,
    deadlines: Arc<DeadlineEstimator>,
    store: Arc<PendingTransferStore>,
    reconciler: Reconciler,
    orchestrator: TransferOrchestrator,
}

impl Tracker {
    fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let fixture = NftBridgeFixture::default();
        let parent = Arc::new(MockChain::with_signer(PARENT, OWNER));
        let child = Arc::new(MockChain::with_signer(CHILD, OWNER));
        parent.mine(1);
        child.mine(1);

        let outbox = Arc::new(ScriptedOutbox::new());
        let resolver = Arc::new(MessageStateResolver::new(child.clone(), outbox.clone()));
        let deadlines = Arc::new(DeadlineEstimator::new(
            child.clone(),
            DEFAULT_BUFFER_MINUTES,
            DEFAULT_CHALLENGE_PERIOD,
        ));
        let store = Arc::new(PendingTransferStore::new(kv));
        let metadata = Arc::new(StaticMetadataFetcher);
        let scanner = Arc::new(EventLogScanner::new(
            child.clone(),
            outbox.clone(),
            metadata.clone(),
            NftBridgeAddresses {
                child_bridge: fixture.child_bridge,
                parent_gateway: fixture.parent_gateway,
            },
            ScanConfig::default(),
        ));
        let contracts = BridgeContracts {
            inbox: Address::repeat_byte(0x0d),
            bridge: Address::repeat_byte(0x0c),
            outbox: SCRIPTED_OUTBOX_ADDRESS,
            rollup: Address::repeat_byte(0x0e),
            parent_nft: Address::repeat_byte(0xa5),
            parent_nft_gateway: fixture.parent_gateway,
            child_nft_bridge: fixture.child_bridge,
        };
        let gas = Arc::new(NodeInterfaceGasEstimator::new(
            parent.clone(),
            child.clone(),
            contracts.inbox,
            GasMargins::default(),
        ));
        let orchestrator = TransferOrchestrator::new(
            parent.clone(),
            child.clone(),
            contracts,
            resolver.clone(),
            store.clone(),
            gas,
            metadata,
            OrchestratorConfig {
                poll_interval: Duration::from_millis(5),
                confirmation_timeout: Duration::from_secs(1),
                ..OrchestratorConfig::default()
            },
        );

        Self {
            reconciler: Reconciler::new(resolver.clone(), store.clone(), scanner),
            parent,
            child,
            outbox,
            fixture,
            resolver,
            deadlines,
            store,
            orchestrator,
        }
    }

    fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }
}

fn record(tx_hash: B256, token_id: u64) -> PendingTransferRecord {
    PendingTransferRecord::new(
        tx_hash,
        U256::from(token_id),
        OWNER,
        TokenMetadata::default(),
    )
}

// ============================================================================
// Scenario 0xAA: unconfirmed withdrawal
// ============================================================================

#[tokio::test]
async fn test_unconfirmed_withdrawal_cannot_be_claimed() {
    let t = Tracker::in_memory();
    let tx = scenario_hash(0xAA);
    let block = 40;
    t.child
        .add_receipt(eth_withdrawal_receipt(tx, block, 9, OWNER, U256::from(5u64)));

    assert_eq!(t.resolver.status(tx).await.unwrap(), MessageStatus::Pending);

    let initiated = MOCK_GENESIS_TIMESTAMP + block * MOCK_BLOCK_TIME;
    assert_eq!(t.deadlines.initiated_at(tx).await.unwrap(), initiated);
    assert_eq!(t.deadlines.estimate(tx).await.unwrap(), initiated + 4200);

    let err = t.orchestrator.claim(tx).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::NotClaimable {
            status: MessageStatus::Pending,
            ..
        }
    ));
    assert!(t.parent.sent().is_empty());
}

#[tokio::test]
async fn test_withdrawal_claimed_after_confirmation() {
    let t = Tracker::in_memory();
    let tx = scenario_hash(0xAA);
    t.child.add_receipt(nft_withdrawal_receipt(
        &t.fixture,
        tx,
        40,
        9,
        OWNER,
        U256::from(3u64),
        "ipfs://three",
    ));
    t.store.add(record(tx, 3)).await.unwrap();

    let poller = StatusPoller::new(t.resolver.clone(), t.deadlines.clone());
    let mut watch = poller.watch_status(tx, Duration::from_millis(5));
    assert_eq!(watch.next().await, Some(MessageStatus::Pending));

    t.outbox.set_state(9, OutboxState::Confirmed);
    assert_eq!(watch.next().await, Some(MessageStatus::Claimable));

    let state = t.orchestrator.claim(tx).await.unwrap();
    assert!(matches!(
        state,
        ClaimState::Success {
            parent_tx: Some(_),
            ..
        }
    ));
    assert_eq!(t.parent.sent().len(), 1);
    assert_eq!(t.parent.sent()[0].to, SCRIPTED_OUTBOX_ADDRESS);
    assert!(!t.store.contains(tx).await.unwrap());

    t.outbox.set_state(9, OutboxState::Executed);
    assert_eq!(watch.next().await, Some(MessageStatus::Success));
    assert_eq!(watch.next().await, None);

    // Retrying the claim is a no-op success
    let again = t.orchestrator.claim(tx).await.unwrap();
    assert!(matches!(again, ClaimState::Success { parent_tx: None, .. }));
    assert_eq!(t.parent.sent().len(), 1);
}

#[tokio::test]
async fn test_claim_requires_parent_network() {
    let t = Tracker::in_memory();
    let tx = scenario_hash(0xAA);
    t.child
        .add_receipt(eth_withdrawal_receipt(tx, 40, 9, OWNER, U256::from(5u64)));
    t.outbox.set_state(9, OutboxState::Confirmed);

    t.orchestrator.switch_network(CHILD).unwrap();
    let err = t.orchestrator.claim(tx).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::WrongNetwork {
            required: PARENT,
            active: CHILD
        }
    ));

    t.orchestrator.switch_network(PARENT).unwrap();
    assert!(t.orchestrator.claim(tx).await.is_ok());
}

// ============================================================================
// Scenario 0xBB: executed transfer left in the store
// ============================================================================

#[tokio::test]
async fn test_executed_transfer_is_reconciled_away() {
    let t = Tracker::in_memory();
    let tx = scenario_hash(0xBB);
    t.child.add_receipt(nft_withdrawal_receipt(
        &t.fixture,
        tx,
        50,
        12,
        OWNER,
        U256::from(12u64),
        "ipfs://twelve",
    ));
    t.store.add(record(tx, 12)).await.unwrap();
    t.outbox.set_state(12, OutboxState::Executed);

    let report = t.reconciler.reconcile().await.unwrap();
    assert_eq!(report.executed, vec![tx]);
    assert!(t.store.list_all().await.unwrap().is_empty());

    // The empty store triggers a scan; the executed transfer is filtered out
    let pending = t.reconciler.pending_for(OWNER).await.unwrap();
    assert!(pending.is_empty());
    assert!(!t.store.contains(tx).await.unwrap());

    let report = t.reconciler.reconcile().await.unwrap();
    assert!(report.kept.is_empty());
    assert!(report.executed.is_empty());
}

#[tokio::test]
async fn test_reverted_transfer_is_stale() {
    let t = Tracker::in_memory();
    let tx = scenario_hash(0xBB);
    let mut receipt = eth_withdrawal_receipt(tx, 50, 12, OWNER, U256::from(1u64));
    receipt.status = false;
    t.child.add_receipt(receipt);
    t.store.add(record(tx, 12)).await.unwrap();

    let report = t.reconciler.reconcile().await.unwrap();
    assert_eq!(report.stale, vec![tx]);
    assert!(!t.store.contains(tx).await.unwrap());
}

// ============================================================================
// Scenario 0xCC: concurrent adds
// ============================================================================

async fn concurrent_adds(store: Arc<PendingTransferStore>) {
    let tx = scenario_hash(0xCC);
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.add(record(tx, 1)).await }));
    }
    let mut inserted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_adds_in_memory() {
    let t = Tracker::in_memory();
    concurrent_adds(t.store.clone()).await;
}

#[tokio::test]
async fn test_concurrent_adds_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(FileKvStore::open(dir.path()).await.unwrap());
    let t = Tracker::new(kv);
    concurrent_adds(t.store.clone()).await;

    // A second process view of the same directory sees one record
    let reopened = PendingTransferStore::new(Arc::new(FileKvStore::open(dir.path()).await.unwrap()));
    let records = reopened.list_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tx_hash, scenario_hash(0xCC));
}

#[tokio::test]
async fn test_concurrent_distinct_adds_lose_nothing() {
    let t = Tracker::in_memory();
    let mut tasks = Vec::new();
    for i in 0..20u8 {
        let store = t.store.clone();
        tasks.push(tokio::spawn(async move {
            store.add(record(scenario_hash(i), i as u64)).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }
    assert_eq!(t.store.list_all().await.unwrap().len(), 20);
}

// ============================================================================
// Live node
// ============================================================================

#[tokio::test]
#[ignore = "requires running parent and child nodes"]
async fn test_live_status_and_deadline() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => panic!("configuration not available: {:#}", e),
    };
    let tx: B256 = std::env::var("LIFECYCLE_TX_HASH")
        .expect("LIFECYCLE_TX_HASH not set")
        .parse()
        .expect("LIFECYCLE_TX_HASH must be a 32-byte hex hash");

    let app = App::build(&config).await.expect("wiring failed");
    let resolved = app.resolver.resolve(tx).await.expect("resolve failed");
    let deadline = app.deadlines.estimate(tx).await.expect("deadline failed");

    println!("status: {}", resolved.status);
    println!("position: {}", resolved.outgoing.position);
    println!("claim ready at: {}", deadline);
    assert!(deadline > resolved.outgoing.timestamp);
}
