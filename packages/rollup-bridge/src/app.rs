//! Component wiring
//!
//! Builds every tracker component from a [`Config`]: connectors through the
//! registry, contract addresses from the address registry, the file-backed
//! pending store and the orchestrator on top.

use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::info;

use crate::addresses::{AddressRegistry, BridgeContracts};
use crate::config::Config;
use crate::connector::{ChainConnector, ConnectorFactory, ConnectorRegistry};
use crate::deadline::DeadlineEstimator;
use crate::evm::EvmConnector;
use crate::metadata::{HttpMetadataFetcher, MetadataFetcher};
use crate::orchestrator::{
    GasMargins, NodeInterfaceGasEstimator, OrchestratorConfig, TransferOrchestrator,
};
use crate::outbox::{OutboxStateSource, RollupOutbox};
use crate::poller::StatusPoller;
use crate::reconcile::Reconciler;
use crate::resolver::MessageStateResolver;
use crate::scanner::{EventLogScanner, NftBridgeAddresses, ScanConfig};
use crate::store::{FileKvStore, PendingTransferStore};

/// Fully wired tracker
pub struct App {
    pub registry: ConnectorRegistry,
    pub parent: Arc<dyn ChainConnector>,
    pub child: Arc<dyn ChainConnector>,
    pub contracts: BridgeContracts,
    pub resolver: Arc<MessageStateResolver>,
    pub deadlines: Arc<DeadlineEstimator>,
    pub store: Arc<PendingTransferStore>,
    pub scanner: Arc<EventLogScanner>,
    pub reconciler: Reconciler,
    pub poller: StatusPoller,
    pub orchestrator: TransferOrchestrator,
}

impl App {
    /// Wire against live RPC endpoints
    pub async fn build(config: &Config) -> Result<Self> {
        let factory = EvmConnector::factory(config.private_key.clone(), config.rpc_timeout());
        Self::build_with(config, factory).await
    }

    /// Wire with a custom connector factory
    pub async fn build_with(config: &Config, factory: ConnectorFactory) -> Result<Self> {
        let addresses = AddressRegistry::load(&config.address_registry_path).wrap_err_with(|| {
            format!(
                "loading address registry {}",
                config.address_registry_path.display()
            )
        })?;
        let contracts = BridgeContracts::from_registry(
            &addresses,
            config.parent_chain_id,
            config.child_chain_id,
            &config.region,
        )?;

        let registry = ConnectorRegistry::new(factory);
        let parent = registry.get_or_connect(&config.parent_endpoint()).await?;
        let child = registry.get_or_connect(&config.child_endpoint()).await?;

        let outbox: Arc<dyn OutboxStateSource> = Arc::new(RollupOutbox::new(
            parent.clone(),
            child.clone(),
            contracts.outbox,
            contracts.rollup,
        ));
        let resolver = Arc::new(MessageStateResolver::new(child.clone(), outbox.clone()));
        let deadlines = Arc::new(DeadlineEstimator::new(
            child.clone(),
            config.confirmation_buffer_minutes,
            config.challenge_period(),
        ));

        let kv = FileKvStore::open(&config.data_dir)
            .await
            .wrap_err_with(|| format!("opening data dir {}", config.data_dir.display()))?;
        let store = Arc::new(PendingTransferStore::new(Arc::new(kv)));

        let metadata: Arc<dyn MetadataFetcher> = Arc::new(HttpMetadataFetcher::new(
            config.ipfs_gateway.clone(),
            config.metadata_timeout(),
        )?);

        let scanner = Arc::new(EventLogScanner::new(
            child.clone(),
            outbox,
            metadata.clone(),
            NftBridgeAddresses {
                child_bridge: contracts.child_nft_bridge,
                parent_gateway: contracts.parent_nft_gateway,
            },
            ScanConfig {
                from_block: config.scan_from_block,
                max_block_range: config.max_block_range,
                ..ScanConfig::default()
            },
        ));
        let reconciler = Reconciler::new(resolver.clone(), store.clone(), scanner.clone());
        let poller = StatusPoller::new(resolver.clone(), deadlines.clone());

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
                poll_interval: config.poll_interval(),
                deposit_finality_timeout: config.deposit_finality_timeout(),
                ..OrchestratorConfig::default()
            },
        );
        if let Some(active) = config.active_chain_id {
            orchestrator.switch_network(active)?;
        }

        info!(
            parent_chain = config.parent_chain_id,
            child_chain = config.child_chain_id,
            region = %config.region,
            data_dir = %config.data_dir.display(),
            "Tracker wired"
        );

        Ok(Self {
            registry,
            parent,
            child,
            contracts,
            resolver,
            deadlines,
            store,
            scanner,
            reconciler,
            poller,
            orchestrator,
        })
    }
}
