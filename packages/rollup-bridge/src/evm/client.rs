//! EVM RPC connector
//!
//! [`ChainConnector`] implementation over an alloy HTTP provider. Every request
//! is bounded by a per-request timeout; expiry maps to
//! [`BridgeError::RpcTimeout`] and provider errors are classified from their
//! message text.
//!
//! # Transaction Building
//!
//! Writes build a provider with `with_recommended_fillers()` and the wallet per
//! send, so nonce, gas limit and fee fields are populated by alloy.

use alloy::{
    eips::BlockNumberOrTag,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{BlockTransactionsKind, Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::connector::registry::ConnectorFactory;
use crate::connector::{Block, ChainConnector, Log, LogFilter, Receipt, TxRequest};
use crate::error::{BridgeError, Result};
use crate::redact::Redacted;
use crate::types::ChainEndpoint;

/// Alloy-backed connector for one chain
pub struct EvmConnector {
    provider: RootProvider<Http<Client>>,
    rpc_url: Url,
    chain_id: u64,
    signer: Option<PrivateKeySigner>,
    timeout: Duration,
}

impl EvmConnector {
    /// Create a connector. Without a private key the connector is read-only.
    pub fn new(
        endpoint: &ChainEndpoint,
        private_key: Option<&Redacted<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        let rpc_url: Url = endpoint
            .rpc_url
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        let signer = private_key
            .map(|key| {
                key.expose()
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| BridgeError::Config(format!("Invalid private key: {}", e)))
            })
            .transpose()?;

        info!(
            chain_id = endpoint.chain_id,
            role = %endpoint.role,
            signer = ?signer.as_ref().map(|s| s.address()),
            "Created EVM connector"
        );

        Ok(Self {
            provider,
            rpc_url,
            chain_id: endpoint.chain_id,
            signer,
            timeout,
        })
    }

    /// Registry factory producing connectors that share one signing key
    pub fn factory(private_key: Option<Redacted<String>>, timeout: Duration) -> ConnectorFactory {
        Arc::new(move |endpoint: &ChainEndpoint| {
            let connector = EvmConnector::new(endpoint, private_key.as_ref(), timeout)?;
            Ok(Arc::new(connector) as Arc<dyn ChainConnector>)
        })
    }

    async fn timed<T, E, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BridgeError::from_rpc(format!("{}: {}", op, e))),
            Err(_) => Err(BridgeError::RpcTimeout(format!(
                "{} on chain {} after {:?}",
                op, self.chain_id, self.timeout
            ))),
        }
    }

    fn to_alloy_request(request: &TxRequest) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .with_to(request.to)
            .with_input(request.data.clone())
            .with_value(request.value);
        if let Some(from) = request.from {
            tx = tx.with_from(from);
        }
        tx
    }
}

fn convert_log(log: &alloy::rpc::types::Log) -> Log {
    Log {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        tx_hash: log.transaction_hash,
        log_index: log.log_index,
    }
}

fn convert_block(block: alloy::rpc::types::Block) -> Block {
    let header = block.header;
    let mix_hash = Option::<B256>::from(header.mix_hash).unwrap_or_default();
    Block {
        number: header.number,
        hash: header.hash,
        timestamp: header.timestamp,
        mix_hash,
        extra_data: header.extra_data.clone(),
        base_fee_per_gas: header.base_fee_per_gas.map(u128::from),
    }
}

#[async_trait]
impl ChainConnector for EvmConnector {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    async fn block_number(&self) -> Result<u64> {
        self.timed("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        let receipt = self
            .timed(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await?;

        let Some(receipt) = receipt else {
            debug!(tx_hash = %tx_hash, chain_id = self.chain_id, "Receipt not found");
            return Ok(None);
        };

        Ok(Some(Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            status: receipt.status(),
            logs: receipt.inner.logs().iter().map(convert_log).collect(),
        }))
    }

    async fn get_block(&self, number: u64) -> Result<Block> {
        let block = self
            .timed(
                "eth_getBlockByNumber",
                self.provider.get_block_by_number(
                    BlockNumberOrTag::Number(number),
                    BlockTransactionsKind::Hashes,
                ),
            )
            .await?
            .ok_or_else(|| BridgeError::RpcError(format!("block {} not found", number)))?;
        Ok(convert_block(block))
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Block> {
        let block = self
            .timed(
                "eth_getBlockByHash",
                self.provider
                    .get_block_by_hash(hash, BlockTransactionsKind::Hashes),
            )
            .await?
            .ok_or_else(|| BridgeError::RpcError(format!("block {} not found", hash)))?;
        Ok(convert_block(block))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut alloy_filter = Filter::new();
        if let Some(address) = filter.address {
            alloy_filter = alloy_filter.address(address);
        }
        if let Some(topic0) = filter.topic0 {
            alloy_filter = alloy_filter.event_signature(topic0);
        }
        if let Some(topic1) = filter.topic1 {
            alloy_filter = alloy_filter.topic1(topic1);
        }
        if let Some(from) = filter.from_block {
            alloy_filter = alloy_filter.from_block(from);
        }
        if let Some(to) = filter.to_block {
            alloy_filter = alloy_filter.to_block(to);
        }

        let logs = self
            .timed("eth_getLogs", self.provider.get_logs(&alloy_filter))
            .await?;
        Ok(logs.iter().map(convert_log).collect())
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.timed("eth_getBalance", self.provider.get_balance(address).into_future())
            .await
    }

    async fn get_gas_price(&self) -> Result<u128> {
        self.timed("eth_gasPrice", self.provider.get_gas_price())
            .await
    }

    async fn call(&self, request: &TxRequest) -> Result<Bytes> {
        let tx = Self::to_alloy_request(request);
        self.timed("eth_call", self.provider.call(&tx).into_future())
            .await
    }

    async fn estimate_gas(&self, request: &TxRequest) -> Result<u64> {
        let tx = Self::to_alloy_request(request);
        self.timed("eth_estimateGas", self.provider.estimate_gas(&tx).into_future())
            .await
    }

    async fn send_transaction(&self, request: TxRequest) -> Result<B256> {
        let signer = self.signer.clone().ok_or_else(|| {
            BridgeError::RpcError(format!(
                "connector for chain {} has no signing key",
                self.chain_id
            ))
        })?;
        let from = signer.address();

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let request = request.with_from(from);
        let tx = Self::to_alloy_request(&request);
        let pending = self
            .timed("eth_sendTransaction", provider.send_transaction(tx))
            .await?;
        let tx_hash = *pending.tx_hash();

        info!(
            tx_hash = %tx_hash,
            chain_id = self.chain_id,
            to = %request.to,
            value = %request.value,
            "Transaction sent"
        );
        Ok(tx_hash)
    }
}
