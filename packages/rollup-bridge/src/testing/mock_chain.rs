//! In-memory chain
//!
//! Implements [`ChainConnector`] over hand-fed receipts, blocks and logs.
//! Sent transactions are mined immediately into a new block unless
//! auto-mining is switched off.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::connector::{Block, ChainConnector, Log, LogFilter, Receipt, TxRequest};
use crate::error::{BridgeError, Result};

/// Timestamp of block 0 on a fresh mock chain
pub const MOCK_GENESIS_TIMESTAMP: u64 = 1_700_000_000;
/// Seconds between auto-mined blocks
pub const MOCK_BLOCK_TIME: u64 = 12;

const DEFAULT_GAS_ESTIMATE: u64 = 100_000;
const DEFAULT_GAS_PRICE: u128 = 100_000_000;

#[derive(Default)]
struct MockState {
    head: u64,
    receipts: HashMap<B256, Receipt>,
    blocks: BTreeMap<u64, Block>,
    logs: Vec<Log>,
    balances: HashMap<Address, U256>,
    gas_price: Option<u128>,
    call_responses: HashMap<(Address, [u8; 4]), Bytes>,
    gas_estimates: HashMap<(Address, [u8; 4]), u64>,
    sent: Vec<TxRequest>,
    send_errors: VecDeque<BridgeError>,
    read_errors: VecDeque<BridgeError>,
    read_latency: Option<Duration>,
    next_receipt_logs: VecDeque<Vec<Log>>,
    manual_mining: bool,
    nonce: u64,
    get_logs_calls: usize,
    receipt_calls: usize,
}

pub struct MockChain {
    chain_id: u64,
    signer: Option<Address>,
    state: Mutex<MockState>,
}

fn selector(data: &[u8]) -> [u8; 4] {
    let mut sel = [0u8; 4];
    if data.len() >= 4 {
        sel.copy_from_slice(&data[..4]);
    }
    sel
}

impl MockChain {
    /// Read-only chain with no signer
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            signer: None,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Chain whose connector signs as `signer`
    pub fn with_signer(chain_id: u64, signer: Address) -> Self {
        Self {
            signer: Some(signer),
            ..Self::new(chain_id)
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn before_read(&self) -> Result<()> {
        let latency = self.state().read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.state().read_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Insert a block; advances the head if needed
    pub fn add_block(&self, block: Block) {
        let mut state = self.state();
        state.head = state.head.max(block.number);
        state.blocks.insert(block.number, block);
    }

    /// Plain block at `number` with the mock's default timestamp spacing
    pub fn block_at(number: u64) -> Block {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&number.to_be_bytes());
        hash[31] = 0xb1;
        Block {
            number,
            hash: B256::from(hash),
            timestamp: MOCK_GENESIS_TIMESTAMP + number * MOCK_BLOCK_TIME,
            mix_hash: B256::ZERO,
            extra_data: Bytes::new(),
            base_fee_per_gas: Some(DEFAULT_GAS_PRICE),
        }
    }

    /// Insert a receipt, its block (if missing) and its logs
    pub fn add_receipt(&self, mut receipt: Receipt) {
        for (i, log) in receipt.logs.iter_mut().enumerate() {
            log.tx_hash = Some(receipt.tx_hash);
            log.block_number = Some(receipt.block_number);
            log.log_index.get_or_insert(i as u64);
        }
        let mut state = self.state();
        if !state.blocks.contains_key(&receipt.block_number) {
            state
                .blocks
                .insert(receipt.block_number, Self::block_at(receipt.block_number));
        }
        state.head = state.head.max(receipt.block_number);
        state.logs.extend(receipt.logs.iter().cloned());
        state.receipts.insert(receipt.tx_hash, receipt);
    }

    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn set_gas_price(&self, price: u128) {
        self.state().gas_price = Some(price);
    }

    /// Fixed `eth_call` response for calls to `to` with this selector
    pub fn set_call_response(&self, to: Address, selector: [u8; 4], response: impl Into<Bytes>) {
        self.state()
            .call_responses
            .insert((to, selector), response.into());
    }

    pub fn set_gas_estimate(&self, to: Address, selector: [u8; 4], gas: u64) {
        self.state().gas_estimates.insert((to, selector), gas);
    }

    /// Logs for the receipt of the next sent transaction
    pub fn queue_receipt_logs(&self, logs: Vec<Log>) {
        self.state().next_receipt_logs.push_back(logs);
    }

    /// Fail the next `send_transaction` with `error`
    pub fn fail_next_send(&self, error: BridgeError) {
        self.state().send_errors.push_back(error);
    }

    /// Fail the next read (receipt, block, logs, call) with `error`
    pub fn fail_next_read(&self, error: BridgeError) {
        self.state().read_errors.push_back(error);
    }

    /// Delay every read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        self.state().read_latency = Some(latency);
    }

    /// Stop mining sent transactions; they stay without a receipt
    pub fn set_manual_mining(&self, manual: bool) {
        self.state().manual_mining = manual;
    }

    /// Advance the head by `count` empty blocks
    pub fn mine(&self, count: u64) {
        let mut state = self.state();
        for _ in 0..count {
            state.head += 1;
            let number = state.head;
            state.blocks.insert(number, Self::block_at(number));
        }
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.state().sent.clone()
    }

    pub fn get_logs_calls(&self) -> usize {
        self.state().get_logs_calls
    }

    pub fn receipt_calls(&self) -> usize {
        self.state().receipt_calls
    }
}

#[async_trait]
impl ChainConnector for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    async fn block_number(&self) -> Result<u64> {
        self.before_read().await?;
        Ok(self.state().head)
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        self.before_read().await?;
        let mut state = self.state();
        state.receipt_calls += 1;
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn get_block(&self, number: u64) -> Result<Block> {
        self.before_read().await?;
        self.state()
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| BridgeError::RpcError(format!("block {} not found", number)))
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Block> {
        self.before_read().await?;
        self.state()
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| BridgeError::RpcError(format!("block {} not found", hash)))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        self.before_read().await?;
        let mut state = self.state();
        state.get_logs_calls += 1;
        Ok(state
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.before_read().await?;
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_gas_price(&self) -> Result<u128> {
        self.before_read().await?;
        Ok(self.state().gas_price.unwrap_or(DEFAULT_GAS_PRICE))
    }

    async fn call(&self, request: &TxRequest) -> Result<Bytes> {
        self.before_read().await?;
        self.state()
            .call_responses
            .get(&(request.to, selector(&request.data)))
            .cloned()
            .ok_or_else(|| BridgeError::RpcError("execution reverted".into()))
    }

    async fn estimate_gas(&self, request: &TxRequest) -> Result<u64> {
        self.before_read().await?;
        Ok(self
            .state()
            .gas_estimates
            .get(&(request.to, selector(&request.data)))
            .copied()
            .unwrap_or(DEFAULT_GAS_ESTIMATE))
    }

    async fn send_transaction(&self, request: TxRequest) -> Result<B256> {
        let from = self.signer.ok_or_else(|| {
            BridgeError::RpcError(format!(
                "connector for chain {} has no signing key",
                self.chain_id
            ))
        })?;

        let mut state = self.state();
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }

        state.nonce += 1;
        let mut seed = self.chain_id.to_be_bytes().to_vec();
        seed.extend_from_slice(&state.nonce.to_be_bytes());
        let tx_hash = keccak256(&seed);
        state.sent.push(request.with_from(from));

        if !state.manual_mining {
            state.head += 1;
            let number = state.head;
            state.blocks.insert(number, Self::block_at(number));
            let mut logs = state.next_receipt_logs.pop_front().unwrap_or_default();
            for (i, log) in logs.iter_mut().enumerate() {
                log.tx_hash = Some(tx_hash);
                log.block_number = Some(number);
                log.log_index = Some(i as u64);
            }
            state.logs.extend(logs.iter().cloned());
            state.receipts.insert(
                tx_hash,
                Receipt {
                    tx_hash,
                    block_number: number,
                    status: true,
                    logs,
                },
            );
        }

        Ok(tx_hash)
    }
}
