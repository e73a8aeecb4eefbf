//! Process-owned connector cache
//!
//! One connector per chain id, created on first use and kept for the process
//! lifetime. The factory is injected so tests can hand out mock connectors.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::ChainConnector;
use crate::error::{BridgeError, Result};
use crate::types::ChainEndpoint;

/// Builds a connector for an endpoint
pub type ConnectorFactory =
    Arc<dyn Fn(&ChainEndpoint) -> Result<Arc<dyn ChainConnector>> + Send + Sync>;

pub struct ConnectorRegistry {
    factory: ConnectorFactory,
    connectors: Mutex<HashMap<u64, (String, Arc<dyn ChainConnector>)>>,
}

impl ConnectorRegistry {
    pub fn new(factory: ConnectorFactory) -> Self {
        Self {
            factory,
            connectors: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached connector for the endpoint's chain, creating it on first use.
    ///
    /// The lock is held across creation so concurrent first use for the same
    /// chain id yields exactly one connector. Asking for a known chain id with
    /// a different RPC URL is a configuration error.
    pub async fn get_or_connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainConnector>> {
        let mut connectors = self.connectors.lock().await;

        if let Some((url, connector)) = connectors.get(&endpoint.chain_id) {
            if url != &endpoint.rpc_url {
                return Err(BridgeError::Config(format!(
                    "chain {} already connected via a different RPC URL",
                    endpoint.chain_id
                )));
            }
            return Ok(Arc::clone(connector));
        }

        let connector = (self.factory)(endpoint)?;
        info!(
            chain_id = endpoint.chain_id,
            role = %endpoint.role,
            "Connected chain"
        );
        connectors.insert(
            endpoint.chain_id,
            (endpoint.rpc_url.clone(), Arc::clone(&connector)),
        );
        Ok(connector)
    }

    /// Cached connector for a chain id, if one exists
    pub async fn get(&self, chain_id: u64) -> Option<Arc<dyn ChainConnector>> {
        self.connectors
            .lock()
            .await
            .get(&chain_id)
            .map(|(_, c)| Arc::clone(c))
    }

    pub async fn len(&self) -> usize {
        self.connectors.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached connector
    pub async fn reset(&self) {
        self.connectors.lock().await.clear();
    }
}
