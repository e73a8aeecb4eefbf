//! Token metadata fetching
//!
//! Resolves a token URI to a `{name, image, description}` document over HTTP.
//! `ipfs://` URIs (for the document and its image) are rewritten onto an HTTP
//! gateway.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connector::{ChainConnector, TxRequest};
use crate::error::{BridgeError, Result};
use crate::evm::contracts::ChildNftBridge;
use crate::types::TokenMetadata;

/// Default public IPFS gateway
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, token_uri: &str) -> Result<TokenMetadata>;
}

/// Map a token URI to a fetchable HTTP(S) URL
pub fn resolve_uri(uri: &str, gateway: &str) -> Result<String> {
    let uri = uri.trim();
    if let Some(path) = uri.strip_prefix("ipfs://") {
        let path = path.strip_prefix("ipfs/").unwrap_or(path);
        let gateway = gateway.trim_end_matches('/');
        return Ok(format!("{}/{}", gateway, path));
    }
    if uri.starts_with("https://") || uri.starts_with("http://") {
        return Ok(uri.to_string());
    }
    Err(BridgeError::Decode(format!("unsupported token URI {:?}", uri)))
}

pub struct HttpMetadataFetcher {
    client: Client,
    ipfs_gateway: String,
}

impl HttpMetadataFetcher {
    pub fn new(ipfs_gateway: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            ipfs_gateway: ipfs_gateway.into(),
        })
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, token_uri: &str) -> Result<TokenMetadata> {
        let url = resolve_uri(token_uri, &self.ipfs_gateway)?;
        debug!(url = %url, "Fetching token metadata");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                BridgeError::RpcTimeout(format!("metadata {}: {}", url, e))
            } else {
                BridgeError::RpcError(format!("metadata {}: {}", url, e))
            }
        })?;

        if !response.status().is_success() {
            return Err(BridgeError::RpcError(format!(
                "metadata {} returned {}",
                url,
                response.status()
            )));
        }

        let mut metadata: TokenMetadata = response
            .json()
            .await
            .map_err(|e| BridgeError::Decode(format!("metadata {}: {}", url, e)))?;

        if let Some(image) = metadata.image.as_deref() {
            if image.starts_with("ipfs://") {
                metadata.image = Some(resolve_uri(image, &self.ipfs_gateway)?);
            }
        }
        Ok(metadata)
    }
}

/// `tokenURI(token_id)` of an NFT contract
pub async fn token_uri(
    connector: &dyn ChainConnector,
    nft: Address,
    token_id: U256,
) -> Result<String> {
    let call = ChildNftBridge::tokenURICall { tokenId: token_id };
    let raw = connector
        .call(&TxRequest::new(nft, call.abi_encode()))
        .await?;
    Ok(ChildNftBridge::tokenURICall::abi_decode_returns(&raw, true)?._0)
}

/// Best-effort display metadata. Any failure yields empty metadata.
///
/// The URI comes from `uri_hint` when the caller already has it (e.g. from an
/// event), otherwise from `tokenURI`.
pub async fn token_metadata(
    connector: &dyn ChainConnector,
    nft: Address,
    fetcher: &dyn MetadataFetcher,
    token_id: U256,
    uri_hint: Option<&str>,
) -> TokenMetadata {
    let uri = match uri_hint {
        Some(uri) => uri.to_string(),
        None => match token_uri(connector, nft, token_id).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(token_id = %token_id, error = %e, "tokenURI lookup failed");
                return TokenMetadata::default();
            }
        },
    };

    match fetcher.fetch(&uri).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(token_id = %token_id, uri = %uri, error = %e, "Metadata fetch failed");
            TokenMetadata::default()
        }
    }
}
