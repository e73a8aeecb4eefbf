//! Tracker configuration
//!
//! Loaded from the environment (and a `.env` file when present). Chain
//! endpoints and the address registry path are required; everything else has
//! a default.

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::deadline::{DEFAULT_BUFFER_MINUTES, DEFAULT_CHALLENGE_PERIOD};
use crate::metadata::DEFAULT_IPFS_GATEWAY;
use crate::orchestrator::DEPOSIT_FINALITY_TIMEOUT;
use crate::redact::Redacted;
use crate::types::{ChainEndpoint, ChainRole};

fn default_region() -> String {
    "default".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".rollup-bridge")
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_block_range() -> u64 {
    10_000
}

fn default_metadata_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone)]
pub struct Config {
    pub parent_rpc_url: String,
    pub parent_chain_id: u64,
    pub child_rpc_url: String,
    pub child_chain_id: u64,
    /// Signing key for submissions; read-only without it
    pub private_key: Option<Redacted<String>>,

    /// JSON file of `{chainId, contract, region, address}` entries
    pub address_registry_path: PathBuf,
    pub region: String,
    /// Directory holding the pending transfer store
    pub data_dir: PathBuf,

    pub confirmation_buffer_minutes: u64,
    /// Display only
    pub challenge_period_secs: u64,
    pub rpc_timeout_secs: u64,
    pub deposit_finality_timeout_secs: u64,
    pub poll_interval_ms: u64,

    pub scan_from_block: u64,
    pub max_block_range: u64,

    pub ipfs_gateway: String,
    pub metadata_timeout_secs: u64,

    /// Network the wallet is currently on; defaults to the parent chain
    pub active_chain_id: Option<u64>,
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} required", name))
}

fn parsed<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| eyre!("Invalid {}: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }
        Self::from_env()
    }

    /// Build from the process environment without reading `.env`
    pub fn from_env() -> Result<Self> {
        let private_key = env::var("PRIVATE_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|k| Redacted(k.trim().to_string()));

        let config = Self {
            parent_rpc_url: required("PARENT_RPC_URL")?,
            parent_chain_id: parsed("PARENT_CHAIN_ID")?
                .ok_or_else(|| eyre!("PARENT_CHAIN_ID required"))?,
            child_rpc_url: required("CHILD_RPC_URL")?,
            child_chain_id: parsed("CHILD_CHAIN_ID")?
                .ok_or_else(|| eyre!("CHILD_CHAIN_ID required"))?,
            private_key,

            address_registry_path: PathBuf::from(required("ADDRESS_REGISTRY_PATH")?),
            region: env::var("REGION").unwrap_or_else(|_| default_region()),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),

            confirmation_buffer_minutes: parsed("CONFIRMATION_BUFFER_MINUTES")?
                .unwrap_or(DEFAULT_BUFFER_MINUTES),
            challenge_period_secs: parsed("CHALLENGE_PERIOD_SECS")?
                .unwrap_or(DEFAULT_CHALLENGE_PERIOD.as_secs()),
            rpc_timeout_secs: parsed("RPC_TIMEOUT_SECS")?.unwrap_or_else(default_rpc_timeout_secs),
            deposit_finality_timeout_secs: parsed("DEPOSIT_FINALITY_TIMEOUT_SECS")?
                .unwrap_or(DEPOSIT_FINALITY_TIMEOUT.as_secs()),
            poll_interval_ms: parsed("POLL_INTERVAL_MS")?.unwrap_or_else(default_poll_interval_ms),

            scan_from_block: parsed("SCAN_FROM_BLOCK")?.unwrap_or_default(),
            max_block_range: parsed("MAX_BLOCK_RANGE")?.unwrap_or_else(default_max_block_range),

            ipfs_gateway: env::var("IPFS_GATEWAY")
                .unwrap_or_else(|_| DEFAULT_IPFS_GATEWAY.to_string()),
            metadata_timeout_secs: parsed("METADATA_TIMEOUT_SECS")?
                .unwrap_or_else(default_metadata_timeout_secs),

            active_chain_id: parsed("ACTIVE_CHAIN_ID")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_rpc_url(&self.parent_rpc_url, "PARENT_RPC_URL")?;
        validate_rpc_url(&self.child_rpc_url, "CHILD_RPC_URL")?;

        if self.parent_chain_id == self.child_chain_id {
            return Err(eyre!(
                "PARENT_CHAIN_ID and CHILD_CHAIN_ID must differ (both {})",
                self.parent_chain_id
            ));
        }

        if let Some(key) = &self.private_key {
            validate_private_key(key).wrap_err("PRIVATE_KEY")?;
        }

        if let Some(active) = self.active_chain_id {
            if active != self.parent_chain_id && active != self.child_chain_id {
                return Err(eyre!(
                    "ACTIVE_CHAIN_ID {} is neither the parent nor the child chain",
                    active
                ));
            }
        }

        if self.rpc_timeout_secs == 0 {
            return Err(eyre!("RPC_TIMEOUT_SECS must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }
        if self.max_block_range == 0 {
            return Err(eyre!("MAX_BLOCK_RANGE must be greater than 0"));
        }

        Ok(())
    }

    pub fn parent_endpoint(&self) -> ChainEndpoint {
        ChainEndpoint {
            chain_id: self.parent_chain_id,
            rpc_url: self.parent_rpc_url.clone(),
            role: ChainRole::Parent,
        }
    }

    pub fn child_endpoint(&self) -> ChainEndpoint {
        ChainEndpoint {
            chain_id: self.child_chain_id,
            rpc_url: self.child_rpc_url.clone(),
            role: ChainRole::Child,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deposit_finality_timeout(&self) -> Duration {
        Duration::from_secs(self.deposit_finality_timeout_secs)
    }

    pub fn challenge_period(&self) -> Duration {
        Duration::from_secs(self.challenge_period_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

/// Validate an RPC URL: must parse, use http(s) and have a host.
/// Plain http is accepted with a warning.
pub fn validate_rpc_url(url_str: &str, name: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url_str).map_err(|e| eyre!("{} must be a valid URL: {}", name, e))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(eyre!(
            "{} must use http:// or https:// scheme, got {}",
            name,
            scheme
        ));
    }

    if parsed.host_str().is_none() {
        return Err(eyre!("{} must have a host component", name));
    }

    if scheme == "http" {
        tracing::warn!("{} uses unencrypted http://", name);
    }

    Ok(())
}

fn validate_private_key(key: &Redacted<String>) -> Result<()> {
    let hex_part = key
        .expose()
        .strip_prefix("0x")
        .ok_or_else(|| eyre!("must be 0x-prefixed"))?;
    if hex_part.len() != 64 {
        return Err(eyre!("must be 32 bytes, got {} hex chars", hex_part.len()));
    }
    // Never echo the key in the error
    hex::decode(hex_part).map_err(|_| eyre!("must be hex"))?;
    Ok(())
}
