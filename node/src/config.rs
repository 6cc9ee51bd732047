// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::errors::{Result, RetrievalError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity CID of the payment channel actor code, used in creation messages.
pub const DEFAULT_PAYCH_ACTOR_CODE: &str = "bafkqafdgnfwc6mjpobqxs3lfnz2gg2dbnzxgk3a";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub rpc_url: Option<String>,
    pub rpc_token: Option<String>,
    pub blockstore_path: Option<PathBuf>,
    pub msg_timeout_ms: u64,
    pub max_retries: u32,
    pub idle_timeout_ms: u64,
    pub loader_capacity_bytes: usize,
    pub max_frame_bytes: usize,
    /// Decimal token amount; offers priced above it are skipped.
    pub max_price_per_byte: Option<String>,
    pub paych_actor_code: String,
    /// Hex ed25519 seed for the built-in signer.
    pub wallet_key: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4040)),
            rpc_url: None,
            rpc_token: None,
            blockstore_path: None,
            msg_timeout_ms: 5000,
            max_retries: 10,
            idle_timeout_ms: 30_000,
            loader_capacity_bytes: 64 << 20,
            max_frame_bytes: 4 << 20,
            max_price_per_byte: None,
            paych_actor_code: DEFAULT_PAYCH_ACTOR_CODE.to_string(),
            wallet_key: None,
        }
    }
}

impl NodeConfig {
    /// Defaults, then the JSON file named by `FERRY_CONFIG`, then `FERRY_*`
    /// variables.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("FERRY_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FERRY_BIND_ADDR") {
            self.bind_addr = parse_var("FERRY_BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("FERRY_RPC_URL") {
            self.rpc_url = Some(v);
        }
        if let Some(v) = lookup("FERRY_RPC_TOKEN") {
            self.rpc_token = Some(v);
        }
        if let Some(v) = lookup("FERRY_BLOCKSTORE") {
            self.blockstore_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FERRY_MSG_TIMEOUT_MS") {
            self.msg_timeout_ms = parse_var("FERRY_MSG_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FERRY_MAX_RETRIES") {
            self.max_retries = parse_var("FERRY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("FERRY_IDLE_TIMEOUT_MS") {
            self.idle_timeout_ms = parse_var("FERRY_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FERRY_WALLET_KEY") {
            self.wallet_key = Some(v);
        }
        Ok(())
    }

    pub fn msg_timeout(&self) -> Duration {
        Duration::from_millis(self.msg_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RetrievalError::Config(format!("{key}={value}: {e}")))
}
