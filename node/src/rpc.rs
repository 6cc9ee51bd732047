// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chain JSON-RPC.

use crate::errors::RpcError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

type Result<T> = std::result::Result<T, RpcError>;

/// Opaque access to the chain node. Methods are named without the
/// `Filecoin.` namespace.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn send(&self, method: &str, params: Value) -> Result<Value>;

    /// Streams updates for a subscription method.
    async fn subscribe(&self, method: &str, _params: Value) -> Result<mpsc::Receiver<Value>> {
        Err(RpcError::Unsupported(method.to_string()))
    }
}

#[derive(Debug)]
pub struct HttpRpc {
    url: String,
    token: Option<String>,
    client: Client,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": format!("Filecoin.{method}"),
            "params": params,
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(RpcError::Http(format!("{} returned {}", method, resp.status())));
        }
        let reply: Value = resp.json().await?;
        parse_reply(reply)
    }
}

fn parse_reply(mut reply: Value) -> Result<Value> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(RpcError::Remote {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    match reply.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::Decode("reply has neither result nor error".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(json!({"result": {"a": 1}})).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_reply(json!({"error": {"code": 1, "message": "nope"}})),
            Err(RpcError::Remote {
                code: 1,
                message: "nope".into()
            })
        );
        assert!(matches!(parse_reply(json!({})), Err(RpcError::Decode(_))));
    }

    #[tokio::test]
    async fn test_subscribe_unsupported_over_http() {
        let rpc = HttpRpc::new("http://127.0.0.1:1/rpc/v0", None);
        assert_eq!(
            rpc.subscribe("ChainNotify", json!([])).await.err(),
            Some(RpcError::Unsupported("ChainNotify".into()))
        );
    }
}
