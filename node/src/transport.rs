// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Dialing providers.

use crate::errors::ExchangeError;
use async_trait::async_trait;
use ferry_kernel::types::address::PeerId;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

/// Opens a byte stream to a peer. The stream carries exchange frames in both
/// directions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, peer: &PeerId, addresses: &[String]) -> Result<BoxStream, ExchangeError>;
}

#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, peer: &PeerId, addresses: &[String]) -> Result<BoxStream, ExchangeError> {
        for addr in addresses.iter().filter_map(|a| parse_addr(a)) {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!("Connected to {} at {}", peer, addr);
                    return Ok(Box::new(stream));
                }
                Err(e) => tracing::debug!("Dial {} at {} failed: {}", peer, addr, e),
            }
        }
        Err(ExchangeError::Unreachable(peer.to_string()))
    }
}

/// Accepts `host:port` and `/ip4/<host>/tcp/<port>` forms.
pub fn parse_addr(addr: &str) -> Option<SocketAddr> {
    if let Ok(sa) = addr.parse() {
        return Some(sa);
    }
    let parts: Vec<&str> = addr.split('/').collect();
    match parts.as_slice() {
        ["", "ip4" | "ip6", host, "tcp", port] => {
            let ip = host.parse().ok()?;
            let port = port.parse().ok()?;
            Some(SocketAddr::new(ip, port))
        }
        _ => None,
    }
}
