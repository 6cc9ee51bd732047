// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ferry_kernel::error::KernelError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockstoreError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Checksum mismatch at offset {offset}: expected {expected:#x}, found {found:#x}")]
    ChecksumMismatch { offset: u64, expected: u64, found: u64 },
    #[error("Corrupt record at offset {0}")]
    Corrupt(u64),
}

impl From<std::io::Error> for BlockstoreError {
    fn from(e: std::io::Error) -> Self {
        BlockstoreError::Io(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoaderError {
    /// Unclaimed blocks would exceed the loader's byte budget.
    #[error("Loader buffer full ({capacity} bytes)")]
    BufferFull { capacity: usize },
    #[error("Loader closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Bad message: {0}")]
    Codec(String),
    #[error("Peer {0} disconnected")]
    Disconnected(String),
    #[error("No dialable address for peer {0}")]
    Unreachable(String),
    #[error("Request {id} failed with status {status}")]
    Failed { id: i32, status: u32 },
    #[error("Unknown request {0}")]
    UnknownRequest(i32),
}

impl From<std::io::Error> for ExchangeError {
    fn from(e: std::io::Error) -> Self {
        ExchangeError::Io(e.to_string())
    }
}

impl From<KernelError> for ExchangeError {
    fn from(e: KernelError) -> Self {
        ExchangeError::Codec(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("Bad RPC response: {0}")]
    Decode(String),
    #[error("Unsupported over this transport: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        RpcError::Http(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaychError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
    #[error("Message {cid} failed on chain with exit code {exit_code}")]
    MessageExecutionFailed { cid: String, exit_code: i64 },
    #[error("Message {cid} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { cid: String, attempts: u32 },
    #[error("No chain endpoint configured")]
    NoChain,
    #[error("Signing failed: {0}")]
    Signer(String),
    #[error("Bad chain state: {0}")]
    State(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Paych(#[from] PaychError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No usable offer for {0}")]
    RoutingExhausted(String),
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),
    #[error("Payment shortfall of {0}")]
    PaymentShortfall(String),
    #[error("No block within {0} ms")]
    IdleTimeout(u64),
    #[error("Deal failed: {0}")]
    DealFailed(String),
    #[error("Bad path: {0}")]
    BadPath(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

impl IntoResponse for RetrievalError {
    fn into_response(self) -> Response {
        let status = match &self {
            RetrievalError::BadPath(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
