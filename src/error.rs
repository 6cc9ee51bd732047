// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Selector tree does not follow the selector schema.
    #[error("Malformed selector: {0}")]
    MalformedSelector(String),

    #[error("Unsupported codec: 0x{0:x}")]
    UnsupportedCodec(u64),

    #[error("Unsupported hasher: 0x{0:x}")]
    UnsupportedHasher(u64),

    /// A path segment or block that the traversal needed is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("AMT error: {0}")]
    Amt(String),

    #[error("Invalid transition: {event} in state {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;
