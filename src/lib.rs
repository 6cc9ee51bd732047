// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! ferry-kernel: the I/O-free core of the ferry retrieval client.
//!
//! Everything in this crate is deterministic and synchronous. Places where the
//! outside world has to supply data (a block, an AMT node) are modelled as
//! resumable cursors that yield a "need" and wait to be fed.

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod selector;
pub mod amt;
pub mod deal;
pub mod paych;

pub use error::{KernelError, Result};
pub use types::block::Block;

#[cfg(test)]
pub mod tests;
