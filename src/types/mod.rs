// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod id;
pub mod block;
pub mod dagpb;
pub mod token;
pub mod address;

pub use address::{Address, PeerId};
pub use block::{Block, Prefix};
pub use id::{DealId, RequestId};
pub use token::TokenAmount;
