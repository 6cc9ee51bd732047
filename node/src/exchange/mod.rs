// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod codec;
pub mod message;
pub mod protocol;

pub use codec::MessageCodec;
pub use message::{ExchangeMessage, ExchangeRequest, ExchangeResponse, Extensions, ResponseStatus};
pub use protocol::{Exchange, Opened};
