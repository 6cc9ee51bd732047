// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::exchange::ExchangeResponse;

/// What a request's owner hears about its transfer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Response(ExchangeResponse),
    BlockReceived { size: u64 },
    AllBlocksReceived,
    Disconnected(String),
}
