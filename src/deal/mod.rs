// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retrieval deals: the client state machine and its wire messages.

pub mod message;
pub mod state;
pub mod status;

pub use message::{
    events_for_response, DealParams, DealPayment, DealProposal, DealResponse, MessageType,
    TransferMessage, TransferRequest, TransferResponse,
};
pub use state::{next_interval, Deal, DealContext, DealEvent, DealState, DealTerms, Effect, PaychInfo};
pub use status::DealStatus;
