// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod blockstore;
pub mod config;
pub mod driver;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod loader;
pub mod paych;
pub mod retrieval;
pub mod routing;
pub mod rpc;
pub mod server;
pub mod signer;
pub mod telemetry;
pub mod transport;
