// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use ferry_node::config::NodeConfig;
use ferry_node::retrieval::Retriever;
use ferry_node::server::build_router;
use ferry_node::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    init_telemetry();

    let cfg = match NodeConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Initializing ferry node (rpc: {:?}, blockstore: {:?})", cfg.rpc_url, cfg.blockstore_path);
    if cfg.rpc_url.is_none() {
        tracing::warn!("No chain RPC configured: only free retrievals will succeed");
    }

    let retriever = match Retriever::from_config(&cfg) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("Failed to start retriever: {}", e);
            std::process::exit(1);
        }
    };

    let app = build_router(retriever);
    let listener = match TcpListener::bind(cfg.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", cfg.bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Gateway listening on {}", cfg.bind_addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
