// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use ferry_kernel::types::address::{Address, PeerId};
use ferry_kernel::types::token::parse_token;
use ferry_node::config::NodeConfig;
use ferry_node::retrieval::Retriever;
use ferry_node::routing::DealOffer;
use futures::StreamExt;
use ipld_core::cid::Cid;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Payment interval used for offers seeded from the command line.
const DEFAULT_PAYMENT_INTERVAL: u64 = 1 << 20;

/// A provider named on the command line instead of found through routing.
#[derive(Debug, Clone)]
pub struct ProviderArgs {
    pub addr: String,
    pub peer: String,
    pub price: String,
    pub size: u64,
    pub payment_address: Option<String>,
}

/// Drops an optional `/ipfs/` prefix, leaving `<root>/<path...>`.
pub fn normalize(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    trimmed.strip_prefix("ipfs/").unwrap_or(trimmed)
}

pub fn offer_for(root: Cid, provider: &ProviderArgs) -> anyhow::Result<DealOffer> {
    Ok(DealOffer {
        peer: PeerId::new(provider.peer.clone()),
        addresses: vec![provider.addr.clone()],
        root,
        size: provider.size,
        min_price_per_byte: parse_token(&provider.price)?,
        max_payment_interval: DEFAULT_PAYMENT_INTERVAL,
        max_payment_interval_increase: DEFAULT_PAYMENT_INTERVAL,
        payment_address: provider.payment_address.as_deref().map(Address::new),
        payment_channel: None,
    })
}

pub async fn run(path: &str, out: Option<PathBuf>, provider: Option<ProviderArgs>) -> anyhow::Result<()> {
    let config = NodeConfig::load()?;
    let retriever = Arc::new(Retriever::from_config(&config)?);
    let path = normalize(path);

    if let Some(provider) = provider {
        let root_str = path.split('/').next().unwrap_or_default();
        let root = Cid::try_from(root_str).with_context(|| format!("bad root {root_str:?}"))?;
        let offer = offer_for(root, &provider)?;
        retriever.routing().provide(&root, offer).await;
    }

    let mut fetched = retriever.fetch(path).await?;
    let mut written = 0u64;
    match &out {
        Some(file) => {
            let mut sink = tokio::fs::File::create(file)
                .await
                .with_context(|| format!("creating {}", file.display()))?;
            while let Some(chunk) = fetched.body.next().await {
                let chunk = chunk?;
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            sink.flush().await?;
            eprintln!("Wrote {} bytes of {} to {}", written, fetched.name, file.display());
        }
        None => {
            let mut sink = tokio::io::stdout();
            while let Some(chunk) = fetched.body.next().await {
                let chunk = chunk?;
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            sink.flush().await?;
        }
    }
    tracing::info!("Fetched {} ({} bytes)", path, written);
    Ok(())
}
