// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use async_trait::async_trait;
use ferry_kernel::selector::SelectorNode;
use ferry_kernel::types::address::{Address, PeerId};
use ferry_kernel::types::token::TokenAmount;
use futures::stream::{self, BoxStream, StreamExt};
use ipld_core::cid::Cid;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

/// A provider's terms for serving one root.
#[derive(Debug, Clone, PartialEq)]
pub struct DealOffer {
    pub peer: PeerId,
    pub addresses: Vec<String>,
    pub root: Cid,
    pub size: u64,
    pub min_price_per_byte: TokenAmount,
    pub max_payment_interval: u64,
    pub max_payment_interval_increase: u64,
    pub payment_address: Option<Address>,
    pub payment_channel: Option<Address>,
}

/// Where to get content from. Each `find_providers` call is a fresh,
/// finite query.
#[async_trait]
pub trait Routing: Send + Sync {
    async fn find_providers(&self, root: &Cid, selector: &SelectorNode) -> BoxStream<'static, DealOffer>;

    async fn provide(&self, root: &Cid, offer: DealOffer);
}

#[derive(Default)]
pub struct MemoryRouting {
    offers: RwLock<FxHashMap<Cid, Vec<DealOffer>>>,
}

impl MemoryRouting {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Routing for MemoryRouting {
    async fn find_providers(&self, root: &Cid, _selector: &SelectorNode) -> BoxStream<'static, DealOffer> {
        let offers = self
            .offers
            .read()
            .map(|m| m.get(root).cloned().unwrap_or_default())
            .unwrap_or_default();
        stream::iter(offers).boxed()
    }

    async fn provide(&self, root: &Cid, offer: DealOffer) {
        if let Ok(mut m) = self.offers.write() {
            m.entry(*root).or_default().push(offer);
        }
    }
}
