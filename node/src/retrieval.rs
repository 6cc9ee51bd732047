// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retrieval orchestration.
//!
//! A `Retriever` is built once per process and shared by `Arc`. `resolve`
//! walks the local block store first and only goes to the network on a
//! miss. Concurrent calls for the same (root, selector) share one run.

use crate::blockstore::{Blockstore, FileBlockstore, MemoryBlockstore};
use crate::config::NodeConfig;
use crate::driver::{spawn_deal, DealOutcome};
use crate::errors::{Result, RetrievalError};
use crate::exchange::{Exchange, Extensions};
use crate::loader::AsyncLoader;
use crate::paych::PaychManager;
use crate::routing::{DealOffer, MemoryRouting, Routing};
use crate::rpc::{ChainRpc, HttpRpc};
use crate::signer::{Ed25519Signer, Signer};
use crate::transport::{TcpTransport, Transport};
use bytes::Bytes;
use ferry_kernel::config::TRANSFER_EXTENSION;
use ferry_kernel::deal::{
    Deal, DealEvent, DealParams, DealProposal, DealState, DealTerms, TransferMessage,
    TransferRequest,
};
use ferry_kernel::error::KernelError;
use ferry_kernel::selector::{
    all_selector, display_path, parse, path_selector, selector_cid, PathSegment, Selector,
    SelectorNode, Step, Traversal,
};
use ferry_kernel::types::block::encode_cbor;
use ferry_kernel::types::id::DealId;
use ferry_kernel::types::token::{parse_token, TokenAmount};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, StreamExt};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

type SharedResolve = Shared<BoxFuture<'static, Result<Arc<Resolved>>>>;

/// A node the selector chose to visit, with its path from the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Visited {
    pub path: Vec<PathSegment>,
    pub node: Ipld,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub root: Cid,
    pub visits: Vec<Visited>,
    /// Branches dropped because a child was missing.
    pub missing: Vec<String>,
    /// Present when the blocks came from a provider.
    pub deal: Option<DealOutcome>,
}

/// Bytes for one fetched path.
pub struct Fetched {
    /// Last path segment, used for extension-based content typing.
    pub name: String,
    pub body: BoxStream<'static, Result<Bytes>>,
}

pub struct Retriever {
    blockstore: Arc<dyn Blockstore>,
    routing: Arc<dyn Routing>,
    exchange: Arc<Exchange>,
    paych: Arc<PaychManager>,
    idle_timeout: Duration,
    max_price: Option<TokenAmount>,
    next_deal: AtomicU64,
    inflight: Mutex<FxHashMap<Vec<u8>, SharedResolve>>,
}

impl Retriever {
    pub fn new(
        config: &NodeConfig,
        blockstore: Arc<dyn Blockstore>,
        routing: Arc<dyn Routing>,
        transport: Arc<dyn Transport>,
        rpc: Option<Arc<dyn ChainRpc>>,
        signer: Option<Arc<dyn Signer>>,
    ) -> Result<Self> {
        let max_price = config
            .max_price_per_byte
            .as_deref()
            .map(parse_token)
            .transpose()
            .map_err(|e| RetrievalError::Config(format!("max_price_per_byte: {e}")))?;
        Ok(Self {
            blockstore,
            routing,
            exchange: Arc::new(Exchange::new(
                transport,
                config.max_frame_bytes,
                config.loader_capacity_bytes,
            )),
            paych: Arc::new(PaychManager::new(rpc, signer, config)),
            idle_timeout: config.idle_timeout(),
            max_price,
            next_deal: AtomicU64::new(1),
            inflight: Mutex::new(FxHashMap::default()),
        })
    }

    /// Wires up the production collaborators named by `config`.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let blockstore: Arc<dyn Blockstore> = match &config.blockstore_path {
            Some(path) => Arc::new(FileBlockstore::open(path)?),
            None => Arc::new(MemoryBlockstore::new()),
        };
        let rpc = config
            .rpc_url
            .as_ref()
            .map(|url| Arc::new(HttpRpc::new(url.clone(), config.rpc_token.clone())) as Arc<dyn ChainRpc>);
        let signer = match &config.wallet_key {
            Some(seed) => Some(Arc::new(Ed25519Signer::from_hex(seed)?) as Arc<dyn Signer>),
            None => None,
        };
        Self::new(
            config,
            blockstore,
            Arc::new(MemoryRouting::new()),
            Arc::new(TcpTransport),
            rpc,
            signer,
        )
    }

    pub fn routing(&self) -> &Arc<dyn Routing> {
        &self.routing
    }

    pub fn paych(&self) -> &Arc<PaychManager> {
        &self.paych
    }

    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Runs `selector` from `root`, joining an identical run already in
    /// flight.
    pub async fn resolve(self: &Arc<Self>, root: Cid, selector: SelectorNode) -> Result<Arc<Resolved>> {
        let mut key = root.to_bytes();
        key.extend(selector_cid(&selector)?.to_bytes());

        let run = {
            let mut inflight = lock(&self.inflight);
            inflight
                .entry(key.clone())
                .or_insert_with(|| {
                    let this = self.clone();
                    async move { this.run(root, selector).await.map(Arc::new) }
                        .boxed()
                        .shared()
                })
                .clone()
        };
        let result = run.clone().await;

        let mut inflight = lock(&self.inflight);
        if inflight.get(&key).is_some_and(|r| r.ptr_eq(&run)) {
            inflight.remove(&key);
        }
        result
    }

    /// Resolves `<root>/<path...>` and streams the bytes beneath it.
    pub async fn fetch(self: &Arc<Self>, path: &str) -> Result<Fetched> {
        let mut parts = path.trim_start_matches('/').splitn(2, '/');
        let root_str = parts.next().unwrap_or_default();
        let root = Cid::try_from(root_str)
            .map_err(|e| RetrievalError::BadPath(format!("{root_str}: {e}")))?;
        let segments = PathSegment::parse_path(parts.next().unwrap_or_default());

        let resolved = self
            .resolve(root, path_selector(&segments, all_selector()))
            .await?;
        let node = resolved
            .visits
            .iter()
            .find(|v| v.path == segments)
            .map(|v| v.node.clone())
            .ok_or_else(|| RetrievalError::BadPath(format!("{root}/{}", display_path(&segments))))?;

        let mut chunks: Vec<Bytes> = resolved
            .visits
            .iter()
            .filter(|v| v.path.starts_with(&segments))
            .filter_map(|v| match &v.node {
                Ipld::Bytes(b) => Some(Bytes::copy_from_slice(b)),
                _ => None,
            })
            .collect();
        if chunks.is_empty() {
            chunks.push(Bytes::from(encode_cbor(&node)?));
        }

        let name = segments
            .last()
            .map(|s| s.to_string())
            .unwrap_or_else(|| root.to_string());
        let body = async_stream::stream! {
            for chunk in chunks {
                yield Ok(chunk);
            }
        };
        Ok(Fetched {
            name,
            body: body.boxed(),
        })
    }

    async fn run(self: Arc<Self>, root: Cid, selector: SelectorNode) -> Result<Resolved> {
        let started = Instant::now();
        let compiled = parse(&selector)?;

        if let Some(resolved) = self.traverse(root, compiled.clone(), None).await? {
            tracing::debug!("Resolved {} from the local store", root);
            return Ok(resolved);
        }

        tracing::info!("{} not held locally, retrieving", root);
        let result = self.retrieve(root, selector, compiled).await;
        metrics::histogram!(
            "ferry_retrieval_duration_seconds",
            started.elapsed().as_secs_f64()
        );
        result
    }

    async fn retrieve(&self, root: Cid, selector: SelectorNode, compiled: Selector) -> Result<Resolved> {
        let offer = self.choose_offer(&root, &selector).await?;
        let deal_id = DealId(self.next_deal.fetch_add(1, Ordering::Relaxed));

        let proposal = DealProposal {
            id: deal_id,
            payload_cid: root,
            params: DealParams {
                selector: selector.clone(),
                price_per_byte: offer.min_price_per_byte.clone(),
                payment_interval: offer.max_payment_interval,
                payment_interval_increase: offer.max_payment_interval_increase,
                unseal_price: TokenAmount::default(),
            },
        };
        let mut extensions = Extensions::new();
        extensions.insert(
            TRANSFER_EXTENSION.to_string(),
            TransferMessage::Request(TransferRequest::proposal(&proposal)?).to_bytes()?,
        );

        let opened = self
            .exchange
            .open(&offer.peer, &offer.addresses, root, &selector, extensions)
            .await?;
        let Some(events) = opened.events else {
            tracing::debug!("Sharing in-flight request {} for {}", opened.id, root);
            let (_, paying) = watch::channel(false);
            return self.traverse_or_miss(root, compiled, &opened.loader, paying).await;
        };

        let mut deal = Deal::new(deal_id, root, terms_for(&offer));
        deal.apply(DealEvent::DealProposed)?;
        let mut handle = spawn_deal(
            deal,
            opened.id,
            self.exchange.clone(),
            self.paych.clone(),
            opened.loader.clone(),
            events,
        );

        let mut paying = handle.paying();
        let mut resolved = match self
            .traverse_or_miss(root, compiled, &opened.loader, paying.clone())
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                self.exchange.cancel(opened.id);
                handle.abort();
                return Err(e);
            }
        };
        opened.loader.close().await;

        let outcome = match self.idle_wait(handle.finish(), &mut paying).await {
            Ok(outcome) => outcome?,
            Err(e) => {
                handle.abort();
                self.exchange.cancel(opened.id);
                return Err(e);
            }
        };
        match outcome.state {
            DealState::Completed => {
                resolved.deal = Some(outcome);
                Ok(resolved)
            }
            DealState::Rejected => Err(RetrievalError::TransferRejected(
                outcome.context.failure.unwrap_or_default(),
            )),
            _ => Err(RetrievalError::DealFailed(
                outcome.context.failure.unwrap_or_default(),
            )),
        }
    }

    async fn choose_offer(&self, root: &Cid, selector: &SelectorNode) -> Result<DealOffer> {
        let mut offers = self.routing.find_providers(root, selector).await;
        while let Some(offer) = offers.next().await {
            match &self.max_price {
                Some(max) if &offer.min_price_per_byte > max => {
                    tracing::debug!(
                        "Skipping {}: {} per byte is over the limit",
                        offer.peer,
                        offer.min_price_per_byte
                    );
                }
                _ => return Ok(offer),
            }
        }
        Err(RetrievalError::RoutingExhausted(root.to_string()))
    }

    async fn traverse_or_miss(
        &self,
        root: Cid,
        selector: Selector,
        loader: &AsyncLoader,
        paying: watch::Receiver<bool>,
    ) -> Result<Resolved> {
        self.traverse(root, selector, Some((loader, paying)))
            .await?
            .ok_or_else(|| RetrievalError::NotFound(root.to_string()))
    }

    /// Awaits `fut` unless nothing happens for the idle timeout. The clock
    /// stands still while `paying` is set and restarts when it changes.
    async fn idle_wait<F: Future>(
        &self,
        fut: F,
        paying: &mut watch::Receiver<bool>,
    ) -> Result<F::Output> {
        tokio::pin!(fut);
        let mut open = true;
        let mut deadline = tokio::time::Instant::now() + self.idle_timeout;
        loop {
            let busy = open && *paying.borrow();
            tokio::select! {
                out = &mut fut => return Ok(out),
                changed = paying.changed(), if open => {
                    open = changed.is_ok();
                    deadline = tokio::time::Instant::now() + self.idle_timeout;
                }
                _ = tokio::time::sleep_until(deadline), if !busy => {
                    return Err(RetrievalError::IdleTimeout(self.idle_timeout.as_millis() as u64));
                }
            }
        }
    }

    /// Drives a traversal over the block store, falling back to the network
    /// loader for blocks not held locally. Without one, a local miss yields
    /// `None`.
    async fn traverse(
        &self,
        root: Cid,
        selector: Selector,
        mut network: Option<(&AsyncLoader, watch::Receiver<bool>)>,
    ) -> Result<Option<Resolved>> {
        let mut traversal = Traversal::from_link(root, selector);
        let mut visits = Vec::new();
        let mut missing = Vec::new();
        loop {
            let step = match traversal.step() {
                Ok(step) => step,
                Err(KernelError::NotFound(what)) => {
                    tracing::debug!("Dropping branch under {}: {}", root, what);
                    missing.push(what);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match step {
                Step::Visit { path, node } => visits.push(Visited { path, node }),
                Step::NeedBlock(cid) => {
                    let block = match self.blockstore.get(&cid).await? {
                        Some(block) => block,
                        None => {
                            let Some((loader, paying)) = network.as_mut() else {
                                return Ok(None);
                            };
                            let block = self.idle_wait(loader.load(&cid), paying).await??;
                            self.blockstore.put(&block).await?;
                            block
                        }
                    };
                    traversal.resume(&cid, block.decode()?)?;
                }
                Step::Done => break,
            }
        }
        Ok(Some(Resolved {
            root,
            visits,
            missing,
            deal: None,
        }))
    }
}

fn terms_for(offer: &DealOffer) -> DealTerms {
    DealTerms {
        price_per_byte: offer.min_price_per_byte.clone(),
        payment_interval: offer.max_payment_interval,
        payment_interval_increase: offer.max_payment_interval_increase,
        total_size: offer.size,
        payment_address: offer.payment_address.clone(),
        known_channel: offer.payment_channel.clone(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
