// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Client side of the block exchange.
//!
//! One connection per peer, shared by every request to that peer. A reader
//! task routes incoming responses and blocks to the requests they belong to;
//! a writer task drains an outbound queue.

use super::codec::MessageCodec;
use super::message::{ExchangeMessage, ExchangeRequest, ExchangeResponse, Extensions, ResponseStatus};
use crate::errors::{ExchangeError, RetrievalError};
use crate::events::TransferEvent;
use crate::loader::AsyncLoader;
use crate::transport::Transport;
use ferry_kernel::selector::{selector_cid, SelectorNode};
use ferry_kernel::types::address::PeerId;
use ferry_kernel::types::id::RequestId;
use futures::{SinkExt, StreamExt};
use ipld_core::cid::Cid;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

type Result<T> = std::result::Result<T, ExchangeError>;

struct RequestEntry {
    peer: PeerId,
    root: Cid,
    key: Vec<u8>,
    loader: Arc<AsyncLoader>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

#[derive(Default)]
struct Inner {
    peers: FxHashMap<PeerId, mpsc::UnboundedSender<ExchangeMessage>>,
    requests: FxHashMap<RequestId, RequestEntry>,
    /// (root, selector) to the request already fetching it.
    open: FxHashMap<Vec<u8>, RequestId>,
}

/// Handle to an open request.
pub struct Opened {
    pub id: RequestId,
    pub loader: Arc<AsyncLoader>,
    /// Present only for the caller that created the request; joiners of an
    /// identical in-flight request share its loader but not its events.
    pub events: Option<mpsc::UnboundedReceiver<TransferEvent>>,
}

pub struct Exchange {
    transport: Arc<dyn Transport>,
    max_frame: usize,
    loader_capacity: usize,
    next_id: AtomicI32,
    inner: Arc<Mutex<Inner>>,
}

impl Exchange {
    pub fn new(transport: Arc<dyn Transport>, max_frame: usize, loader_capacity: usize) -> Self {
        Self {
            transport,
            max_frame,
            loader_capacity,
            next_id: AtomicI32::new(0),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Opens a request for `root` under `selector`, or joins the one already
    /// in flight for the same pair.
    pub async fn open(
        &self,
        peer: &PeerId,
        addresses: &[String],
        root: Cid,
        selector: &SelectorNode,
        extensions: Extensions,
    ) -> Result<Opened> {
        let mut key = root.to_bytes();
        key.extend(selector_cid(selector)?.to_bytes());

        {
            let inner = lock(&self.inner);
            if let Some(entry) = inner.open.get(&key).and_then(|id| inner.requests.get(id).map(|e| (*id, e))) {
                let (id, entry) = entry;
                tracing::debug!("Joining in-flight request {} for {}", id, root);
                return Ok(Opened {
                    id,
                    loader: entry.loader.clone(),
                    events: None,
                });
            }
        }

        let sender = self.peer_sender(peer, addresses).await?;
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let loader = Arc::new(AsyncLoader::with_events(self.loader_capacity, tx.clone()));
        let request = ExchangeRequest::new(id, root, selector.to_bytes()?, extensions);

        {
            let mut inner = lock(&self.inner);
            inner.open.insert(key.clone(), id);
            inner.requests.insert(
                id,
                RequestEntry {
                    peer: peer.clone(),
                    root,
                    key,
                    loader: loader.clone(),
                    events: tx,
                },
            );
        }
        metrics::counter!("ferry_exchange_requests_total", 1);
        tracing::info!("Request {} to {} for {}", id, peer, root);

        sender
            .send(ExchangeMessage {
                requests: vec![request],
                ..Default::default()
            })
            .map_err(|_| ExchangeError::Disconnected(peer.to_string()))?;

        Ok(Opened {
            id,
            loader,
            events: Some(rx),
        })
    }

    /// Sends extension updates on an open request.
    pub fn update(&self, id: RequestId, extensions: Extensions) -> Result<()> {
        let (sender, root) = {
            let inner = lock(&self.inner);
            let entry = inner.requests.get(&id).ok_or(ExchangeError::UnknownRequest(id.0))?;
            let sender = inner
                .peers
                .get(&entry.peer)
                .cloned()
                .ok_or_else(|| ExchangeError::Disconnected(entry.peer.to_string()))?;
            (sender, entry.root)
        };
        sender
            .send(ExchangeMessage {
                requests: vec![ExchangeRequest::update(id, root, extensions)],
                ..Default::default()
            })
            .map_err(|_| ExchangeError::UnknownRequest(id.0))
    }

    /// Asks the peer to stop and forgets the request.
    pub fn cancel(&self, id: RequestId) {
        let mut inner = lock(&self.inner);
        let Some(entry) = inner.requests.remove(&id) else {
            return;
        };
        inner.open.remove(&entry.key);
        if let Some(sender) = inner.peers.get(&entry.peer) {
            let mut req = ExchangeRequest::new(id, entry.root, Vec::new(), Extensions::new());
            req.cancel = true;
            let _ = sender.send(ExchangeMessage {
                requests: vec![req],
                ..Default::default()
            });
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner).requests.len()
    }

    async fn peer_sender(
        &self,
        peer: &PeerId,
        addresses: &[String],
    ) -> Result<mpsc::UnboundedSender<ExchangeMessage>> {
        let live = lock(&self.inner).peers.get(peer).filter(|s| !s.is_closed()).cloned();
        if let Some(sender) = live {
            return Ok(sender);
        }

        let stream = self.transport.connect(peer, addresses).await?;
        let mut inner = lock(&self.inner);
        if let Some(sender) = inner.peers.get(peer) {
            if !sender.is_closed() {
                return Ok(sender.clone());
            }
        }

        let (read, write) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<ExchangeMessage>();
        inner.peers.insert(peer.clone(), tx.clone());
        drop(inner);

        let mut sink = FramedWrite::new(write, MessageCodec::new(self.max_frame));
        let writer_peer = peer.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("Write to {} failed: {}", writer_peer, e);
                    break;
                }
            }
        });

        let mut frames = FramedRead::new(read, MessageCodec::new(self.max_frame));
        let inner = self.inner.clone();
        let reader_peer = peer.clone();
        tokio::spawn(async move {
            let reason = loop {
                match frames.next().await {
                    Some(Ok(msg)) => handle_message(&inner, &reader_peer, msg).await,
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed".to_string(),
                }
            };
            tracing::warn!("Peer {} disconnected: {}", reader_peer, reason);
            disconnect(&inner, &reader_peer, reason).await;
        });

        Ok(tx)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Response events go out before blocks are pushed, so a deal hears about
/// acceptance ahead of the bytes it is paying for.
///
/// Blocks go to the requests the frame answers, or to every request open on
/// the peer when it answers none. With a single candidate the block is that
/// request's; with several it is pushed to the requests parked on it and
/// stashed with the rest, so no deal is credited for bytes it never loads.
async fn handle_message(inner: &Mutex<Inner>, peer: &PeerId, msg: ExchangeMessage) {
    let mut targets: Vec<Arc<AsyncLoader>> = Vec::new();
    let mut failures: Vec<(Arc<AsyncLoader>, RetrievalError)> = Vec::new();
    {
        let mut guard = lock(inner);
        for response in &msg.responses {
            let Some(entry) = guard.requests.get(&response.id).filter(|e| &e.peer == peer) else {
                tracing::debug!("Response for unknown request {} from {}", response.id, peer);
                continue;
            };
            let _ = entry.events.send(TransferEvent::Response(response.clone()));
            if !targets.iter().any(|t| Arc::ptr_eq(t, &entry.loader)) {
                targets.push(entry.loader.clone());
            }
            if response.status.is_failure() {
                failures.push((entry.loader.clone(), failure_error(entry, response)));
            }
            if response.status.is_terminal() {
                if let Some(entry) = guard.requests.remove(&response.id) {
                    guard.open.remove(&entry.key);
                }
            }
        }
        if msg.responses.is_empty() && !msg.blocks.is_empty() {
            targets.extend(
                guard
                    .requests
                    .values()
                    .filter(|e| &e.peer == peer)
                    .map(|e| e.loader.clone()),
            );
        }
    }

    for block in &msg.blocks {
        if let [only] = targets.as_slice() {
            if let Err(e) = only.push(block.clone()).await {
                tracing::warn!("Dropping transfer from {}: {}", peer, e);
                only.fail(e).await;
            }
            continue;
        }
        for loader in &targets {
            if let Err(e) = loader.stash(block.clone()).await {
                tracing::debug!("Not holding {} from {}: {}", block.cid(), peer, e);
            }
        }
    }
    for (loader, err) in failures {
        loader.fail(err).await;
    }
}

fn failure_error(entry: &RequestEntry, response: &ExchangeResponse) -> RetrievalError {
    match response.status {
        ResponseStatus::Rejected => {
            RetrievalError::TransferRejected(format!("{} refused request {}", entry.peer, response.id))
        }
        ResponseStatus::FailedContentNotFound => RetrievalError::NotFound(entry.root.to_string()),
        status => ExchangeError::Failed {
            id: response.id.0,
            status: status.code(),
        }
        .into(),
    }
}

async fn disconnect(inner: &Mutex<Inner>, peer: &PeerId, reason: String) {
    let dropped: Vec<RequestEntry> = {
        let mut guard = lock(inner);
        guard.peers.remove(peer);
        let ids: Vec<RequestId> = guard
            .requests
            .iter()
            .filter(|(_, e)| &e.peer == peer)
            .map(|(id, _)| *id)
            .collect();
        let mut dropped = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = guard.requests.remove(&id) {
                guard.open.remove(&entry.key);
                dropped.push(entry);
            }
        }
        dropped
    };
    for entry in dropped {
        let _ = entry.events.send(TransferEvent::Disconnected(reason.clone()));
        entry
            .loader
            .fail(ExchangeError::Disconnected(peer.to_string()).into())
            .await;
    }
}
