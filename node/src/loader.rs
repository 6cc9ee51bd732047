// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Bridges pull-based traversal and push-based block arrival.
//!
//! One loader serves one request. `load` either claims an already-arrived
//! block or parks until `push` delivers it. Every waiter registered for a
//! CID receives the same block.
//!
//! A block that may belong to another request on the same connection is
//! `stash`ed instead: it is only reported to the deal once a load claims it.

use crate::errors::{LoaderError, Result, RetrievalError};
use crate::events::TransferEvent;
use ferry_kernel::Block;
use ipld_core::cid::Cid;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, Mutex};

type Waiter = oneshot::Sender<Result<Block>>;

struct Buffered {
    block: Block,
    reported: bool,
}

#[derive(Default)]
struct State {
    waiters: FxHashMap<Cid, Vec<Waiter>>,
    buffer: FxHashMap<Cid, Buffered>,
    buffered_bytes: usize,
    failed: Option<RetrievalError>,
    closed: bool,
}

pub struct AsyncLoader {
    state: Mutex<State>,
    capacity: usize,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl AsyncLoader {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity,
            events: None,
        }
    }

    /// A loader that reports arrivals and closure to the owning deal.
    pub fn with_events(capacity: usize, events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(capacity)
        }
    }

    pub async fn load(&self, cid: &Cid) -> Result<Block> {
        let rx = {
            let mut state = self.state.lock().await;
            if let Some(Buffered { block, reported }) = state.buffer.remove(cid) {
                state.buffered_bytes -= block.len();
                drop(state);
                if !reported {
                    self.received(&block);
                }
                return Ok(block);
            }
            if let Some(err) = &state.failed {
                return Err(err.clone());
            }
            if state.closed {
                return Err(LoaderError::Closed.into());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(*cid).or_default().push(tx);
            rx
        };
        rx.await.map_err(|_| RetrievalError::from(LoaderError::Closed))?
    }

    /// Delivers a block that belongs to this request.
    pub async fn push(&self, block: Block) -> Result<()> {
        self.received(&block);
        self.deliver(block, true).await
    }

    /// Holds a block this request may or may not need. It reaches the deal
    /// only if a waiter is parked on it now or a later load claims it.
    pub async fn stash(&self, block: Block) -> Result<()> {
        if self.wants(block.cid()).await {
            return self.push(block).await;
        }
        self.deliver(block, false).await
    }

    /// Whether a load is parked on `cid`.
    pub async fn wants(&self, cid: &Cid) -> bool {
        self.state.lock().await.waiters.contains_key(cid)
    }

    async fn deliver(&self, block: Block, reported: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(waiters) = state.waiters.remove(block.cid()) {
            for waiter in waiters {
                let _ = waiter.send(Ok(block.clone()));
            }
            return Ok(());
        }
        if state.buffer.contains_key(block.cid()) {
            return Ok(());
        }
        if state.buffered_bytes + block.len() > self.capacity {
            return Err(LoaderError::BufferFull {
                capacity: self.capacity,
            }
            .into());
        }
        state.buffered_bytes += block.len();
        state.buffer.insert(*block.cid(), Buffered { block, reported });
        Ok(())
    }

    /// Fails every parked and future load with `err`.
    pub async fn fail(&self, err: RetrievalError) {
        let mut state = self.state.lock().await;
        for (_, waiters) in state.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        state.failed.get_or_insert(err);
    }

    /// Marks the traversal finished and tells the deal all blocks are in.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.waiters.clear();
        drop(state);
        self.notify(TransferEvent::AllBlocksReceived);
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.state.lock().await.buffered_bytes
    }

    fn received(&self, block: &Block) {
        self.notify(TransferEvent::BlockReceived {
            size: block.len() as u64,
        });
        metrics::counter!("ferry_blocks_received_total", 1);
        metrics::counter!("ferry_bytes_received_total", block.len() as u64);
    }

    fn notify(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_kernel::types::block::RAW;
    use std::sync::Arc;

    fn block(data: &[u8]) -> Block {
        Block::new(RAW, data.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_buffered_block_is_claimed_once() {
        let loader = AsyncLoader::new(1024);
        let b = block(b"early");
        loader.push(b.clone()).await.unwrap();
        assert_eq!(loader.buffered_bytes().await, 5);
        assert_eq!(loader.load(b.cid()).await.unwrap(), b);
        assert_eq!(loader.buffered_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_block() {
        let loader = Arc::new(AsyncLoader::new(1024));
        let b = block(b"late");
        let cid = *b.cid();

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(&cid).await }
        });
        let second = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(&cid).await }
        });
        tokio::task::yield_now().await;
        while loader.state.lock().await.waiters.get(&cid).map_or(0, Vec::len) < 2 {
            tokio::task::yield_now().await;
        }

        loader.push(b.clone()).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), b);
        assert_eq!(second.await.unwrap().unwrap(), b);
        assert_eq!(loader.buffered_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let loader = AsyncLoader::new(8);
        loader.push(block(b"12345")).await.unwrap();
        let err = loader.push(block(b"67890")).await.unwrap_err();
        assert_eq!(err, RetrievalError::Loader(LoaderError::BufferFull { capacity: 8 }));
    }

    #[tokio::test]
    async fn test_fail_wakes_waiters() {
        let loader = Arc::new(AsyncLoader::new(64));
        let cid = *block(b"never").cid();
        let waiting = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(&cid).await }
        });
        while loader.state.lock().await.waiters.is_empty() {
            tokio::task::yield_now().await;
        }
        loader.fail(RetrievalError::NotFound("gone".into())).await;
        assert_eq!(waiting.await.unwrap().unwrap_err(), RetrievalError::NotFound("gone".into()));
        assert!(loader.load(&cid).await.is_err());
    }

    #[tokio::test]
    async fn test_events_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader = AsyncLoader::with_events(64, tx);
        loader.push(block(b"abc")).await.unwrap();
        loader.close().await;
        loader.close().await;
        assert_eq!(rx.recv().await, Some(TransferEvent::BlockReceived { size: 3 }));
        assert_eq!(rx.recv().await, Some(TransferEvent::AllBlocksReceived));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stashed_block_reported_when_claimed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader = AsyncLoader::with_events(64, tx);
        let wanted = block(b"mine");
        loader.stash(wanted.clone()).await.unwrap();
        loader.stash(block(b"someone else's")).await.unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(loader.load(wanted.cid()).await.unwrap(), wanted);
        assert_eq!(rx.recv().await, Some(TransferEvent::BlockReceived { size: 4 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stash_to_parked_waiter_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader = Arc::new(AsyncLoader::with_events(64, tx));
        let b = block(b"late");
        let cid = *b.cid();
        let waiting = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(&cid).await }
        });
        while !loader.wants(&cid).await {
            tokio::task::yield_now().await;
        }
        loader.stash(b.clone()).await.unwrap();
        assert_eq!(waiting.await.unwrap().unwrap(), b);
        assert_eq!(rx.recv().await, Some(TransferEvent::BlockReceived { size: 4 }));
    }
}
