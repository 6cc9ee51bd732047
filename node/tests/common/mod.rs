// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ferry_kernel::config::TRANSFER_EXTENSION;
use ferry_kernel::deal::{
    DealPayment, DealResponse, DealStatus, MessageType, TransferMessage, TransferRequest,
    TransferResponse,
};
use ferry_kernel::selector::SelectorNode;
use ferry_kernel::types::address::{Address, PeerId};
use ferry_kernel::types::block::{encode_cbor, DAG_CBOR, RAW};
use ferry_kernel::types::id::DealId;
use ferry_kernel::types::token::TokenAmount;
use ferry_kernel::Block;
use ferry_node::blockstore::MemoryBlockstore;
use ferry_node::config::NodeConfig;
use ferry_node::errors::{ExchangeError, RpcError};
use ferry_node::exchange::{
    ExchangeMessage, ExchangeRequest, ExchangeResponse, Extensions, MessageCodec, ResponseStatus,
};
use ferry_node::retrieval::Retriever;
use ferry_node::routing::{DealOffer, MemoryRouting, Routing};
use ferry_node::rpc::ChainRpc;
use ferry_node::signer::{Ed25519Signer, Signer};
use ferry_node::transport::{BoxStream, Transport};
use futures::stream::BoxStream as OfferStream;
use futures::{SinkExt, StreamExt};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

pub const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
pub const PROVIDER_WALLET: &str = "f1provider";
pub const CREATED_CHANNEL: &str = "f2createdchannel";

pub fn config() -> NodeConfig {
    NodeConfig {
        msg_timeout_ms: 5,
        max_retries: 3,
        idle_timeout_ms: 5_000,
        ..NodeConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Transport

/// Hands out pre-made in-memory streams, one per connect.
#[derive(Default)]
pub struct DuplexTransport {
    streams: Mutex<Vec<DuplexStream>>,
    pub connects: AtomicUsize,
}

impl DuplexTransport {
    /// Queues a connection and returns the provider's end of it.
    pub fn add_provider(&self) -> ProviderConn {
        let (client, provider) = tokio::io::duplex(1 << 20);
        self.streams.lock().unwrap().push(client);
        ProviderConn {
            framed: Framed::new(provider, MessageCodec::new(4 << 20)),
        }
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn connect(&self, peer: &PeerId, _addresses: &[String]) -> Result<BoxStream, ExchangeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(ExchangeError::Unreachable(peer.to_string())),
        }
    }
}

pub struct ProviderConn {
    framed: Framed<DuplexStream, MessageCodec>,
}

impl ProviderConn {
    pub async fn recv(&mut self) -> ExchangeMessage {
        self.framed.next().await.unwrap().unwrap()
    }

    /// Next request, skipping nothing.
    pub async fn recv_request(&mut self) -> ExchangeRequest {
        let mut msg = self.recv().await;
        assert_eq!(msg.requests.len(), 1, "expected one request per message");
        msg.requests.remove(0)
    }

    pub async fn send(&mut self, responses: Vec<ExchangeResponse>, blocks: Vec<Block>) {
        self.framed
            .send(ExchangeMessage {
                responses,
                blocks,
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Deal messages

pub fn transfer_request(req: &ExchangeRequest) -> TransferRequest {
    let bytes = req.extensions.get(TRANSFER_EXTENSION).expect("no transfer extension");
    match TransferMessage::from_bytes(bytes).unwrap() {
        TransferMessage::Request(r) => r,
        other => panic!("expected a request, got {other:?}"),
    }
}

pub fn payment_of(req: &ExchangeRequest) -> DealPayment {
    assert!(req.update, "payment must arrive as an update");
    DealPayment::from_ipld(transfer_request(req).voucher.as_ref().unwrap()).unwrap()
}

pub fn response(
    req: &ExchangeRequest,
    status: ResponseStatus,
    deal: Option<(DealStatus, u64)>,
) -> ExchangeResponse {
    let mut extensions = Extensions::new();
    if let Some((deal_status, owed)) = deal {
        let id = DealId(transfer_request_id(req));
        let result = DealResponse {
            id,
            status: deal_status,
            payment_owed: TokenAmount::from(owed),
            message: String::new(),
        };
        let msg = TransferMessage::Response(TransferResponse::with_result(
            MessageType::VoucherResult,
            id.0,
            &result,
        ));
        extensions.insert(TRANSFER_EXTENSION.to_string(), msg.to_bytes().unwrap());
    }
    ExchangeResponse {
        id: req.id,
        status,
        extensions,
    }
}

fn transfer_request_id(req: &ExchangeRequest) -> u64 {
    match req.extensions.get(TRANSFER_EXTENSION) {
        Some(_) => transfer_request(req).transfer_id,
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Content

/// A dag-cbor root of exactly `root_len` bytes linking a raw leaf of
/// `leaf_len` bytes.
pub fn dag(root_len: usize, leaf_len: usize) -> (Block, Block) {
    let leaf = Block::new(RAW, vec![7u8; leaf_len]).unwrap();
    for pad in 0..root_len {
        let mut map = BTreeMap::new();
        map.insert("data".to_string(), Ipld::Link(*leaf.cid()));
        map.insert("pad".to_string(), Ipld::Bytes(vec![0u8; pad]));
        let bytes = encode_cbor(&Ipld::Map(map)).unwrap();
        if bytes.len() == root_len {
            return (Block::new(DAG_CBOR, bytes).unwrap(), leaf);
        }
    }
    panic!("no padding gives a {root_len} byte root");
}

pub fn offer(root: Cid, size: u64, price: u64) -> DealOffer {
    DealOffer {
        peer: PeerId::new("12D3KooWprovider"),
        addresses: vec!["/ip4/127.0.0.1/tcp/24001".into()],
        root,
        size,
        min_price_per_byte: TokenAmount::from(price),
        max_payment_interval: 87,
        max_payment_interval_increase: 0,
        payment_address: (price > 0).then(|| Address::new(PROVIDER_WALLET)),
        payment_channel: None,
    }
}

// ---------------------------------------------------------------------------
// Routing

/// Memory routing that counts lookups.
#[derive(Default)]
pub struct CountingRouting {
    inner: MemoryRouting,
    pub lookups: AtomicUsize,
}

#[async_trait]
impl Routing for CountingRouting {
    async fn find_providers(&self, root: &Cid, selector: &SelectorNode) -> OfferStream<'static, DealOffer> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_providers(root, selector).await
    }

    async fn provide(&self, root: &Cid, offer: DealOffer) {
        self.inner.provide(root, offer).await
    }
}

// ---------------------------------------------------------------------------
// Chain

/// Scripted chain node. Every pushed message confirms on the first poll.
#[derive(Default)]
pub struct MockRpc {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub actors: Mutex<HashMap<String, Value>>,
    pub pushed: Mutex<Vec<Value>>,
    pub exit_code: Mutex<i64>,
    pub confirm: Mutex<bool>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            confirm: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn add_block(&self, block: &Block) {
        self.objects
            .lock()
            .unwrap()
            .insert(block.cid().to_string(), block.data().to_vec());
    }

    pub fn add_actor(&self, channel: &str, balance: u64, from: &str, to: &str, lanes: &Cid) {
        self.actors.lock().unwrap().insert(
            channel.to_string(),
            json!({
                "Balance": balance.to_string(),
                "State": { "From": from, "To": to, "LaneStates": { "/": lanes.to_string() } },
            }),
        );
    }

    /// Methods of every pushed message, in order.
    pub fn pushed_methods(&self) -> Vec<u64> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .map(|m| m["Message"]["Method"].as_u64().unwrap())
            .collect()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "MpoolGetNonce" => Ok(json!(self.pushed.lock().unwrap().len())),
            "GasEstimateMessageGas" => Ok(params[0].clone()),
            "MpoolPush" => {
                let mut pushed = self.pushed.lock().unwrap();
                pushed.push(params[0].clone());
                Ok(json!({ "/": format!("bafymsg{}", pushed.len()) }))
            }
            "StateSearchMsg" => {
                if !*self.confirm.lock().unwrap() {
                    return Ok(Value::Null);
                }
                let ret = encode_cbor(&Ipld::List(vec![
                    Ipld::String("f0100".into()),
                    Ipld::String(CREATED_CHANNEL.into()),
                ]))
                .unwrap();
                Ok(json!({
                    "Receipt": { "ExitCode": *self.exit_code.lock().unwrap(), "Return": STANDARD.encode(ret) }
                }))
            }
            "StateReadState" => {
                let addr = params[0].as_str().unwrap_or_default();
                self.actors
                    .lock()
                    .unwrap()
                    .get(addr)
                    .cloned()
                    .ok_or_else(|| RpcError::Remote {
                        code: 1,
                        message: format!("actor {addr} not found"),
                    })
            }
            "ChainReadObj" => {
                let cid = params[0]["/"].as_str().unwrap_or_default();
                self.objects
                    .lock()
                    .unwrap()
                    .get(cid)
                    .map(|b| json!(STANDARD.encode(b)))
                    .ok_or_else(|| RpcError::Remote {
                        code: 1,
                        message: format!("object {cid} not found"),
                    })
            }
            other => Err(RpcError::Unsupported(other.to_string())),
        }
    }
}

pub fn signer() -> Arc<Ed25519Signer> {
    Arc::new(Ed25519Signer::from_hex(SEED).unwrap())
}

// ---------------------------------------------------------------------------
// Wiring

pub struct Harness {
    pub retriever: Arc<Retriever>,
    pub blockstore: Arc<MemoryBlockstore>,
    pub routing: Arc<CountingRouting>,
    pub transport: Arc<DuplexTransport>,
    pub rpc: Arc<MockRpc>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&config())
    }

    pub fn with_config(config: &NodeConfig) -> Self {
        let blockstore = Arc::new(MemoryBlockstore::new());
        let routing = Arc::new(CountingRouting::default());
        let transport = Arc::new(DuplexTransport::default());
        let rpc = Arc::new(MockRpc::new());
        let retriever = Retriever::new(
            config,
            blockstore.clone(),
            routing.clone(),
            transport.clone(),
            Some(rpc.clone() as Arc<dyn ChainRpc>),
            Some(signer() as Arc<dyn Signer>),
        )
        .unwrap();
        Self {
            retriever: Arc::new(retriever),
            blockstore,
            routing,
            transport,
            rpc,
        }
    }
}
