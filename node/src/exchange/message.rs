// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Block-exchange messages and their dag-cbor form.

use crate::errors::ExchangeError;
use ferry_kernel::codec::{as_bool, as_bytes, as_cid, as_i64, as_list, field, int, opt_field, MapBuilder};
use ferry_kernel::types::block::{decode_cbor, encode_cbor, Prefix};
use ferry_kernel::types::id::RequestId;
use ferry_kernel::Block;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, ExchangeError>;

pub type Extensions = BTreeMap<String, Vec<u8>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Acknowledged = 10,
    Partial = 14,
    Paused = 15,
    CompletedFull = 20,
    CompletedPartial = 21,
    Rejected = 30,
    FailedBusy = 31,
    FailedUnknown = 32,
    FailedLegal = 33,
    FailedContentNotFound = 34,
    Cancelled = 35,
}

impl ResponseStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: i64) -> Result<Self> {
        use ResponseStatus::*;
        Ok(match code {
            10 => Acknowledged,
            14 => Partial,
            15 => Paused,
            20 => CompletedFull,
            21 => CompletedPartial,
            30 => Rejected,
            31 => FailedBusy,
            32 => FailedUnknown,
            33 => FailedLegal,
            34 => FailedContentNotFound,
            35 => Cancelled,
            other => return Err(ExchangeError::Codec(format!("unknown response status {other}"))),
        })
    }

    /// No further responses or blocks will follow for the request.
    pub fn is_terminal(self) -> bool {
        self.code() >= 20
    }

    pub fn is_failure(self) -> bool {
        self.code() >= 30
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeRequest {
    pub id: RequestId,
    pub root: Cid,
    pub selector: Vec<u8>,
    pub extensions: Extensions,
    pub priority: i32,
    pub cancel: bool,
    pub update: bool,
}

impl ExchangeRequest {
    pub fn new(id: RequestId, root: Cid, selector: Vec<u8>, extensions: Extensions) -> Self {
        Self {
            id,
            root,
            selector,
            extensions,
            priority: 0,
            cancel: false,
            update: false,
        }
    }

    /// Extension-only follow-up on an open request.
    pub fn update(id: RequestId, root: Cid, extensions: Extensions) -> Self {
        Self {
            update: true,
            ..Self::new(id, root, Vec::new(), extensions)
        }
    }

    fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put("id", int(self.id.0))
            .put("root", Ipld::Link(self.root))
            .put("sel", Ipld::Bytes(self.selector.clone()))
            .put("ext", extensions_to_ipld(&self.extensions))
            .put("pri", int(self.priority))
            .put("cancel", Ipld::Bool(self.cancel))
            .put("update", Ipld::Bool(self.update))
            .build()
    }

    fn from_ipld(node: &Ipld) -> Result<Self> {
        Ok(Self {
            id: RequestId(as_i32(field(node, "id")?)?),
            root: as_cid(field(node, "root")?)?,
            selector: opt_field(node, "sel")
                .map(|s| as_bytes(s).map(<[u8]>::to_vec))
                .transpose()?
                .unwrap_or_default(),
            extensions: extensions_from_ipld(opt_field(node, "ext"))?,
            priority: opt_field(node, "pri").map(as_i32).transpose()?.unwrap_or(0),
            cancel: opt_field(node, "cancel").map(as_bool).transpose()?.unwrap_or(false),
            update: opt_field(node, "update").map(as_bool).transpose()?.unwrap_or(false),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeResponse {
    pub id: RequestId,
    pub status: ResponseStatus,
    pub extensions: Extensions,
}

impl ExchangeResponse {
    fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put("id", int(self.id.0))
            .put("status", int(self.status.code()))
            .put("ext", extensions_to_ipld(&self.extensions))
            .build()
    }

    fn from_ipld(node: &Ipld) -> Result<Self> {
        Ok(Self {
            id: RequestId(as_i32(field(node, "id")?)?),
            status: ResponseStatus::from_code(as_i64(field(node, "status")?)?)?,
            extensions: extensions_from_ipld(opt_field(node, "ext"))?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeMessage {
    pub complete_request_list: bool,
    pub requests: Vec<ExchangeRequest>,
    pub responses: Vec<ExchangeResponse>,
    pub blocks: Vec<Block>,
}

impl ExchangeMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let blocks = self
            .blocks
            .iter()
            .map(|b| {
                Ipld::List(vec![
                    Ipld::Bytes(b.prefix().to_bytes()),
                    Ipld::Bytes(b.data().to_vec()),
                ])
            })
            .collect();
        let node = MapBuilder::new()
            .put("complete", Ipld::Bool(self.complete_request_list))
            .put("requests", Ipld::List(self.requests.iter().map(ExchangeRequest::to_ipld).collect()))
            .put("responses", Ipld::List(self.responses.iter().map(ExchangeResponse::to_ipld).collect()))
            .put("blocks", Ipld::List(blocks))
            .build();
        Ok(encode_cbor(&node)?)
    }

    /// Decodes a frame. Each block's CID is rebuilt by hashing its data with
    /// the hasher its prefix names.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let node = decode_cbor(bytes)?;

        let requests = list(&node, "requests")?
            .iter()
            .map(ExchangeRequest::from_ipld)
            .collect::<Result<Vec<_>>>()?;
        let responses = list(&node, "responses")?
            .iter()
            .map(ExchangeResponse::from_ipld)
            .collect::<Result<Vec<_>>>()?;
        let mut blocks = Vec::new();
        for entry in list(&node, "blocks")? {
            let [prefix, data] = as_list(entry)? else {
                return Err(ExchangeError::Codec("block entry must be [prefix, data]".into()));
            };
            let prefix = Prefix::from_bytes(as_bytes(prefix)?)?;
            blocks.push(Block::with_prefix(&prefix, as_bytes(data)?.to_vec())?);
        }

        Ok(Self {
            complete_request_list: opt_field(&node, "complete")
                .map(as_bool)
                .transpose()?
                .unwrap_or(false),
            requests,
            responses,
            blocks,
        })
    }
}

fn list<'a>(node: &'a Ipld, key: &str) -> Result<&'a [Ipld]> {
    match opt_field(node, key) {
        Some(v) => Ok(as_list(v)?),
        None => Ok(&[]),
    }
}

fn extensions_to_ipld(extensions: &Extensions) -> Ipld {
    Ipld::Map(
        extensions
            .iter()
            .map(|(k, v)| (k.clone(), Ipld::Bytes(v.clone())))
            .collect(),
    )
}

fn extensions_from_ipld(node: Option<&Ipld>) -> Result<Extensions> {
    match node {
        None => Ok(Extensions::new()),
        Some(Ipld::Map(m)) => m
            .iter()
            .map(|(k, v)| -> Result<(String, Vec<u8>)> { Ok((k.clone(), as_bytes(v)?.to_vec())) })
            .collect(),
        Some(_) => Err(ExchangeError::Codec("extensions must be a map".into())),
    }
}

fn as_i32(node: &Ipld) -> ferry_kernel::Result<i32> {
    let v = as_i64(node)?;
    i32::try_from(v).map_err(|_| ferry_kernel::KernelError::Decode(format!("{v} out of i32 range")))
}
