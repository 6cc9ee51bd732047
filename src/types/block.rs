// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Blocks, CID prefixes and hashing.

use crate::error::{KernelError, Result};
use bytes::Bytes;
use ipld_core::cid::multihash::Multihash;
use ipld_core::cid::{Cid, Version};
use ipld_core::ipld::Ipld;
use sha2::{Digest, Sha256};

pub const DAG_PB: u64 = 0x70;
pub const DAG_CBOR: u64 = 0x71;
pub const RAW: u64 = 0x55;

pub const IDENTITY: u64 = 0x00;
pub const SHA2_256: u64 = 0x12;
pub const BLAKE3: u64 = 0x1e;

/// Computes the digest named by a multihash code.
pub fn digest(code: u64, data: &[u8]) -> Result<Vec<u8>> {
    match code {
        SHA2_256 => Ok(Sha256::digest(data).to_vec()),
        BLAKE3 => Ok(blake3::hash(data).as_bytes().to_vec()),
        IDENTITY => Ok(data.to_vec()),
        other => Err(KernelError::UnsupportedHasher(other)),
    }
}

/// The CID-defining bytes sent in front of every block payload:
/// version, codec, hash function and digest length, each as an unsigned varint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub version: u64,
    pub codec: u64,
    pub mh_type: u64,
    pub mh_len: u64,
}

impl Prefix {
    pub fn from_cid(cid: &Cid) -> Self {
        Self {
            version: match cid.version() {
                Version::V0 => 0,
                Version::V1 => 1,
            },
            codec: cid.codec(),
            mh_type: cid.hash().code(),
            mh_len: cid.hash().size() as u64,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        for field in [self.version, self.codec, self.mh_type, self.mh_len] {
            let mut buf = unsigned_varint::encode::u64_buffer();
            out.extend_from_slice(unsigned_varint::encode::u64(field, &mut buf));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;
        let mut fields = [0u64; 4];
        for field in fields.iter_mut() {
            let (value, tail) = unsigned_varint::decode::u64(rest)
                .map_err(|e| KernelError::Decode(format!("bad block prefix: {e}")))?;
            *field = value;
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(KernelError::Decode("trailing bytes after block prefix".into()));
        }
        Ok(Self {
            version: fields[0],
            codec: fields[1],
            mh_type: fields[2],
            mh_len: fields[3],
        })
    }

    /// Rebuilds a CID by hashing `data` with the prefix's hash function.
    pub fn to_cid(&self, data: &[u8]) -> Result<Cid> {
        let full = digest(self.mh_type, data)?;
        let len = if self.mh_type == IDENTITY {
            full.len()
        } else {
            (self.mh_len as usize).min(full.len())
        };
        let hash = Multihash::<64>::wrap(self.mh_type, &full[..len])
            .map_err(|e| KernelError::Encode(e.to_string()))?;
        match self.version {
            0 => Cid::new_v0(hash).map_err(|e| KernelError::Encode(e.to_string())),
            1 => Ok(Cid::new_v1(self.codec, hash)),
            v => Err(KernelError::Decode(format!("unknown CID version {v}"))),
        }
    }
}

/// A byte payload together with the CID it hashes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Hashes `data` with sha2-256 under a CIDv1 of the given codec.
    pub fn new(codec: u64, data: impl Into<Bytes>) -> Result<Self> {
        let prefix = Prefix {
            version: 1,
            codec,
            mh_type: SHA2_256,
            mh_len: 32,
        };
        Self::with_prefix(&prefix, data)
    }

    pub fn with_prefix(prefix: &Prefix, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let cid = prefix.to_cid(&data)?;
        Ok(Self { cid, data })
    }

    /// Encodes an IPLD node as a dag-cbor block.
    pub fn encode(node: &Ipld) -> Result<Self> {
        Self::new(DAG_CBOR, encode_cbor(node)?)
    }

    /// Pairs data with a CID without hashing. Callers must have verified the pair.
    pub fn new_unchecked(cid: Cid, data: Bytes) -> Self {
        Self { cid, data }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::from_cid(&self.cid)
    }

    pub fn decode(&self) -> Result<Ipld> {
        decode_node(self.cid.codec(), &self.data)
    }
}

/// Decodes block data into an IPLD node according to its codec.
pub fn decode_node(codec: u64, data: &[u8]) -> Result<Ipld> {
    match codec {
        DAG_CBOR => decode_cbor(data),
        RAW => Ok(Ipld::Bytes(data.to_vec())),
        DAG_PB => super::dagpb::decode_dag_pb(data),
        other => Err(KernelError::UnsupportedCodec(other)),
    }
}

pub fn decode_cbor(data: &[u8]) -> Result<Ipld> {
    serde_ipld_dagcbor::from_slice::<Ipld>(data).map_err(|e| KernelError::Decode(e.to_string()))
}

pub fn encode_cbor(node: &Ipld) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(node).map_err(|e| KernelError::Encode(e.to_string()))
}
