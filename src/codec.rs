// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Small helpers for reading and writing IPLD maps and tuples.

use crate::error::{KernelError, Result};
use crate::types::token::{token_from_bytes, token_to_bytes, TokenAmount};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

/// Builds a string-keyed map, skipping `None` values.
#[derive(Default)]
pub struct MapBuilder(BTreeMap<String, Ipld>);

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: &str, value: Ipld) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn put_opt(self, key: &str, value: Option<Ipld>) -> Self {
        match value {
            Some(v) => self.put(key, v),
            None => self,
        }
    }

    pub fn build(self) -> Ipld {
        Ipld::Map(self.0)
    }
}

pub fn field<'a>(node: &'a Ipld, key: &str) -> Result<&'a Ipld> {
    opt_field(node, key).ok_or_else(|| KernelError::Decode(format!("missing field {key}")))
}

/// A missing key and an explicit null both read as `None`.
pub fn opt_field<'a>(node: &'a Ipld, key: &str) -> Option<&'a Ipld> {
    match node {
        Ipld::Map(m) => m.get(key).filter(|v| !matches!(v, Ipld::Null)),
        _ => None,
    }
}

pub fn as_u64(node: &Ipld) -> Result<u64> {
    match node {
        Ipld::Integer(i) => u64::try_from(*i).map_err(|_| KernelError::Decode(format!("{i} out of range"))),
        _ => Err(KernelError::Decode("expected an unsigned integer".into())),
    }
}

pub fn as_i64(node: &Ipld) -> Result<i64> {
    match node {
        Ipld::Integer(i) => i64::try_from(*i).map_err(|_| KernelError::Decode(format!("{i} out of range"))),
        _ => Err(KernelError::Decode("expected an integer".into())),
    }
}

pub fn as_bool(node: &Ipld) -> Result<bool> {
    match node {
        Ipld::Bool(b) => Ok(*b),
        _ => Err(KernelError::Decode("expected a bool".into())),
    }
}

pub fn as_string(node: &Ipld) -> Result<String> {
    match node {
        Ipld::String(s) => Ok(s.clone()),
        _ => Err(KernelError::Decode("expected a string".into())),
    }
}

pub fn as_bytes(node: &Ipld) -> Result<&[u8]> {
    match node {
        Ipld::Bytes(b) => Ok(b),
        _ => Err(KernelError::Decode("expected bytes".into())),
    }
}

pub fn as_cid(node: &Ipld) -> Result<Cid> {
    match node {
        Ipld::Link(c) => Ok(*c),
        _ => Err(KernelError::Decode("expected a link".into())),
    }
}

pub fn as_list(node: &Ipld) -> Result<&[Ipld]> {
    match node {
        Ipld::List(l) => Ok(l),
        _ => Err(KernelError::Decode("expected a list".into())),
    }
}

pub fn token(amount: &TokenAmount) -> Ipld {
    Ipld::Bytes(token_to_bytes(amount))
}

pub fn as_token(node: &Ipld) -> Result<TokenAmount> {
    token_from_bytes(as_bytes(node)?)
}

pub fn int(v: impl Into<i128>) -> Ipld {
    Ipld::Integer(v.into())
}
