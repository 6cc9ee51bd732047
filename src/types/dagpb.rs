// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! dag-pb nodes read into the IPLD data model:
//! `{"Data": bytes?, "Links": [{"Hash": link, "Name": string?, "Tsize": int?}]}`.

use crate::error::{KernelError, Result};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

const WIRE_VARINT: u64 = 0;
const WIRE_BYTES: u64 = 2;

/// One protobuf field: its number and either a varint or a byte slice.
enum Field<'a> {
    Varint(u64, u64),
    Bytes(u64, &'a [u8]),
}

struct Fields<'a> {
    rest: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, tail) = unsigned_varint::decode::u64(self.rest)
            .map_err(|e| KernelError::Decode(format!("dag-pb varint: {e}")))?;
        self.rest = tail;
        Ok(value)
    }

    fn field(&mut self) -> Result<Field<'a>> {
        let key = self.varint()?;
        let number = key >> 3;
        match key & 0x7 {
            WIRE_VARINT => Ok(Field::Varint(number, self.varint()?)),
            WIRE_BYTES => {
                let len = self.varint()? as usize;
                if len > self.rest.len() {
                    return Err(KernelError::Decode(format!(
                        "dag-pb field {number} wants {len} bytes, {} left",
                        self.rest.len()
                    )));
                }
                let (value, tail) = self.rest.split_at(len);
                self.rest = tail;
                Ok(Field::Bytes(number, value))
            }
            wire => Err(KernelError::Decode(format!(
                "dag-pb field {number} has unsupported wire type {wire}"
            ))),
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let field = self.field();
        if field.is_err() {
            self.rest = &[];
        }
        Some(field)
    }
}

/// Decodes a dag-pb block.
pub fn decode_dag_pb(data: &[u8]) -> Result<Ipld> {
    let mut node = BTreeMap::new();
    let mut links = Vec::new();
    for field in Fields::new(data) {
        match field? {
            Field::Bytes(1, bytes) => {
                node.insert("Data".to_string(), Ipld::Bytes(bytes.to_vec()));
            }
            Field::Bytes(2, bytes) => links.push(decode_link(bytes)?),
            Field::Varint(n, _) | Field::Bytes(n, _) => {
                return Err(KernelError::Decode(format!("unexpected dag-pb node field {n}")))
            }
        }
    }
    node.insert("Links".to_string(), Ipld::List(links));
    Ok(Ipld::Map(node))
}

fn decode_link(data: &[u8]) -> Result<Ipld> {
    let mut link = BTreeMap::new();
    for field in Fields::new(data) {
        match field? {
            Field::Bytes(1, bytes) => {
                let cid = Cid::try_from(bytes)
                    .map_err(|e| KernelError::Decode(format!("dag-pb link hash: {e}")))?;
                link.insert("Hash".to_string(), Ipld::Link(cid));
            }
            Field::Bytes(2, bytes) => {
                let name = std::str::from_utf8(bytes)
                    .map_err(|e| KernelError::Decode(format!("dag-pb link name: {e}")))?;
                link.insert("Name".to_string(), Ipld::String(name.to_string()));
            }
            Field::Varint(3, size) => {
                link.insert("Tsize".to_string(), Ipld::Integer(size as i128));
            }
            Field::Varint(n, _) | Field::Bytes(n, _) => {
                return Err(KernelError::Decode(format!("unexpected dag-pb link field {n}")))
            }
        }
    }
    if !link.contains_key("Hash") {
        return Err(KernelError::Decode("dag-pb link without a hash".into()));
    }
    Ok(Ipld::Map(link))
}

/// The target of the link called `name` in a dag-pb shaped map.
pub fn named_link<'a>(node: &'a BTreeMap<String, Ipld>, name: &str) -> Option<&'a Ipld> {
    let Some(Ipld::List(links)) = node.get("Links") else {
        return None;
    };
    links.iter().find_map(|link| match link {
        Ipld::Map(fields) if matches!(fields.get("Name"), Some(Ipld::String(n)) if n == name) => {
            fields.get("Hash")
        }
        _ => None,
    })
}
