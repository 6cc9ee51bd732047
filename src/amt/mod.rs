// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Array-mapped trie, the sparse array encoding used for on-chain lane state.

pub mod builder;
pub mod cursor;
pub mod node;

pub use builder::AmtBuilder;
pub use cursor::{AmtCursor, AmtStep};
pub use node::Slots;

use crate::config::MAX_AMT_HEIGHT;
use crate::error::{KernelError, Result};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use node::{check_bit_width, decode_node};

/// Bit width implied by roots that predate the explicit field.
const LEGACY_BIT_WIDTH: u32 = 3;

/// A decoded AMT root. Child nodes are fetched on demand by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Amt {
    pub bit_width: u32,
    pub height: u32,
    pub count: u64,
    root: Slots,
}

impl Amt {
    /// Decodes `[bitWidth, height, count, node]`, or the older
    /// `[height, count, node]` layout.
    pub fn from_root(root: &Ipld) -> Result<Self> {
        let Ipld::List(fields) = root else {
            return Err(KernelError::Amt("root is not a list".into()));
        };
        let (bit_width, height, count, node) = match fields.as_slice() {
            [bw, h, c, n] => (as_u64(bw)? as u32, as_u64(h)?, as_u64(c)?, n),
            [h, c, n] => (LEGACY_BIT_WIDTH, as_u64(h)?, as_u64(c)?, n),
            _ => return Err(KernelError::Amt("root has the wrong number of fields".into())),
        };
        check_bit_width(bit_width)?;
        if height > MAX_AMT_HEIGHT as u64 {
            return Err(KernelError::Amt(format!("height {height} too large")));
        }
        let height = height as u32;
        let root = decode_node(node, bit_width, height)?;
        Ok(Self {
            bit_width,
            height,
            count,
            root,
        })
    }

    pub fn load<G>(root: &Cid, mut get: G) -> Result<Self>
    where
        G: FnMut(&Cid) -> Result<Ipld>,
    {
        Self::from_root(&get(root)?)
    }

    pub fn cursor(&self, start: u64) -> AmtCursor {
        AmtCursor::new(self.bit_width, self.height, self.root.clone(), start)
    }

    /// Collects every entry at or after `start`.
    pub fn entries<G>(&self, start: u64, mut get: G) -> Result<Vec<(u64, Ipld)>>
    where
        G: FnMut(&Cid) -> Result<Ipld>,
    {
        let mut cursor = self.cursor(start);
        let mut out = Vec::new();
        loop {
            match cursor.step()? {
                AmtStep::Entry(index, value) => out.push((index, value)),
                AmtStep::NeedNode(cid) => {
                    let node = get(&cid)?;
                    cursor.resume(&cid, &node)?;
                }
                AmtStep::Done => return Ok(out),
            }
        }
    }
}

fn as_u64(node: &Ipld) -> Result<u64> {
    match node {
        Ipld::Integer(i) => u64::try_from(*i).map_err(|_| KernelError::Amt(format!("bad integer {i}"))),
        _ => Err(KernelError::Amt("expected an integer".into())),
    }
}
