// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Lane-state AMTs captured from chain, plus an in-memory block map.

use crate::error::{KernelError, Result};
use crate::types::block::{Block, DAG_CBOR};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use rustc_hash::FxHashMap;

/// bitWidth 3, height 0, count 0, empty bitmap.
pub const EMPTY_AMT: &str = "hAMAAINBAICA";

/// Five lanes 0..4, redeemed 100..500, nonces 1..5.
pub const FIVE_LANES: &str = "hAMABYNBH4CFgkIAZAGCQgDIAoJDAAEsA4JDAAGQBIJDAAH0BQ==";

/// Height 1, lanes {0,1,2,3,4,5,13,20}; lane i has redeemed 10*(i+1) and nonce i+1.
pub const SPARSE_ROOT: &str = "hAMBCINBB4PYKlglAAFxEiDGmGCGzZU8+Vrit4uANvnW7RBI1zpVoLRyKs+kBVlBxNgqWCUAAXESIAeCC5uuDbOO6BEB2ATqMKFjcelpUXdW4t6VyqsRWHjz2CpYJQABcRIg/NSG4ZcLlcLSyFk5y0WvblM2aJ5hFE/i8xak0HllpW+A";
pub const SPARSE_CHILDREN: [&str; 3] = [
    "g0E/gIaCQgAKAYJCABQCgkIAHgOCQgAoBIJCADIFgkIAPAY=",
    "g0EggIGCQgCMDg==",
    "g0EQgIGCQgDSFQ==",
];

pub fn block_from_base64(encoded: &str) -> Block {
    let bytes = STANDARD.decode(encoded).unwrap();
    Block::new(DAG_CBOR, bytes).unwrap()
}

#[derive(Default)]
pub struct BlockMap {
    blocks: FxHashMap<Cid, Block>,
    pub fetched: Vec<Cid>,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: Block) -> Cid {
        let cid = *block.cid();
        self.blocks.insert(cid, block);
        cid
    }

    pub fn insert_node(&mut self, node: &Ipld) -> Cid {
        self.insert(Block::encode(node).unwrap())
    }

    pub fn get(&mut self, cid: &Cid) -> Result<Ipld> {
        self.fetched.push(*cid);
        self.blocks
            .get(cid)
            .ok_or_else(|| KernelError::NotFound(cid.to_string()))?
            .decode()
    }
}

/// Loads one of the fixtures into a fresh map and returns its root.
pub fn fixture(root: &str, children: &[&str]) -> (BlockMap, Cid) {
    let mut map = BlockMap::new();
    for child in children {
        map.insert(block_from_base64(child));
    }
    let root = map.insert(block_from_base64(root));
    (map, root)
}
