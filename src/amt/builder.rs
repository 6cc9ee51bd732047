// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Encodes AMTs from `(index, value)` pairs.

use super::node::{bitmap_len, check_bit_width};
use crate::error::Result;
use crate::types::block::Block;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AmtBuilder {
    bit_width: u32,
    entries: BTreeMap<u64, Ipld>,
}

impl AmtBuilder {
    pub fn new(bit_width: u32) -> Self {
        Self {
            bit_width,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, index: u64, value: Ipld) -> &mut Self {
        self.entries.insert(index, value);
        self
    }

    /// Returns the root CID and every block of the tree, root last.
    pub fn build(&self) -> Result<(Cid, Vec<Block>)> {
        check_bit_width(self.bit_width)?;
        let width = 1u64 << self.bit_width;
        let mut height = 0u32;
        let max = self.entries.keys().next_back().copied().unwrap_or(0);
        let mut capacity = width;
        while max >= capacity {
            height += 1;
            capacity = capacity.saturating_mul(width);
        }

        let mut blocks = Vec::new();
        let node = self.build_node(height, 0, &mut blocks)?;
        let root = Ipld::List(vec![
            Ipld::Integer(self.bit_width as i128),
            Ipld::Integer(height as i128),
            Ipld::Integer(self.entries.len() as i128),
            node,
        ]);
        let root = Block::encode(&root)?;
        let cid = *root.cid();
        blocks.push(root);
        Ok((cid, blocks))
    }

    fn build_node(&self, height: u32, offset: u64, blocks: &mut Vec<Block>) -> Result<Ipld> {
        let width = 1u64 << self.bit_width;
        let mut bitmap = vec![0u8; bitmap_len(self.bit_width)];
        let mut links = Vec::new();
        let mut values = Vec::new();
        let span = width.saturating_pow(height);

        for slot in 0..width {
            let lo = offset.saturating_add(slot.saturating_mul(span));
            if height == 0 {
                if let Some(value) = self.entries.get(&lo) {
                    values.push(value.clone());
                    bitmap[(slot / 8) as usize] |= 1 << (slot % 8);
                }
            } else if self.entries.range(lo..lo.saturating_add(span)).next().is_some() {
                let child = self.build_node(height - 1, lo, blocks)?;
                let block = Block::encode(&child)?;
                links.push(Ipld::Link(*block.cid()));
                blocks.push(block);
                bitmap[(slot / 8) as usize] |= 1 << (slot % 8);
            }
        }
        Ok(Ipld::List(vec![
            Ipld::Bytes(bitmap),
            Ipld::List(links),
            Ipld::List(values),
        ]))
    }
}
