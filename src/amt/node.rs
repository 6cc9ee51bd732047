// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! AMT node decoding.

use crate::config::MAX_AMT_BIT_WIDTH;
use crate::error::{KernelError, Result};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

/// A node's children expanded to one entry per conceptual slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Slots {
    Links(Vec<Option<Cid>>),
    Values(Vec<Option<Ipld>>),
}

impl Slots {
    pub fn width(&self) -> usize {
        match self {
            Slots::Links(l) => l.len(),
            Slots::Values(v) => v.len(),
        }
    }
}

pub fn bitmap_len(bit_width: u32) -> usize {
    ((1usize << bit_width) + 7) / 8
}

pub fn check_bit_width(bit_width: u32) -> Result<()> {
    if bit_width == 0 || bit_width > MAX_AMT_BIT_WIDTH {
        return Err(KernelError::Amt(format!("unsupported bit width {bit_width}")));
    }
    Ok(())
}

/// Decodes `[bitmap, links, values]`. Leaves (height 0) may only hold
/// values, interior nodes only links.
pub fn decode_node(node: &Ipld, bit_width: u32, height: u32) -> Result<Slots> {
    let Ipld::List(parts) = node else {
        return Err(KernelError::Amt("node is not a list".into()));
    };
    let [Ipld::Bytes(bitmap), Ipld::List(links), Ipld::List(values)] = parts.as_slice() else {
        return Err(KernelError::Amt("node must be [bitmap, links, values]".into()));
    };

    let width = 1usize << bit_width;
    if bitmap.len() != bitmap_len(bit_width) {
        return Err(KernelError::Amt(format!(
            "bitmap is {} bytes, expected {}",
            bitmap.len(),
            bitmap_len(bit_width)
        )));
    }
    let set: Vec<usize> = (0..bitmap.len() * 8)
        .filter(|&i| bitmap[i / 8] & (1 << (i % 8)) != 0)
        .collect();
    if set.last().is_some_and(|&i| i >= width) {
        return Err(KernelError::Amt("bitmap has bits beyond the node width".into()));
    }
    if !links.is_empty() && !values.is_empty() {
        return Err(KernelError::Amt("node carries both links and values".into()));
    }

    if height == 0 {
        if !links.is_empty() {
            return Err(KernelError::Amt("leaf node carries links".into()));
        }
        if set.len() != values.len() {
            return Err(KernelError::Amt(format!(
                "bitmap has {} bits set but node has {} values",
                set.len(),
                values.len()
            )));
        }
        let mut slots = vec![None; width];
        for (slot, value) in set.into_iter().zip(values.iter()) {
            slots[slot] = Some(value.clone());
        }
        Ok(Slots::Values(slots))
    } else {
        if !values.is_empty() {
            return Err(KernelError::Amt("interior node carries values".into()));
        }
        if set.len() != links.len() {
            return Err(KernelError::Amt(format!(
                "bitmap has {} bits set but node has {} links",
                set.len(),
                links.len()
            )));
        }
        let mut slots = vec![None; width];
        for (slot, link) in set.into_iter().zip(links.iter()) {
            match link {
                Ipld::Link(cid) => slots[slot] = Some(*cid),
                _ => return Err(KernelError::Amt("interior entry is not a link".into())),
            }
        }
        Ok(Slots::Links(slots))
    }
}
