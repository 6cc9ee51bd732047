// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Resumable in-order iteration over AMT entries.

use super::node::{decode_node, Slots};
use crate::error::{KernelError, Result};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

#[derive(Debug, Clone, PartialEq)]
pub enum AmtStep {
    Entry(u64, Ipld),
    NeedNode(Cid),
    Done,
}

#[derive(Debug)]
struct Frame {
    slots: Slots,
    height: u32,
    offset: u64,
    next_slot: usize,
}

/// Yields `(index, value)` pairs in ascending index order starting at
/// `start`. Subtrees that end before `start` are never requested.
#[derive(Debug)]
pub struct AmtCursor {
    bit_width: u32,
    start: u64,
    stack: Vec<Frame>,
    pending: Option<(Cid, u32, u64)>,
}

impl AmtCursor {
    pub(crate) fn new(bit_width: u32, height: u32, root: Slots, start: u64) -> Self {
        Self {
            bit_width,
            start,
            stack: vec![Frame {
                slots: root,
                height,
                offset: 0,
                next_slot: 0,
            }],
            pending: None,
        }
    }

    pub fn step(&mut self) -> Result<AmtStep> {
        if let Some((cid, _, _)) = &self.pending {
            return Ok(AmtStep::NeedNode(*cid));
        }
        while let Some(frame) = self.stack.last_mut() {
            if frame.next_slot >= frame.slots.width() {
                self.stack.pop();
                continue;
            }
            let slot = frame.next_slot;
            frame.next_slot += 1;
            match &frame.slots {
                Slots::Values(values) => {
                    if let Some(value) = &values[slot] {
                        let index = frame.offset + slot as u64;
                        if index >= self.start {
                            return Ok(AmtStep::Entry(index, value.clone()));
                        }
                    }
                }
                Slots::Links(links) => {
                    if let Some(cid) = links[slot] {
                        let span = span(self.bit_width, frame.height);
                        let child_offset = (slot as u64)
                            .checked_mul(span)
                            .and_then(|o| o.checked_add(frame.offset))
                            .ok_or_else(|| KernelError::Amt("index overflow".into()))?;
                        if child_offset.saturating_add(span) <= self.start {
                            continue;
                        }
                        self.pending = Some((cid, frame.height - 1, child_offset));
                        return Ok(AmtStep::NeedNode(cid));
                    }
                }
            }
        }
        Ok(AmtStep::Done)
    }

    /// Supplies the decoded child node the cursor asked for.
    pub fn resume(&mut self, cid: &Cid, node: &Ipld) -> Result<()> {
        let Some((want, height, offset)) = self.pending else {
            return Err(KernelError::Amt(format!("cursor is not waiting for {cid}")));
        };
        if want != *cid {
            return Err(KernelError::Amt(format!("expected node {want}, got {cid}")));
        }
        let slots = decode_node(node, self.bit_width, height)?;
        self.pending = None;
        self.stack.push(Frame {
            slots,
            height,
            offset,
            next_slot: 0,
        });
        Ok(())
    }
}

/// Number of indices covered by one link slot at `height`.
fn span(bit_width: u32, height: u32) -> u64 {
    (1u64 << bit_width).checked_pow(height).unwrap_or(u64::MAX)
}
