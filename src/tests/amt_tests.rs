// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::fixtures::{fixture, BlockMap, EMPTY_AMT, FIVE_LANES, SPARSE_CHILDREN, SPARSE_ROOT};
use crate::amt::{Amt, AmtBuilder, AmtStep};
use crate::error::KernelError;
use crate::paych::LaneState;
use crate::types::token::TokenAmount;
use ipld_core::ipld::Ipld;

fn lanes(amt: &Amt, start: u64, blocks: &mut BlockMap) -> Vec<(u64, LaneState)> {
    amt.entries(start, |cid| blocks.get(cid))
        .unwrap()
        .into_iter()
        .map(|(i, v)| (i, LaneState::from_ipld(&v).unwrap()))
        .collect()
}

#[test]
fn test_empty_amt() {
    let (mut blocks, root) = fixture(EMPTY_AMT, &[]);
    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    assert_eq!(amt.bit_width, 3);
    assert_eq!(amt.height, 0);
    assert_eq!(amt.count, 0);
    assert!(lanes(&amt, 0, &mut blocks).is_empty());
}

#[test]
fn test_five_sequential_lanes() {
    let (mut blocks, root) = fixture(FIVE_LANES, &[]);
    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    assert_eq!(amt.count, 5);

    let entries = lanes(&amt, 0, &mut blocks);
    assert_eq!(entries.len(), 5);
    for (pos, (index, lane)) in entries.iter().enumerate() {
        assert_eq!(*index, pos as u64);
        assert_eq!(lane.redeemed, TokenAmount::from(100 * (pos as u64 + 1)));
        assert_eq!(lane.nonce, pos as u64 + 1);
    }
}

#[test]
fn test_sparse_height_one() {
    let (mut blocks, root) = fixture(SPARSE_ROOT, &SPARSE_CHILDREN);
    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    assert_eq!(amt.height, 1);
    assert_eq!(amt.count, 8);

    let entries = lanes(&amt, 0, &mut blocks);
    let indices: Vec<u64> = entries.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 13, 20]);
    for (index, lane) in &entries {
        assert_eq!(lane.redeemed, TokenAmount::from(10 * (index + 1)));
        assert_eq!(lane.nonce, index + 1);
    }
}

#[test]
fn test_start_skips_preceding_subtrees() {
    let (mut blocks, root) = fixture(SPARSE_ROOT, &SPARSE_CHILDREN);
    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    blocks.fetched.clear();

    let entries = lanes(&amt, 13, &mut blocks);
    let indices: Vec<u64> = entries.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![13, 20]);
    // The first child (indices 0..8) is never fetched
    assert_eq!(blocks.fetched.len(), 2);
}

#[test]
fn test_cursor_is_restartable() {
    let (mut blocks, root) = fixture(SPARSE_ROOT, &SPARSE_CHILDREN);
    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    let first = lanes(&amt, 0, &mut blocks);
    let second = lanes(&amt, 0, &mut blocks);
    assert_eq!(first, second);

    let mut cursor = amt.cursor(0);
    assert!(matches!(cursor.step().unwrap(), AmtStep::NeedNode(_)));
}

#[test]
fn test_builder_matches_decoder() {
    let mut builder = AmtBuilder::new(3);
    for index in [0u64, 7, 8, 63, 64, 600] {
        builder.insert(index, LaneState::new(TokenAmount::from(index), index + 1).to_ipld());
    }
    let (root, built) = builder.build().unwrap();
    let mut blocks = BlockMap::new();
    for block in built {
        blocks.insert(block);
    }

    let amt = Amt::load(&root, |cid| blocks.get(cid)).unwrap();
    assert_eq!(amt.height, 3);
    let indices: Vec<u64> = lanes(&amt, 0, &mut blocks).into_iter().map(|(i, _)| i).collect();
    assert_eq!(indices, vec![0, 7, 8, 63, 64, 600]);
}

#[test]
fn test_bitmap_count_mismatch() {
    // Two bits set, one value
    let node = Ipld::List(vec![
        Ipld::Bytes(vec![0b11]),
        Ipld::List(vec![]),
        Ipld::List(vec![Ipld::Integer(1)]),
    ]);
    let root = Ipld::List(vec![Ipld::Integer(3), Ipld::Integer(0), Ipld::Integer(1), node]);
    assert!(matches!(Amt::from_root(&root), Err(KernelError::Amt(_))));
}

#[test]
fn test_links_and_values_together() {
    let (_, cid) = fixture(EMPTY_AMT, &[]);
    let node = Ipld::List(vec![
        Ipld::Bytes(vec![0b11]),
        Ipld::List(vec![Ipld::Link(cid)]),
        Ipld::List(vec![Ipld::Integer(1)]),
    ]);
    let root = Ipld::List(vec![Ipld::Integer(3), Ipld::Integer(1), Ipld::Integer(2), node]);
    assert!(matches!(Amt::from_root(&root), Err(KernelError::Amt(_))));
}

#[test]
fn test_legacy_root_layout() {
    let node = Ipld::List(vec![
        Ipld::Bytes(vec![0b100]),
        Ipld::List(vec![]),
        Ipld::List(vec![Ipld::Integer(42)]),
    ]);
    let root = Ipld::List(vec![Ipld::Integer(0), Ipld::Integer(1), node]);
    let amt = Amt::from_root(&root).unwrap();
    assert_eq!(amt.bit_width, 3);
    let mut blocks = BlockMap::new();
    let entries = amt.entries(0, |cid| blocks.get(cid)).unwrap();
    assert_eq!(entries, vec![(2, Ipld::Integer(42))]);
}
