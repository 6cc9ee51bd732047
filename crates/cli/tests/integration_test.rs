// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use ferry_cli::commands::{get, selector};
use ferry_kernel::types::block::{Block, RAW};
use ferry_node::blockstore::{Blockstore, FileBlockstore};
use tempfile::tempdir;

#[tokio::test]
async fn test_get_from_local_blockstore() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("blocks.log");
    let out = dir.path().join("out.bin");

    let block = Block::new(RAW, b"ferry across the river".to_vec()).unwrap();
    {
        let store = FileBlockstore::open(&store_path).unwrap();
        store.put(&block).await.unwrap();
    }

    // Only test in this binary that touches the environment.
    std::env::remove_var("FERRY_CONFIG");
    std::env::set_var("FERRY_BLOCKSTORE", &store_path);

    let path = format!("/ipfs/{}", block.cid());
    get::run(&path, Some(out.clone()), None).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), b"ferry across the river");
}

#[test]
fn test_selector_command() {
    assert!(selector::run("all").is_ok());
    assert!(selector::run("entries").is_ok());
    assert!(selector::run("nope").is_err());
}
