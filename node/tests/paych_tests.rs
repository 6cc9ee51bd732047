// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::*;
use ferry_kernel::paych::{LaneState, PayChState};
use ferry_kernel::types::address::Address;
use ferry_kernel::types::block::DAG_CBOR;
use ferry_kernel::types::token::TokenAmount;
use ferry_kernel::Block;
use ferry_node::config::NodeConfig;
use ferry_node::errors::PaychError;
use ferry_node::paych::{amt_entries, PaychManager};
use ferry_node::rpc::ChainRpc;
use ferry_node::signer::Signer;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Five lanes 0..4, redeemed 100..500, nonces 1..5.
const FIVE_LANES: &str = "hAMABYNBH4CFgkIAZAGCQgDIAoJDAAEsA4JDAAGQBIJDAAH0BQ==";
const EXISTING: &str = "f2existingchannel";

fn manager(rpc: &Arc<MockRpc>) -> PaychManager {
    PaychManager::new(
        Some(rpc.clone() as Arc<dyn ChainRpc>),
        Some(signer() as Arc<dyn Signer>),
        &config(),
    )
}

fn tokens(n: u64) -> TokenAmount {
    TokenAmount::from(n)
}

fn seeded_rpc() -> (Arc<MockRpc>, Address, Address) {
    let rpc = Arc::new(MockRpc::new());
    let lanes = Block::new(DAG_CBOR, STANDARD.decode(FIVE_LANES).unwrap()).unwrap();
    rpc.add_block(&lanes);
    let from = signer().address();
    let to = Address::new(PROVIDER_WALLET);
    rpc.add_actor(EXISTING, 11214, from.as_str(), to.as_str(), lanes.cid());
    (rpc, from, to)
}

#[tokio::test]
async fn test_existing_channel_is_reused() {
    let (rpc, from, to) = seeded_rpc();
    let mgr = manager(&rpc);
    let existing = Address::new(EXISTING);

    // 1. Load lane state from chain
    let addr = mgr
        .get_channel(&from, &to, &tokens(1214), Some(&existing))
        .await
        .unwrap();
    assert_eq!(addr, existing);
    let state = mgr.channel_state(&addr).await.unwrap();
    assert_eq!(state.balance, tokens(11214));
    assert_eq!(state.lanes.len(), 5);
    assert_eq!(state.lanes[&0], LaneState::new(tokens(100), 1));
    assert_eq!(state.lanes[&4], LaneState::new(tokens(500), 5));
    assert_eq!(state.next_lane, 5);

    // 2. Cached now: no creation message
    let again = mgr.get_channel(&from, &to, &tokens(1214), None).await.unwrap();
    assert_eq!(again, existing);
    assert!(rpc.pushed_methods().is_empty());

    // 3. A fresh lane takes a voucher with no shortfall
    let lane = mgr.allocate_lane(&addr).await.unwrap();
    assert_eq!(lane, 5);
    let outcome = mgr.create_voucher(&addr, &tokens(1214), lane).await.unwrap();
    assert_eq!(outcome.shortfall, tokens(0));
    let voucher = outcome.voucher.unwrap();
    assert_eq!(voucher.nonce, 1);
    assert_eq!(voucher.amount, tokens(1214));

    // 4. An existing lane continues from its on-chain nonce
    let outcome = mgr.create_voucher(&addr, &tokens(10), 2).await.unwrap();
    let voucher = outcome.voucher.unwrap();
    assert_eq!(voucher.nonce, 4);
    assert_eq!(voucher.amount, tokens(310));
}

#[tokio::test]
async fn test_lane_stream_from_chain() {
    let (rpc, _, _) = seeded_rpc();
    let lanes = Block::new(DAG_CBOR, STANDARD.decode(FIVE_LANES).unwrap()).unwrap();
    let entries: Vec<_> = amt_entries(rpc as Arc<dyn ChainRpc>, *lanes.cid(), 3)
        .try_collect()
        .await
        .unwrap();
    let indices: Vec<u64> = entries.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![3, 4]);
}

#[tokio::test]
async fn test_shortfall_does_not_advance_nonce() {
    let rpc = Arc::new(MockRpc::new());
    let mgr = manager(&rpc);
    let from = signer().address();
    let to = Address::new(PROVIDER_WALLET);
    let channel = mgr
        .add_channel(PayChState::new(
            Address::new("f2small"),
            from.clone(),
            to.clone(),
            tokens(100),
        ))
        .await;

    let first = mgr.create_voucher(&channel, &tokens(60), 0).await.unwrap();
    assert_eq!(first.voucher.unwrap().nonce, 1);

    // 1. 60 + 50 is over the balance
    let short = mgr.create_voucher(&channel, &tokens(50), 0).await.unwrap();
    assert_eq!(short.shortfall, tokens(10));
    assert!(short.voucher.is_none());
    assert_eq!(mgr.list_vouchers(&channel).await.unwrap().len(), 1);

    // 2. Top up through get_channel, then retry
    let same = mgr.get_channel(&from, &to, &tokens(50), None).await.unwrap();
    assert_eq!(same, channel);
    assert_eq!(rpc.pushed_methods(), vec![0]);

    let retry = mgr.create_voucher(&channel, &tokens(50), 0).await.unwrap();
    assert_eq!(retry.shortfall, tokens(0));
    let voucher = retry.voucher.unwrap();
    assert_eq!(voucher.nonce, 2);
    assert_eq!(voucher.amount, tokens(110));

    let state = mgr.channel_state(&channel).await.unwrap();
    assert_eq!(state.balance, tokens(150));
    assert!(state.total_redeemed() <= state.balance);
}

#[tokio::test]
async fn test_pending_creation_blocks_only_its_own_pair() {
    let rpc = Arc::new(MockRpc::new());
    *rpc.confirm.lock().unwrap() = false;
    let slow = NodeConfig {
        msg_timeout_ms: 20,
        max_retries: 200,
        ..config()
    };
    let mgr = Arc::new(PaychManager::new(
        Some(rpc.clone() as Arc<dyn ChainRpc>),
        Some(signer() as Arc<dyn Signer>),
        &slow,
    ));
    let from = signer().address();
    let funded = mgr
        .add_channel(PayChState::new(
            Address::new("f2funded"),
            from.clone(),
            Address::new(PROVIDER_WALLET),
            tokens(100),
        ))
        .await;

    // 1. Two deals to another provider wait on one creation message
    let other = Address::new("f1otherprovider");
    let creations: Vec<_> = (0..2)
        .map(|_| {
            let (mgr, from, other) = (mgr.clone(), from.clone(), other.clone());
            tokio::spawn(async move { mgr.get_channel(&from, &other, &tokens(5), None).await })
        })
        .collect();
    while rpc.pushed_methods().is_empty() {
        tokio::task::yield_now().await;
    }

    // 2. The funded channel keeps working meanwhile
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        mgr.create_voucher(&funded, &tokens(30), 0),
    )
    .await
    .expect("voucher waited on another pair's creation")
    .unwrap();
    assert_eq!(outcome.voucher.unwrap().amount, tokens(30));
    let same = tokio::time::timeout(
        Duration::from_millis(500),
        mgr.get_channel(&from, &Address::new(PROVIDER_WALLET), &tokens(10), None),
    )
    .await
    .expect("cached lookup waited on another pair's creation")
    .unwrap();
    assert_eq!(same, funded);
    assert!(creations.iter().all(|c| !c.is_finished()));

    // 3. Confirmation releases both callers with a single channel
    *rpc.confirm.lock().unwrap() = true;
    for creation in creations {
        assert_eq!(creation.await.unwrap().unwrap(), Address::new(CREATED_CHANNEL));
    }
    assert_eq!(rpc.pushed_methods(), vec![2]);
}

#[tokio::test]
async fn test_unconfirmed_message_times_out() {
    let rpc = Arc::new(MockRpc::new());
    *rpc.confirm.lock().unwrap() = false;
    let mgr = manager(&rpc);

    let err = mgr
        .get_channel(&signer().address(), &Address::new(PROVIDER_WALLET), &tokens(5), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaychError::ConfirmationTimeout { attempts: 3, .. }), "{err}");
}

#[tokio::test]
async fn test_failed_message_is_fatal() {
    let rpc = Arc::new(MockRpc::new());
    *rpc.exit_code.lock().unwrap() = 16;
    let mgr = manager(&rpc);

    let err = mgr
        .get_channel(&signer().address(), &Address::new(PROVIDER_WALLET), &tokens(5), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaychError::MessageExecutionFailed { exit_code: 16, .. }), "{err}");
}

#[tokio::test]
async fn test_missing_collaborators() {
    let mgr = PaychManager::new(None, None, &config());
    let unknown = Address::new("f2nowhere");

    assert_eq!(
        mgr.create_voucher(&unknown, &tokens(1), 0).await.unwrap_err(),
        PaychError::ChannelNotFound("f2nowhere".into())
    );
    assert_eq!(
        mgr.get_channel(&Address::new("f1a"), &Address::new("f1b"), &tokens(1), None)
            .await
            .unwrap_err(),
        PaychError::NoChain
    );
}
