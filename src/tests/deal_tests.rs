// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::deal::{next_interval, Deal, DealEvent, DealState, DealTerms, Effect, PaychInfo};
use crate::error::KernelError;
use crate::types::address::Address;
use crate::types::block::{Block, RAW};
use crate::types::id::DealId;
use crate::types::token::TokenAmount;
use num_traits::Zero;

fn root() -> ipld_core::cid::Cid {
    *Block::new(RAW, b"root".to_vec()).unwrap().cid()
}

fn paid_terms() -> DealTerms {
    DealTerms {
        price_per_byte: TokenAmount::from(1),
        payment_interval: 1 << 20,
        payment_interval_increase: 1 << 20,
        total_size: 1214,
        payment_address: Some(Address::new("f1provider")),
        known_channel: None,
    }
}

fn paych() -> PaychInfo {
    PaychInfo { channel: Address::new("f2channel"), lane: 0 }
}

#[test]
fn test_free_transfer_completes() {
    let mut deal = Deal::new(DealId(1), root(), DealTerms::free(1214));
    let mut visited = vec![deal.state()];

    deal.apply(DealEvent::DealProposed).unwrap();
    visited.push(deal.state());
    assert!(deal.apply(DealEvent::DealAccepted).unwrap().is_empty());
    visited.push(deal.state());
    for size in [87, 1127] {
        deal.apply(DealEvent::BlockReceived { size }).unwrap();
        visited.push(deal.state());
    }
    deal.apply(DealEvent::AllBlocksReceived).unwrap();
    let effects = deal.apply(DealEvent::TransferCompleted).unwrap();
    visited.push(deal.state());

    assert_eq!(deal.state(), DealState::Completed);
    assert_eq!(deal.context().received, 1214);
    assert!(deal.context().all_received);
    assert!(!visited.contains(&DealState::ValidatePayment));
    assert_eq!(effects, vec![Effect::Finished { state: DealState::Completed, reason: None }]);
}

#[test]
fn test_free_transfer_waits_for_last_blocks() {
    let mut deal = Deal::new(DealId(1), root(), DealTerms::free(10));
    deal.apply(DealEvent::DealProposed).unwrap();
    deal.apply(DealEvent::DealAccepted).unwrap();
    deal.apply(DealEvent::BlockReceived { size: 10 }).unwrap();
    deal.apply(DealEvent::TransferCompleted).unwrap();
    assert_eq!(deal.state(), DealState::PendingLastBlocks);

    deal.apply(DealEvent::AllBlocksReceived).unwrap();
    assert_eq!(deal.state(), DealState::Completed);
}

#[test]
fn test_paid_transfer_completes() {
    let mut deal = Deal::new(DealId(2), root(), paid_terms());
    deal.apply(DealEvent::DealProposed).unwrap();

    // 1. Acceptance asks for a channel covering the whole transfer
    let effects = deal.apply(DealEvent::DealAccepted).unwrap();
    assert_eq!(effects, vec![Effect::SetupPaymentChannel {
        to: Address::new("f1provider"),
        amount: TokenAmount::from(1214),
        known_channel: None,
    }]);
    deal.apply(DealEvent::PaychReady { info: paych() }).unwrap();

    // 2. First block, then the provider asks for what it delivered
    deal.apply(DealEvent::BlockReceived { size: 87 }).unwrap();
    assert_eq!(deal.state(), DealState::Accepted);
    let effects = deal.apply(DealEvent::PaymentRequested { owed: TokenAmount::from(87) }).unwrap();
    assert_eq!(deal.state(), DealState::SendPayment);
    assert_eq!(effects, vec![Effect::CreateVoucher {
        channel: Address::new("f2channel"),
        lane: 0,
        amount: TokenAmount::from(87),
    }]);
    deal.apply(DealEvent::PaymentSent { amount: TokenAmount::from(87) }).unwrap();
    assert_eq!(deal.state(), DealState::Ongoing);

    // 3. Remaining bytes, last payment and completion
    deal.apply(DealEvent::BlockReceived { size: 1127 }).unwrap();
    deal.apply(DealEvent::AllBlocksReceived).unwrap();
    deal.apply(DealEvent::PaymentRequested { owed: TokenAmount::from(1127) }).unwrap();
    deal.apply(DealEvent::TransferCompleted).unwrap();
    assert_eq!(deal.state(), DealState::SendPayment);
    let effects = deal.apply(DealEvent::PaymentSent { amount: TokenAmount::from(1127) }).unwrap();

    assert_eq!(deal.state(), DealState::Completed);
    assert_eq!(deal.context().funds_spent, TokenAmount::from(1214));
    assert_eq!(effects, vec![Effect::Finished { state: DealState::Completed, reason: None }]);
}

#[test]
fn test_overdemand_waits_for_bytes() {
    let mut deal = Deal::new(DealId(3), root(), paid_terms());
    deal.apply(DealEvent::DealProposed).unwrap();
    deal.apply(DealEvent::DealAccepted).unwrap();
    deal.apply(DealEvent::PaychReady { info: paych() }).unwrap();
    deal.apply(DealEvent::BlockReceived { size: 50 }).unwrap();

    // Asking for more than was delivered authorizes nothing
    let effects = deal.apply(DealEvent::PaymentRequested { owed: TokenAmount::from(87) }).unwrap();
    assert!(effects.is_empty());
    assert_eq!(deal.state(), DealState::ValidatePayment);

    let effects = deal.apply(DealEvent::BlockReceived { size: 37 }).unwrap();
    assert_eq!(deal.state(), DealState::SendPayment);
    assert_eq!(effects.len(), 1);
}

#[test]
fn test_payment_waits_for_channel() {
    let mut deal = Deal::new(DealId(4), root(), paid_terms());
    deal.apply(DealEvent::DealProposed).unwrap();
    deal.apply(DealEvent::DealAccepted).unwrap();
    deal.apply(DealEvent::BlockReceived { size: 100 }).unwrap();
    assert!(deal.apply(DealEvent::PaymentRequested { owed: TokenAmount::from(100) }).unwrap().is_empty());

    let effects = deal.apply(DealEvent::PaychReady { info: paych() }).unwrap();
    assert!(matches!(effects.as_slice(), [Effect::CreateVoucher { .. }]));
}

#[test]
fn test_rejection_is_terminal() {
    let mut deal = Deal::new(DealId(5), root(), paid_terms());
    deal.apply(DealEvent::DealProposed).unwrap();
    let effects = deal.apply(DealEvent::DealRejected { reason: "busy".into() }).unwrap();
    assert_eq!(deal.state(), DealState::Rejected);
    assert_eq!(effects, vec![Effect::Finished {
        state: DealState::Rejected,
        reason: Some("busy".into()),
    }]);

    let err = deal.apply(DealEvent::BlockReceived { size: 1 }).unwrap_err();
    assert!(matches!(err, KernelError::InvalidTransition { .. }));
}

#[test]
fn test_paid_deal_without_address_fails() {
    let mut terms = paid_terms();
    terms.payment_address = None;
    let mut deal = Deal::new(DealId(6), root(), terms);
    deal.apply(DealEvent::DealProposed).unwrap();
    deal.apply(DealEvent::DealAccepted).unwrap();
    assert_eq!(deal.state(), DealState::Failure);
}

#[test]
fn test_payment_failure_and_disconnect() {
    let mut deal = Deal::new(DealId(7), root(), paid_terms());
    deal.apply(DealEvent::DealProposed).unwrap();
    deal.apply(DealEvent::DealAccepted).unwrap();
    deal.apply(DealEvent::PaychReady { info: paych() }).unwrap();
    deal.apply(DealEvent::BlockReceived { size: 10 }).unwrap();
    deal.apply(DealEvent::PaymentRequested { owed: TokenAmount::from(10) }).unwrap();
    deal.apply(DealEvent::PaymentFailed { reason: "shortfall of 3".into() }).unwrap();
    assert_eq!(deal.state(), DealState::Failure);
    assert_eq!(deal.context().failure.as_deref(), Some("shortfall of 3"));

    let mut other = Deal::new(DealId(8), root(), DealTerms::free(5));
    other.apply(DealEvent::DealProposed).unwrap();
    other.apply(DealEvent::TransferFailed { reason: "disconnected".into() }).unwrap();
    assert_eq!(other.state(), DealState::Failure);
}

#[test]
fn test_out_of_order_events_rejected() {
    let mut deal = Deal::new(DealId(9), root(), DealTerms::free(5));
    assert!(deal.apply(DealEvent::DealAccepted).is_err());
    assert_eq!(deal.state(), DealState::New);
    assert!(deal.apply(DealEvent::PaymentSent { amount: TokenAmount::zero() }).is_err());
}

#[test]
fn test_next_interval_growth() {
    assert_eq!(next_interval(0, 1000, 500), 1000);
    assert_eq!(next_interval(1000, 1000, 500), 2500);
    assert_eq!(next_interval(2500, 1000, 500), 4500);
    assert_eq!(next_interval(10, 0, 0), u64::MAX);
}
