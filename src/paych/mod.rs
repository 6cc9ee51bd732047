// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Payment channel bookkeeping: lanes, nonces and voucher limits.

pub mod lane;
pub mod voucher;

pub use lane::{load_lane_states, LaneState};
pub use voucher::{Signature, SignedVoucher};

use crate::types::address::Address;
use crate::types::token::TokenAmount;
use num_traits::{Signed, Zero};
use std::collections::BTreeMap;

/// What the client knows about one channel: the confirmed balance, lane
/// state read from chain, and the vouchers it has issued since.
#[derive(Clone, Debug, PartialEq)]
pub struct PayChState {
    pub channel: Address,
    pub from: Address,
    pub to: Address,
    pub balance: TokenAmount,
    pub lanes: BTreeMap<u64, LaneState>,
    pub vouchers: Vec<SignedVoucher>,
    pub next_lane: u64,
}

impl PayChState {
    pub fn new(channel: Address, from: Address, to: Address, balance: TokenAmount) -> Self {
        Self {
            channel,
            from,
            to,
            balance,
            lanes: BTreeMap::new(),
            vouchers: Vec::new(),
            next_lane: 0,
        }
    }

    /// Seeds state from on-chain lanes. New lanes are allocated past the
    /// highest index seen.
    pub fn from_lanes(
        channel: Address,
        from: Address,
        to: Address,
        balance: TokenAmount,
        lanes: impl IntoIterator<Item = (u64, LaneState)>,
    ) -> Self {
        let mut state = Self::new(channel, from, to, balance);
        state.lanes = lanes.into_iter().collect();
        state.next_lane = state.lanes.keys().next_back().map_or(0, |l| l + 1);
        state
    }

    pub fn allocate_lane(&mut self) -> u64 {
        let lane = self.next_lane;
        self.next_lane += 1;
        lane
    }

    pub fn add_funds(&mut self, amount: &TokenAmount) {
        self.balance += amount;
    }

    /// Highest amount redeemable on `lane` so far.
    pub fn lane_redeemed(&self, lane: u64) -> TokenAmount {
        let on_chain = self
            .lanes
            .get(&lane)
            .map(|l| l.redeemed.clone())
            .unwrap_or_default();
        self.vouchers
            .iter()
            .filter(|v| v.lane == lane)
            .map(|v| v.amount.clone())
            .fold(on_chain, |acc, a| if a > acc { a } else { acc })
    }

    pub fn total_redeemed(&self) -> TokenAmount {
        let mut lanes: Vec<u64> = self.lanes.keys().copied().collect();
        lanes.extend(self.vouchers.iter().map(|v| v.lane));
        lanes.sort_unstable();
        lanes.dedup();
        lanes.into_iter().map(|l| self.lane_redeemed(l)).sum()
    }

    pub fn spendable(&self) -> TokenAmount {
        &self.balance - self.total_redeemed()
    }

    pub fn next_nonce(&self, lane: u64) -> u64 {
        let on_chain = self.lanes.get(&lane).map_or(0, |l| l.nonce);
        self.vouchers
            .iter()
            .filter(|v| v.lane == lane)
            .map(|v| v.nonce)
            .fold(on_chain, u64::max)
            + 1
    }

    /// Unsigned voucher paying `amount` more on `lane`.
    pub fn draft_voucher(&self, lane: u64, amount: &TokenAmount) -> SignedVoucher {
        SignedVoucher {
            channel: self.channel.clone(),
            lane,
            nonce: self.next_nonce(lane),
            amount: amount + self.lane_redeemed(lane),
            signature: None,
        }
    }

    /// How far the channel balance falls short of covering `voucher`.
    pub fn shortfall_for(&self, voucher: &SignedVoucher) -> TokenAmount {
        let others = self.total_redeemed() - self.lane_redeemed(voucher.lane);
        let total = others + &voucher.amount;
        let short = total - &self.balance;
        if short.is_positive() {
            short
        } else {
            TokenAmount::zero()
        }
    }

    /// Records `voucher` if the balance covers it. Otherwise nothing changes
    /// and the shortfall is returned.
    pub fn record_voucher(&mut self, voucher: SignedVoucher) -> TokenAmount {
        let shortfall = self.shortfall_for(&voucher);
        if shortfall.is_zero() {
            self.vouchers.push(voucher);
        }
        shortfall
    }
}
