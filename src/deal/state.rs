// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The client side of one retrieval deal.
//!
//! `Deal::apply` is a pure transition function. It mutates the deal's
//! context and returns effects for the driver to carry out; the results of
//! those effects come back in as further events.

use crate::error::{KernelError, Result};
use crate::types::address::Address;
use crate::types::id::DealId;
use crate::types::token::TokenAmount;
use core::fmt;
use ipld_core::cid::Cid;
use num_traits::Zero;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DealState {
    New,
    WaitForAcceptance,
    Accepted,
    ValidatePayment,
    SendPayment,
    Ongoing,
    PendingLastBlocks,
    Completed,
    Rejected,
    Failure,
}

impl DealState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DealState::Completed | DealState::Rejected | DealState::Failure)
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Channel address and lane the deal pays through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaychInfo {
    pub channel: Address,
    pub lane: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DealEvent {
    DealProposed,
    DealAccepted,
    DealRejected { reason: String },
    BlockReceived { size: u64 },
    AllBlocksReceived,
    PaymentRequested { owed: TokenAmount },
    PaychReady { info: PaychInfo },
    PaymentAuthorized { amount: TokenAmount },
    PaymentSent { amount: TokenAmount },
    PaymentFailed { reason: String },
    TransferCompleted,
    TransferFailed { reason: String },
}

impl DealEvent {
    fn name(&self) -> &'static str {
        match self {
            DealEvent::DealProposed => "DealProposed",
            DealEvent::DealAccepted => "DealAccepted",
            DealEvent::DealRejected { .. } => "DealRejected",
            DealEvent::BlockReceived { .. } => "BlockReceived",
            DealEvent::AllBlocksReceived => "AllBlocksReceived",
            DealEvent::PaymentRequested { .. } => "PaymentRequested",
            DealEvent::PaychReady { .. } => "PaychReady",
            DealEvent::PaymentAuthorized { .. } => "PaymentAuthorized",
            DealEvent::PaymentSent { .. } => "PaymentSent",
            DealEvent::PaymentFailed { .. } => "PaymentFailed",
            DealEvent::TransferCompleted => "TransferCompleted",
            DealEvent::TransferFailed { .. } => "TransferFailed",
        }
    }
}

/// Work the driver performs on the deal's behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Find or create a channel to `to` funded for `amount`, then report
    /// `PaychReady`.
    SetupPaymentChannel {
        to: Address,
        amount: TokenAmount,
        known_channel: Option<Address>,
    },
    /// Issue a voucher for `amount` more on the lane and send it to the
    /// provider, then report `PaymentSent` or `PaymentFailed`.
    CreateVoucher {
        channel: Address,
        lane: u64,
        amount: TokenAmount,
    },
    Finished {
        state: DealState,
        reason: Option<String>,
    },
}

/// Terms agreed with the provider when the deal is proposed.
#[derive(Clone, Debug, PartialEq)]
pub struct DealTerms {
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
    pub total_size: u64,
    pub payment_address: Option<Address>,
    pub known_channel: Option<Address>,
}

impl DealTerms {
    pub fn free(total_size: u64) -> Self {
        Self {
            price_per_byte: TokenAmount::zero(),
            payment_interval: 0,
            payment_interval_increase: 0,
            total_size,
            payment_address: None,
            known_channel: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DealContext {
    pub id: DealId,
    pub root: Cid,
    pub received: u64,
    pub total_size: u64,
    pub all_received: bool,
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
    pub current_interval: u64,
    pub funds_spent: TokenAmount,
    pub payment_requested: TokenAmount,
    pub payment_address: Option<Address>,
    pub known_channel: Option<Address>,
    pub paych: Option<PaychInfo>,
    /// Completion reported while a payment was in flight.
    pub completion_pending: bool,
    pub failure: Option<String>,
}

impl DealContext {
    pub fn is_free(&self) -> bool {
        self.price_per_byte.is_zero()
    }

    /// Amount the provider may claim for bytes delivered so far.
    pub fn payable(&self) -> TokenAmount {
        &self.price_per_byte * TokenAmount::from(self.received) - &self.funds_spent
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Deal {
    state: DealState,
    ctx: DealContext,
}

impl Deal {
    pub fn new(id: DealId, root: Cid, terms: DealTerms) -> Self {
        Self {
            state: DealState::New,
            ctx: DealContext {
                id,
                root,
                received: 0,
                total_size: terms.total_size,
                all_received: false,
                price_per_byte: terms.price_per_byte,
                payment_interval: terms.payment_interval,
                payment_interval_increase: terms.payment_interval_increase,
                current_interval: terms.payment_interval,
                funds_spent: TokenAmount::zero(),
                payment_requested: TokenAmount::zero(),
                payment_address: terms.payment_address,
                known_channel: terms.known_channel,
                paych: None,
                completion_pending: false,
                failure: None,
            },
        }
    }

    pub fn state(&self) -> DealState {
        self.state
    }

    pub fn context(&self) -> &DealContext {
        &self.ctx
    }

    pub fn apply(&mut self, event: DealEvent) -> Result<Vec<Effect>> {
        use DealEvent as E;
        use DealState as S;

        if self.state.is_terminal() {
            return Err(self.invalid(&event));
        }

        match (self.state, event) {
            (S::New, E::DealProposed) => {
                self.state = S::WaitForAcceptance;
                Ok(Vec::new())
            }
            (S::WaitForAcceptance, E::DealAccepted) => {
                self.state = S::Accepted;
                if self.ctx.is_free() {
                    return Ok(Vec::new());
                }
                match self.ctx.payment_address.clone() {
                    Some(to) => Ok(vec![Effect::SetupPaymentChannel {
                        to,
                        amount: &self.ctx.price_per_byte * TokenAmount::from(self.ctx.total_size),
                        known_channel: self.ctx.known_channel.clone(),
                    }]),
                    None => Ok(self.finish(S::Failure, Some("paid deal has no payment address".into()))),
                }
            }
            (S::WaitForAcceptance, E::DealRejected { reason }) => {
                Ok(self.finish(S::Rejected, Some(reason)))
            }
            (_, E::BlockReceived { size }) => {
                self.ctx.received += size;
                match self.state {
                    S::Accepted if self.ctx.is_free() => {
                        self.state = S::Ongoing;
                        Ok(Vec::new())
                    }
                    S::ValidatePayment => self.check_payment(),
                    _ => Ok(Vec::new()),
                }
            }
            (_, E::AllBlocksReceived) => {
                self.ctx.all_received = true;
                if self.state == S::PendingLastBlocks {
                    return Ok(self.finish(S::Completed, None));
                }
                Ok(Vec::new())
            }
            (S::Accepted | S::Ongoing | S::ValidatePayment, E::PaymentRequested { owed })
                if !self.ctx.is_free() =>
            {
                self.state = S::ValidatePayment;
                self.ctx.payment_requested = owed;
                self.check_payment()
            }
            (_, E::PaychReady { info }) => {
                self.ctx.paych = Some(info);
                if self.state == S::ValidatePayment {
                    return self.check_payment();
                }
                Ok(Vec::new())
            }
            (S::ValidatePayment, E::PaymentAuthorized { amount }) => {
                let Some(paych) = self.ctx.paych.clone() else {
                    return Err(self.invalid(&E::PaymentAuthorized { amount }));
                };
                self.state = S::SendPayment;
                Ok(vec![Effect::CreateVoucher {
                    channel: paych.channel,
                    lane: paych.lane,
                    amount,
                }])
            }
            (S::SendPayment, E::PaymentSent { amount }) => {
                self.ctx.funds_spent += amount;
                self.ctx.payment_requested = TokenAmount::zero();
                self.ctx.current_interval = next_interval(
                    self.ctx.current_interval,
                    self.ctx.payment_interval,
                    self.ctx.payment_interval_increase,
                );
                self.state = S::Ongoing;
                if self.ctx.completion_pending {
                    self.ctx.completion_pending = false;
                    return Ok(self.complete());
                }
                Ok(Vec::new())
            }
            (_, E::PaymentFailed { reason }) => Ok(self.finish(S::Failure, Some(reason))),
            (S::ValidatePayment | S::SendPayment, E::TransferCompleted) => {
                self.ctx.completion_pending = true;
                Ok(Vec::new())
            }
            (S::Accepted | S::Ongoing, E::TransferCompleted) => Ok(self.complete()),
            (_, E::TransferFailed { reason }) => Ok(self.finish(S::Failure, Some(reason))),
            (_, event) => Err(self.invalid(&event)),
        }
    }

    fn complete(&mut self) -> Vec<Effect> {
        if self.ctx.all_received {
            self.finish(DealState::Completed, None)
        } else {
            self.state = DealState::PendingLastBlocks;
            Vec::new()
        }
    }

    /// Authorizes the outstanding request once the channel is known and the
    /// amount is covered by delivered bytes.
    fn check_payment(&mut self) -> Result<Vec<Effect>> {
        if self.ctx.paych.is_none() {
            return Ok(Vec::new());
        }
        let owed = self.ctx.payment_requested.clone();
        if owed.is_zero() {
            self.state = DealState::Ongoing;
            return Ok(Vec::new());
        }
        if owed > self.ctx.payable() {
            return Ok(Vec::new());
        }
        self.apply(DealEvent::PaymentAuthorized { amount: owed })
    }

    fn finish(&mut self, state: DealState, reason: Option<String>) -> Vec<Effect> {
        self.state = state;
        self.ctx.failure = reason.clone();
        vec![Effect::Finished { state, reason }]
    }

    fn invalid(&self, event: &DealEvent) -> KernelError {
        KernelError::InvalidTransition {
            state: self.state.to_string(),
            event: event.name().to_string(),
        }
    }
}

/// Threshold of the payment interval following `current`. Interval sizes
/// grow by `increase` each time one is crossed.
pub fn next_interval(current: u64, interval: u64, increase: u64) -> u64 {
    if interval == 0 && increase == 0 {
        return u64::MAX;
    }
    let mut threshold = 0u64;
    let mut size = interval;
    while threshold <= current {
        threshold = threshold.saturating_add(size);
        size = size.saturating_add(increase);
        if threshold == u64::MAX {
            break;
        }
    }
    threshold
}
