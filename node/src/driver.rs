// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Runs one deal's state machine against the network.
//!
//! Transfer events arrive on a single queue and are applied in order. Effects
//! returned by a transition run to completion before the next transfer event
//! is looked at, so transitions on one deal never interleave.

use crate::errors::{Result, RetrievalError};
use crate::events::TransferEvent;
use crate::exchange::{Exchange, ExchangeResponse, Extensions};
use crate::loader::AsyncLoader;
use crate::paych::PaychManager;
use ferry_kernel::config::TRANSFER_EXTENSION;
use ferry_kernel::deal::{
    events_for_response, Deal, DealContext, DealEvent, DealPayment, DealState, Effect, PaychInfo,
    TransferMessage, TransferRequest,
};
use ferry_kernel::types::address::Address;
use ferry_kernel::types::id::RequestId;
use ferry_kernel::types::token::TokenAmount;
use num_traits::Zero;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Final view of a deal.
#[derive(Debug, Clone, PartialEq)]
pub struct DealOutcome {
    pub state: DealState,
    pub context: DealContext,
    /// Every state the deal passed through, starting with the first.
    pub history: Vec<DealState>,
}

pub struct DealHandle {
    state: watch::Receiver<DealState>,
    paying: watch::Receiver<bool>,
    task: JoinHandle<DealOutcome>,
}

impl DealHandle {
    pub fn state(&self) -> DealState {
        *self.state.borrow()
    }

    /// True while a channel setup or voucher is being worked on.
    pub fn paying(&self) -> watch::Receiver<bool> {
        self.paying.clone()
    }

    /// Waits for the deal to reach a terminal state.
    pub async fn finish(&mut self) -> Result<DealOutcome> {
        (&mut self.task)
            .await
            .map_err(|e| RetrievalError::DealFailed(format!("deal task ended: {e}")))
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

struct DealDriver {
    deal: Deal,
    request: RequestId,
    exchange: Arc<Exchange>,
    paych: Arc<PaychManager>,
    loader: Arc<AsyncLoader>,
    state: watch::Sender<DealState>,
    paying: watch::Sender<bool>,
    history: Vec<DealState>,
}

/// Starts driving `deal`, which must already have been proposed on
/// `request`.
pub fn spawn_deal(
    deal: Deal,
    request: RequestId,
    exchange: Arc<Exchange>,
    paych: Arc<PaychManager>,
    loader: Arc<AsyncLoader>,
    events: mpsc::UnboundedReceiver<TransferEvent>,
) -> DealHandle {
    let (tx, rx) = watch::channel(deal.state());
    let (paying_tx, paying_rx) = watch::channel(false);
    let driver = DealDriver {
        history: vec![deal.state()],
        deal,
        request,
        exchange,
        paych,
        loader,
        state: tx,
        paying: paying_tx,
    };
    DealHandle {
        state: rx,
        paying: paying_rx,
        task: tokio::spawn(driver.run(events)),
    }
}

impl DealDriver {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<TransferEvent>) -> DealOutcome {
        while !self.deal.state().is_terminal() {
            let deal_events = match events.recv().await {
                Some(TransferEvent::Response(response)) => response_events(&response),
                Some(TransferEvent::BlockReceived { size }) => vec![DealEvent::BlockReceived { size }],
                Some(TransferEvent::AllBlocksReceived) => vec![DealEvent::AllBlocksReceived],
                Some(TransferEvent::Disconnected(reason)) => vec![DealEvent::TransferFailed { reason }],
                None => vec![DealEvent::TransferFailed {
                    reason: "transfer events closed".into(),
                }],
            };
            for event in deal_events {
                self.dispatch(event).await;
            }
        }
        DealOutcome {
            state: self.deal.state(),
            context: self.deal.context().clone(),
            history: self.history,
        }
    }

    async fn dispatch(&mut self, event: DealEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            if self.deal.state().is_terminal() {
                return;
            }
            let effects = match self.deal.apply(event) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::warn!("Deal {}: {}", self.deal.context().id, e);
                    continue;
                }
            };
            self.record_state();
            for effect in effects {
                if let Some(next) = self.run_effect(effect).await {
                    queue.push_back(next);
                }
            }
        }
    }

    fn record_state(&mut self) {
        let state = self.deal.state();
        if self.history.last() != Some(&state) {
            tracing::debug!("Deal {} -> {}", self.deal.context().id, state);
            self.history.push(state);
            self.state.send_replace(state);
        }
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<DealEvent> {
        match effect {
            Effect::SetupPaymentChannel {
                to,
                amount,
                known_channel,
            } => {
                self.paying.send_replace(true);
                let ready = self.setup_channel(&to, &amount, known_channel.as_ref()).await;
                self.paying.send_replace(false);
                Some(match ready {
                    Ok(info) => DealEvent::PaychReady { info },
                    Err(e) => DealEvent::PaymentFailed { reason: e.to_string() },
                })
            }
            Effect::CreateVoucher {
                channel,
                lane,
                amount,
            } => {
                self.paying.send_replace(true);
                let sent = self.send_payment(channel, lane, &amount).await;
                self.paying.send_replace(false);
                Some(match sent {
                    Ok(()) => DealEvent::PaymentSent { amount },
                    Err(e) => DealEvent::PaymentFailed { reason: e.to_string() },
                })
            }
            Effect::Finished { state, reason } => {
                self.finished(state, reason).await;
                None
            }
        }
    }

    async fn setup_channel(
        &self,
        to: &Address,
        amount: &TokenAmount,
        known: Option<&Address>,
    ) -> Result<PaychInfo> {
        let from = self.paych.wallet()?;
        let channel = self.paych.get_channel(&from, to, amount, known).await?;
        let lane = self.paych.allocate_lane(&channel).await?;
        tracing::info!("Deal {} pays through {} lane {}", self.deal.context().id, channel, lane);
        Ok(PaychInfo { channel, lane })
    }

    async fn send_payment(
        &self,
        channel: Address,
        lane: u64,
        amount: &TokenAmount,
    ) -> Result<()> {
        let outcome = self.paych.create_voucher(&channel, amount, lane).await?;
        let voucher = match outcome.voucher {
            Some(v) if outcome.shortfall.is_zero() => v,
            _ => return Err(RetrievalError::PaymentShortfall(outcome.shortfall.to_string())),
        };
        let payment = DealPayment {
            id: self.deal.context().id,
            channel,
            voucher,
        };
        let message = TransferMessage::Request(TransferRequest::payment(&payment));
        let mut extensions = Extensions::new();
        extensions.insert(TRANSFER_EXTENSION.to_string(), message.to_bytes()?);
        self.exchange.update(self.request, extensions)?;
        Ok(())
    }

    async fn finished(&self, state: DealState, reason: Option<String>) {
        let id = self.deal.context().id;
        let reason = reason.unwrap_or_default();
        match state {
            DealState::Completed => {
                metrics::counter!("ferry_deals_completed_total", 1);
                tracing::info!("Deal {} completed ({} bytes)", id, self.deal.context().received);
            }
            DealState::Rejected => {
                metrics::counter!("ferry_deals_failed_total", 1);
                tracing::warn!("Deal {} rejected: {}", id, reason);
                self.exchange.cancel(self.request);
                self.loader.fail(RetrievalError::TransferRejected(reason)).await;
            }
            _ => {
                metrics::counter!("ferry_deals_failed_total", 1);
                tracing::warn!("Deal {} failed: {}", id, reason);
                self.exchange.cancel(self.request);
                self.loader.fail(RetrievalError::DealFailed(reason)).await;
            }
        }
    }
}

/// Deal events carried by an exchange response. A failed response with no
/// deal message still ends the deal.
fn response_events(response: &ExchangeResponse) -> Vec<DealEvent> {
    let decoded = response
        .extensions
        .get(TRANSFER_EXTENSION)
        .map(|bytes| TransferMessage::from_bytes(bytes));
    let events = match decoded {
        Some(Ok(TransferMessage::Response(resp))) => events_for_response(&resp),
        Some(Ok(TransferMessage::Request(_))) => Ok(Vec::new()),
        Some(Err(e)) => Err(e),
        None => Ok(Vec::new()),
    };
    let mut events = match events {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Undecodable deal message on request {}: {}", response.id, e);
            Vec::new()
        }
    };
    if events.is_empty() && response.status.is_failure() {
        events.push(DealEvent::TransferFailed {
            reason: format!("exchange status {}", response.status.code()),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ResponseStatus;
    use ferry_kernel::deal::{DealResponse, DealStatus, MessageType, TransferResponse};
    use ferry_kernel::types::id::DealId;

    fn response(status: ResponseStatus, deal: Option<DealResponse>) -> ExchangeResponse {
        let mut extensions = Extensions::new();
        if let Some(deal) = deal {
            let msg = TransferMessage::Response(TransferResponse::with_result(
                MessageType::VoucherResult,
                deal.id.0,
                &deal,
            ));
            extensions.insert(TRANSFER_EXTENSION.to_string(), msg.to_bytes().unwrap());
        }
        ExchangeResponse {
            id: RequestId(0),
            status,
            extensions,
        }
    }

    #[test]
    fn test_response_events_from_deal_message() {
        let deal = DealResponse {
            id: DealId(1),
            status: DealStatus::FundsNeeded,
            payment_owed: TokenAmount::from(87),
            message: String::new(),
        };
        assert_eq!(
            response_events(&response(ResponseStatus::Partial, Some(deal))),
            vec![DealEvent::PaymentRequested {
                owed: TokenAmount::from(87)
            }]
        );
    }

    #[test]
    fn test_bare_failure_ends_deal() {
        assert_eq!(
            response_events(&response(ResponseStatus::FailedBusy, None)),
            vec![DealEvent::TransferFailed {
                reason: "exchange status 31".into()
            }]
        );
        assert!(response_events(&response(ResponseStatus::Partial, None)).is_empty());
    }
}
