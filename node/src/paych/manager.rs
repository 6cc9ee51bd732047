// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Client-side payment channel manager.
//!
//! Channels are cached per (from, to). Creating or funding a channel holds
//! that pair's lock across the chain round-trips, so two deals paying the
//! same provider never both create a channel. The shared cache lock is only
//! taken between round-trips.

use super::actor::{amt_entries, read_actor_state};
use crate::config::NodeConfig;
use crate::errors::{PaychError, RpcError};
use crate::rpc::ChainRpc;
use crate::signer::Signer;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ferry_kernel::codec::as_list;
use ferry_kernel::paych::{LaneState, PayChState, SignedVoucher};
use ferry_kernel::types::address::Address;
use ferry_kernel::types::block::{decode_cbor, encode_cbor};
use ferry_kernel::types::token::TokenAmount;
use futures::TryStreamExt;
use ipld_core::ipld::Ipld;
use num_traits::Zero;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, PaychError>;
type Pair = (Address, Address);

/// Address of the init actor, which executes channel construction.
const INIT_ACTOR: &str = "f01";
const METHOD_SEND: u64 = 0;
const METHOD_EXEC: u64 = 2;

/// Result of `create_voucher`. A non-zero shortfall means nothing was
/// recorded and `voucher` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoucherOutcome {
    pub voucher: Option<SignedVoucher>,
    pub shortfall: TokenAmount,
}

#[derive(Default)]
struct Channels {
    states: FxHashMap<Address, PayChState>,
    by_pair: FxHashMap<Pair, Address>,
}

impl Channels {
    fn insert(&mut self, state: PayChState) -> Address {
        let addr = state.channel.clone();
        self.by_pair
            .insert((state.from.clone(), state.to.clone()), addr.clone());
        self.states.insert(addr.clone(), state);
        addr
    }

    fn get_mut(&mut self, channel: &Address) -> Result<&mut PayChState> {
        self.states
            .get_mut(channel)
            .ok_or_else(|| PaychError::ChannelNotFound(channel.to_string()))
    }
}

pub struct PaychManager {
    rpc: Option<Arc<dyn ChainRpc>>,
    signer: Option<Arc<dyn Signer>>,
    msg_timeout: Duration,
    max_retries: u32,
    actor_code: String,
    channels: Mutex<Channels>,
    pairs: Mutex<FxHashMap<Pair, Arc<Mutex<()>>>>,
}

impl PaychManager {
    pub fn new(
        rpc: Option<Arc<dyn ChainRpc>>,
        signer: Option<Arc<dyn Signer>>,
        config: &NodeConfig,
    ) -> Self {
        Self {
            rpc,
            signer,
            msg_timeout: config.msg_timeout(),
            max_retries: config.max_retries,
            actor_code: config.paych_actor_code.clone(),
            channels: Mutex::new(Channels::default()),
            pairs: Mutex::new(FxHashMap::default()),
        }
    }

    /// The wallet address deals pay from.
    pub fn wallet(&self) -> Result<Address> {
        Ok(self.signer()?.address())
    }

    /// Returns a channel from `from` to `to` able to cover `amount`,
    /// funding, loading, or creating one as needed.
    pub async fn get_channel(
        &self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
        known: Option<&Address>,
    ) -> Result<Address> {
        let pair = (from.clone(), to.clone());
        let slot = self.pairs.lock().await.entry(pair.clone()).or_default().clone();
        let _pair_guard = slot.lock().await;

        let cached = {
            let mut channels = self.channels.lock().await;
            match channels.by_pair.get(&pair).cloned() {
                Some(addr) => {
                    let spendable = channels.get_mut(&addr)?.spendable();
                    Some((addr, spendable))
                }
                None => None,
            }
        };
        if let Some((addr, spendable)) = cached {
            if &spendable >= amount {
                return Ok(addr);
            }
            tracing::info!("Channel {} has {} spendable, adding {}", addr, spendable, amount);
            let cid = self.push_message(from, &addr, amount, METHOD_SEND, Vec::new()).await?;
            self.wait_for_msg(&cid).await?;
            self.channels.lock().await.get_mut(&addr)?.add_funds(amount);
            return Ok(addr);
        }

        if let Some(known) = known {
            let state = self.load_state_from_actor(known).await?;
            return Ok(self.channels.lock().await.insert(state));
        }

        let params = encode_cbor(&Ipld::List(vec![
            Ipld::String(self.actor_code.clone()),
            Ipld::Bytes(encode_cbor(&Ipld::List(vec![
                Ipld::String(from.to_string()),
                Ipld::String(to.to_string()),
            ]))?),
        ]))?;
        let cid = self
            .push_message(from, &Address::new(INIT_ACTOR), amount, METHOD_EXEC, params)
            .await?;
        let ret = self.wait_for_msg(&cid).await?;
        let addr = exec_return_address(&ret)?;
        tracing::info!("Created channel {} from {} to {}", addr, from, to);
        let state = PayChState::new(addr, from.clone(), to.clone(), amount.clone());
        Ok(self.channels.lock().await.insert(state))
    }

    /// Reads a channel's balance and lane states from chain.
    pub async fn load_state_from_actor(&self, channel: &Address) -> Result<PayChState> {
        let rpc = self.rpc()?;
        let actor = read_actor_state(rpc.as_ref(), channel).await?;
        let lanes: Vec<(u64, LaneState)> = amt_entries(rpc.clone(), actor.lane_states, 0)
            .and_then(|(lane, value)| async move {
                Ok::<_, PaychError>((lane, LaneState::from_ipld(&value)?))
            })
            .try_collect()
            .await?;
        tracing::debug!("Loaded {} lanes for {}", lanes.len(), channel);
        Ok(PayChState::from_lanes(
            channel.clone(),
            actor.from,
            actor.to,
            actor.balance,
            lanes,
        ))
    }

    /// Caches a channel whose state is already known.
    pub async fn add_channel(&self, state: PayChState) -> Address {
        self.channels.lock().await.insert(state)
    }

    pub async fn allocate_lane(&self, channel: &Address) -> Result<u64> {
        Ok(self.channels.lock().await.get_mut(channel)?.allocate_lane())
    }

    pub async fn channel_state(&self, channel: &Address) -> Result<PayChState> {
        Ok(self.channels.lock().await.get_mut(channel)?.clone())
    }

    pub async fn list_vouchers(&self, channel: &Address) -> Result<Vec<SignedVoucher>> {
        Ok(self.channels.lock().await.get_mut(channel)?.vouchers.clone())
    }

    /// Signs a voucher paying `amount` more on `lane`. When the channel
    /// balance cannot cover it, reports the shortfall and leaves the lane's
    /// nonce untouched.
    pub async fn create_voucher(
        &self,
        channel: &Address,
        amount: &TokenAmount,
        lane: u64,
    ) -> Result<VoucherOutcome> {
        let mut channels = self.channels.lock().await;
        let state = channels.get_mut(channel)?;

        let mut voucher = state.draft_voucher(lane, amount);
        let shortfall = state.shortfall_for(&voucher);
        if !shortfall.is_zero() {
            metrics::counter!("ferry_voucher_shortfalls_total", 1);
            tracing::warn!("Voucher on {} lane {} short by {}", channel, lane, shortfall);
            return Ok(VoucherOutcome {
                voucher: None,
                shortfall,
            });
        }

        voucher.signature = Some(self.signer()?.sign(&voucher.signing_bytes()?)?);
        state.record_voucher(voucher.clone());
        metrics::counter!("ferry_vouchers_issued_total", 1);
        tracing::debug!(
            "Voucher on {} lane {} nonce {} for {}",
            channel,
            lane,
            voucher.nonce,
            voucher.amount
        );
        Ok(VoucherOutcome {
            voucher: Some(voucher),
            shortfall,
        })
    }

    async fn push_message(
        &self,
        from: &Address,
        to: &Address,
        value: &TokenAmount,
        method: u64,
        params: Vec<u8>,
    ) -> Result<String> {
        let rpc = self.rpc()?;
        let signer = self.signer()?;

        let nonce = rpc.send("MpoolGetNonce", json!([from.as_str()])).await?;
        let msg = json!({
            "Version": 0,
            "To": to.as_str(),
            "From": from.as_str(),
            "Nonce": nonce,
            "Value": value.to_string(),
            "GasLimit": 0,
            "GasFeeCap": "0",
            "GasPremium": "0",
            "Method": method,
            "Params": STANDARD.encode(&params),
        });
        let msg = rpc
            .send("GasEstimateMessageGas", json!([msg, { "MaxFee": "0" }, Value::Null]))
            .await?;

        let payload = serde_json::to_vec(&msg).map_err(|e| PaychError::Signer(e.to_string()))?;
        let sig = signer.sign(&payload)?;
        let signed = json!({
            "Message": msg,
            "Signature": { "Type": sig.kind, "Data": STANDARD.encode(&sig.data) },
        });
        let reply = rpc.send("MpoolPush", json!([signed])).await?;
        let cid = reply
            .get("/")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("MpoolPush did not return a CID".into()))?;
        tracing::debug!("Pushed message {} (method {}) to {}", cid, method, to);
        Ok(cid.to_string())
    }

    /// Polls for the message's receipt and returns its return bytes.
    async fn wait_for_msg(&self, cid: &str) -> Result<Vec<u8>> {
        let rpc = self.rpc()?;
        for attempt in 1..=self.max_retries {
            tokio::time::sleep(self.msg_timeout).await;
            let lookup = rpc
                .send("StateSearchMsg", json!([Value::Null, { "/": cid }, -1, true]))
                .await?;
            let Some(receipt) = lookup.get("Receipt") else {
                tracing::debug!("Message {} not on chain yet (attempt {})", cid, attempt);
                continue;
            };
            let exit_code = receipt.get("ExitCode").and_then(Value::as_i64).unwrap_or(0);
            if exit_code != 0 {
                return Err(PaychError::MessageExecutionFailed {
                    cid: cid.to_string(),
                    exit_code,
                });
            }
            let ret = match receipt.get("Return").and_then(Value::as_str) {
                Some(s) => STANDARD
                    .decode(s)
                    .map_err(|e| RpcError::Decode(e.to_string()))?,
                None => Vec::new(),
            };
            return Ok(ret);
        }
        Err(PaychError::ConfirmationTimeout {
            cid: cid.to_string(),
            attempts: self.max_retries,
        })
    }

    fn rpc(&self) -> Result<&Arc<dyn ChainRpc>> {
        self.rpc.as_ref().ok_or(PaychError::NoChain)
    }

    fn signer(&self) -> Result<&Arc<dyn Signer>> {
        self.signer
            .as_ref()
            .ok_or_else(|| PaychError::Signer("no wallet key configured".into()))
    }
}

/// Exec returns `[id_address, robust_address]`; the channel is known by the
/// robust one.
fn exec_return_address(ret: &[u8]) -> Result<Address> {
    let node = decode_cbor(ret)?;
    match as_list(&node)? {
        [_, Ipld::String(robust)] => Ok(Address::new(robust.clone())),
        _ => Err(PaychError::State("unexpected exec return".into())),
    }
}
