// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reading payment channel actor state from chain.

use crate::errors::{PaychError, RpcError};
use crate::rpc::ChainRpc;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ferry_kernel::amt::{Amt, AmtStep};
use ferry_kernel::types::address::Address;
use ferry_kernel::types::block::decode_cbor;
use ferry_kernel::types::token::{parse_token, TokenAmount};
use futures::Stream;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;

type Result<T> = std::result::Result<T, PaychError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ActorState {
    pub balance: TokenAmount,
    pub from: Address,
    pub to: Address,
    pub lane_states: Cid,
}

pub async fn read_actor_state(rpc: &dyn ChainRpc, channel: &Address) -> Result<ActorState> {
    let reply = rpc
        .send("StateReadState", json!([channel.as_str(), Value::Null]))
        .await?;
    let state = reply
        .get("State")
        .ok_or_else(|| PaychError::State(format!("{channel} has no actor state")))?;
    Ok(ActorState {
        balance: parse_token(str_field(&reply, "Balance")?)?,
        from: Address::new(str_field(state, "From")?),
        to: Address::new(str_field(state, "To")?),
        lane_states: link_field(state, "LaneStates")?,
    })
}

/// Fetches and decodes one dag-cbor object.
pub async fn read_obj(rpc: &dyn ChainRpc, cid: &Cid) -> Result<Ipld> {
    let reply = rpc.send("ChainReadObj", json!([{ "/": cid.to_string() }])).await?;
    let encoded = reply
        .as_str()
        .ok_or_else(|| RpcError::Decode("ChainReadObj did not return a string".into()))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| RpcError::Decode(e.to_string()))?;
    Ok(decode_cbor(&bytes)?)
}

/// Streams the entries of the AMT rooted at `root`, fetching child nodes
/// only when the walk reaches them.
pub fn amt_entries(
    rpc: Arc<dyn ChainRpc>,
    root: Cid,
    start: u64,
) -> Pin<Box<dyn Stream<Item = Result<(u64, Ipld)>> + Send>> {
    let stream = async_stream::try_stream! {
        let amt = Amt::from_root(&read_obj(rpc.as_ref(), &root).await?)?;
        let mut cursor = amt.cursor(start);
        loop {
            match cursor.step()? {
                AmtStep::Entry(index, value) => yield (index, value),
                AmtStep::NeedNode(cid) => {
                    let node = read_obj(rpc.as_ref(), &cid).await?;
                    cursor.resume(&cid, &node)?;
                }
                AmtStep::Done => break,
            }
        }
    };
    Box::pin(stream)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PaychError::State(format!("missing string field {key}")))
}

fn link_field(value: &Value, key: &str) -> Result<Cid> {
    let raw = value
        .get(key)
        .and_then(|v| v.get("/"))
        .and_then(Value::as_str)
        .ok_or_else(|| PaychError::State(format!("missing link field {key}")))?;
    Cid::try_from(raw).map_err(|e| PaychError::State(format!("{key}: {e}")))
}
