// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

use crate::amt::Amt;
use crate::codec::{as_list, as_token, as_u64, int, token};
use crate::error::{KernelError, Result};
use crate::types::token::TokenAmount;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

/// Per-lane state as stored by the payment channel actor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaneState {
    pub redeemed: TokenAmount,
    pub nonce: u64,
}

impl LaneState {
    pub fn new(redeemed: TokenAmount, nonce: u64) -> Self {
        Self { redeemed, nonce }
    }

    pub fn to_ipld(&self) -> Ipld {
        Ipld::List(vec![token(&self.redeemed), int(self.nonce)])
    }

    /// Decodes `[redeemed, nonce]`.
    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        match as_list(node)? {
            [redeemed, nonce] => Ok(Self {
                redeemed: as_token(redeemed)?,
                nonce: as_u64(nonce)?,
            }),
            _ => Err(KernelError::Decode("lane state must be [redeemed, nonce]".into())),
        }
    }
}

/// Reads every lane from a lane-states AMT.
pub fn load_lane_states<G>(root: &Cid, mut get: G) -> Result<Vec<(u64, LaneState)>>
where
    G: FnMut(&Cid) -> Result<Ipld>,
{
    let amt = Amt::load(root, &mut get)?;
    amt.entries(0, &mut get)?
        .into_iter()
        .map(|(lane, value)| -> Result<(u64, LaneState)> { Ok((lane, LaneState::from_ipld(&value)?)) })
        .collect()
}
