// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

use crate::codec::{as_bytes, as_list, as_token, as_u64, int, token};
use crate::error::{KernelError, Result};
use crate::types::address::Address;
use crate::types::block::encode_cbor;
use crate::types::token::TokenAmount;
use ipld_core::ipld::Ipld;

/// Signature type tags, carried as the first byte of the serialized form.
pub const SIG_SECP256K1: u8 = 1;
pub const SIG_BLS: u8 = 2;
pub const SIG_ED25519: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub kind: u8,
    pub data: Vec<u8>,
}

impl Signature {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 1);
        out.push(self.kind);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&kind, data) = bytes
            .split_first()
            .ok_or_else(|| KernelError::Decode("empty signature".into()))?;
        Ok(Self {
            kind,
            data: data.to_vec(),
        })
    }
}

/// A cumulative claim on one lane of a payment channel. `amount` is the total
/// redeemable on the lane, not the increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedVoucher {
    pub channel: Address,
    pub lane: u64,
    pub nonce: u64,
    pub amount: TokenAmount,
    pub signature: Option<Signature>,
}

impl SignedVoucher {
    pub fn to_ipld(&self) -> Ipld {
        let signature = match &self.signature {
            Some(sig) => Ipld::Bytes(sig.to_bytes()),
            None => Ipld::Null,
        };
        self.tuple(signature)
    }

    /// The bytes covered by the signature: the voucher with no signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        encode_cbor(&self.tuple(Ipld::Null))
    }

    fn tuple(&self, signature: Ipld) -> Ipld {
        Ipld::List(vec![
            Ipld::String(self.channel.to_string()),
            int(0u64),
            int(0u64),
            Ipld::Bytes(Vec::new()),
            Ipld::Null,
            int(self.lane),
            int(self.nonce),
            token(&self.amount),
            int(0u64),
            Ipld::List(Vec::new()),
            signature,
        ])
    }

    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        let fields = as_list(node)?;
        if fields.len() != 11 {
            return Err(KernelError::Decode(format!(
                "voucher has {} fields, expected 11",
                fields.len()
            )));
        }
        let channel = match &fields[0] {
            Ipld::String(s) => Address::new(s.clone()),
            _ => return Err(KernelError::Decode("voucher channel is not a string".into())),
        };
        let signature = match &fields[10] {
            Ipld::Null => None,
            other => Some(Signature::from_bytes(as_bytes(other)?)?),
        };
        Ok(Self {
            channel,
            lane: as_u64(&fields[5])?,
            nonce: as_u64(&fields[6])?,
            amount: as_token(&fields[7])?,
            signature,
        })
    }
}
