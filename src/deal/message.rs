// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Data-transfer envelope and retrieval vouchers.
//!
//! The envelope travels as a dag-cbor extension on block-exchange requests
//! and responses. Vouchers ride inside it, tagged by a type string.

use super::state::DealEvent;
use super::status::DealStatus;
use crate::codec::{
    as_bool, as_bytes, as_cid, as_string, as_token, as_u64, field, int, opt_field, token,
    MapBuilder,
};
use crate::error::{KernelError, Result};
use crate::paych::SignedVoucher;
use crate::selector::SelectorNode;
use crate::types::address::Address;
use crate::types::block::{decode_cbor, encode_cbor};
use crate::types::id::DealId;
use crate::types::token::TokenAmount;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

pub const PROPOSAL_VOUCHER: &str = "RetrievalDealProposal/1";
pub const PAYMENT_VOUCHER: &str = "RetrievalDealPayment/1";
pub const RESPONSE_VOUCHER: &str = "RetrievalDealResponse/1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    New = 0,
    Update = 1,
    Cancel = 2,
    Complete = 3,
    Voucher = 4,
    VoucherResult = 5,
    Restart = 6,
}

impl MessageType {
    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            0 => MessageType::New,
            1 => MessageType::Update,
            2 => MessageType::Cancel,
            3 => MessageType::Complete,
            4 => MessageType::Voucher,
            5 => MessageType::VoucherResult,
            6 => MessageType::Restart,
            other => return Err(KernelError::Decode(format!("unknown transfer message type {other}"))),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DealParams {
    pub selector: SelectorNode,
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
    pub unseal_price: TokenAmount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DealProposal {
    pub id: DealId,
    pub payload_cid: Cid,
    pub params: DealParams,
}

impl DealProposal {
    pub fn to_ipld(&self) -> Result<Ipld> {
        let params = MapBuilder::new()
            .put("Selector", Ipld::Bytes(self.params.selector.to_bytes()?))
            .put("PieceCID", Ipld::Null)
            .put("PricePerByte", token(&self.params.price_per_byte))
            .put("PaymentInterval", int(self.params.payment_interval))
            .put("PaymentIntervalIncrease", int(self.params.payment_interval_increase))
            .put("UnsealPrice", token(&self.params.unseal_price))
            .build();
        Ok(MapBuilder::new()
            .put("ID", int(self.id.0))
            .put("PayloadCID", Ipld::Link(self.payload_cid))
            .put("Params", params)
            .build())
    }

    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        let params = field(node, "Params")?;
        Ok(Self {
            id: DealId(as_u64(field(node, "ID")?)?),
            payload_cid: as_cid(field(node, "PayloadCID")?)?,
            params: DealParams {
                selector: SelectorNode::from_bytes(as_bytes(field(params, "Selector")?)?)?,
                price_per_byte: as_token(field(params, "PricePerByte")?)?,
                payment_interval: as_u64(field(params, "PaymentInterval")?)?,
                payment_interval_increase: as_u64(field(params, "PaymentIntervalIncrease")?)?,
                unseal_price: opt_field(params, "UnsealPrice")
                    .map(as_token)
                    .transpose()?
                    .unwrap_or_default(),
            },
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DealPayment {
    pub id: DealId,
    pub channel: Address,
    pub voucher: SignedVoucher,
}

impl DealPayment {
    pub fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put("ID", int(self.id.0))
            .put("PaymentChannel", Ipld::String(self.channel.to_string()))
            .put("PaymentVoucher", self.voucher.to_ipld())
            .build()
    }

    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        Ok(Self {
            id: DealId(as_u64(field(node, "ID")?)?),
            channel: Address::new(as_string(field(node, "PaymentChannel")?)?),
            voucher: SignedVoucher::from_ipld(field(node, "PaymentVoucher")?)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DealResponse {
    pub id: DealId,
    pub status: DealStatus,
    pub payment_owed: TokenAmount,
    pub message: String,
}

impl DealResponse {
    pub fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put("ID", int(self.id.0))
            .put("Status", int(self.status.code()))
            .put("PaymentOwed", token(&self.payment_owed))
            .put("Message", Ipld::String(self.message.clone()))
            .build()
    }

    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        let code = as_u64(field(node, "Status")?)?;
        Ok(Self {
            id: DealId(as_u64(field(node, "ID")?)?),
            status: DealStatus::from_code(code)
                .ok_or_else(|| KernelError::Decode(format!("unknown deal status {code}")))?,
            payment_owed: opt_field(node, "PaymentOwed")
                .map(as_token)
                .transpose()?
                .unwrap_or_default(),
            message: opt_field(node, "Message")
                .map(as_string)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferRequest {
    pub base_cid: Option<Cid>,
    pub kind: MessageType,
    pub pull: bool,
    pub paused: bool,
    pub partial: bool,
    pub selector: Option<Vec<u8>>,
    pub voucher: Option<Ipld>,
    pub voucher_type: String,
    pub transfer_id: u64,
}

impl TransferRequest {
    /// Opening request of a pull transfer carrying the deal proposal.
    pub fn proposal(proposal: &DealProposal) -> Result<Self> {
        Ok(Self {
            base_cid: Some(proposal.payload_cid),
            kind: MessageType::New,
            pull: true,
            paused: false,
            partial: false,
            selector: Some(proposal.params.selector.to_bytes()?),
            voucher: Some(proposal.to_ipld()?),
            voucher_type: PROPOSAL_VOUCHER.to_string(),
            transfer_id: proposal.id.0,
        })
    }

    pub fn payment(payment: &DealPayment) -> Self {
        Self {
            base_cid: None,
            kind: MessageType::Voucher,
            pull: true,
            paused: false,
            partial: false,
            selector: None,
            voucher: Some(payment.to_ipld()),
            voucher_type: PAYMENT_VOUCHER.to_string(),
            transfer_id: payment.id.0,
        }
    }

    fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put_opt("BCid", self.base_cid.map(Ipld::Link))
            .put("Type", int(self.kind as u64))
            .put("Pull", Ipld::Bool(self.pull))
            .put("Paus", Ipld::Bool(self.paused))
            .put("Part", Ipld::Bool(self.partial))
            .put_opt("Stor", self.selector.clone().map(Ipld::Bytes))
            .put_opt("Vouch", self.voucher.clone())
            .put("VTyp", Ipld::String(self.voucher_type.clone()))
            .put("XferID", int(self.transfer_id))
            .build()
    }

    fn from_ipld(node: &Ipld) -> Result<Self> {
        Ok(Self {
            base_cid: opt_field(node, "BCid").map(as_cid).transpose()?,
            kind: MessageType::from_code(as_u64(field(node, "Type")?)?)?,
            pull: as_bool(field(node, "Pull")?)?,
            paused: opt_field(node, "Paus").map(as_bool).transpose()?.unwrap_or(false),
            partial: opt_field(node, "Part").map(as_bool).transpose()?.unwrap_or(false),
            selector: opt_field(node, "Stor")
                .map(|s| as_bytes(s).map(<[u8]>::to_vec))
                .transpose()?,
            voucher: opt_field(node, "Vouch").cloned(),
            voucher_type: opt_field(node, "VTyp")
                .map(as_string)
                .transpose()?
                .unwrap_or_default(),
            transfer_id: as_u64(field(node, "XferID")?)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferResponse {
    pub kind: MessageType,
    pub accepted: bool,
    pub paused: bool,
    pub transfer_id: u64,
    pub voucher_result: Option<Ipld>,
    pub voucher_result_type: String,
}

impl TransferResponse {
    pub fn with_result(kind: MessageType, transfer_id: u64, result: &DealResponse) -> Self {
        Self {
            kind,
            accepted: !matches!(result.status, DealStatus::Rejected | DealStatus::DealNotFound),
            paused: false,
            transfer_id,
            voucher_result: Some(result.to_ipld()),
            voucher_result_type: RESPONSE_VOUCHER.to_string(),
        }
    }

    fn to_ipld(&self) -> Ipld {
        MapBuilder::new()
            .put("Type", int(self.kind as u64))
            .put("Acpt", Ipld::Bool(self.accepted))
            .put("Paus", Ipld::Bool(self.paused))
            .put("XferID", int(self.transfer_id))
            .put_opt("VRes", self.voucher_result.clone())
            .put("VTyp", Ipld::String(self.voucher_result_type.clone()))
            .build()
    }

    fn from_ipld(node: &Ipld) -> Result<Self> {
        Ok(Self {
            kind: MessageType::from_code(as_u64(field(node, "Type")?)?)?,
            accepted: as_bool(field(node, "Acpt")?)?,
            paused: opt_field(node, "Paus").map(as_bool).transpose()?.unwrap_or(false),
            transfer_id: as_u64(field(node, "XferID")?)?,
            voucher_result: opt_field(node, "VRes").cloned(),
            voucher_result_type: opt_field(node, "VTyp")
                .map(as_string)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// The retrieval deal response, when this carries one.
    pub fn deal_response(&self) -> Result<Option<DealResponse>> {
        match &self.voucher_result {
            Some(result) if self.voucher_result_type == RESPONSE_VOUCHER => {
                DealResponse::from_ipld(result).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransferMessage {
    Request(TransferRequest),
    Response(TransferResponse),
}

impl TransferMessage {
    pub fn to_ipld(&self) -> Ipld {
        match self {
            TransferMessage::Request(req) => MapBuilder::new()
                .put("IsRq", Ipld::Bool(true))
                .put("Request", req.to_ipld())
                .build(),
            TransferMessage::Response(resp) => MapBuilder::new()
                .put("IsRq", Ipld::Bool(false))
                .put("Response", resp.to_ipld())
                .build(),
        }
    }

    pub fn from_ipld(node: &Ipld) -> Result<Self> {
        if as_bool(field(node, "IsRq")?)? {
            TransferRequest::from_ipld(field(node, "Request")?).map(TransferMessage::Request)
        } else {
            TransferResponse::from_ipld(field(node, "Response")?).map(TransferMessage::Response)
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_cbor(&self.to_ipld())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_ipld(&decode_cbor(bytes)?)
    }
}

/// State-machine events implied by a provider's response.
pub fn events_for_response(response: &TransferResponse) -> Result<Vec<DealEvent>> {
    let Some(deal) = response.deal_response()? else {
        if !response.accepted {
            return Ok(vec![DealEvent::DealRejected {
                reason: "provider declined the transfer".into(),
            }]);
        }
        return Ok(Vec::new());
    };
    let events = match deal.status {
        DealStatus::Accepted => vec![DealEvent::DealAccepted],
        DealStatus::Rejected | DealStatus::DealNotFound => vec![DealEvent::DealRejected {
            reason: deal.message,
        }],
        DealStatus::FundsNeeded => vec![DealEvent::PaymentRequested {
            owed: deal.payment_owed,
        }],
        DealStatus::FundsNeededLastPayment => vec![
            DealEvent::PaymentRequested {
                owed: deal.payment_owed,
            },
            DealEvent::TransferCompleted,
        ],
        DealStatus::Completed => vec![DealEvent::TransferCompleted],
        DealStatus::Errored => vec![DealEvent::TransferFailed {
            reason: deal.message,
        }],
        _ => Vec::new(),
    };
    Ok(events)
}
