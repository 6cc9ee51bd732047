// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Varint length-prefixed framing for exchange messages.

use super::message::ExchangeMessage;
use crate::errors::ExchangeError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use unsigned_varint::{decode, encode};

#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame: usize,
}

impl MessageCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for MessageCodec {
    type Item = ExchangeMessage;
    type Error = ExchangeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (len, header) = match decode::usize(&src[..]) {
            Ok((len, rest)) => (len, src.len() - rest.len()),
            Err(decode::Error::Insufficient) => return Ok(None),
            Err(e) => return Err(ExchangeError::Codec(e.to_string())),
        };
        if len > self.max_frame {
            return Err(ExchangeError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }
        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }
        src.advance(header);
        let frame = src.split_to(len);
        ExchangeMessage::from_bytes(&frame).map(Some)
    }
}

impl Encoder<ExchangeMessage> for MessageCodec {
    type Error = ExchangeError;

    fn encode(&mut self, item: ExchangeMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_bytes()?;
        if body.len() > self.max_frame {
            return Err(ExchangeError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame,
            });
        }
        let mut buf = encode::usize_buffer();
        let header = encode::usize(body.len(), &mut buf);
        dst.reserve(header.len() + body.len());
        dst.put_slice(header);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::message::{ExchangeResponse, ResponseStatus};
    use ferry_kernel::types::block::RAW;
    use ferry_kernel::types::id::RequestId;
    use ferry_kernel::Block;

    fn message() -> ExchangeMessage {
        ExchangeMessage {
            responses: vec![ExchangeResponse {
                id: RequestId(7),
                status: ResponseStatus::Partial,
                extensions: Default::default(),
            }],
            blocks: vec![Block::new(RAW, b"payload".to_vec()).unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = MessageCodec::new(1 << 20);
        let mut full = BytesMut::new();
        codec.encode(message(), &mut full).unwrap();

        // 1. Feed all but the last byte
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // 2. Complete the frame
        partial.put_u8(full[full.len() - 1]);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, message());
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut big = MessageCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        big.encode(message(), &mut buf).unwrap();

        let mut small = MessageCodec::new(8);
        assert!(matches!(
            small.decode(&mut buf),
            Err(ExchangeError::FrameTooLarge { max: 8, .. })
        ));
    }
}
