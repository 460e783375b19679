// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::traits::{DecodePacket, EncodePacket};

/// `PINGREQ`: exactly the two fixed-header bytes, no variable header or
/// payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRequestPacket;

impl DecodePacket for PingRequestPacket {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let header = FixedHeader::decode(buf)?;
        if header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self)
    }
}

impl EncodePacket for PingRequestPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let header = FixedHeader::new(ControlPacketType::PingRequest, 0, 0)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        header.encode(buf)
    }
}

/// `PINGRESP`: the server's reply, same empty shape as `PINGREQ`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingResponsePacket;

impl DecodePacket for PingResponsePacket {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let header = FixedHeader::decode(buf)?;
        if header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self)
    }
}

impl EncodePacket for PingResponsePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let header = FixedHeader::new(ControlPacketType::PingResponse, 0, 0)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        header.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn pingreq_is_two_bytes() {
        let mut buf = Vec::new();
        assert_eq!(PingRequestPacket.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf, vec![0xc0, 0x00]);
    }

    #[test]
    fn pingresp_round_trips() {
        let mut buf = Vec::new();
        PingResponsePacket.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(PingResponsePacket::decode(&mut cursor).unwrap(), PingResponsePacket);
    }
}
