// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{Properties, PropertyLocation};
use crate::protocol::ProtocolVersion;
use crate::reason_code::ReasonCode;
use crate::traits::{DecodePacket, EncodePacket};

/// `SUBACK`: one reason code per filter in the matching `SUBSCRIBE`.
/// Under v3.1.1 each byte is a granted-QoS-or-0x80 return
/// code; [`ReasonCode::to_v3_suback`] renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: Properties,
    pub reason_codes: Vec<ReasonCode>,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(version: ProtocolVersion, packet_id: u16, reason_codes: Vec<ReasonCode>) -> Self {
        Self {
            version,
            packet_id,
            properties: Properties::new(),
            reason_codes,
        }
    }

    /// # Errors
    /// Returns [`DecodeError`] on malformed or out-of-spec bytes.
    pub fn decode(buf: &mut Buffer, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(buf)?;
        let packet_id = buf.read_u16()?;
        if packet_id == 0 {
            return Err(DecodeError::ZeroPacketId);
        }

        let properties = if version.is_v5() {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::SubAck)?;
            props
        } else {
            Properties::new()
        };

        let mut reason_codes = Vec::new();
        while !buf.is_empty() {
            let byte = buf.read_u8()?;
            let code = if version.is_v5() {
                ReasonCode::try_from(byte)?
            } else {
                match byte {
                    0x00 => ReasonCode::Success,
                    0x01 => ReasonCode::GrantedQos1,
                    0x02 => ReasonCode::GrantedQos2,
                    0x80 => ReasonCode::UnspecifiedError,
                    other => return Err(DecodeError::InvalidReasonCode(other)),
                }
            };
            reason_codes.push(code);
        }
        if reason_codes.is_empty() {
            return Err(DecodeError::EmptyFilterList);
        }

        Ok(Self {
            version,
            packet_id,
            properties,
            reason_codes,
        })
    }
}

impl EncodePacket for SubAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        crate::buffer::write_u16(&mut body, self.packet_id);
        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        for code in &self.reason_codes {
            if self.version.is_v5() {
                body.push((*code).into());
            } else {
                body.push(code.to_v3_suback());
            }
        }

        let header = FixedHeader::new(ControlPacketType::SubscribeAck, 0, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}
