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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: Properties,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(version: ProtocolVersion, packet_id: u16) -> Self {
        Self {
            version,
            packet_id,
            properties: Properties::new(),
            filters: Vec::new(),
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
            props.validate(PropertyLocation::Unsubscribe)?;
            props
        } else {
            Properties::new()
        };

        let mut filters = Vec::new();
        while !buf.is_empty() {
            filters.push(buf.read_string()?);
        }
        if filters.is_empty() {
            return Err(DecodeError::EmptyFilterList);
        }

        Ok(Self {
            version,
            packet_id,
            properties,
            filters,
        })
    }
}

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if self.filters.is_empty() {
            return Err(EncodeError::PropertyNotAllowed(0));
        }

        let mut body = Vec::new();
        crate::buffer::write_u16(&mut body, self.packet_id);
        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        for filter in &self.filters {
            crate::buffer::write_string(&mut body, filter)?;
        }

        let header = FixedHeader::new(ControlPacketType::Unsubscribe, 0b0000_0010, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}

/// `UNSUBACK`. MQTT 3.1.1's variant carries nothing beyond
/// the packet id; `reason_codes` is therefore always empty under that
/// version, v5 requires exactly one per requested filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: Properties,
    pub reason_codes: Vec<ReasonCode>,
}

impl UnsubAckPacket {
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

        if !version.is_v5() {
            return Ok(Self {
                version,
                packet_id,
                properties: Properties::new(),
                reason_codes: Vec::new(),
            });
        }

        let props = Properties::decode(buf)?;
        props.validate(PropertyLocation::UnsubAck)?;

        let mut reason_codes = Vec::new();
        while !buf.is_empty() {
            reason_codes.push(ReasonCode::try_from(buf.read_u8()?)?);
        }

        Ok(Self {
            version,
            packet_id,
            properties: props,
            reason_codes,
        })
    }
}

impl EncodePacket for UnsubAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        crate::buffer::write_u16(&mut body, self.packet_id);
        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
            for code in &self.reason_codes {
                body.push((*code).into());
            }
        }

        let header = FixedHeader::new(ControlPacketType::UnsubscribeAck, 0, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips_unsubscribe() {
        let mut packet = UnsubscribePacket::new(ProtocolVersion::V5, 11);
        packet.filters.push("a/b".to_owned());
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            UnsubscribePacket::decode(&mut cursor, ProtocolVersion::V5).unwrap(),
            packet
        );
    }

    #[test]
    fn v3_unsuback_carries_no_payload() {
        let packet = UnsubAckPacket::new(ProtocolVersion::V3_1_1, 11, vec![]);
        let mut buf = Vec::new();
        assert_eq!(packet.encode(&mut buf).unwrap(), 4);
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            UnsubAckPacket::decode(&mut cursor, ProtocolVersion::V3_1_1).unwrap(),
            packet
        );
    }

    #[test]
    fn v5_unsuback_round_trips_reason_codes() {
        let packet = UnsubAckPacket::new(
            ProtocolVersion::V5,
            11,
            vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            UnsubAckPacket::decode(&mut cursor, ProtocolVersion::V5).unwrap(),
            packet
        );
    }
}
