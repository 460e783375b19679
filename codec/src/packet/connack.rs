// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{PropertyLocation, Properties};
use crate::protocol::ProtocolVersion;
use crate::reason_code::ReasonCode;
use crate::traits::{DecodePacket, EncodePacket};

/// `CONNACK`: the server's reply to `CONNECT`. `reason_code`
/// degrades through `ReasonCode::to_v3_connack` under v3.1.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub version: ProtocolVersion,
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(version: ProtocolVersion, session_present: bool, reason_code: ReasonCode) -> Self {
        Self {
            version,
            session_present,
            reason_code,
            properties: Properties::new(),
        }
    }

    /// Decode a `CONNACK` whose negotiated protocol version is already known
    /// to the caller -- the byte stream itself carries no version tag after
    /// `CONNECT`, so unlike most packet kinds this cannot be a blind
    /// [`crate::traits::DecodePacket`] impl.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on malformed or out-of-spec bytes.
    pub fn decode(buf: &mut Buffer, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(buf)?;

        let ack_flags = buf.read_u8()?;
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::ReservedBitSet);
        }
        let session_present = ack_flags & 0b0000_0001 != 0;

        let reason_byte = buf.read_u8()?;
        let reason_code = if version.is_v5() {
            ReasonCode::try_from(reason_byte)?
        } else {
            ReasonCode::from_v3_connack(reason_byte)
                .ok_or(DecodeError::InvalidReasonCode(reason_byte))?
        };

        // Session present MUST be 0 whenever the reason code denotes failure
        // (MQTT-3.2.2-4 in v5, MQTT-3.2.2-2 in v3.1.1).
        if session_present && !reason_code.is_success() {
            return Err(DecodeError::InvalidPropertyValue);
        }

        let properties = if version.is_v5() {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::ConnAck)?;
            props
        } else {
            Properties::new()
        };

        Ok(Self {
            version,
            session_present,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for ConnAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        body.push(u8::from(self.session_present));
        if self.version.is_v5() {
            body.push(self.reason_code.into());
            self.properties.encode(&mut body)?;
        } else {
            let code = self
                .reason_code
                .to_v3_connack()
                .map_err(|()| EncodeError::PropertyNotAllowed(0))?;
            body.push(code);
        }

        let header = FixedHeader::new(ControlPacketType::ConnectAck, 0, body.len())
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
    fn round_trips_v5_success() {
        let packet = ConnAckPacket::new(ProtocolVersion::V5, true, ReasonCode::Success);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            ConnAckPacket::decode(&mut cursor, ProtocolVersion::V5).unwrap(),
            packet
        );
    }

    #[test]
    fn round_trips_v3() {
        let packet = ConnAckPacket::new(ProtocolVersion::V3_1_1, false, ReasonCode::NotAuthorized);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            ConnAckPacket::decode(&mut cursor, ProtocolVersion::V3_1_1).unwrap(),
            packet
        );
    }

    #[test]
    fn rejects_session_present_with_failure_reason() {
        let mut buf = Buffer::new(Bytes::from_static(&[0x01, 0x87, 0x00]));
        assert_eq!(
            ConnAckPacket::decode(&mut buf, ProtocolVersion::V5),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn rejects_reserved_ack_flag_bits() {
        let mut buf = Buffer::new(Bytes::from_static(&[0x02, 0x00, 0x00]));
        assert_eq!(
            ConnAckPacket::decode(&mut buf, ProtocolVersion::V5),
            Err(DecodeError::ReservedBitSet)
        );
    }
}
