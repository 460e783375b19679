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

/// Shared shape of `PUBACK`, `PUBREC`, `PUBREL` and `PUBCOMP`: packet id, and
/// -- MQTT 5.0 only, and only when there is anything to say -- a reason code
/// plus properties. A remaining length of
/// exactly 2 means `Success` with no properties, matching every broker's
/// wire-compatible shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    PubAck,
    PubRec,
    PubRel,
    PubComp,
}

impl AckKind {
    const fn control_type(self) -> ControlPacketType {
        match self {
            Self::PubAck => ControlPacketType::PublishAck,
            Self::PubRec => ControlPacketType::PublishReceived,
            Self::PubRel => ControlPacketType::PublishRelease,
            Self::PubComp => ControlPacketType::PublishComplete,
        }
    }

    const fn fixed_flags(self) -> u8 {
        match self {
            Self::PubRel => 0b0000_0010,
            Self::PubAck | Self::PubRec | Self::PubComp => 0,
        }
    }

    const fn location(self) -> PropertyLocation {
        PropertyLocation::PubAckLike
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    pub kind: AckKind,
    pub version: ProtocolVersion,
    pub packet_id: u16,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl AckPacket {
    #[must_use]
    pub fn new(kind: AckKind, version: ProtocolVersion, packet_id: u16) -> Self {
        Self {
            kind,
            version,
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::new(),
        }
    }

    /// # Errors
    /// Returns [`DecodeError`] on malformed or out-of-spec bytes.
    pub fn decode(buf: &mut Buffer, kind: AckKind, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(buf)?;
        let packet_id = buf.read_u16()?;
        if packet_id == 0 {
            return Err(DecodeError::ZeroPacketId);
        }

        if !version.is_v5() || buf.is_empty() {
            return Ok(Self {
                kind,
                version,
                packet_id,
                reason_code: ReasonCode::Success,
                properties: Properties::new(),
            });
        }

        let reason_code = ReasonCode::try_from(buf.read_u8()?)?;
        let properties = if buf.is_empty() {
            Properties::new()
        } else {
            let props = Properties::decode(buf)?;
            props.validate(kind.location())?;
            props
        };

        Ok(Self {
            kind,
            version,
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for AckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        crate::buffer::write_u16(&mut body, self.packet_id);

        let has_extra = self.reason_code != ReasonCode::Success || !self.properties.is_empty();
        if self.version.is_v5() && has_extra {
            body.push(self.reason_code.into());
            self.properties.encode(&mut body)?;
        }

        let header = FixedHeader::new(self.kind.control_type(), self.kind.fixed_flags(), body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}
