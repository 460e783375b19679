// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::fmt;

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::protocol::ProtocolVersion;
use crate::traits::{DecodePacket, EncodePacket};
use crate::varint::{VarInt, VarIntError};

/// The 15 MQTT control packet kinds. Unlike the packet structs themselves
/// this tag carries no per-version or per-flag payload -- flag bits live on
/// the packet struct that owns them (`Publish` carries its own
/// `dup`/`qos`/`retain`), so one `ControlPacketType` value covers both
/// protocol versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlPacketType {
    #[default]
    Connect = 1,
    ConnectAck = 2,
    Publish = 3,
    PublishAck = 4,
    PublishReceived = 5,
    PublishRelease = 6,
    PublishComplete = 7,
    Subscribe = 8,
    SubscribeAck = 9,
    Unsubscribe = 10,
    UnsubscribeAck = 11,
    PingRequest = 12,
    PingResponse = 13,
    Disconnect = 14,
    Auth = 15,
}

impl ControlPacketType {
    /// `Auth` (MQTT-3.15) only exists in MQTT 5.0.
    #[must_use]
    pub const fn is_valid_for(self, version: ProtocolVersion) -> bool {
        !(matches!(self, Self::Auth) && !version.is_v5())
    }

    /// Reserved flag bits a receiver MUST treat as malformed if unset
    /// [MQTT-2.2.2-1], [MQTT-2.2.2-2]. `Publish` is the only type with
    /// variable flags, so it has no fixed mask.
    const fn fixed_flags(self) -> Option<u8> {
        match self {
            Self::Connect
            | Self::ConnectAck
            | Self::PublishAck
            | Self::PublishReceived
            | Self::PublishComplete
            | Self::SubscribeAck
            | Self::UnsubscribeAck
            | Self::PingRequest
            | Self::PingResponse
            | Self::Disconnect
            | Self::Auth => Some(0b0000_0000),
            Self::PublishRelease | Self::Subscribe | Self::Unsubscribe => Some(0b0000_0010),
            Self::Publish => None,
        }
    }
}

impl From<ControlPacketType> for u8 {
    fn from(t: ControlPacketType) -> Self {
        t as Self
    }
}

impl TryFrom<u8> for ControlPacketType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnectAck),
            3 => Ok(Self::Publish),
            4 => Ok(Self::PublishAck),
            5 => Ok(Self::PublishReceived),
            6 => Ok(Self::PublishRelease),
            7 => Ok(Self::PublishComplete),
            8 => Ok(Self::Subscribe),
            9 => Ok(Self::SubscribeAck),
            10 => Ok(Self::Unsubscribe),
            11 => Ok(Self::UnsubscribeAck),
            12 => Ok(Self::PingRequest),
            13 => Ok(Self::PingResponse),
            14 => Ok(Self::Disconnect),
            15 => Ok(Self::Auth),
            _ => Err(DecodeError::InvalidPacketType),
        }
    }
}

impl fmt::Display for ControlPacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::ConnectAck => "connack",
            Self::Publish => "publish",
            Self::PublishAck => "puback",
            Self::PublishReceived => "pubrec",
            Self::PublishRelease => "pubrel",
            Self::PublishComplete => "pubcomp",
            Self::Subscribe => "subscribe",
            Self::SubscribeAck => "suback",
            Self::Unsubscribe => "unsubscribe",
            Self::UnsubscribeAck => "unsuback",
            Self::PingRequest => "pingreq",
            Self::PingResponse => "pingresp",
            Self::Disconnect => "disconnect",
            Self::Auth => "auth",
        };
        write!(f, "{s}")
    }
}

/// Fixed header shared by all 15 packet kinds:
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |  (1-4 bytes, variable byte integer)
/// +-------+-------+
/// ```
///
/// For `Publish`, `flags` carries the live `dup`/`qos`/`retain` bits; for
/// every other type it is the type's fixed reserved pattern, already
/// validated by the time this struct exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: ControlPacketType,
    flags: u8,
    remaining_length: VarInt,
}

impl FixedHeader {
    /// # Errors
    /// Returns [`VarIntError`] if `remaining_length` exceeds the variable
    /// byte integer range.
    pub fn new(
        packet_type: ControlPacketType,
        flags: u8,
        remaining_length: usize,
    ) -> Result<Self, VarIntError> {
        let remaining_length = VarInt::from(remaining_length)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> ControlPacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    #[must_use]
    pub const fn bytes(&self) -> usize {
        1 + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let byte = buf.read_u8()?;
        let type_bits = (byte & 0b1111_0000) >> 4;
        let flags = byte & 0b0000_1111;
        let packet_type = ControlPacketType::try_from(type_bits)?;

        if let Some(expected) = packet_type.fixed_flags() {
            if flags != expected {
                log::error!("header: bad flags {flags:#06b} for {packet_type}");
                return Err(DecodeError::InvalidPacketFlags);
            }
        }

        let remaining_length = VarInt::decode(buf)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let type_byte: u8 = self.packet_type.into();
        buf.push((type_byte << 4) | self.flags);
        let n = self.remaining_length.encode(buf)?;
        Ok(1 + n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn encodes_fixed_flags() {
        let header = FixedHeader::new(ControlPacketType::PingRequest, 0, 0).unwrap();
        let mut buf = Vec::new();
        assert_eq!(header.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf, vec![0xc0, 0x00]);
    }

    #[test]
    fn decodes_publish_flags() {
        let mut buf = Buffer::new(Bytes::from_static(&[0b0011_1101, 0x00]));
        let header = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(header.packet_type(), ControlPacketType::Publish);
        assert_eq!(header.flags(), 0b1101);
    }

    #[test]
    fn rejects_bad_reserved_flags_on_subscribe() {
        let mut buf = Buffer::new(Bytes::from_static(&[0b1000_0000, 0x00]));
        assert_eq!(
            FixedHeader::decode(&mut buf),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn auth_is_rejected_pre_v5() {
        assert!(ControlPacketType::Auth.is_valid_for(ProtocolVersion::V5));
        assert!(!ControlPacketType::Auth.is_valid_for(ProtocolVersion::V3_1_1));
    }
}
