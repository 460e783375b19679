// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{Properties, PropertyLocation};
use crate::protocol::ProtocolVersion;
use crate::qos::QoS;
use crate::traits::{DecodePacket, EncodePacket};

/// Per-filter subscribe options. MQTT 3.1.1 only ever sets
/// `qos`; the rest default to their v5 "off" value and are never encoded on
/// that wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: u8,
}

impl SubscribeOptions {
    #[must_use]
    pub const fn new(qos: QoS) -> Self {
        Self {
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: 0,
        }
    }

    fn decode(buf: &mut Buffer, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let byte = buf.read_u8()?;
        if !version.is_v5() {
            let qos = QoS::try_from(byte & 0b0000_0011)?;
            if byte & 0b1111_1100 != 0 {
                return Err(DecodeError::ReservedBitSet);
            }
            return Ok(Self::new(qos));
        }

        if byte & 0b1100_0000 != 0 {
            return Err(DecodeError::ReservedBitSet);
        }
        let qos = QoS::try_from(byte & 0b0000_0011)?;
        let no_local = byte & 0b0000_0100 != 0;
        let retain_as_published = byte & 0b0000_1000 != 0;
        let retain_handling = (byte & 0b0011_0000) >> 4;
        if retain_handling > 2 {
            return Err(DecodeError::InvalidPropertyValue);
        }
        Ok(Self {
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }

    fn encode(self, version: ProtocolVersion) -> u8 {
        if !version.is_v5() {
            return u8::from(self.qos);
        }
        let mut byte = u8::from(self.qos);
        if self.no_local {
            byte |= 0b0000_0100;
        }
        if self.retain_as_published {
            byte |= 0b0000_1000;
        }
        byte |= (self.retain_handling & 0b11) << 4;
        byte
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub version: ProtocolVersion,
    pub packet_id: u16,
    pub properties: Properties,
    pub filters: Vec<(String, SubscribeOptions)>,
}

impl SubscribePacket {
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
            props.validate(PropertyLocation::Subscribe)?;
            props
        } else {
            Properties::new()
        };

        let mut filters = Vec::new();
        while !buf.is_empty() {
            let filter = buf.read_string()?;
            let options = SubscribeOptions::decode(buf, version)?;
            filters.push((filter, options));
        }

        // A SUBSCRIBE with no filters at all is a protocol error
        // (MQTT-3.8.3-3).
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

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if self.filters.is_empty() {
            return Err(EncodeError::PropertyNotAllowed(0));
        }

        let mut body = Vec::new();
        crate::buffer::write_u16(&mut body, self.packet_id);
        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        for (filter, options) in &self.filters {
            crate::buffer::write_string(&mut body, filter)?;
            body.push(options.encode(self.version));
        }

        let header = FixedHeader::new(ControlPacketType::Subscribe, 0b0000_0010, body.len())
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
    fn round_trips_multiple_filters() {
        let mut packet = SubscribePacket::new(ProtocolVersion::V5, 3);
        packet
            .filters
            .push(("a/+".to_owned(), SubscribeOptions::new(QoS::AtLeastOnce)));
        packet
            .filters
            .push(("b/#".to_owned(), SubscribeOptions::new(QoS::ExactlyOnce)));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(
            SubscribePacket::decode(&mut cursor, ProtocolVersion::V5).unwrap(),
            packet
        );
    }

    #[test]
    fn rejects_empty_filter_list() {
        let packet = SubscribePacket::new(ProtocolVersion::V3_1_1, 1);
        let mut buf = Vec::new();
        assert!(packet.encode(&mut buf).is_err());
    }

    #[test]
    fn rejects_reserved_option_bits_under_v3() {
        let raw = vec![0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0b0000_0100];
        let mut cursor = Buffer::new(Bytes::from(raw));
        assert_eq!(
            SubscribePacket::decode(&mut cursor, ProtocolVersion::V3_1_1),
            Err(DecodeError::ReservedBitSet)
        );
    }
}
