// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::buffer::{write_string, Buffer};
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{Properties, Property, PropertyLocation, PropertyType};
use crate::protocol::ProtocolVersion;
use crate::qos::QoS;
use crate::traits::{DecodePacket, EncodePacket};

/// `PUBLISH`. `packet_id` is `None` for `QoS::AtMostOnce` and
/// `Some` otherwise. A v5 publish whose topic is empty relies on a
/// `TopicAlias` property instead (handled by [`Self::topic_alias`] /
/// [`Self::set_topic_alias`] rather than a second constructor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub version: ProtocolVersion,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub properties: Properties,
    pub payload: Bytes,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic: String, qos: QoS, payload: Bytes, version: ProtocolVersion) -> Self {
        Self {
            version,
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: None,
            properties: Properties::new(),
            payload,
        }
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.iter().find_map(|p| match p {
            Property::TopicAlias(alias) => Some(*alias),
            _ => None,
        })
    }

    /// Replace the (possibly empty, alias-only) topic with its resolved
    /// name once the receive-side alias map looks it up -- used by the
    /// connection state machine, never on the wire directly.
    pub fn resolve_topic(&mut self, topic: String) {
        self.topic = topic;
    }

    /// Attaches an outbound `TopicAlias` to a publish that carries none yet
    /// -- used by the connection state machine's auto-map/auto-replace
    /// handling, never set directly by application code.
    pub fn set_topic_alias(&mut self, alias: u16) {
        let _ = self.properties.push(Property::TopicAlias(alias));
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.qos == QoS::AtMostOnce && self.dup {
            return Err(DecodeError::InvalidPropertyValue);
        }
        if matches!(self.qos, QoS::AtLeastOnce | QoS::ExactlyOnce) && self.packet_id.is_none() {
            return Err(DecodeError::ZeroPacketId);
        }
        if self.qos == QoS::AtMostOnce && self.packet_id.is_some() {
            return Err(DecodeError::InvalidPropertyValue);
        }
        // An empty topic is only legal in MQTT 5.0 when a Topic Alias stands
        // in for it.
        if self.topic.is_empty() && (!self.version.is_v5() || self.topic_alias().is_none()) {
            return Err(DecodeError::TopicFilterInvalid);
        }
        Ok(())
    }

    /// Decode a `PUBLISH`; unlike most other packet kinds the fixed header's
    /// flag bits already carry `dup`/`qos`/`retain`, so this *is* a plain
    /// [`crate::traits::DecodePacket`]-shaped decode, just not implemented
    /// via that trait because it also needs the negotiated `version`.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on malformed or out-of-spec bytes.
    pub fn decode(buf: &mut Buffer, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(buf)?;
        let flags = fixed_header.flags();
        let dup = flags & 0b0000_1000 != 0;
        let retain = flags & 0b0000_0001 != 0;
        let qos = QoS::try_from((flags & 0b0000_0110) >> 1)?;

        let topic = buf.read_string()?;
        // MQTT-3.3.2-2: a PUBLISH topic name MUST NOT contain wildcard
        // characters.
        if topic.contains('+') || topic.contains('#') {
            return Err(DecodeError::TopicFilterInvalid);
        }

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let id = buf.read_u16()?;
            if id == 0 {
                return Err(DecodeError::ZeroPacketId);
            }
            Some(id)
        };

        let properties = if version.is_v5() {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::Publish)?;
            props
        } else {
            Properties::new()
        };

        let payload_len = buf.remaining();
        let payload = buf.read_slice(payload_len)?;

        let packet = Self {
            version,
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            payload,
        };
        packet.validate()?;
        Ok(packet)
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.validate()
            .map_err(|_| EncodeError::PropertyNotAllowed(PropertyType::TopicAlias as u8))?;

        let mut body = Vec::new();
        write_string(&mut body, &self.topic)?;
        if let Some(packet_id) = self.packet_id {
            crate::buffer::write_u16(&mut body, packet_id);
        }
        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        body.extend_from_slice(&self.payload);

        let mut flags = 0u8;
        if self.dup {
            flags |= 0b0000_1000;
        }
        flags |= u8::from(self.qos) << 1;
        if self.retain {
            flags |= 0b0000_0001;
        }

        let header = FixedHeader::new(ControlPacketType::Publish, flags, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}
