// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::buffer::{write_binary, write_string, Buffer};
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{PropertyLocation, Properties};
use crate::protocol::ProtocolVersion;
use crate::qos::QoS;
use crate::traits::{DecodePacket, EncodePacket};
use crate::utils::validate_utf8_string;
use crate::will::Will;

/// `CONNECT`: the first packet a client sends. One struct
/// serves both protocol versions, tagged by `version`; `clean_start` means
/// `clean_session` under v3.1.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub properties: Properties,
}

const PROTOCOL_NAME: &str = "MQTT";

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: String, version: ProtocolVersion) -> Self {
        Self {
            version,
            clean_start: true,
            keep_alive: 60,
            client_id,
            will: None,
            username: None,
            password: None,
            properties: Properties::new(),
        }
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let _fixed_header = FixedHeader::decode(buf)?;

        let protocol_name = buf.read_string()?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        let level = buf.read_u8()?;
        let version = ProtocolVersion::try_from(level)?;

        let flags = buf.read_u8()?;
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::ReservedBitSet);
        }
        let clean_start = flags & 0b0000_0010 != 0;
        let will_flag = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let password_flag = flags & 0b0100_0000 != 0;
        let username_flag = flags & 0b1000_0000 != 0;

        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidPropertyValue);
        }

        let keep_alive = buf.read_u16()?;

        let properties = if version.is_v5() {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::Connect)?;
            props
        } else {
            Properties::new()
        };

        let client_id = buf.read_string()?;

        let will = if will_flag {
            let will_properties = if version.is_v5() {
                let props = Properties::decode(buf)?;
                props.validate(PropertyLocation::Will)?;
                props
            } else {
                Properties::new()
            };
            let topic = buf.read_string()?;
            let payload = buf.read_binary()?;
            Some(Will {
                qos: will_qos,
                retain: will_retain,
                topic,
                payload,
                properties: will_properties,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(buf.read_string()?)
        } else {
            None
        };
        let password = if password_flag {
            Some(buf.read_binary()?)
        } else {
            None
        };

        Ok(Self {
            version,
            clean_start,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        write_string(&mut body, PROTOCOL_NAME)?;
        body.push(self.version.level().unwrap_or(5));

        let mut flags = 0u8;
        if self.clean_start {
            flags |= 0b0000_0010;
        }
        if let Some(will) = &self.will {
            flags |= 0b0000_0100;
            flags |= (u8::from(will.qos)) << 3;
            if will.retain {
                flags |= 0b0010_0000;
            }
        }
        if self.password.is_some() {
            flags |= 0b0100_0000;
        }
        if self.username.is_some() {
            flags |= 0b1000_0000;
        }
        body.push(flags);

        crate::buffer::write_u16(&mut body, self.keep_alive);

        if self.version.is_v5() {
            self.properties.encode(&mut body)?;
        }

        write_string(&mut body, &self.client_id)?;

        if let Some(will) = &self.will {
            if self.version.is_v5() {
                will.properties.encode(&mut body)?;
            }
            write_string(&mut body, &will.topic)?;
            write_binary(&mut body, &will.payload)?;
        }

        if let Some(username) = &self.username {
            write_string(&mut body, username)?;
        }
        if let Some(password) = &self.password {
            write_binary(&mut body, password)?;
        }

        let header = FixedHeader::new(ControlPacketType::Connect, 0, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}

/// Client identifiers must be valid MQTT UTF-8; the wire length limit (1-23
/// ASCII chars) is a v3.1.1-only restriction brokers commonly relax, so it
/// is not enforced here.
pub fn validate_client_id(id: &str) -> Result<(), DecodeError> {
    validate_utf8_string(id.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_minimal_v5_connect() {
        let packet = ConnectPacket::new("client-1".to_owned(), ProtocolVersion::V5);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut cursor = Buffer::new(Bytes::from(buf));
        let decoded = ConnectPacket::decode(&mut cursor).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trips_a_connect_with_will_and_auth() {
        let mut packet = ConnectPacket::new("client-2".to_owned(), ProtocolVersion::V3_1_1);
        packet.will = Some(Will::new(
            "status/offline".to_owned(),
            Bytes::from_static(b"bye"),
            QoS::AtLeastOnce,
            true,
        ));
        packet.username = Some("alice".to_owned());
        packet.password = Some(Bytes::from_static(b"secret"));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        let decoded = ConnectPacket::decode(&mut cursor).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_reserved_bit() {
        let mut packet = ConnectPacket::new("c".to_owned(), ProtocolVersion::V3_1_1);
        packet.clean_start = false;
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        buf[9] |= 0b0000_0001;
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(ConnectPacket::decode(&mut cursor), Err(DecodeError::ReservedBitSet));
    }
}
