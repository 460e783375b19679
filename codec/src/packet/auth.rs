// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::buffer::Buffer;
use crate::error::{DecodeError, EncodeError};
use crate::header::{ControlPacketType, FixedHeader};
use crate::property::{Properties, PropertyLocation};
use crate::reason_code::ReasonCode;
use crate::traits::{DecodePacket, EncodePacket};

/// `AUTH`: MQTT 5.0 only, used for the extended authentication exchange and
/// re-authentication. A zero remaining length implies
/// `ReasonCode::Success`, same shorthand as `DISCONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl AuthPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }
}

impl DecodePacket for AuthPacket {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let header = FixedHeader::decode(buf)?;
        if header.remaining_length() == 0 {
            return Ok(Self::new(ReasonCode::Success));
        }

        let reason_code = ReasonCode::try_from(buf.read_u8()?)?;
        let properties = if buf.is_empty() {
            Properties::new()
        } else {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::Auth)?;
            props
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for AuthPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            body.push(self.reason_code.into());
            self.properties.encode(&mut body)?;
        }

        let header = FixedHeader::new(ControlPacketType::Auth, 0, body.len())
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
    fn success_collapses_to_empty_body() {
        let packet = AuthPacket::new(ReasonCode::Success);
        let mut buf = Vec::new();
        assert_eq!(packet.encode(&mut buf).unwrap(), 2);
    }

    #[test]
    fn continue_authentication_round_trips() {
        let packet = AuthPacket::new(ReasonCode::ContinueAuthentication);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = Buffer::new(Bytes::from(buf));
        assert_eq!(AuthPacket::decode(&mut cursor).unwrap(), packet);
    }
}
