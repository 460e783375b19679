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

/// `DISCONNECT`. v3.1.1's wire form is zero bytes past the
/// fixed header; v5 may omit the reason code/properties the same way a
/// `Success`-with-no-properties `DISCONNECT` collapses to nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub version: ProtocolVersion,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl DisconnectPacket {
    #[must_use]
    pub fn new(version: ProtocolVersion, reason_code: ReasonCode) -> Self {
        Self {
            version,
            reason_code,
            properties: Properties::new(),
        }
    }

    /// # Errors
    /// Returns [`DecodeError`] on malformed or out-of-spec bytes.
    pub fn decode(buf: &mut Buffer, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let header = FixedHeader::decode(buf)?;
        if header.remaining_length() == 0 {
            return Ok(Self::new(version, ReasonCode::Success));
        }

        let reason_code = ReasonCode::try_from(buf.read_u8()?)?;
        let properties = if buf.is_empty() {
            Properties::new()
        } else {
            let props = Properties::decode(buf)?;
            props.validate(PropertyLocation::Disconnect)?;
            props
        };

        Ok(Self {
            version,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        if self.version.is_v5() && (self.reason_code != ReasonCode::Success || !self.properties.is_empty()) {
            body.push(self.reason_code.into());
            self.properties.encode(&mut body)?;
        }

        let header = FixedHeader::new(ControlPacketType::Disconnect, 0, body.len())
            .map_err(|_| EncodeError::InvalidVarInt)?;
        let header_len = header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(header_len + body.len())
    }
}
