// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::fmt;

use crate::error::DecodeError;

/// MQTT protocol version. Packet objects carry this
/// tag so the codec can pick the v3.1.1 or v5.0 wire form without a second,
/// parallel packet hierarchy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    #[default]
    Undetermined,
    V3_1_1,
    V5,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn level(self) -> Option<u8> {
        match self {
            Self::Undetermined => None,
            Self::V3_1_1 => Some(4),
            Self::V5 => Some(5),
        }
    }

    #[must_use]
    pub const fn is_v5(self) -> bool {
        matches!(self, Self::V5)
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::V3_1_1),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undetermined => "undetermined",
            Self::V3_1_1 => "v3_1_1",
            Self::V5 => "v5",
        };
        write!(f, "{s}")
    }
}
