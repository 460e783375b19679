// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use bytes::Bytes;

use crate::buffer::{write_binary, write_string, write_u16, write_u32, Buffer};
use crate::error::{DecodeError, EncodeError};
use crate::qos::QoS;
use crate::traits::{DecodePacket, EncodePacket};
use crate::varint::VarInt;

/// Which packet kind (or sub-structure) a property may legally appear in.
/// Used to build the per-property validity table in [`PropertyType::valid_in`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyLocation {
    Connect,
    Will,
    ConnAck,
    Publish,
    PubAckLike,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    Disconnect,
    Auth,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// User properties and subscription identifiers may repeat; every other
    /// property is a Protocol Error the second time it appears in one packet.
    #[must_use]
    pub const fn repeatable(self) -> bool {
        matches!(self, Self::UserProperty | Self::SubscriptionIdentifier)
    }

    /// Locations this property is defined for. Location sets come straight
    /// from the property tables in the MQTT 5.0 spec section 3.1.2.11.
    #[must_use]
    pub const fn valid_in(self) -> &'static [PropertyLocation] {
        use PropertyLocation::{
            Auth, ConnAck, Connect, Disconnect, PubAckLike, Publish, SubAck, Subscribe, UnsubAck,
            Unsubscribe, Will,
        };
        match self {
            Self::PayloadFormatIndicator | Self::MessageExpiryInterval => &[Publish, Will],
            Self::ContentType | Self::ResponseTopic | Self::CorrelationData => &[Publish, Will],
            Self::SubscriptionIdentifier => &[Publish, Subscribe],
            Self::SessionExpiryInterval => &[Connect, ConnAck, Disconnect],
            Self::AssignedClientIdentifier => &[ConnAck],
            Self::ServerKeepAlive => &[ConnAck],
            Self::AuthenticationMethod | Self::AuthenticationData => &[Connect, ConnAck, Auth],
            Self::RequestProblemInformation | Self::RequestResponseInformation => &[Connect],
            Self::WillDelayInterval => &[Will],
            Self::ResponseInformation => &[ConnAck],
            Self::ServerReference => &[ConnAck, Disconnect],
            Self::ReasonString => &[
                ConnAck,
                PubAckLike,
                SubAck,
                UnsubAck,
                Disconnect,
                Auth,
            ],
            Self::ReceiveMaximum => &[Connect, ConnAck],
            Self::TopicAliasMaximum => &[Connect, ConnAck],
            Self::TopicAlias => &[Publish],
            Self::MaximumQoS => &[ConnAck],
            Self::RetainAvailable => &[ConnAck],
            Self::UserProperty => &[
                Connect, Will, ConnAck, Publish, PubAckLike, Subscribe, SubAck, Unsubscribe,
                UnsubAck, Disconnect, Auth,
            ],
            Self::MaximumPacketSize => &[Connect, ConnAck],
            Self::WildcardSubscriptionAvailable
            | Self::SubscriptionIdentifierAvailable
            | Self::SharedSubscriptionAvailable => &[ConnAck],
        }
    }

    #[must_use]
    pub const fn is_valid_in(self, location: PropertyLocation) -> bool {
        let locations = self.valid_in();
        let mut i = 0;
        while i < locations.len() {
            // `PropertyLocation` derives no `PartialEq` usable in const context
            // (enum discriminants only), so compare via `as u8` on the tag.
            if locations[i] as u8 == location as u8 {
                return true;
            }
            i += 1;
        }
        false
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            other => Err(DecodeError::InvalidPropertyId(other)),
        }
    }
}

/// One MQTT 5.0 property. Holds native Rust types directly rather than the
/// per-kind wrapper newtypes the wire-format tables suggest (`U32Data`,
/// `BoolData`, ...) -- the wrapper adds no invariant a plain `u32`/`bool`
/// doesn't already have, so the variant payload is just that type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    PayloadFormatIndicator(bool),
    MessageExpiryInterval(u32),
    ContentType(String),
    ResponseTopic(String),
    CorrelationData(Bytes),
    SubscriptionIdentifier(VarInt),
    SessionExpiryInterval(u32),
    AssignedClientIdentifier(String),
    ServerKeepAlive(u16),
    AuthenticationMethod(String),
    AuthenticationData(Bytes),
    RequestProblemInformation(bool),
    WillDelayInterval(u32),
    RequestResponseInformation(bool),
    ResponseInformation(String),
    ServerReference(String),
    ReasonString(String),
    ReceiveMaximum(u16),
    TopicAliasMaximum(u16),
    TopicAlias(u16),
    MaximumQoS(QoS),
    RetainAvailable(bool),
    UserProperty(String, String),
    MaximumPacketSize(u32),
    WildcardSubscriptionAvailable(bool),
    SubscriptionIdentifierAvailable(bool),
    SharedSubscriptionAvailable(bool),
}

impl Property {
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(..) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::PayloadFormatIndicator(_)
            | Self::RequestProblemInformation(_)
            | Self::RequestResponseInformation(_)
            | Self::RetainAvailable(_)
            | Self::WildcardSubscriptionAvailable(_)
            | Self::SubscriptionIdentifierAvailable(_)
            | Self::SharedSubscriptionAvailable(_)
            | Self::MaximumQoS(_) => 1,
            Self::ServerKeepAlive(_) | Self::ReceiveMaximum(_) | Self::TopicAliasMaximum(_)
            | Self::TopicAlias(_) => 2,
            Self::MessageExpiryInterval(_)
            | Self::SessionExpiryInterval(_)
            | Self::WillDelayInterval(_)
            | Self::MaximumPacketSize(_) => 4,
            Self::SubscriptionIdentifier(id) => id.bytes(),
            Self::ContentType(s)
            | Self::ResponseTopic(s)
            | Self::AssignedClientIdentifier(s)
            | Self::AuthenticationMethod(s)
            | Self::ResponseInformation(s)
            | Self::ServerReference(s)
            | Self::ReasonString(s) => 2 + s.len(),
            Self::CorrelationData(b) | Self::AuthenticationData(b) => 2 + b.len(),
            Self::UserProperty(k, v) => 4 + k.len() + v.len(),
        };
        1 + value_bytes
    }
}

impl DecodePacket for Property {
    #[allow(clippy::too_many_lines)]
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(buf.read_u8()?)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => Ok(Self::PayloadFormatIndicator(decode_bool(buf)?)),
            PropertyType::MessageExpiryInterval => Ok(Self::MessageExpiryInterval(buf.read_u32()?)),
            PropertyType::ContentType => Ok(Self::ContentType(buf.read_string()?)),
            PropertyType::ResponseTopic => Ok(Self::ResponseTopic(buf.read_string()?)),
            PropertyType::CorrelationData => Ok(Self::CorrelationData(buf.read_binary()?)),
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(buf)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => Ok(Self::SessionExpiryInterval(buf.read_u32()?)),
            PropertyType::AssignedClientIdentifier => {
                Ok(Self::AssignedClientIdentifier(buf.read_string()?))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(buf.read_u16()?)),
            PropertyType::AuthenticationMethod => Ok(Self::AuthenticationMethod(buf.read_string()?)),
            PropertyType::AuthenticationData => Ok(Self::AuthenticationData(buf.read_binary()?)),
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(decode_bool(buf)?))
            }
            PropertyType::WillDelayInterval => Ok(Self::WillDelayInterval(buf.read_u32()?)),
            PropertyType::RequestResponseInformation => {
                Ok(Self::RequestResponseInformation(decode_bool(buf)?))
            }
            PropertyType::ResponseInformation => Ok(Self::ResponseInformation(buf.read_string()?)),
            PropertyType::ServerReference => Ok(Self::ServerReference(buf.read_string()?)),
            PropertyType::ReasonString => Ok(Self::ReasonString(buf.read_string()?)),
            PropertyType::ReceiveMaximum => {
                let max = buf.read_u16()?;
                if max == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::TopicAliasMaximum => Ok(Self::TopicAliasMaximum(buf.read_u16()?)),
            PropertyType::TopicAlias => {
                let alias = buf.read_u16()?;
                if alias == 0 {
                    return Err(DecodeError::InvalidTopicAlias);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(buf)?;
                if qos == QoS::ExactlyOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(decode_bool(buf)?)),
            PropertyType::UserProperty => {
                let (k, v) = buf.read_string_pair()?;
                Ok(Self::UserProperty(k, v))
            }
            PropertyType::MaximumPacketSize => {
                let max = buf.read_u32()?;
                if max == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                Ok(Self::WildcardSubscriptionAvailable(decode_bool(buf)?))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                Ok(Self::SubscriptionIdentifierAvailable(decode_bool(buf)?))
            }
            PropertyType::SharedSubscriptionAvailable => {
                Ok(Self::SharedSubscriptionAvailable(decode_bool(buf)?))
            }
        }
    }
}

fn decode_bool(buf: &mut Buffer) -> Result<bool, DecodeError> {
    match buf.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidPropertyValue),
    }
}

impl EncodePacket for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(v)
            | Self::RequestProblemInformation(v)
            | Self::RequestResponseInformation(v)
            | Self::RetainAvailable(v)
            | Self::WildcardSubscriptionAvailable(v)
            | Self::SubscriptionIdentifierAvailable(v)
            | Self::SharedSubscriptionAvailable(v) => {
                buf.push(u8::from(*v));
                1
            }
            Self::MaximumQoS(qos) => qos.encode(buf)?,
            Self::ServerKeepAlive(v) | Self::ReceiveMaximum(v) | Self::TopicAliasMaximum(v)
            | Self::TopicAlias(v) => {
                write_u16(buf, *v);
                2
            }
            Self::MessageExpiryInterval(v)
            | Self::SessionExpiryInterval(v)
            | Self::WillDelayInterval(v)
            | Self::MaximumPacketSize(v) => {
                write_u32(buf, *v);
                4
            }
            Self::SubscriptionIdentifier(id) => id.encode(buf)?,
            Self::ContentType(s)
            | Self::ResponseTopic(s)
            | Self::AssignedClientIdentifier(s)
            | Self::AuthenticationMethod(s)
            | Self::ResponseInformation(s)
            | Self::ServerReference(s)
            | Self::ReasonString(s) => write_string(buf, s)?,
            Self::CorrelationData(b) | Self::AuthenticationData(b) => write_binary(buf, b)?,
            Self::UserProperty(k, v) => write_string(buf, k)? + write_string(buf, v)?,
        };
        Ok(1 + value_bytes)
    }
}

/// An ordered list of properties attached to a packet's variable header.
/// Encoded as a Variable Byte Integer length prefix followed by the
/// concatenated properties.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a property, enforcing at-most-once cardinality for every type
    /// except `UserProperty`/`SubscriptionIdentifier`.
    ///
    /// # Errors
    /// Returns [`EncodeError::PropertyNotAllowed`] if the type already
    /// appears and is not repeatable.
    pub fn push(&mut self, prop: Property) -> Result<(), EncodeError> {
        let ty = prop.property_type();
        if !ty.repeatable() && self.0.iter().any(|p| p.property_type() == ty) {
            return Err(EncodeError::PropertyNotAllowed(ty as u8));
        }
        self.0.push(prop);
        Ok(())
    }

    /// Find the single value of a non-repeatable property, if present.
    pub fn find(&self, ty: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == ty)
    }

    /// Validate that every property in this list belongs at `location` and
    /// that non-repeatable properties do not appear twice.
    ///
    /// # Errors
    /// Returns [`DecodeError::PropertyWrongLocation`] or
    /// [`DecodeError::DuplicateProperty`].
    pub fn validate(&self, location: PropertyLocation) -> Result<(), DecodeError> {
        let mut seen = Vec::new();
        for prop in &self.0 {
            let ty = prop.property_type();
            if !ty.is_valid_in(location) {
                return Err(DecodeError::PropertyWrongLocation(ty as u8));
            }
            if !ty.repeatable() {
                if seen.contains(&(ty as u8)) {
                    return Err(DecodeError::DuplicateProperty(ty as u8));
                }
                seen.push(ty as u8);
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.0.iter()
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl DecodePacket for Properties {
    fn decode(buf: &mut Buffer) -> Result<Self, DecodeError> {
        let len = VarInt::decode(buf)?.value();
        let mut region = buf.read_buffer(len)?;
        let mut properties = Vec::new();
        while !region.is_empty() {
            properties.push(Property::decode(&mut region)?);
        }
        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        for property in &self.0 {
            property.encode(&mut body)?;
        }
        let len = VarInt::from(body.len()).map_err(|_| EncodeError::InvalidVarInt)?;
        let len_bytes = len.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(len_bytes + body.len())
    }
}
