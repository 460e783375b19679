// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod ack;
mod auth;
mod connack;
mod connect;
mod disconnect;
mod ping;
mod publish;
mod suback;
mod subscribe;
mod unsubscribe;

pub use ack::{AckKind, AckPacket};
pub use auth::AuthPacket;
pub use connack::ConnAckPacket;
pub use connect::ConnectPacket;
pub use disconnect::DisconnectPacket;
pub use ping::{PingRequestPacket, PingResponsePacket};
pub use publish::PublishPacket;
pub use suback::SubAckPacket;
pub use subscribe::{SubscribeOptions, SubscribePacket};
pub use unsubscribe::{UnsubAckPacket, UnsubscribePacket};

use std::fmt;

use crate::header::ControlPacketType;
use crate::protocol::ProtocolVersion;

/// The sum of all 15 control packet kinds, tagged by the struct each
/// variant already carries its own `version` field on. Equality and
/// `Display` are both field-derived, so two
/// packets compare and print identically exactly when they carry the same
/// semantic content -- the property used by the connection state machine's
/// retransmission dedup and by tests that assert on decoded packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(AckPacket),
    PubRec(AckPacket),
    PubRel(AckPacket),
    PubComp(AckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    #[must_use]
    pub const fn kind(&self) -> ControlPacketType {
        match self {
            Self::Connect(_) => ControlPacketType::Connect,
            Self::ConnAck(_) => ControlPacketType::ConnectAck,
            Self::Publish(_) => ControlPacketType::Publish,
            Self::PubAck(_) => ControlPacketType::PublishAck,
            Self::PubRec(_) => ControlPacketType::PublishReceived,
            Self::PubRel(_) => ControlPacketType::PublishRelease,
            Self::PubComp(_) => ControlPacketType::PublishComplete,
            Self::Subscribe(_) => ControlPacketType::Subscribe,
            Self::SubAck(_) => ControlPacketType::SubscribeAck,
            Self::Unsubscribe(_) => ControlPacketType::Unsubscribe,
            Self::UnsubAck(_) => ControlPacketType::UnsubscribeAck,
            Self::PingRequest(_) => ControlPacketType::PingRequest,
            Self::PingResponse(_) => ControlPacketType::PingResponse,
            Self::Disconnect(_) => ControlPacketType::Disconnect,
            Self::Auth(_) => ControlPacketType::Auth,
        }
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        match self {
            Self::Connect(p) => p.version,
            Self::ConnAck(p) => p.version,
            Self::Publish(p) => p.version,
            Self::PubAck(p) | Self::PubRec(p) | Self::PubRel(p) | Self::PubComp(p) => p.version,
            Self::Subscribe(p) => p.version,
            Self::SubAck(p) => p.version,
            Self::Unsubscribe(p) => p.version,
            Self::UnsubAck(p) => p.version,
            Self::Disconnect(p) => p.version,
            Self::PingRequest(_) | Self::PingResponse(_) | Self::Auth(_) => {
                ProtocolVersion::Undetermined
            }
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.version().is_v5() { "v5" } else { "v3_1_1" };
        match self {
            Self::Publish(p) => write!(
                f,
                "{tag}::publish{{topic:{},qos:{},retain:{},dup:{},pid:{:?}}}",
                p.topic, p.qos, p.retain, p.dup, p.packet_id
            ),
            Self::Connect(p) => write!(f, "{tag}::connect{{client_id:{}}}", p.client_id),
            Self::ConnAck(p) => write!(
                f,
                "{tag}::connack{{session_present:{},reason:{}}}",
                p.session_present, p.reason_code
            ),
            Self::PubAck(p) => write!(f, "{tag}::puback{{pid:{}}}", p.packet_id),
            Self::PubRec(p) => write!(f, "{tag}::pubrec{{pid:{}}}", p.packet_id),
            Self::PubRel(p) => write!(f, "{tag}::pubrel{{pid:{}}}", p.packet_id),
            Self::PubComp(p) => write!(f, "{tag}::pubcomp{{pid:{}}}", p.packet_id),
            Self::Subscribe(p) => write!(f, "{tag}::subscribe{{pid:{}}}", p.packet_id),
            Self::SubAck(p) => write!(f, "{tag}::suback{{pid:{}}}", p.packet_id),
            Self::Unsubscribe(p) => write!(f, "{tag}::unsubscribe{{pid:{}}}", p.packet_id),
            Self::UnsubAck(p) => write!(f, "{tag}::unsuback{{pid:{}}}", p.packet_id),
            Self::PingRequest(_) => write!(f, "pingreq"),
            Self::PingResponse(_) => write!(f, "pingresp"),
            Self::Disconnect(p) => write!(f, "{tag}::disconnect{{reason:{}}}", p.reason_code),
            Self::Auth(p) => write!(f, "v5::auth{{reason:{}}}", p.reason_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::QoS;
    use bytes::Bytes;

    #[test]
    fn display_matches_canonical_publish_format() {
        let mut p = PublishPacket::new("t".to_owned(), QoS::AtLeastOnce, Bytes::new(), ProtocolVersion::V5);
        p.packet_id = Some(1);
        let packet = Packet::Publish(p);
        assert_eq!(
            packet.to_string(),
            "v5::publish{topic:t,qos:at_least_once,retain:false,dup:false,pid:Some(1)}"
        );
    }

    #[test]
    fn equal_packets_compare_equal() {
        let a = Packet::PingRequest(PingRequestPacket);
        let b = Packet::PingRequest(PingRequestPacket);
        assert_eq!(a, b);
    }

    #[test]
    fn kind_matches_the_wire_control_packet_type() {
        assert_eq!(Packet::PingRequest(PingRequestPacket).kind(), ControlPacketType::PingRequest);
        assert_eq!(Packet::PingResponse(PingResponsePacket).kind(), ControlPacketType::PingResponse);
    }
}
