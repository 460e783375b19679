// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::VecDeque;
use std::time::Duration;

use mqtt_codec::{
    AckKind, AckPacket, ConnAckPacket, ConnectPacket, DisconnectPacket, Packet, PacketId,
    Property, ProtocolVersion, PublishPacket, QoS, ReasonCode,
};
#[cfg(test)]
use mqtt_codec::SubAckPacket;

use crate::config::ConnectionConfig;
use crate::error::EngineError;
use crate::pid::PidManager;
use crate::store::{Store, StoredEntry};
use crate::topic_alias::{RecvAliasMap, SendAliasMap};

/// Which side of the connection this state machine is driving. A client must
/// not send server-only packet kinds and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
}

/// One named timer the endpoint is responsible for actually scheduling; the
/// state machine only ever asks for a reset/cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerName {
    PingReqSend,
    PingRespRecv,
}

/// Output of every state machine transition. The endpoint drains
/// these and performs the actual I/O / timer scheduling / application
/// notification; the state machine itself never touches a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Send(Packet),
    PacketReceived(Packet),
    TimerReset(TimerName, Duration),
    TimerCancel(TimerName),
    PacketIdReleased(PacketId),
    Error(EngineError),
    Closed,
}

/// Protocol-level connection state machine: packet-id lifetime, QoS 1/2
/// delivery, MQTT-5 flow control and topic aliasing, keep-alive scheduling,
/// and auto-`DISCONNECT` on protocol violation.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    version: ProtocolVersion,
    config: ConnectionConfig,
    status: Status,

    pid_mgr: PidManager,
    store: Store,
    send_alias: SendAliasMap,
    recv_alias: RecvAliasMap,

    peer_receive_maximum: u16,
    peer_maximum_packet_size: Option<u32>,
    send_inflight_qos12: u32,
    recv_inflight_qos12: u32,
    pending_qos12: VecDeque<PublishPacket>,

    effective_keep_alive: u16,
}

impl Connection {
    #[must_use]
    pub fn new(role: Role, version: ProtocolVersion, config: ConnectionConfig) -> Self {
        let effective_keep_alive = config.keep_alive;
        Self {
            role,
            version,
            pid_mgr: PidManager::default(),
            store: Store::new(),
            send_alias: SendAliasMap::new(0),
            recv_alias: RecvAliasMap::new(config.topic_alias_maximum),
            peer_receive_maximum: 65535,
            peer_maximum_packet_size: None,
            send_inflight_qos12: 0,
            recv_inflight_qos12: 0,
            pending_qos12: VecDeque::new(),
            effective_keep_alive,
            config,
            status: Status::Disconnected,
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn pid_manager_mut(&mut self) -> &mut PidManager {
        &mut self.pid_mgr
    }

    /// Snapshot of the currently stored unacknowledged publishes/PUBRELs.
    #[must_use]
    pub fn stored_packets(&self) -> Vec<Packet> {
        self.store
            .snapshot()
            .into_iter()
            .map(StoredEntry::into_packet)
            .collect()
    }

    /// Re-populates the store from a prior [`Self::stored_packets`]
    /// snapshot. Packets that are not storable are dropped.
    pub fn restore_packets(&mut self, packets: Vec<Packet>) {
        let entries = packets.into_iter().filter_map(StoredEntry::from_packet).collect();
        self.store.restore(entries);
    }

    fn role_may_send(&self, packet: &Packet) -> bool {
        match self.role {
            Role::Client => !matches!(
                packet,
                Packet::ConnAck(_)
                    | Packet::SubAck(_)
                    | Packet::UnsubAck(_)
                    | Packet::PingResponse(_)
            ),
            Role::Server => !matches!(
                packet,
                Packet::Connect(_)
                    | Packet::Subscribe(_)
                    | Packet::Unsubscribe(_)
                    | Packet::PingRequest(_)
            ),
        }
    }

    /// Application-originated send. Returns the
    /// events the endpoint must act on -- typically `Send(packet)`, but may
    /// instead be an `Error` (the packet was not transmitted) plus, for
    /// queued/rejected QoS>0 publishes, a `PacketIdReleased`.
    pub fn send(&mut self, packet: Packet) -> Vec<Event> {
        if !self.role_may_send(&packet) {
            return vec![Event::Error(EngineError::PacketCannotBeSentByRole)];
        }
        if packet.version() != ProtocolVersion::Undetermined && packet.version() != self.version {
            return vec![Event::Error(EngineError::ProtocolVersionMismatch)];
        }
        if self.status != Status::Connected
            && !matches!(packet, Packet::Connect(_) | Packet::Auth(_))
        {
            return self.send_while_not_connected(packet);
        }

        match packet {
            Packet::Connect(p) => self.send_connect(p),
            Packet::Publish(p) => self.send_publish(p),
            other => vec![Event::Send(other)],
        }
    }

    fn send_while_not_connected(&mut self, packet: Packet) -> Vec<Event> {
        if let Packet::Publish(p) = &packet {
            if self.config.offline_publish {
                return vec![Event::Send(packet)];
            }
            let mut events = vec![Event::Error(EngineError::PacketNotAllowedToSend)];
            if let Some(pid) = p.packet_id {
                self.pid_mgr.release(pid);
                events.push(Event::PacketIdReleased(pid));
            }
            return events;
        }
        vec![Event::Error(EngineError::PacketNotAllowedToSend)]
    }

    fn send_connect(&mut self, packet: ConnectPacket) -> Vec<Event> {
        self.status = Status::Connecting;
        let keep_alive = packet.keep_alive;
        self.effective_keep_alive = keep_alive;
        vec![
            Event::Send(Packet::Connect(packet)),
            Event::TimerReset(TimerName::PingReqSend, Duration::from_secs(u64::from(keep_alive))),
        ]
    }

    fn send_publish(&mut self, mut packet: PublishPacket) -> Vec<Event> {
        if let Some(alias) = packet.topic_alias() {
            if let Err(err) = self.send_alias.validate(alias) {
                if let Some(pid) = packet.packet_id {
                    self.pid_mgr.release(pid);
                    return vec![Event::Error(err), Event::PacketIdReleased(pid)];
                }
                return vec![Event::Error(err)];
            }
            if !packet.topic.is_empty() {
                let _ = self.send_alias.register(alias, packet.topic.clone());
            }
        } else if !packet.topic.is_empty() {
            if let Some(alias) = self.send_alias.alias_for(&packet.topic) {
                // The peer already cached this topic under `alias`; skip
                // retransmitting the topic name entirely.
                if self.config.auto_replace_topic_alias {
                    packet.set_topic_alias(alias);
                    packet.topic.clear();
                }
            } else if self.config.auto_map_topic_alias {
                if let Some(alias) = self.send_alias.next_for_auto_map() {
                    packet.set_topic_alias(alias);
                    let _ = self.send_alias.register(alias, packet.topic.clone());
                }
            }
        }

        if packet.qos == QoS::AtMostOnce {
            return vec![Event::Send(Packet::Publish(packet))];
        }

        if self.send_inflight_qos12 >= u32::from(self.peer_receive_maximum) {
            self.pending_qos12.push_back(packet);
            return Vec::new();
        }

        self.send_inflight_qos12 += 1;
        self.store.insert_publish(packet.clone());
        if packet.qos == QoS::ExactlyOnce {
            // dup is set on replay, never on first send.
            packet.dup = false;
        }
        vec![Event::Send(Packet::Publish(packet))]
    }

    /// Dequeues the next receive-maximum-gated publish, if any, after an ack
    /// frees a slot.
    fn dequeue_pending(&mut self) -> Vec<Event> {
        if self.send_inflight_qos12 >= u32::from(self.peer_receive_maximum) {
            return Vec::new();
        }
        let Some(packet) = self.pending_qos12.pop_front() else {
            return Vec::new();
        };
        self.send_publish(packet)
    }

    /// Inbound packet, already decoded off the wire.
    pub fn receive(&mut self, packet: Packet) -> Vec<Event> {
        match packet {
            Packet::ConnAck(p) => self.recv_connack(p),
            Packet::Publish(p) => self.recv_publish(p),
            Packet::PubAck(p) => self.recv_puback(p),
            Packet::PubRec(p) => self.recv_pubrec(p),
            Packet::PubRel(p) => self.recv_pubrel(p),
            Packet::PubComp(p) => self.recv_pubcomp(p),
            Packet::SubAck(p) => self.recv_subunsub_ack(p.packet_id, Packet::SubAck(p)),
            Packet::UnsubAck(p) => self.recv_subunsub_ack(p.packet_id, Packet::UnsubAck(p)),
            Packet::PingResponse(p) => {
                vec![
                    Event::TimerCancel(TimerName::PingRespRecv),
                    Event::PacketReceived(Packet::PingResponse(p)),
                ]
            }
            Packet::PingRequest(p) => vec![
                Event::Send(Packet::PingResponse(mqtt_codec::PingResponsePacket)),
                Event::PacketReceived(Packet::PingRequest(p)),
            ],
            other => vec![Event::PacketReceived(other)],
        }
    }

    fn recv_connack(&mut self, packet: ConnAckPacket) -> Vec<Event> {
        if !packet.reason_code.is_success() {
            self.status = Status::Disconnected;
            let mut events = self.release_all_pids();
            events.push(Event::PacketReceived(Packet::ConnAck(packet)));
            return events;
        }

        self.status = Status::Connected;
        for prop in packet.properties.iter() {
            match prop {
                Property::ReceiveMaximum(max) => self.peer_receive_maximum = *max,
                Property::MaximumPacketSize(max) => self.peer_maximum_packet_size = Some(*max),
                Property::TopicAliasMaximum(max) => self.send_alias = SendAliasMap::new(*max),
                Property::ServerKeepAlive(ka) => self.effective_keep_alive = *ka,
                _ => {}
            }
        }

        let mut events = Vec::new();
        if packet.session_present {
            let (replay, dropped) = self.store.replay(self.peer_maximum_packet_size);
            for pid in dropped {
                self.pid_mgr.release(pid);
                events.push(Event::PacketIdReleased(pid));
            }
            for entry in replay {
                events.push(Event::Send(entry.into_packet()));
            }
        }
        events.push(Event::PacketReceived(Packet::ConnAck(packet)));
        events
    }

    /// Releases every pid this connection still holds -- in-flight store
    /// entries and send-side publishes stalled on receive-maximum -- e.g.
    /// after a rejected reconnect means none of them will ever be acked
    /// under their current pid.
    fn release_all_pids(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        for entry in self.store.clear() {
            let pid = entry.packet_id();
            self.pid_mgr.release(pid);
            events.push(Event::PacketIdReleased(pid));
        }
        for packet in self.pending_qos12.drain(..) {
            if let Some(pid) = packet.packet_id {
                self.pid_mgr.release(pid);
                events.push(Event::PacketIdReleased(pid));
            }
        }
        self.send_inflight_qos12 = 0;
        self.recv_inflight_qos12 = 0;
        events
    }

    fn recv_publish(&mut self, mut packet: PublishPacket) -> Vec<Event> {
        let alias = packet.topic_alias();
        match self.recv_alias.resolve(alias, &packet.topic) {
            Ok(Some(resolved)) => packet.resolve_topic(resolved),
            Ok(None) => {}
            Err(_) => {
                return self.auto_disconnect(ReasonCode::TopicAliasInvalid);
            }
        }

        if matches!(packet.qos, QoS::AtLeastOnce | QoS::ExactlyOnce) {
            if self.recv_inflight_qos12 >= u32::from(self.config.receive_maximum) {
                return self.auto_disconnect(ReasonCode::ReceiveMaximumExceeded);
            }
            self.recv_inflight_qos12 += 1;
        }

        let pid = packet.packet_id;
        let mut events = vec![Event::PacketReceived(Packet::Publish(packet.clone()))];
        if self.config.auto_pub_response {
            match packet.qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => {
                    if let Some(pid) = pid {
                        self.recv_inflight_qos12 = self.recv_inflight_qos12.saturating_sub(1);
                        events.push(Event::Send(Packet::PubAck(AckPacket::new(
                            AckKind::PubAck,
                            self.version,
                            pid,
                        ))));
                    }
                }
                QoS::ExactlyOnce => {
                    if let Some(pid) = pid {
                        events.push(Event::Send(Packet::PubRec(AckPacket::new(
                            AckKind::PubRec,
                            self.version,
                            pid,
                        ))));
                    }
                }
            }
        }
        events
    }

    fn auto_disconnect(&mut self, reason: ReasonCode) -> Vec<Event> {
        self.status = Status::Disconnected;
        let mut events = Vec::new();
        if self.version.is_v5() {
            events.push(Event::Send(Packet::Disconnect(DisconnectPacket::new(
                self.version,
                reason,
            ))));
        }
        events.push(Event::Closed);
        events
    }

    fn recv_puback(&mut self, packet: AckPacket) -> Vec<Event> {
        self.pid_mgr.release(packet.packet_id);
        self.store.remove(packet.packet_id);
        self.send_inflight_qos12 = self.send_inflight_qos12.saturating_sub(1);
        let mut events = vec![Event::PacketIdReleased(packet.packet_id)];
        events.extend(self.dequeue_pending());
        events
    }

    fn recv_pubrec(&mut self, packet: AckPacket) -> Vec<Event> {
        let pubrel = AckPacket::new(AckKind::PubRel, self.version, packet.packet_id);
        self.store.replace_with_pubrel(packet.packet_id, pubrel.clone());
        vec![Event::Send(Packet::PubRel(pubrel))]
    }

    fn recv_pubrel(&mut self, packet: AckPacket) -> Vec<Event> {
        self.recv_inflight_qos12 = self.recv_inflight_qos12.saturating_sub(1);
        let pubcomp = AckPacket::new(AckKind::PubComp, self.version, packet.packet_id);
        vec![
            Event::Send(Packet::PubComp(pubcomp)),
            Event::PacketReceived(Packet::PubRel(packet)),
        ]
    }

    fn recv_pubcomp(&mut self, packet: AckPacket) -> Vec<Event> {
        self.pid_mgr.release(packet.packet_id);
        self.store.remove(packet.packet_id);
        self.send_inflight_qos12 = self.send_inflight_qos12.saturating_sub(1);
        let mut events = vec![Event::PacketIdReleased(packet.packet_id)];
        events.extend(self.dequeue_pending());
        events
    }

    fn recv_subunsub_ack(&mut self, pid: PacketId, packet: Packet) -> Vec<Event> {
        self.pid_mgr.release(pid);
        vec![Event::PacketIdReleased(pid), Event::PacketReceived(packet)]
    }

    /// Send-side PINGREQ timer fired.
    pub fn on_pingreq_timer(&mut self) -> Vec<Event> {
        if self.status != Status::Connected {
            return Vec::new();
        }
        vec![
            Event::Send(Packet::PingRequest(mqtt_codec::PingRequestPacket)),
            Event::TimerReset(
                TimerName::PingRespRecv,
                Duration::from_secs(u64::from(self.effective_keep_alive.max(1))),
            ),
        ]
    }

    /// Recv-side PINGRESP timer fired: keep-alive timeout, close.
    pub fn on_pingresp_timeout(&mut self) -> Vec<Event> {
        self.status = Status::Disconnected;
        vec![Event::Closed]
    }

    pub fn notify_closed(&mut self) -> Vec<Event> {
        self.status = Status::Disconnected;
        vec![
            Event::TimerCancel(TimerName::PingReqSend),
            Event::TimerCancel(TimerName::PingRespRecv),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn client() -> Connection {
        Connection::new(Role::Client, ProtocolVersion::V5, ConnectionConfig::default())
    }

    #[test]
    fn client_cannot_send_suback() {
        let mut conn = client();
        let events = conn.send(Packet::SubAck(SubAckPacket::new(
            ProtocolVersion::V5,
            1,
            vec![ReasonCode::Success],
        )));
        assert_eq!(events, vec![Event::Error(EngineError::PacketCannotBeSentByRole)]);
    }

    #[test]
    fn connect_resets_pingreq_timer() {
        let mut conn = client();
        let packet = ConnectPacket::new("c1".to_owned(), ProtocolVersion::V5);
        let events = conn.send(Packet::Connect(packet.clone()));
        assert_eq!(
            events,
            vec![
                Event::Send(Packet::Connect(packet)),
                Event::TimerReset(TimerName::PingReqSend, Duration::from_secs(60)),
            ]
        );
        assert_eq!(conn.status(), Status::Connecting);
    }

    #[test]
    fn offline_publish_disabled_releases_pid() {
        let mut conn = Connection::new(
            Role::Client,
            ProtocolVersion::V5,
            ConnectionConfig {
                offline_publish: false,
                ..ConnectionConfig::default()
            },
        );
        let mut packet = PublishPacket::new(
            "topic1".to_owned(),
            QoS::AtLeastOnce,
            Bytes::from_static(b"payload1"),
            ProtocolVersion::V5,
        );
        packet.packet_id = Some(7);
        conn.pid_manager_mut().register(7);
        let events = conn.send(Packet::Publish(packet));
        assert_eq!(
            events,
            vec![
                Event::Error(EngineError::PacketNotAllowedToSend),
                Event::PacketIdReleased(7),
            ]
        );
    }

    #[test]
    fn qos2_flow_releases_pid_on_pubcomp() {
        let mut conn = client();
        conn.status = Status::Connected;
        let pid = conn.pid_manager_mut().acquire().unwrap();
        let mut packet = PublishPacket::new(
            "a/b".to_owned(),
            QoS::ExactlyOnce,
            Bytes::from_static(b"hi"),
            ProtocolVersion::V5,
        );
        packet.packet_id = Some(pid);
        let send_events = conn.send(Packet::Publish(packet));
        assert_eq!(send_events.len(), 1);

        let pubrec_events = conn.receive(Packet::PubRec(AckPacket::new(
            AckKind::PubRec,
            ProtocolVersion::V5,
            pid,
        )));
        assert_eq!(
            pubrec_events,
            vec![Event::Send(Packet::PubRel(AckPacket::new(
                AckKind::PubRel,
                ProtocolVersion::V5,
                pid
            )))]
        );

        let pubcomp_events = conn.receive(Packet::PubComp(AckPacket::new(
            AckKind::PubComp,
            ProtocolVersion::V5,
            pid,
        )));
        assert_eq!(pubcomp_events[0], Event::PacketIdReleased(pid));
    }

    #[test]
    fn receive_maximum_gates_third_publish() {
        let mut conn = client();
        conn.status = Status::Connected;
        conn.peer_receive_maximum = 2;

        for _ in 0..2 {
            let pid = conn.pid_manager_mut().acquire().unwrap();
            let mut packet = PublishPacket::new(
                "a".to_owned(),
                QoS::AtLeastOnce,
                Bytes::new(),
                ProtocolVersion::V5,
            );
            packet.packet_id = Some(pid);
            let events = conn.send(Packet::Publish(packet));
            assert_eq!(events.len(), 1);
        }

        let pid = conn.pid_manager_mut().acquire().unwrap();
        let mut packet = PublishPacket::new(
            "a".to_owned(),
            QoS::AtLeastOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        packet.packet_id = Some(pid);
        let events = conn.send(Packet::Publish(packet));
        assert!(events.is_empty(), "third publish should stall");

        let ack_events = conn.receive(Packet::PubAck(AckPacket::new(
            AckKind::PubAck,
            ProtocolVersion::V5,
            1,
        )));
        assert!(ack_events
            .iter()
            .any(|e| matches!(e, Event::Send(Packet::Publish(_)))));
    }

    #[test]
    fn rejected_connack_releases_every_in_flight_pid() {
        let mut conn = client();
        conn.status = Status::Connected;

        let stored_pid = conn.pid_manager_mut().acquire().unwrap();
        let mut stored = PublishPacket::new(
            "a".to_owned(),
            QoS::AtLeastOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        stored.packet_id = Some(stored_pid);
        conn.send(Packet::Publish(stored));

        conn.peer_receive_maximum = 1;
        let pending_pid = conn.pid_manager_mut().acquire().unwrap();
        let mut pending = PublishPacket::new(
            "b".to_owned(),
            QoS::AtLeastOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        pending.packet_id = Some(pending_pid);
        let events = conn.send(Packet::Publish(pending));
        assert!(events.is_empty(), "second publish should stall behind receive-maximum");

        let connack = ConnAckPacket::new(ProtocolVersion::V5, false, ReasonCode::NotAuthorized);
        let events = conn.receive(Packet::ConnAck(connack.clone()));
        assert_eq!(
            events,
            vec![
                Event::PacketIdReleased(stored_pid),
                Event::PacketIdReleased(pending_pid),
                Event::PacketReceived(Packet::ConnAck(connack)),
            ]
        );
        assert!(!conn.pid_manager_mut().is_in_use(stored_pid));
        assert!(!conn.pid_manager_mut().is_in_use(pending_pid));
    }

    #[test]
    fn pubrel_frees_the_recv_inflight_slot() {
        let mut conn = client();
        conn.status = Status::Connected;
        conn.config.receive_maximum = 1;
        conn.config.auto_pub_response = false;

        let mut first = PublishPacket::new(
            "a".to_owned(),
            QoS::ExactlyOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        first.packet_id = Some(1);
        conn.receive(Packet::Publish(first));

        let mut second = PublishPacket::new(
            "b".to_owned(),
            QoS::ExactlyOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        second.packet_id = Some(2);
        let events = conn.receive(Packet::Publish(second.clone()));
        assert!(
            matches!(events.last(), Some(Event::Closed)),
            "a second inbound QoS-2 publish should exceed receive-maximum while the first is unacked"
        );

        conn.status = Status::Connected;
        conn.receive(Packet::PubRel(AckPacket::new(AckKind::PubRel, ProtocolVersion::V5, 1)));

        let events = conn.receive(Packet::Publish(second));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::PacketReceived(Packet::Publish(_)))));
    }

    #[test]
    fn auto_map_then_auto_replace_topic_alias() {
        let mut conn = Connection::new(
            Role::Client,
            ProtocolVersion::V5,
            ConnectionConfig {
                auto_map_topic_alias: true,
                auto_replace_topic_alias: true,
                ..ConnectionConfig::default()
            },
        );
        conn.status = Status::Connected;
        conn.send_alias = SendAliasMap::new(4);

        let pid1 = conn.pid_manager_mut().acquire().unwrap();
        let mut first = PublishPacket::new(
            "a/b".to_owned(),
            QoS::AtLeastOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        first.packet_id = Some(pid1);
        let events = conn.send(Packet::Publish(first));
        let Some(Event::Send(Packet::Publish(sent))) = events.into_iter().next() else {
            panic!("expected a publish to be sent");
        };
        assert_eq!(sent.topic, "a/b");
        let alias = sent.topic_alias().expect("auto-map should assign an alias");

        let pid2 = conn.pid_manager_mut().acquire().unwrap();
        let mut second = PublishPacket::new(
            "a/b".to_owned(),
            QoS::AtLeastOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        second.packet_id = Some(pid2);
        let events = conn.send(Packet::Publish(second));
        let Some(Event::Send(Packet::Publish(sent))) = events.into_iter().next() else {
            panic!("expected a publish to be sent");
        };
        assert!(sent.topic.is_empty(), "auto-replace should drop the repeated topic name");
        assert_eq!(sent.topic_alias(), Some(alias));
    }
}
