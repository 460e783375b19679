// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! End-to-end scenarios driving the public `mqtt_engine` API: some purely
//! through `Connection`'s synchronous event stream, one over a real
//! `StubTransport` pair via `Endpoint`.

use std::time::Duration;

use bytes::Bytes;
use mqtt_codec::{
    AckKind, AckPacket, Buffer, ConnAckPacket, ConnectPacket, ControlPacketType, Packet,
    PingResponsePacket, Property, ProtocolVersion, PublishPacket, QoS, ReasonCode, Will,
};
use mqtt_engine::{
    read_packet, write_packet, Connection, ConnectionConfig, Endpoint, EndpointEvent, Event,
    RecvFilter, Role, StoredEntry, StubTransport, TimerName,
};

#[test]
fn v5_connect_connack_with_properties() {
    let mut conn = Connection::new(Role::Client, ProtocolVersion::V5, ConnectionConfig::default());

    let mut connect = ConnectPacket::new("cid1".to_owned(), ProtocolVersion::V5);
    connect.keep_alive = 0x1234;
    let mut will = Will::new(
        "topic1".to_owned(),
        Bytes::from_static(b"payload1"),
        QoS::AtLeastOnce,
        true,
    );
    will.properties.push(Property::WillDelayInterval(0x0fff_ffff)).unwrap();
    will.properties.push(Property::ContentType("json".to_owned())).unwrap();
    connect.will = Some(will);
    connect.username = Some("user1".to_owned());
    connect.password = Some(Bytes::from_static(b"pass1"));
    connect.properties.push(Property::SessionExpiryInterval(0x0fff_ffff)).unwrap();
    connect
        .properties
        .push(Property::UserProperty("mykey".to_owned(), "myval".to_owned()))
        .unwrap();

    let events = conn.send(Packet::Connect(connect.clone()));
    assert_eq!(
        events,
        vec![
            Event::Send(Packet::Connect(connect)),
            Event::TimerReset(TimerName::PingReqSend, Duration::from_secs(0x1234)),
        ]
    );

    // `20 08 01 87 05 11 0f ff ff ff`: CONNACK, remaining length 8,
    // session_present=1, reason=not_authorized, one property
    // (session_expiry_interval=0x0fffffff).
    let raw = [0x20, 0x08, 0x01, 0x87, 0x05, 0x11, 0x0f, 0xff, 0xff, 0xff];
    let mut buf = Buffer::new(Bytes::copy_from_slice(&raw));
    let connack = ConnAckPacket::decode(&mut buf, ProtocolVersion::V5).unwrap();
    assert!(connack.session_present);
    assert_eq!(connack.reason_code, ReasonCode::NotAuthorized);

    let recv_events = conn.receive(Packet::ConnAck(connack.clone()));
    assert_eq!(recv_events, vec![Event::PacketReceived(Packet::ConnAck(connack))]);
}

#[test]
fn store_replay_drops_entries_that_no_longer_fit_a_shrunk_maximum_packet_size() {
    let mut conn = Connection::new(Role::Client, ProtocolVersion::V5, ConnectionConfig::default());

    conn.send(Packet::Connect(ConnectPacket::new("cid2".to_owned(), ProtocolVersion::V5)));
    let mut first_connack = ConnAckPacket::new(ProtocolVersion::V5, false, ReasonCode::Success);
    first_connack.properties.push(Property::MaximumPacketSize(9999)).unwrap();
    conn.receive(Packet::ConnAck(first_connack));

    let pid = conn.pid_manager_mut().acquire().unwrap();
    let mut publish = PublishPacket::new(
        "x".repeat(15),
        QoS::AtLeastOnce,
        Bytes::from_static(b"payload1"),
        ProtocolVersion::V5,
    );
    publish.packet_id = Some(pid);
    let send_events = conn.send(Packet::Publish(publish.clone()));
    assert_eq!(send_events, vec![Event::Send(Packet::Publish(publish.clone()))]);

    let entry_size = StoredEntry::Publish(publish).encoded_len();

    conn.send(Packet::Connect(ConnectPacket::new("cid2".to_owned(), ProtocolVersion::V5)));
    let mut second_connack = ConnAckPacket::new(ProtocolVersion::V5, true, ReasonCode::Success);
    second_connack
        .properties
        .push(Property::MaximumPacketSize(entry_size as u32 - 1))
        .unwrap();
    let events = conn.receive(Packet::ConnAck(second_connack.clone()));

    assert_eq!(
        events,
        vec![
            Event::PacketIdReleased(pid),
            Event::PacketReceived(Packet::ConnAck(second_connack)),
        ]
    );
}

#[tokio::test]
async fn endpoint_completes_a_qos1_publish_over_a_real_transport() {
    let (transport, mut remote) = StubTransport::pair(4096);
    let mut endpoint = Endpoint::spawn(
        Role::Client,
        ProtocolVersion::V5,
        ConnectionConfig::default(),
        transport,
    );

    endpoint
        .send(Packet::Connect(ConnectPacket::new("cid-e2e".to_owned(), ProtocolVersion::V5)))
        .await
        .unwrap();
    let received = read_packet(&mut remote, ProtocolVersion::V5).await.unwrap();
    assert!(matches!(received, Packet::Connect(_)));

    write_packet(
        &mut remote,
        &Packet::ConnAck(ConnAckPacket::new(ProtocolVersion::V5, false, ReasonCode::Success)),
    )
    .await
    .unwrap();

    let event = endpoint.recv(&RecvFilter::any()).await.unwrap();
    assert!(matches!(event, EndpointEvent::PacketReceived(Packet::ConnAck(_))));

    let pid = endpoint.acquire_unique_packet_id().await.unwrap();
    let mut publish = PublishPacket::new(
        "topic/x".to_owned(),
        QoS::AtLeastOnce,
        Bytes::from_static(b"hi"),
        ProtocolVersion::V5,
    );
    publish.packet_id = Some(pid);
    endpoint.send(Packet::Publish(publish)).await.unwrap();

    let received = read_packet(&mut remote, ProtocolVersion::V5).await.unwrap();
    assert!(matches!(received, Packet::Publish(_)));

    write_packet(
        &mut remote,
        &Packet::PubAck(AckPacket::new(AckKind::PubAck, ProtocolVersion::V5, pid)),
    )
    .await
    .unwrap();

    endpoint.close().await;
    endpoint.join().await.unwrap();
}

#[tokio::test]
async fn recv_filter_skips_non_matching_packets() {
    let (transport, mut remote) = StubTransport::pair(4096);
    let mut endpoint = Endpoint::spawn(
        Role::Client,
        ProtocolVersion::V5,
        ConnectionConfig::default(),
        transport,
    );

    endpoint
        .send(Packet::Connect(ConnectPacket::new("cid-filter".to_owned(), ProtocolVersion::V5)))
        .await
        .unwrap();
    read_packet(&mut remote, ProtocolVersion::V5).await.unwrap();

    write_packet(
        &mut remote,
        &Packet::ConnAck(ConnAckPacket::new(ProtocolVersion::V5, false, ReasonCode::Success)),
    )
    .await
    .unwrap();
    write_packet(&mut remote, &Packet::PingResponse(PingResponsePacket)).await.unwrap();

    let filter = RecvFilter::matching(vec![ControlPacketType::PingResponse]);
    let event = endpoint.recv(&filter).await.unwrap();
    assert!(matches!(event, EndpointEvent::PacketReceived(Packet::PingResponse(_))));

    endpoint.close().await;
    endpoint.join().await.unwrap();
}
