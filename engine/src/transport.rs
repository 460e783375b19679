// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::VecDeque;

use bytes::Bytes;
use mqtt_codec::{
    AckKind, AckPacket, AuthPacket, Buffer, ConnAckPacket, ConnectPacket, DisconnectPacket,
    EncodePacket, Packet, PingRequestPacket, PingResponsePacket, ProtocolVersion, PublishPacket,
    SubAckPacket, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, Result};

/// The byte pipe a connection strand reads frames from and writes frames to.
/// Deliberately not `async_trait`-erased: every concrete transport (a TCP
/// socket, a TLS stream, an in-memory duplex in tests) already implements
/// `AsyncRead + AsyncWrite`, so the connection task is generic over it
/// directly, matching how `hebo::ConnectionContext` owns a plain `TcpStream`.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Reads one complete MQTT control packet off `transport`. `version` resolves
/// the handful of packet kinds whose wire form depends on the already
/// negotiated protocol version (`CONNACK`, `PUBLISH`, the PUBACK family, ...).
///
/// # Errors
/// Returns [`EngineError::Transport`] on I/O failure, or a converted
/// [`mqtt_codec::DecodeError`] if the bytes are malformed.
pub async fn read_packet<T: Transport>(
    transport: &mut T,
    version: ProtocolVersion,
) -> Result<Packet> {
    let first = transport
        .read_u8()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;
    let packet_type_bits = (first & 0b1111_0000) >> 4;

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let byte = transport
            .read_u8()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        remaining_length += usize::from(byte & 0x7f) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            break;
        }
        if multiplier > 128 * 128 * 128 * 128 {
            return Err(EngineError::BadMessage);
        }
    }

    let mut body = vec![0u8; remaining_length];
    transport
        .read_exact(&mut body)
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    let mut frame = Vec::with_capacity(2 + remaining_length);
    frame.push(first);
    encode_remaining_length(&mut frame, remaining_length);
    frame.extend_from_slice(&body);

    let mut buf = Buffer::new(Bytes::from(frame));
    decode_by_type(packet_type_bits, &mut buf, version)
}

fn encode_remaining_length(out: &mut Vec<u8>, mut value: usize) {
    if value == 0 {
        out.push(0);
        return;
    }
    while value > 0 {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

fn decode_by_type(type_bits: u8, buf: &mut Buffer, version: ProtocolVersion) -> Result<Packet> {
    let packet = match type_bits {
        1 => Packet::Connect(decode_trait::<ConnectPacket>(buf)?),
        2 => Packet::ConnAck(ConnAckPacket::decode(buf, version)?),
        3 => Packet::Publish(PublishPacket::decode(buf, version)?),
        4 => Packet::PubAck(AckPacket::decode(buf, AckKind::PubAck, version)?),
        5 => Packet::PubRec(AckPacket::decode(buf, AckKind::PubRec, version)?),
        6 => Packet::PubRel(AckPacket::decode(buf, AckKind::PubRel, version)?),
        7 => Packet::PubComp(AckPacket::decode(buf, AckKind::PubComp, version)?),
        8 => Packet::Subscribe(SubscribePacket::decode(buf, version)?),
        9 => Packet::SubAck(SubAckPacket::decode(buf, version)?),
        10 => Packet::Unsubscribe(UnsubscribePacket::decode(buf, version)?),
        11 => Packet::UnsubAck(UnsubAckPacket::decode(buf, version)?),
        12 => Packet::PingRequest(decode_trait::<PingRequestPacket>(buf)?),
        13 => Packet::PingResponse(decode_trait::<PingResponsePacket>(buf)?),
        14 => Packet::Disconnect(DisconnectPacket::decode(buf, version)?),
        15 => Packet::Auth(decode_trait::<AuthPacket>(buf)?),
        _ => return Err(EngineError::Decode(mqtt_codec::DecodeError::InvalidPacketType)),
    };
    Ok(packet)
}

fn decode_trait<P: mqtt_codec::DecodePacket>(buf: &mut Buffer) -> Result<P> {
    Ok(P::decode(buf)?)
}

/// Writes one complete MQTT control packet to `transport`.
///
/// # Errors
/// Returns [`EngineError::Transport`] on I/O failure, or
/// [`EngineError::BadMessage`] if the packet cannot be represented on the
/// wire.
pub async fn write_packet<T: Transport>(transport: &mut T, packet: &Packet) -> Result<()> {
    let mut buf = Vec::new();
    encode(packet, &mut buf).map_err(|_| EngineError::BadMessage)?;
    transport
        .write_all(&buf)
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;
    transport
        .flush()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))
}

fn encode(packet: &Packet, buf: &mut Vec<u8>) -> std::result::Result<usize, mqtt_codec::EncodeError> {
    match packet {
        Packet::Connect(p) => p.encode(buf),
        Packet::ConnAck(p) => p.encode(buf),
        Packet::Publish(p) => p.encode(buf),
        Packet::PubAck(p) | Packet::PubRec(p) | Packet::PubRel(p) | Packet::PubComp(p) => {
            p.encode(buf)
        }
        Packet::Subscribe(p) => p.encode(buf),
        Packet::SubAck(p) => p.encode(buf),
        Packet::Unsubscribe(p) => p.encode(buf),
        Packet::UnsubAck(p) => p.encode(buf),
        Packet::PingRequest(p) => p.encode(buf),
        Packet::PingResponse(p) => p.encode(buf),
        Packet::Disconnect(p) => p.encode(buf),
        Packet::Auth(p) => p.encode(buf),
    }
}

/// In-memory transport for tests, backed by `tokio::io::duplex`: writes made
/// through [`Self`] land in `inbox` for a peer-side [`tokio::io::DuplexStream`]
/// to read, and vice versa. Additionally records every packet this side has
/// sent, so a test can assert on it without a second decode pass.
pub struct StubTransport {
    inner: tokio::io::DuplexStream,
    sent: VecDeque<Packet>,
}

impl StubTransport {
    /// Builds a connected pair: `(local, remote)`. The test drives `remote`
    /// directly (raw bytes or `write_packet`) to simulate the peer.
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(buffer);
        (
            Self {
                inner: a,
                sent: VecDeque::new(),
            },
            b,
        )
    }

    /// Writes `packet` and records it in `sent`, for assertions.
    ///
    /// # Errors
    /// Returns [`EngineError::Transport`] or [`EngineError::BadMessage`], see
    /// [`write_packet`].
    pub async fn send_and_record(&mut self, packet: Packet) -> Result<()> {
        write_packet(&mut self.inner, &packet).await?;
        self.sent.push_back(packet);
        Ok(())
    }

    #[must_use]
    pub fn sent(&self) -> &VecDeque<Packet> {
        &self.sent
    }
}

impl AsyncRead for StubTransport {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for StubTransport {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_codec::QoS;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn round_trips_a_publish_over_the_stub_pair() {
        let (mut local, mut remote) = StubTransport::pair(1024);
        let packet = PublishPacket::new(
            "a/b".to_owned(),
            QoS::AtMostOnce,
            Bytes::from_static(b"hi"),
            ProtocolVersion::V3_1_1,
        );
        write_packet(&mut remote, &Packet::Publish(packet.clone()))
            .await
            .unwrap();

        let decoded = read_packet(&mut local, ProtocolVersion::V3_1_1).await.unwrap();
        assert_eq!(decoded, Packet::Publish(packet));
    }

    #[tokio::test]
    async fn send_and_record_keeps_a_local_copy() {
        let (mut local, mut remote) = StubTransport::pair(1024);
        let packet = Packet::PingRequest(PingRequestPacket);
        local.send_and_record(packet.clone()).await.unwrap();
        assert_eq!(local.sent().front(), Some(&packet));

        let decoded = read_packet(&mut remote, ProtocolVersion::V5).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn reports_transport_error_on_early_close() {
        let (mut local, remote) = StubTransport::pair(16);
        drop(remote);
        let mut write_half = local;
        // Closing the peer half surfaces as an I/O error or clean EOF on the
        // next read, either of which must not panic the transport layer.
        let result = read_packet(&mut write_half, ProtocolVersion::V5).await;
        assert!(result.is_err());
    }
}
