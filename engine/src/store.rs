// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mqtt_codec::{AckPacket, EncodePacket, Packet, PacketId, PublishPacket};

/// A stored unacknowledged QoS>0 PUBLISH, or the PUBREL that superseded it
/// once the matching PUBREC arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    Publish(PublishPacket),
    PubRel(AckPacket),
}

impl StoredEntry {
    /// Inverse of the `Publish`/`PubRel` arms a caller cares about when
    /// restoring a snapshot taken by [`Store::snapshot`]; any other packet
    /// kind is not storable and yields `None`.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Option<Self> {
        match packet {
            Packet::Publish(p) => Some(Self::Publish(p)),
            Packet::PubRel(a) => Some(Self::PubRel(a)),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_packet(self) -> Packet {
        match self {
            Self::Publish(p) => Packet::Publish(p),
            Self::PubRel(a) => Packet::PubRel(a),
        }
    }

    #[must_use]
    pub fn packet_id(&self) -> PacketId {
        match self {
            Self::Publish(p) => p.packet_id.expect("stored publish always carries a pid"),
            Self::PubRel(a) => a.packet_id,
        }
    }

    /// Size in bytes this entry would occupy on the wire, used to check
    /// against the peer's `maximum_packet_size` before replay.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        match self {
            Self::Publish(p) => p.encode(&mut buf),
            Self::PubRel(a) => a.encode(&mut buf),
        }
        .map_or(0, |_| buf.len())
    }

    /// The form retransmitted on replay: publishes go out with `dup` set;
    /// PUBRELs are idempotent and unchanged.
    #[must_use]
    fn for_replay(&self) -> Self {
        match self {
            Self::Publish(p) => {
                let mut p = p.clone();
                p.dup = true;
                Self::Publish(p)
            }
            Self::PubRel(a) => Self::PubRel(a.clone()),
        }
    }
}

/// Append-ordered per-session store of in-flight QoS>0 publishes and
/// PUBRELs, replayed in original order on session resume.
#[derive(Debug, Default, Clone)]
pub struct Store {
    entries: Vec<StoredEntry>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_publish(&mut self, packet: PublishPacket) {
        self.entries.push(StoredEntry::Publish(packet));
    }

    /// Replaces the stored PUBLISH for `pid` with a PUBREL, on PUBREC.
    pub fn replace_with_pubrel(&mut self, pid: PacketId, pubrel: AckPacket) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.packet_id() == pid) {
            *slot = StoredEntry::PubRel(pubrel);
        } else {
            self.entries.push(StoredEntry::PubRel(pubrel));
        }
    }

    pub fn remove(&mut self, pid: PacketId) {
        self.entries.retain(|e| e.packet_id() != pid);
    }

    /// A snapshot suitable for persisting across a process restart.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredEntry> {
        self.entries.clone()
    }

    /// Replaces the store's contents wholesale, e.g. from a snapshot taken
    /// by [`Self::snapshot`] before the previous process exited.
    pub fn restore(&mut self, entries: Vec<StoredEntry>) {
        self.entries = entries;
    }

    /// Drains every stored entry, e.g. when a rejected reconnect means none
    /// of them will ever be replayed under their current pid.
    pub fn clear(&mut self) -> Vec<StoredEntry> {
        std::mem::take(&mut self.entries)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Builds the replay batch, dropping any entry whose encoded size
    /// exceeds `max_packet_size`. Returns `(to_send, dropped_pids)`; dropped
    /// entries are also removed from the store (their pid should be
    /// released by the caller, emitting `packet-id-released`).
    #[must_use]
    pub fn replay(&mut self, max_packet_size: Option<u32>) -> (Vec<StoredEntry>, Vec<PacketId>) {
        let mut to_send = Vec::with_capacity(self.entries.len());
        let mut dropped = Vec::new();
        self.entries.retain(|entry| {
            if let Some(max) = max_packet_size {
                if entry.encoded_len() as u32 > max {
                    dropped.push(entry.packet_id());
                    return false;
                }
            }
            to_send.push(entry.for_replay());
            true
        });
        (to_send, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_codec::{AckKind, ProtocolVersion, QoS};
    use bytes::Bytes;

    fn publish(pid: PacketId, topic_len: usize) -> PublishPacket {
        let mut p = PublishPacket::new(
            "x".repeat(topic_len),
            QoS::ExactlyOnce,
            Bytes::new(),
            ProtocolVersion::V5,
        );
        p.packet_id = Some(pid);
        p
    }

    #[test]
    fn replays_in_insertion_order_with_dup_set() {
        let mut store = Store::new();
        store.insert_publish(publish(1, 3));
        store.insert_publish(publish(2, 3));
        let (batch, dropped) = store.replay(None);
        assert!(dropped.is_empty());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].packet_id(), 1);
        assert_eq!(batch[1].packet_id(), 2);
        match &batch[0] {
            StoredEntry::Publish(p) => assert!(p.dup),
            StoredEntry::PubRel(_) => panic!("expected publish"),
        }
    }

    #[test]
    fn drops_entries_over_the_size_limit() {
        let mut store = Store::new();
        store.insert_publish(publish(1, 200));
        store.insert_publish(publish(2, 3));
        let (batch, dropped) = store.replay(Some(33));
        assert_eq!(dropped, vec![1]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].packet_id(), 2);
        assert!(store.is_empty() == false);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn pubrec_replaces_publish_with_pubrel() {
        let mut store = Store::new();
        store.insert_publish(publish(1, 3));
        store.replace_with_pubrel(1, AckPacket::new(AckKind::PubRel, ProtocolVersion::V5, 1));
        let (batch, _) = store.replay(None);
        assert!(matches!(batch[0], StoredEntry::PubRel(_)));
    }
}
