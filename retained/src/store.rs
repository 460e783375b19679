// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Concurrent map of retained messages, looked up by wildcard subscription.

use std::collections::HashMap;
use std::sync::RwLock;

use mqtt_codec::PublishPacket;

use crate::topic::{PubTopic, SubTopic, TopicError};

/// Retained-message map: one entry per topic name, replaced on every publish
/// and removed by an empty-payload publish to the same topic. Readers
/// (subscription matches) and writers (new retains) serialise through the
/// map's own lock rather than the connection state machine's.
#[derive(Debug, Default)]
pub struct RetainedMap {
    entries: RwLock<HashMap<String, PublishPacket>>,
}

impl RetainedMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `packet` as the retained message for its topic, or clears it if
    /// the payload is empty, per the retained-message semantics of `PUBLISH`.
    ///
    /// # Errors
    /// Returns [`TopicError`] if `packet.topic` is not a valid publish topic
    /// (empty, or containing a wildcard character).
    pub fn publish(&self, packet: PublishPacket) -> Result<(), TopicError> {
        let topic = PubTopic::parse(&packet.topic)?;
        let mut entries = self.entries.write().expect("retained map lock poisoned");
        if packet.payload.is_empty() {
            entries.remove(topic.as_str());
        } else {
            entries.insert(topic.as_str().to_owned(), packet);
        }
        Ok(())
    }

    /// Every retained message whose topic matches `filter`, in unspecified
    /// order -- a fresh subscription replays these before live traffic.
    ///
    /// # Errors
    /// Returns [`TopicError`] if `filter` is not a valid subscription filter.
    pub fn matching(&self, filter: &str) -> Result<Vec<PublishPacket>, TopicError> {
        let filter = SubTopic::parse(filter)?;
        let entries = self.entries.read().expect("retained map lock poisoned");
        let mut out = Vec::new();
        for (topic, packet) in entries.iter() {
            if let Ok(pub_topic) = PubTopic::parse(topic) {
                if filter.matches(&pub_topic) {
                    out.push(packet.clone());
                }
            }
        }
        Ok(out)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("retained map lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
