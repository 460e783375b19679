// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Send-side topic-alias table: `alias -> topic`, capacity bounded by
/// the peer's advertised `topic_alias_maximum` from CONNACK.
#[derive(Debug, Default, Clone)]
pub struct SendAliasMap {
    max: u16,
    by_alias: HashMap<u16, String>,
    lru: Vec<u16>,
}

impl SendAliasMap {
    #[must_use]
    pub fn new(max: u16) -> Self {
        Self {
            max,
            by_alias: HashMap::new(),
            lru: Vec::new(),
        }
    }

    #[must_use]
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Validates an explicit alias a caller wants to put on an outbound
    /// PUBLISH. `0` or `> max` is a send-time `bad-message` failure, the
    /// packet must not be transmitted.
    pub fn validate(&self, alias: u16) -> Result<()> {
        if alias == 0 || alias > self.max {
            return Err(EngineError::BadMessage);
        }
        Ok(())
    }

    pub fn register(&mut self, alias: u16, topic: String) -> Result<()> {
        self.validate(alias)?;
        self.by_alias.insert(alias, topic);
        self.touch(alias);
        Ok(())
    }

    #[must_use]
    pub fn topic_for(&self, alias: u16) -> Option<&str> {
        self.by_alias.get(&alias).map(String::as_str)
    }

    #[must_use]
    pub fn alias_for(&self, topic: &str) -> Option<u16> {
        self.by_alias
            .iter()
            .find(|(_, t)| t.as_str() == topic)
            .map(|(alias, _)| *alias)
    }

    /// Picks an alias for auto-map: the next unused slot if capacity
    /// remains, else the least-recently-used alias (its mapping is
    /// overwritten by the caller).
    #[must_use]
    pub fn next_for_auto_map(&self) -> Option<u16> {
        if self.max == 0 {
            return None;
        }
        (1..=self.max)
            .find(|a| !self.by_alias.contains_key(a))
            .or_else(|| self.lru.first().copied())
    }

    fn touch(&mut self, alias: u16) {
        self.lru.retain(|a| *a != alias);
        self.lru.push(alias);
    }

    pub fn clear(&mut self) {
        self.by_alias.clear();
        self.lru.clear();
    }
}

/// Receive-side topic-alias table: capacity bounded by the local
/// `topic_alias_maximum` advertised in CONNECT/CONNACK.
#[derive(Debug, Default, Clone)]
pub struct RecvAliasMap {
    max: u16,
    by_alias: HashMap<u16, String>,
}

impl RecvAliasMap {
    #[must_use]
    pub fn new(max: u16) -> Self {
        Self {
            max,
            by_alias: HashMap::new(),
        }
    }

    /// Resolves an inbound PUBLISH's topic, given its (alias, topic) pair
    /// exactly as decoded. `Ok(None)` means "deliver as-is, no alias was
    /// used"; `Ok(Some(topic))` is the resolved topic to deliver in place of
    /// the possibly-empty wire topic. `Err` means the peer violated the
    /// alias protocol and the connection must auto-`DISCONNECT`.
    pub fn resolve(&mut self, alias: Option<u16>, topic: &str) -> Result<Option<String>> {
        let Some(alias) = alias else {
            return Ok(None);
        };
        if alias == 0 || alias > self.max {
            return Err(EngineError::ProtocolError);
        }
        if topic.is_empty() {
            self.by_alias
                .get(&alias)
                .cloned()
                .map(Some)
                .ok_or(EngineError::ProtocolError)
        } else {
            self.by_alias.insert(alias, topic.to_owned());
            Ok(Some(topic.to_owned()))
        }
    }

    pub fn clear(&mut self) {
        self.by_alias.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_side_rejects_out_of_range_alias() {
        let map = SendAliasMap::new(4);
        assert!(map.validate(0).is_err());
        assert!(map.validate(5).is_err());
        assert!(map.validate(4).is_ok());
    }

    #[test]
    fn recv_side_registers_then_resolves_empty_topic() {
        let mut map = RecvAliasMap::new(4);
        assert_eq!(
            map.resolve(Some(1), "a/b").unwrap(),
            Some("a/b".to_owned())
        );
        assert_eq!(map.resolve(Some(1), "").unwrap(), Some("a/b".to_owned()));
    }

    #[test]
    fn recv_side_rejects_unknown_alias_with_empty_topic() {
        let mut map = RecvAliasMap::new(4);
        assert!(map.resolve(Some(2), "").is_err());
    }

    #[test]
    fn recv_side_rejects_alias_past_max() {
        let mut map = RecvAliasMap::new(1);
        assert!(map.resolve(Some(2), "a").is_err());
    }

    #[test]
    fn auto_map_picks_lowest_unused_slot_then_falls_back_to_lru() {
        let mut map = SendAliasMap::new(2);
        assert_eq!(map.next_for_auto_map(), Some(1));
        map.register(1, "a".to_owned()).unwrap();
        assert_eq!(map.next_for_auto_map(), Some(2));
        map.register(2, "b".to_owned()).unwrap();
        // Capacity exhausted: fall back to the least-recently-touched alias.
        assert_eq!(map.next_for_auto_map(), Some(1));
        assert_eq!(map.alias_for("a"), Some(1));
        assert_eq!(map.alias_for("b"), Some(2));
    }

    #[test]
    fn auto_map_disabled_when_peer_advertises_no_capacity() {
        let map = SendAliasMap::new(0);
        assert_eq!(map.next_for_auto_map(), None);
    }
}
