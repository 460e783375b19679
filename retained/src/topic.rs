// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic filter parsing and single-/multi-level wildcard matching.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum TopicError {
    Empty,
    ContainsWildcard,
    MisplacedWildcard,
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "topic is empty"),
            Self::ContainsWildcard => write!(f, "topic name must not contain wildcard characters"),
            Self::MisplacedWildcard => write!(f, "wildcard must occupy a whole level, `#` only as the last level"),
        }
    }
}

impl std::error::Error for TopicError {}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Level {
    Normal(String),
    SingleWildcard,
    MultiWildcard,
}

/// A concrete, published-to topic name: `a/x/b/c`. Never contains `+`/`#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic {
    raw: String,
    levels: Vec<String>,
}

impl PubTopic {
    /// # Errors
    /// Returns [`TopicError::Empty`] or [`TopicError::ContainsWildcard`].
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        if raw.contains('+') || raw.contains('#') {
            return Err(TopicError::ContainsWildcard);
        }
        Ok(Self {
            raw: raw.to_owned(),
            levels: raw.split('/').map(str::to_owned).collect(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// A subscription pattern: `a/+/b/#`. May contain `+`/`#` wildcards, each
/// occupying a whole level and `#` only as the final level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic {
    raw: String,
    levels: Vec<Level>,
}

impl SubTopic {
    /// # Errors
    /// Returns [`TopicError::Empty`] or [`TopicError::MisplacedWildcard`] if a
    /// `+`/`#` shares a level with other characters, or `#` is not the last
    /// level.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let level = match *part {
                "+" => Level::SingleWildcard,
                "#" => {
                    if index != last {
                        return Err(TopicError::MisplacedWildcard);
                    }
                    Level::MultiWildcard
                }
                other => {
                    if other.contains('+') || other.contains('#') {
                        return Err(TopicError::MisplacedWildcard);
                    }
                    Level::Normal(other.to_owned())
                }
            };
            levels.push(level);
        }
        Ok(Self {
            raw: raw.to_owned(),
            levels,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `topic` is matched by this filter.
    #[must_use]
    pub fn matches(&self, topic: &PubTopic) -> bool {
        let mut topic_levels = topic.levels.iter();
        for level in &self.levels {
            match level {
                Level::MultiWildcard => return true,
                Level::SingleWildcard => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Normal(expected) => match topic_levels.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misplaced_hash() {
        assert_eq!(SubTopic::parse("a/#/b"), Err(TopicError::MisplacedWildcard));
        assert_eq!(SubTopic::parse("a/b#"), Err(TopicError::MisplacedWildcard));
    }

    #[test]
    fn single_wildcard_matches_exactly_one_level() {
        let filter = SubTopic::parse("a/+/c").unwrap();
        assert!(filter.matches(&PubTopic::parse("a/b/c").unwrap()));
        assert!(!filter.matches(&PubTopic::parse("a/b/x/c").unwrap()));
        assert!(!filter.matches(&PubTopic::parse("a/c").unwrap()));
    }

    #[test]
    fn multi_wildcard_matches_remaining_levels() {
        let filter = SubTopic::parse("a/#").unwrap();
        assert!(filter.matches(&PubTopic::parse("a/b/c").unwrap()));
        assert!(filter.matches(&PubTopic::parse("a").unwrap()));
        assert!(!filter.matches(&PubTopic::parse("x/b").unwrap()));
    }

    #[test]
    fn bare_hash_matches_everything() {
        let filter = SubTopic::parse("#").unwrap();
        assert!(filter.matches(&PubTopic::parse("sport/tennis/player").unwrap()));
    }
}
