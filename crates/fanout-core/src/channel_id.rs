use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChannelIdError;

/// Trailing segment matching exactly one further level.
pub const WILD: &str = "*";
/// Trailing segment matching one or more further levels.
pub const DEEP_WILD: &str = "**";
/// First segment reserved for protocol control channels.
pub const META_SEGMENT: &str = "meta";
/// First segment reserved for non-broadcast service channels.
pub const SERVICE_SEGMENT: &str = "service";

/// Immutable hierarchical channel path such as `/chat/room1`.
///
/// Two ids are equal iff their segment sequences are equal.
#[derive(Debug, Clone)]
pub struct ChannelId {
    id: String,
    segments: Vec<String>,
}

impl ChannelId {
    /// Parses and validates a `/`-delimited channel path.
    pub fn parse(id: &str) -> Result<Self, ChannelIdError> {
        if id.is_empty() || id == "/" {
            return Err(ChannelIdError::Empty);
        }
        let Some(rest) = id.strip_prefix('/') else {
            return Err(ChannelIdError::MissingLeadingSlash(id.to_string()));
        };

        let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ChannelIdError::EmptySegment(id.to_string()));
        }
        let last = segments.len() - 1;
        if segments[..last]
            .iter()
            .any(|segment| segment == WILD || segment == DEEP_WILD)
        {
            return Err(ChannelIdError::MisplacedWildcard(id.to_string()));
        }

        Ok(Self {
            id: id.to_string(),
            segments,
        })
    }

    fn from_segments(segments: Vec<String>) -> Self {
        let mut id = String::new();
        for segment in &segments {
            id.push('/');
            id.push_str(segment);
        }
        Self { id, segments }
    }

    /// Canonical string form, also used as the registry key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn is_meta(&self) -> bool {
        self.segments[0] == META_SEGMENT
    }

    pub fn is_service(&self) -> bool {
        self.segments[0] == SERVICE_SEGMENT
    }

    pub fn is_broadcast(&self) -> bool {
        !(self.is_meta() || self.is_service())
    }

    pub fn is_wild(&self) -> bool {
        self.segments.last().is_some_and(|s| s == WILD)
    }

    pub fn is_deep_wild(&self) -> bool {
        self.segments.last().is_some_and(|s| s == DEEP_WILD)
    }

    /// True for either wildcard form.
    pub fn is_wildcard(&self) -> bool {
        self.is_wild() || self.is_deep_wild()
    }

    /// Parent path, or `None` for a top-level channel.
    pub fn parent(&self) -> Option<ChannelId> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self::from_segments(
            self.segments[..self.segments.len() - 1].to_vec(),
        ))
    }

    /// Returns whether `self`, read as a pattern, matches `target`.
    ///
    /// A concrete id only matches itself.
    pub fn matches(&self, target: &ChannelId) -> bool {
        let prefix = &self.segments[..self.segments.len() - 1];
        if self.is_deep_wild() {
            target.segments.len() > prefix.len()
                && target.segments.starts_with(prefix)
                && !target.is_wildcard()
        } else if self.is_wild() {
            target.segments.len() == self.segments.len()
                && target.segments.starts_with(prefix)
                && !target.is_wildcard()
        } else {
            self == target
        }
    }

    /// Every wildcard id whose subscribers should also see a publish to
    /// `self`: the sibling `*` plus a `**` at each ancestor level.
    ///
    /// Empty when `self` is itself a wildcard.
    pub fn wilds(&self) -> Vec<ChannelId> {
        if self.is_wildcard() {
            return Vec::new();
        }

        let depth = self.segments.len();
        let mut out = Vec::with_capacity(depth + 1);
        let mut wild = self.segments[..depth - 1].to_vec();
        wild.push(WILD.to_string());
        out.push(Self::from_segments(wild));
        for level in (0..depth).rev() {
            let mut deep = self.segments[..level].to_vec();
            deep.push(DEEP_WILD.to_string());
            out.push(Self::from_segments(deep));
        }
        out
    }
}

impl PartialEq for ChannelId {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for ChannelId {}

impl Hash for ChannelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChannelId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.id)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
