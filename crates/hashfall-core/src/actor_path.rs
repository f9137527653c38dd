//! Actor identity: the stable, serializable address of an actor.
//!
//! An `ActorPath` names an actor by node and path segments, never by an
//! in-process pointer. Payloads that reference other actors carry paths;
//! the receiving node turns them into mailboxes only when it sends.
//!
//! Textual form: `hashfall://<system>@<host>:<port>/<segment>/<segment>...`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SCHEME: &str = "hashfall";

/// Network identity of one actor system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    system: String,
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new(system: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            system: system.into(),
            host: host.into(),
            port,
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, for socket connects.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path of a top-level user actor on this node.
    pub fn user(&self, name: &str) -> ActorPath {
        ActorPath {
            node: self.clone(),
            segments: vec!["user".to_string(), name.to_string()],
        }
    }

    /// Path of a runtime-internal endpoint on this node.
    pub fn system_path(&self, name: &str) -> ActorPath {
        ActorPath {
            node: self.clone(),
            segments: vec!["system".to_string(), name.to_string()],
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}://{}@{}:{}", self.system, self.host, self.port)
    }
}

/// Logical address of an actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorPath {
    node: NodeAddress,
    segments: Vec<String>,
}

impl ActorPath {
    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, or the empty string for a node root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Path of a child actor. `name` must be a valid segment.
    pub fn child(&self, name: &str) -> ActorPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        ActorPath {
            node: self.node.clone(),
            segments,
        }
    }

    pub fn parent(&self) -> Option<ActorPath> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(ActorPath {
            node: self.node.clone(),
            segments,
        })
    }

    pub fn is_local_to(&self, node: &NodeAddress) -> bool {
        &self.node == node
    }
}

/// Segments are non-empty and contain only `[A-Za-z0-9_.-]`.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path {0:?} does not start with {SCHEME}://")]
    Scheme(String),
    #[error("path {0:?} has no system name")]
    MissingSystem(String),
    #[error("path {0:?} has no valid host:port")]
    Authority(String),
    #[error("path {0:?} has an invalid segment {1:?}")]
    Segment(String, String),
}

impl FromStr for ActorPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| PathError::Scheme(s.to_string()))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let (system, host_port) = authority
            .split_once('@')
            .ok_or_else(|| PathError::MissingSystem(s.to_string()))?;
        if system.is_empty() {
            return Err(PathError::MissingSystem(s.to_string()));
        }

        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| PathError::Authority(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| PathError::Authority(s.to_string()))?;
        if host.is_empty() {
            return Err(PathError::Authority(s.to_string()));
        }

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|p| !p.is_empty()) {
            if !is_valid_segment(segment) {
                return Err(PathError::Segment(s.to_string(), segment.to_string()));
            }
            segments.push(segment.to_string());
        }

        Ok(ActorPath {
            node: NodeAddress::new(system, host, port),
            segments,
        })
    }
}

impl FromStr for NodeAddress {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path: ActorPath = s.parse()?;
        if !path.segments.is_empty() {
            return Err(PathError::Authority(s.to_string()));
        }
        Ok(path.node)
    }
}

// Paths travel as their textual form so they stay resolvable on any node.

impl Serialize for ActorPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ActorPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
