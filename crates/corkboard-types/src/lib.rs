//! # corkboard-types: Core types for `Corkboard`
//!
//! This crate contains shared types used across the `Corkboard` system:
//! - Entity IDs ([`MessageId`], [`ReplicaId`])
//! - Version tracking ([`Version`])
//! - The bulletin-board message ([`Message`], [`MessageKind`])
//! - The consistency policy tag ([`ConsistencyPolicy`])

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Unique identifier for a bulletin-board message.
///
/// IDs are positive and assigned by the coordinator; ID 0 is never a valid
/// message and is reserved as the "nothing written yet" version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns true for IDs a store will accept (IDs start at 1).
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Unique identifier for a replica, assigned by the coordinator at
/// registration time, starting at 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ReplicaId> for u32 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

// ============================================================================
// Version
// ============================================================================

/// The highest message ID known to a participant.
///
/// A fresh store has version 0. Versions only ever move forward: applying a
/// message with ID `n` raises the version to `max(version, n)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(u64);

impl Version {
    /// The version of a participant that has seen no writes.
    pub const ZERO: Version = Version(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// Folds a newly observed message ID into this version.
    pub fn observe(&mut self, id: MessageId) {
        self.0 = self.0.max(u64::from(id));
    }

    /// Returns true if a message with the given ID has possibly been seen.
    pub fn covers(self, id: MessageId) -> bool {
        u64::from(id) <= self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Whether a message starts a thread or extends one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A top-level post; a root of the threaded view.
    Post,
    /// A reply to an existing message.
    Reply,
}

/// A single bulletin-board message.
///
/// Messages are immutable once created. The kind is derived from `parent`:
/// a message with no parent is a POST, one with a parent is a REPLY. The
/// text fields are opaque to the system but must not contain the wire
/// field separator (`::`) or a newline; the codec enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique, coordinator-assigned ID.
    pub id: MessageId,
    /// The message this one replies to, if any.
    pub parent: Option<MessageId>,
    pub title: String,
    pub author: String,
    pub body: String,
}

impl Message {
    /// Creates a top-level post.
    pub fn post(
        id: MessageId,
        title: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id,
            parent: None,
            title: title.into(),
            author: author.into(),
            body: body.into(),
        }
    }

    /// Creates a reply to `parent`.
    pub fn reply(
        id: MessageId,
        parent: MessageId,
        title: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id,
            parent: Some(parent),
            title: title.into(),
            author: author.into(),
            body: body.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        if self.parent.is_some() {
            MessageKind::Reply
        } else {
            MessageKind::Post
        }
    }
}

// ============================================================================
// Consistency policy
// ============================================================================

/// The consistency policy a deployment runs under.
///
/// The primary is started with a policy; replicas adopt whatever tag the
/// coordinator hands back at registration, regardless of local arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyPolicy {
    /// All writes are applied at every replica, in one total order, before
    /// the originating client is acknowledged.
    #[default]
    Sequential,
    /// Writes land on a write quorum; reads pull from a read quorum first.
    Quorum,
    /// A coordinator-held token serializes writes; writers always see their
    /// own writes on subsequent local reads.
    ReadYourWrites,
}

impl ConsistencyPolicy {
    /// The wire tag for this policy, as exchanged at registration.
    pub fn tag(self) -> &'static str {
        match self {
            ConsistencyPolicy::Sequential => "sequential",
            ConsistencyPolicy::Quorum => "quorum",
            ConsistencyPolicy::ReadYourWrites => "ryw",
        }
    }
}

impl Display for ConsistencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when a policy tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown consistency policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for ConsistencyPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(ConsistencyPolicy::Sequential),
            "quorum" => Ok(ConsistencyPolicy::Quorum),
            "ryw" => Ok(ConsistencyPolicy::ReadYourWrites),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}
