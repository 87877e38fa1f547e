//! # corkboard-store: In-memory threaded message store
//!
//! The [`BulletinBoard`] holds a forest of POST roots, each with a sub-tree
//! of REPLY descendants, and exposes two views over the same members:
//!
//! - *Threaded view*: pre-order DFS, each message before its reply subtree.
//! - *Flat-by-ID view*: an index for O(log n) lookup by [`MessageId`].
//!
//! # Invariants
//!
//! At rest between operations:
//!
//! - IDs in the store are unique ([`StoreError::DuplicateId`] on violation).
//! - Every REPLY's parent is already present ([`StoreError::ParentMissing`]).
//! - `version` equals the max ID ever inserted and never decreases.
//! - The threaded view is a permutation of the flat view's members.
//!
//! The board itself is not synchronized; the replica owns one behind a
//! mutex and serializes mutations through it.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use corkboard_types::{Message, MessageId, Version};

/// Number of messages per page of the threaded view.
pub const PAGE_SIZE: usize = 5;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by board mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A REPLY referenced a parent that is not in the store.
    #[error("reply parent {0} does not exist")]
    ParentMissing(MessageId),

    /// The message's ID is already taken.
    #[error("message id {0} already present")]
    DuplicateId(MessageId),

    /// IDs start at 1; 0 is reserved for the empty version.
    #[error("message id {0} is not a valid id")]
    InvalidId(MessageId),
}

/// The in-memory bulletin board of one replica.
#[derive(Debug, Default, Clone)]
pub struct BulletinBoard {
    /// Top-level posts, in ID order.
    roots: Vec<MessageId>,
    /// Replies of each message, in ID order.
    children: HashMap<MessageId, Vec<MessageId>>,
    /// Flat-by-ID view.
    index: BTreeMap<MessageId, Message>,
    /// Max ID ever inserted.
    version: Version,
}

impl BulletinBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message, linking it under its parent (REPLY) or appending
    /// it to the roots (POST).
    ///
    /// Raises the board version to `max(version, msg.id)`. The message is
    /// rejected without any state change on a duplicate or invalid ID, or
    /// a missing parent.
    pub fn insert(&mut self, msg: Message) -> StoreResult<()> {
        if !msg.id.is_valid() {
            return Err(StoreError::InvalidId(msg.id));
        }
        if self.index.contains_key(&msg.id) {
            return Err(StoreError::DuplicateId(msg.id));
        }
        // Siblings are kept in ID order (creation order), so replicas that
        // received the same messages along different paths render the same
        // threaded view.
        match msg.parent {
            Some(parent) => {
                if !self.index.contains_key(&parent) {
                    return Err(StoreError::ParentMissing(parent));
                }
                let siblings = self.children.entry(parent).or_default();
                let at = siblings.partition_point(|&s| s < msg.id);
                siblings.insert(at, msg.id);
            }
            None => {
                let at = self.roots.partition_point(|&r| r < msg.id);
                self.roots.insert(at, msg.id);
            }
        }
        self.version.observe(msg.id);
        self.index.insert(msg.id, msg);
        Ok(())
    }

    /// Looks up a message in the flat view.
    pub fn get_by_id(&self, id: MessageId) -> Option<&Message> {
        self.index.get(&id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns up to [`PAGE_SIZE`] consecutive messages of the threaded
    /// view starting at offset `PAGE_SIZE * n`. Empty when past the end.
    pub fn page(&self, n: u64) -> Vec<&Message> {
        let skip = (n as usize).saturating_mul(PAGE_SIZE);
        self.threaded().into_iter().skip(skip).take(PAGE_SIZE).collect()
    }

    /// All messages with `id >= start`, in threaded order.
    pub fn range_from(&self, start: MessageId) -> Vec<&Message> {
        self.threaded()
            .into_iter()
            .filter(|m| m.id >= start)
            .collect()
    }

    /// Pre-order traversal of the message forest.
    pub fn threaded(&self) -> Vec<&Message> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut stack: Vec<MessageId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(msg) = self.index.get(&id) {
                out.push(msg);
            }
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    /// The flat view's members in ID order. Two replicas hold the same
    /// board state iff their flat views are equal.
    pub fn flat(&self) -> Vec<&Message> {
        self.index.values().collect()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
