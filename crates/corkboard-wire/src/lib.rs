//! # corkboard-wire: Line protocol for `Corkboard`
//!
//! Every exchange is one line, newline-terminated, with fields separated by
//! the literal two-character sequence `::`. Two record shapes carry board
//! content:
//!
//! ```text
//! POST::title::author::body[::id]
//! REPLY::parent_id::title::author::body[::id]
//! ```
//!
//! The trailing `id` is present exactly when the frame has passed through
//! the coordinator (fan-out, sync, transfer) or is rendered for a reader.
//! Client-facing and replica↔coordinator control frames share the same
//! framing; see [`Frame`] for the full tag set.
//!
//! ## Batches
//!
//! A connection that delivers id-bearing message frames (a fan-out leg, a
//! sync broadcast, a replica-to-replica transfer, a `SEND_UPDATES` or
//! `READ` response) terminates the batch with one empty line. The receiver
//! replies with a single line after the terminator.
//!
//! ## Replies
//!
//! Replies are `OK`, `WAIT`, an integer success code (0 ok, nonzero fail),
//! an integer version, `GRANT_LOCK::<id>`, or `<policy>::<replica_id>` for
//! registration. Integer replies are context-dependent, so the crate offers
//! [`parse_code`] and [`parse_version`] rather than a unified reply parser.

use std::str::FromStr;

use thiserror::Error;

use corkboard_types::{ConsistencyPolicy, Message, MessageId, ReplicaId, Version};

/// The literal separating fields within a frame.
pub const FIELD_SEPARATOR: &str = "::";

/// Reply sent when an operation succeeded and carries no value.
pub const REPLY_OK: &str = "OK";

/// Reply telling an RYW checker to retry later.
pub const REPLY_WAIT: &str = "WAIT";

/// Success code for a completed write.
pub const CODE_OK: u32 = 0;

/// Success code for a failed write.
pub const CODE_FAIL: u32 = 1;

/// Prefix of the textual error returned for a `CHOOSE` of an unknown ID.
pub const DOES_NOT_EXIST: &str = "Does not exist";

/// Result type for codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The line was empty.
    #[error("empty frame")]
    Empty,

    /// The leading tag is not part of the protocol.
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// The field count does not match the leading tag.
    #[error("{tag} frame has {found} fields, expected {expected}")]
    FieldCount {
        tag: &'static str,
        expected: &'static str,
        found: usize,
    },

    /// A numeric field did not parse as an integer.
    #[error("invalid integer in field {field}: {value:?}")]
    InvalidInteger {
        field: &'static str,
        value: String,
    },

    /// A text field contains the field separator or a newline.
    #[error("field {field} contains a reserved separator")]
    ReservedSeparator { field: &'static str },

    /// A reply line did not have the expected shape.
    #[error("malformed reply: {0:?}")]
    MalformedReply(String),
}

/// One protocol frame, client-facing or replica↔coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A top-level post. `id` is present on coordinator-assigned copies.
    Post {
        title: String,
        author: String,
        body: String,
        id: Option<MessageId>,
    },
    /// A reply to `parent`. `id` as for [`Frame::Post`].
    Reply {
        parent: MessageId,
        title: String,
        author: String,
        body: String,
        id: Option<MessageId>,
    },
    /// Client: read one page of the threaded view.
    Read { page: u64 },
    /// Client: fetch a single message by ID.
    Choose { id: MessageId },
    /// Replica → coordinator: register, advertising the client listener port.
    Register { port: u16 },
    /// Replica → coordinator: ask for the deployment's policy tag.
    Policy,
    /// Coordinator → replica: ask for the local version.
    VersionQuery,
    /// Replica → coordinator: RYW read precondition.
    Check { version: Version },
    /// Replica → coordinator: quorum read precondition, naming the requester.
    QuorumRead { replica: ReplicaId },
    /// Replica → coordinator: request the write token.
    AcquireLock,
    /// Coordinator → replica: token granted, with the reserved message ID.
    GrantLock { id: MessageId },
    /// Replica → coordinator: return the token; an update frame may follow.
    Unlock,
    /// Coordinator → replica: push your full store to `host:port`.
    Transfer { host: String, port: u16 },
    /// Coordinator → replica: respond with all messages from `start` on.
    SendUpdates { start: MessageId },
}

impl Frame {
    /// The wire tag this frame is keyed on.
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Post { .. } => "POST",
            Frame::Reply { .. } => "REPLY",
            Frame::Read { .. } => "READ",
            Frame::Choose { .. } => "CHOOSE",
            Frame::Register { .. } => "REGISTER",
            Frame::Policy => "POLICY",
            Frame::VersionQuery => "VERSION_QUERY",
            Frame::Check { .. } => "CHECK",
            Frame::QuorumRead { .. } => "QUORUM_READ",
            Frame::AcquireLock => "ACQUIRE_LOCK",
            Frame::GrantLock { .. } => "GRANT_LOCK",
            Frame::Unlock => "UNLOCK",
            Frame::Transfer { .. } => "SERVER_TO_SERVER_TRANSFER",
            Frame::SendUpdates { .. } => "SEND_UPDATES",
        }
    }

    /// Parses one line into a frame.
    ///
    /// The trailing newline, if any, must already be stripped. Rejects
    /// unknown tags and field counts inconsistent with the leading tag.
    pub fn parse(line: &str) -> WireResult<Frame> {
        if line.is_empty() {
            return Err(WireError::Empty);
        }
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        let tag = fields[0];
        let args = &fields[1..];

        match tag {
            "POST" => match args {
                [title, author, body] => Ok(Frame::Post {
                    title: (*title).to_string(),
                    author: (*author).to_string(),
                    body: (*body).to_string(),
                    id: None,
                }),
                [title, author, body, id] => Ok(Frame::Post {
                    title: (*title).to_string(),
                    author: (*author).to_string(),
                    body: (*body).to_string(),
                    id: Some(parse_u64("id", id)?.into()),
                }),
                _ => Err(field_count("POST", "3 or 4", args.len())),
            },
            "REPLY" => match args {
                [parent, title, author, body] => Ok(Frame::Reply {
                    parent: parse_u64("parent_id", parent)?.into(),
                    title: (*title).to_string(),
                    author: (*author).to_string(),
                    body: (*body).to_string(),
                    id: None,
                }),
                [parent, title, author, body, id] => Ok(Frame::Reply {
                    parent: parse_u64("parent_id", parent)?.into(),
                    title: (*title).to_string(),
                    author: (*author).to_string(),
                    body: (*body).to_string(),
                    id: Some(parse_u64("id", id)?.into()),
                }),
                _ => Err(field_count("REPLY", "4 or 5", args.len())),
            },
            "READ" => match args {
                [page] => Ok(Frame::Read {
                    page: parse_u64("page", page)?,
                }),
                _ => Err(field_count("READ", "1", args.len())),
            },
            "CHOOSE" => match args {
                [id] => Ok(Frame::Choose {
                    id: parse_u64("id", id)?.into(),
                }),
                _ => Err(field_count("CHOOSE", "1", args.len())),
            },
            "REGISTER" => match args {
                [port] => Ok(Frame::Register {
                    port: parse_port(port)?,
                }),
                _ => Err(field_count("REGISTER", "1", args.len())),
            },
            "POLICY" => expect_no_args("POLICY", args, Frame::Policy),
            "VERSION_QUERY" => expect_no_args("VERSION_QUERY", args, Frame::VersionQuery),
            "CHECK" => match args {
                [version] => Ok(Frame::Check {
                    version: parse_u64("version", version)?.into(),
                }),
                _ => Err(field_count("CHECK", "1", args.len())),
            },
            "QUORUM_READ" => match args {
                [replica] => Ok(Frame::QuorumRead {
                    replica: ReplicaId::new(
                        u32::try_from(parse_u64("replica_id", replica)?).map_err(|_| {
                            WireError::InvalidInteger {
                                field: "replica_id",
                                value: (*replica).to_string(),
                            }
                        })?,
                    ),
                }),
                _ => Err(field_count("QUORUM_READ", "1", args.len())),
            },
            "ACQUIRE_LOCK" => expect_no_args("ACQUIRE_LOCK", args, Frame::AcquireLock),
            "GRANT_LOCK" => match args {
                [id] => Ok(Frame::GrantLock {
                    id: parse_u64("id", id)?.into(),
                }),
                _ => Err(field_count("GRANT_LOCK", "1", args.len())),
            },
            "UNLOCK" => expect_no_args("UNLOCK", args, Frame::Unlock),
            "SERVER_TO_SERVER_TRANSFER" => match args {
                [host, port] => Ok(Frame::Transfer {
                    host: (*host).to_string(),
                    port: parse_port(port)?,
                }),
                _ => Err(field_count("SERVER_TO_SERVER_TRANSFER", "2", args.len())),
            },
            "SEND_UPDATES" => match args {
                [start] => Ok(Frame::SendUpdates {
                    start: parse_u64("start_id", start)?.into(),
                }),
                _ => Err(field_count("SEND_UPDATES", "1", args.len())),
            },
            other => Err(WireError::UnknownTag(other.to_string())),
        }
    }

    /// Encodes this frame as one line (without the trailing newline).
    ///
    /// Text fields are validated: a field containing `::` or a newline
    /// would corrupt the framing and is rejected.
    pub fn encode(&self) -> WireResult<String> {
        match self {
            Frame::Post {
                title,
                author,
                body,
                id,
            } => {
                check_text("title", title)?;
                check_text("author", author)?;
                check_text("body", body)?;
                let mut line = format!("POST::{title}::{author}::{body}");
                if let Some(id) = id {
                    line.push_str(&format!("::{id}"));
                }
                Ok(line)
            }
            Frame::Reply {
                parent,
                title,
                author,
                body,
                id,
            } => {
                check_text("title", title)?;
                check_text("author", author)?;
                check_text("body", body)?;
                let mut line = format!("REPLY::{parent}::{title}::{author}::{body}");
                if let Some(id) = id {
                    line.push_str(&format!("::{id}"));
                }
                Ok(line)
            }
            Frame::Read { page } => Ok(format!("READ::{page}")),
            Frame::Choose { id } => Ok(format!("CHOOSE::{id}")),
            Frame::Register { port } => Ok(format!("REGISTER::{port}")),
            Frame::Policy => Ok("POLICY".to_string()),
            Frame::VersionQuery => Ok("VERSION_QUERY".to_string()),
            Frame::Check { version } => Ok(format!("CHECK::{version}")),
            Frame::QuorumRead { replica } => Ok(format!("QUORUM_READ::{replica}")),
            Frame::AcquireLock => Ok("ACQUIRE_LOCK".to_string()),
            Frame::GrantLock { id } => Ok(format!("GRANT_LOCK::{id}")),
            Frame::Unlock => Ok("UNLOCK".to_string()),
            Frame::Transfer { host, port } => {
                check_text("host", host)?;
                Ok(format!("SERVER_TO_SERVER_TRANSFER::{host}::{port}"))
            }
            Frame::SendUpdates { start } => Ok(format!("SEND_UPDATES::{start}")),
        }
    }

    /// Renders a stored message as an id-bearing frame line.
    pub fn from_message(msg: &Message) -> Frame {
        match msg.parent {
            None => Frame::Post {
                title: msg.title.clone(),
                author: msg.author.clone(),
                body: msg.body.clone(),
                id: Some(msg.id),
            },
            Some(parent) => Frame::Reply {
                parent,
                title: msg.title.clone(),
                author: msg.author.clone(),
                body: msg.body.clone(),
                id: Some(msg.id),
            },
        }
    }

    /// Converts an id-bearing `POST`/`REPLY` frame into a [`Message`].
    ///
    /// Returns `None` for control frames and for message frames that have
    /// not been assigned an ID yet.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Frame::Post {
                title,
                author,
                body,
                id: Some(id),
            } => Some(Message {
                id,
                parent: None,
                title,
                author,
                body,
            }),
            Frame::Reply {
                parent,
                title,
                author,
                body,
                id: Some(id),
            } => Some(Message {
                id,
                parent: Some(parent),
                title,
                author,
                body,
            }),
            _ => None,
        }
    }

    /// Returns a copy of a `POST`/`REPLY` frame with the ID set.
    ///
    /// The coordinator calls this when fanning out a client write under its
    /// freshly assigned ID. Control frames are returned unchanged.
    pub fn with_id(self, assigned: MessageId) -> Frame {
        match self {
            Frame::Post {
                title,
                author,
                body,
                ..
            } => Frame::Post {
                title,
                author,
                body,
                id: Some(assigned),
            },
            Frame::Reply {
                parent,
                title,
                author,
                body,
                ..
            } => Frame::Reply {
                parent,
                title,
                author,
                body,
                id: Some(assigned),
            },
            other => other,
        }
    }

    /// Returns true for `POST`/`REPLY` frames (with or without an ID).
    pub fn is_message(&self) -> bool {
        matches!(self, Frame::Post { .. } | Frame::Reply { .. })
    }
}

/// The reply to a successful `REGISTER`: `<policy>::<replica_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationReply {
    pub policy: ConsistencyPolicy,
    pub replica: ReplicaId,
}

impl RegistrationReply {
    pub fn encode(&self) -> String {
        format!("{}::{}", self.policy.tag(), self.replica)
    }

    pub fn parse(line: &str) -> WireResult<Self> {
        let mut fields = line.split(FIELD_SEPARATOR);
        let (Some(tag), Some(id), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(WireError::MalformedReply(line.to_string()));
        };
        let policy = ConsistencyPolicy::from_str(tag)
            .map_err(|_| WireError::MalformedReply(line.to_string()))?;
        let replica = ReplicaId::new(
            id.parse()
                .map_err(|_| WireError::MalformedReply(line.to_string()))?,
        );
        Ok(Self { policy, replica })
    }
}

/// Parses an integer success-code reply (0 ok, nonzero fail).
pub fn parse_code(line: &str) -> WireResult<u32> {
    line.trim()
        .parse()
        .map_err(|_| WireError::MalformedReply(line.to_string()))
}

/// Parses an integer version reply.
pub fn parse_version(line: &str) -> WireResult<Version> {
    line.trim()
        .parse::<u64>()
        .map(Version::new)
        .map_err(|_| WireError::MalformedReply(line.to_string()))
}

fn expect_no_args(tag: &'static str, args: &[&str], frame: Frame) -> WireResult<Frame> {
    if args.is_empty() {
        Ok(frame)
    } else {
        Err(field_count(tag, "0", args.len()))
    }
}

fn field_count(tag: &'static str, expected: &'static str, found: usize) -> WireError {
    WireError::FieldCount {
        tag,
        expected,
        found,
    }
}

fn parse_u64(field: &'static str, value: &str) -> WireResult<u64> {
    value.parse().map_err(|_| WireError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

fn parse_port(value: &str) -> WireResult<u16> {
    value.parse().map_err(|_| WireError::InvalidInteger {
        field: "port",
        value: value.to_string(),
    })
}

fn check_text(field: &'static str, value: &str) -> WireResult<()> {
    if value.contains(FIELD_SEPARATOR) || value.contains('\n') || value.contains('\r') {
        Err(WireError::ReservedSeparator { field })
    } else {
        Ok(())
    }
}
