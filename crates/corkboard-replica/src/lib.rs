//! # corkboard-replica: Replica core for `Corkboard`
//!
//! A replica hosts a local copy of the bulletin board behind a TCP
//! listener. One acceptor thread feeds a bounded connection queue
//! (capacity 10) drained by a fixed pool of 5 workers; each connection
//! carries exactly one request.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    corkboard-replica                     │
//! │  ┌──────────┐   ┌───────────────┐   ┌────────────────┐   │
//! │  │ Acceptor │ → │ BoundedQueue  │ → │ Workers (5)    │   │
//! │  │ (TCP)    │   │ (capacity 10) │   │  → policy layer│   │
//! │  └──────────┘   └───────────────┘   └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The same listener serves clients (`POST`/`REPLY`/`READ`/`CHOOSE`) and
//! the coordinator (id-bearing update batches, `VERSION_QUERY`,
//! `SEND_UPDATES`, `SERVER_TO_SERVER_TRANSFER`). The policy layer decides
//! which network dialogs precede each local operation; see [`policy`].
//!
//! No async runtime: plain synchronous threads with explicit control flow.

mod error;
mod handler;
mod node;
pub mod policy;
mod server;

pub use error::{ReplicaError, ReplicaResult};
pub use node::{ReplicaConfig, ReplicaCore, ReplicaNode};
pub use server::{ConnectionServer, ServerTuning};
