//! Per-policy layering of network dialogs around the local board.
//!
//! A replica runs exactly one policy, fixed at registration. Policies are
//! a tagged variant with a dispatch function per operation, not a trait
//! object: the three behaviors differ only in which coordinator dialog
//! precedes the local read or write.
//!
//! - **Sequential**: writes forward to the coordinator, reads are local.
//! - **Quorum**: writes forward; reads first run the `QUORUM_READ`
//!   handshake, which may pull a fresher store into this replica.
//! - **Read-your-writes**: writes run under the coordinator's token
//!   (`ACQUIRE_LOCK` → local insert → `UNLOCK` + update); reads poll
//!   `CHECK::version` until the coordinator answers `OK`.

use std::thread;

use tracing::{debug, warn};

use corkboard_types::ConsistencyPolicy;
use corkboard_wire::{CODE_FAIL, Frame, REPLY_OK, REPLY_WAIT, parse_code};

use crate::error::{ReplicaError, ReplicaResult};
use crate::node::ReplicaCore;

/// Handles a client write (`POST` or `REPLY` without an ID). Returns the
/// success code to relay to the client.
pub fn post(core: &ReplicaCore, frame: Frame) -> ReplicaResult<u32> {
    match core.policy() {
        ConsistencyPolicy::Sequential | ConsistencyPolicy::Quorum => forward_write(core, frame),
        ConsistencyPolicy::ReadYourWrites => token_write(core, frame),
    }
}

/// Runs the policy's read precondition. Local `READ`/`CHOOSE` may proceed
/// only after this returns `Ok`.
pub fn before_read(core: &ReplicaCore) -> ReplicaResult<()> {
    match core.policy() {
        ConsistencyPolicy::Sequential => Ok(()),
        ConsistencyPolicy::Quorum => quorum_read_gate(core),
        ConsistencyPolicy::ReadYourWrites => check_gate(core),
    }
}

/// Default write path: hand the raw frame to the coordinator and relay
/// whatever success code it returns.
fn forward_write(core: &ReplicaCore, frame: Frame) -> ReplicaResult<u32> {
    let line = frame.encode()?;
    let reply = core.transport().exchange(core.coordinator(), &line)?;
    Ok(parse_code(&reply)?)
}

/// RYW write: hold the token across the local insert, then return it
/// together with the update so the coordinator can fan out.
fn token_write(core: &ReplicaCore, frame: Frame) -> ReplicaResult<u32> {
    let acquire = Frame::AcquireLock.encode()?;
    // The grant can be held back indefinitely while another writer owns
    // the token, so this exchange runs without a timeout.
    let grant = core
        .transport()
        .blocking()
        .exchange(core.coordinator(), &acquire)?;
    let Ok(Frame::GrantLock { id }) = Frame::parse(&grant) else {
        return Err(ReplicaError::Coordinator(grant));
    };

    let assigned = frame.with_id(id);
    let Some(msg) = assigned.clone().into_message() else {
        // Not a message frame; return the token unused.
        release_token(core);
        return Ok(CODE_FAIL);
    };

    if let Err(e) = core.board().insert(msg) {
        warn!(%id, "local write rejected under token: {e}");
        release_token(core);
        return Ok(CODE_FAIL);
    }

    let update = assigned.encode()?;
    let unlock = Frame::Unlock.encode()?;
    let reply = core
        .transport()
        .exchange_lines(core.coordinator(), &[&unlock, &update])?;
    Ok(parse_code(&reply)?)
}

/// Returns the token without an update. Best effort: the write already
/// failed, and the coordinator replies with a failure code regardless.
fn release_token(core: &ReplicaCore) {
    let Ok(unlock) = Frame::Unlock.encode() else {
        return;
    };
    if let Err(e) = core.transport().exchange(core.coordinator(), &unlock) {
        warn!("failed to return token: {e}");
    }
}

/// Quorum read precondition: ask the coordinator to assemble a read
/// quorum and, if a member is fresher, push its store here first.
fn quorum_read_gate(core: &ReplicaCore) -> ReplicaResult<()> {
    let line = Frame::QuorumRead { replica: core.id() }.encode()?;
    let reply = core.transport().exchange(core.coordinator(), &line)?;
    if reply == REPLY_OK {
        Ok(())
    } else {
        Err(ReplicaError::Coordinator(reply))
    }
}

/// RYW read precondition: poll `CHECK::version` until the coordinator
/// knows of no update this replica is missing.
fn check_gate(core: &ReplicaCore) -> ReplicaResult<()> {
    loop {
        let line = Frame::Check {
            version: core.version(),
        }
        .encode()?;
        let reply = core.transport().exchange(core.coordinator(), &line)?;
        match reply.as_str() {
            REPLY_OK => return Ok(()),
            REPLY_WAIT => {
                debug!(version = %core.version(), "coordinator says WAIT, retrying");
                thread::sleep(core.ryw_poll_interval());
            }
            other => return Err(ReplicaError::Coordinator(other.to_string())),
        }
    }
}
