//! Request dispatch for the coordinator listener.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, info, warn};

use corkboard_types::{ConsistencyPolicy, MessageId, Version};
use corkboard_wire::{
    CODE_FAIL, CODE_OK, Frame, REPLY_OK, REPLY_WAIT, RegistrationReply, WireError,
};

use crate::fanout::{push_updates, query_versions};
use crate::registry::effective_quorum;
use crate::{Ctx, TokenState};

pub(crate) fn handle_connection(ctx: &Ctx, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = serve(ctx, stream, peer) {
        debug!(%peer, "connection ended: {e}");
    }
}

fn serve(ctx: &Ctx, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    stream.set_read_timeout(ctx.transport.timeout())?;
    stream.set_write_timeout(ctx.transport.timeout())?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;

    let Some(line) = read_line(&mut reader)? else {
        return Ok(());
    };
    eprintln!("DEBUG[{:?}]: serve: peer={peer:?} first line = {line:?}", std::thread::current().id());
    let frame = match Frame::parse(&line) {
        Ok(frame) => frame,
        Err(WireError::UnknownTag(tag)) => {
            warn!(%peer, tag, "unknown frame tag, dropping connection");
            return Ok(());
        }
        Err(e) => {
            warn!(%peer, "malformed frame: {e}");
            return write_line(&mut stream, &CODE_FAIL.to_string());
        }
    };

    match frame {
        Frame::Register { port } => {
            let (id, count) = {
                let mut state = ctx.shared.lock();
                let id = state.registry.register(peer.ip(), port);
                (id, state.registry.len())
            };
            info!(replica = %id, host = %peer.ip(), port, replicas = count, "replica registered");
            let reply = RegistrationReply {
                policy: ctx.policy,
                replica: id,
            };
            write_line(&mut stream, &reply.encode())
        }

        Frame::Policy => write_line(&mut stream, ctx.policy.tag()),

        Frame::Post { id: None, .. } | Frame::Reply { id: None, .. } => {
            client_write(ctx, frame, &mut stream)
        }

        Frame::QuorumRead { replica } => quorum_read(ctx, replica, &mut stream),

        Frame::Check { version } => {
            let caught_up = {
                let state = ctx.shared.lock();
                u64::from(version) >= state.next_message_id
            };
            write_line(&mut stream, if caught_up { REPLY_OK } else { REPLY_WAIT })
        }

        Frame::AcquireLock => {
            if ctx.policy != ConsistencyPolicy::ReadYourWrites {
                warn!(%peer, "ACQUIRE_LOCK outside the RYW policy, dropping");
                return Ok(());
            }
            acquire_token(ctx, &mut stream)
        }

        Frame::Unlock => {
            if ctx.policy != ConsistencyPolicy::ReadYourWrites {
                warn!(%peer, "UNLOCK outside the RYW policy, dropping");
                return Ok(());
            }
            unlock_and_fan_out(ctx, &mut reader, &mut stream)
        }

        other => {
            warn!(%peer, tag = other.tag(), "frame not valid on the coordinator listener, dropping");
            Ok(())
        }
    }
}

/// Sequential/quorum write: assign the next ID, pick the destinations,
/// fan the frame out, and acknowledge only when every leg acked.
fn client_write(ctx: &Ctx, frame: Frame, stream: &mut TcpStream) -> io::Result<()> {
    // Sequential promises one apply order at every replica, so the whole
    // assign-and-fan-out is serialized.
    let _order = match ctx.policy {
        ConsistencyPolicy::Sequential => {
            Some(ctx.write_order.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
        }
        _ => None,
    };

    let (line, id, dests) = {
        let mut state = ctx.shared.lock();
        if state.registry.is_empty() {
            warn!("write with no registered replicas");
            return write_line(stream, &CODE_FAIL.to_string());
        }
        state.next_message_id += 1;
        let id = MessageId::new(state.next_message_id);
        let line = match frame.with_id(id).encode() {
            Ok(line) => line,
            Err(e) => {
                warn!("unencodable write: {e}");
                return write_line(stream, &CODE_FAIL.to_string());
            }
        };
        let dests = match ctx.policy {
            ConsistencyPolicy::Sequential | ConsistencyPolicy::ReadYourWrites => {
                state.registry.snapshot()
            }
            ConsistencyPolicy::Quorum => {
                let k = effective_quorum(state.registry.len(), ctx.write_quorum);
                state.registry.pick_random(k)
            }
        };
        (line, id, dests)
    };

    let results = push_updates(&ctx.transport, &[line], &dests, Some(id));
    let all_acked = record_acks(ctx, &results, id);

    let code = if all_acked { CODE_OK } else { CODE_FAIL };
    debug!(%id, code, legs = results.len(), "write fan-out finished");
    write_line(stream, &code.to_string())
}

/// Quorum read: query a random read quorum's versions, then direct the
/// freshest member to push its store to the requester.
fn quorum_read(
    ctx: &Ctx,
    requester: corkboard_types::ReplicaId,
    stream: &mut TcpStream,
) -> io::Result<()> {
    let (members, requester_entry) = {
        let state = ctx.shared.lock();
        let Some(entry) = state.registry.get(requester).cloned() else {
            warn!(%requester, "quorum read from unregistered replica");
            return write_line(stream, &CODE_FAIL.to_string());
        };
        let k = effective_quorum(state.registry.len(), ctx.read_quorum);
        (state.registry.pick_random(k), entry)
    };

    let versions = query_versions(&ctx.transport, &members);
    if versions.is_empty() {
        warn!(%requester, "no read-quorum member answered");
        return write_line(stream, &CODE_FAIL.to_string());
    }
    {
        let mut state = ctx.shared.lock();
        for (entry, version) in &versions {
            state.registry.record_version(entry.id, *version);
        }
    }

    // max_by_key returns the last maximum; any freshest member will do.
    let Some((source, version)) = versions.into_iter().max_by_key(|(_, v)| *v) else {
        return write_line(stream, &CODE_FAIL.to_string());
    };

    if source.id != requester && version > Version::ZERO {
        let transfer = Frame::Transfer {
            host: requester_entry.host.to_string(),
            port: requester_entry.port,
        };
        let line = match transfer.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!("unencodable transfer directive: {e}");
                return write_line(stream, &CODE_FAIL.to_string());
            }
        };
        match ctx.transport.exchange(source.addr(), &line) {
            Ok(reply) if reply == REPLY_OK => {
                debug!(source = %source.id, dest = %requester, "store transferred");
            }
            Ok(reply) => {
                warn!(source = %source.id, %reply, "transfer rejected");
                return write_line(stream, &CODE_FAIL.to_string());
            }
            Err(e) => {
                warn!(source = %source.id, "transfer failed: {e}");
                return write_line(stream, &CODE_FAIL.to_string());
            }
        }
    }

    write_line(stream, REPLY_OK)
}

/// RYW token grant: block until the token is free, reserve the next
/// message ID under it, and hand both to the acquirer.
fn acquire_token(ctx: &Ctx, stream: &mut TcpStream) -> io::Result<()> {
    let id = ctx.shared.wait_for_token(|state| {
        state.next_message_id += 1;
        let id = MessageId::new(state.next_message_id);
        state.token = TokenState::Granted { reserved: id };
        id
    });
    debug!(%id, "token granted");
    let line = Frame::GrantLock { id }
        .encode()
        .unwrap_or_else(|_| format!("GRANT_LOCK::{id}"));
    write_line(stream, &line)
}

/// RYW unlock: read the update frame that follows, fan it out to every
/// replica while still holding the token, then release it.
fn unlock_and_fan_out(
    ctx: &Ctx,
    reader: &mut BufReader<TcpStream>,
    stream: &mut TcpStream,
) -> io::Result<()> {
    eprintln!("DEBUG[{:?}]: unlock_and_fan_out: reading update line, peer={:?}", std::thread::current().id(), stream.peer_addr());
    let update = read_line(reader)?.filter(|l| !l.is_empty());
    eprintln!("DEBUG[{:?}]: unlock_and_fan_out: got update = {update:?}", std::thread::current().id());
    let Some(line) = update else {
        // The grantee's write failed locally; the token comes back unused.
        debug!("token returned without an update");
        ctx.shared.return_token();
        return write_line(stream, &CODE_FAIL.to_string());
    };

    let parsed = Frame::parse(&line).ok().and_then(Frame::into_message);
    let Some(msg) = parsed else {
        warn!("unlock carried a frame that is not an id-bearing update");
        ctx.shared.return_token();
        return write_line(stream, &CODE_FAIL.to_string());
    };

    let dests = {
        let state = ctx.shared.lock();
        match state.token {
            TokenState::Granted { reserved } if reserved == msg.id => {}
            ref token => {
                warn!(id = %msg.id, ?token, "unlock does not match the outstanding grant");
            }
        }
        state.registry.snapshot()
    };

    // Fan out before returning the token: the grant's ID stays exclusive
    // until every replica has the update (or failed).
    eprintln!("DEBUG: unlock_and_fan_out: pushing updates to {} dests", dests.len());
    let results = push_updates(&ctx.transport, &[line], &dests, Some(msg.id));
    eprintln!("DEBUG: unlock_and_fan_out: results = {results:?}");
    let all_acked = record_acks(ctx, &results, msg.id);

    ctx.shared.return_token();

    let code = if all_acked { CODE_OK } else { CODE_FAIL };
    debug!(id = %msg.id, code, "unlock fan-out finished");
    eprintln!("DEBUG: unlock_and_fan_out: writing code {code}");
    write_line(stream, &code.to_string())
}

/// Records fan-out acks in the registry. Returns true when every leg acked.
fn record_acks(ctx: &Ctx, results: &[(corkboard_types::ReplicaId, bool)], id: MessageId) -> bool {
    let mut state = ctx.shared.lock();
    let mut all_acked = true;
    for (replica, acked) in results {
        if *acked {
            state.registry.record_version(*replica, Version::new(u64::from(id)));
        } else {
            all_acked = false;
        }
    }
    all_acked
}

fn read_line(reader: &mut BufReader<TcpStream>) -> io::Result<Option<String>> {
    let mut buf = String::new();
    let n = reader.read_line(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
}

fn write_line(stream: &mut TcpStream, line: &str) -> io::Result<()> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}
