//! Request dispatch for the replica listener.
//!
//! One request per connection. The leading tag decides the path: client
//! operations go through the policy layer; id-bearing message frames are
//! coordinator-originated updates and are applied directly.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use tracing::{debug, warn};

use corkboard_types::MessageId;
use corkboard_wire::{CODE_FAIL, DOES_NOT_EXIST, Frame, REPLY_OK, WireError};

use crate::error::{ReplicaError, ReplicaResult};
use crate::node::ReplicaCore;
use crate::policy;

pub(crate) fn handle_connection(core: &ReplicaCore, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = serve(core, stream, peer) {
        debug!(%peer, "connection ended: {e}");
    }
}

fn serve(core: &ReplicaCore, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    stream.set_read_timeout(core.transport().timeout())?;
    stream.set_write_timeout(core.transport().timeout())?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;

    let Some(line) = read_line(&mut reader)? else {
        return Ok(());
    };
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
        // Coordinator-originated update: a fan-out leg, a sync broadcast,
        // or an incoming replica-to-replica transfer.
        Frame::Post { id: Some(_), .. } | Frame::Reply { id: Some(_), .. } => {
            apply_batch(core, frame, &mut reader, &mut stream)
        }

        // Client write.
        Frame::Post { .. } | Frame::Reply { .. } => {
            let code = policy::post(core, frame).unwrap_or_else(|e| {
                warn!("write failed: {e}");
                CODE_FAIL
            });
            write_line(&mut stream, &code.to_string())
        }

        Frame::Read { page } => match policy::before_read(core) {
            Ok(()) => write_batch(&mut stream, &render_page(core, page)),
            Err(e) => {
                warn!("read precondition failed: {e}");
                write_line(&mut stream, &CODE_FAIL.to_string())
            }
        },

        Frame::Choose { id } => match policy::before_read(core) {
            Ok(()) => write_line(&mut stream, &render_one(core, id)),
            Err(e) => {
                warn!("choose precondition failed: {e}");
                write_line(&mut stream, &CODE_FAIL.to_string())
            }
        },

        Frame::VersionQuery => write_line(&mut stream, &core.version().to_string()),

        Frame::SendUpdates { start } => write_batch(&mut stream, &core.render_range_from(start)),

        Frame::Transfer { host, port } => {
            let reply = match transfer_to(core, &host, port) {
                Ok(()) => REPLY_OK.to_string(),
                Err(e) => {
                    warn!(%host, port, "transfer failed: {e}");
                    CODE_FAIL.to_string()
                }
            };
            write_line(&mut stream, &reply)
        }

        other => {
            warn!(%peer, tag = other.tag(), "frame not valid on the replica listener, dropping");
            Ok(())
        }
    }
}

/// Applies an id-bearing update batch: the already-parsed first frame plus
/// any further lines up to the blank terminator. Each update is applied
/// idempotently; the batch is acknowledged `OK` only if every frame landed
/// (or was already present).
fn apply_batch(
    core: &ReplicaCore,
    first: Frame,
    reader: &mut BufReader<TcpStream>,
    stream: &mut TcpStream,
) -> io::Result<()> {
    let mut frames = vec![first];
    let mut ok = true;

    while let Some(line) = read_line(reader)? {
        if line.is_empty() {
            break;
        }
        match Frame::parse(&line) {
            Ok(frame) if frame.is_message() => frames.push(frame),
            Ok(frame) => {
                warn!(tag = frame.tag(), "non-message frame in update batch");
                ok = false;
            }
            Err(e) => {
                warn!("malformed update frame: {e}");
                ok = false;
            }
        }
    }

    for frame in frames {
        match frame.into_message() {
            Some(msg) => {
                if let Err(e) = core.apply_update(msg) {
                    warn!("update not applied: {e}");
                    ok = false;
                }
            }
            None => {
                warn!("update frame without an id");
                ok = false;
            }
        }
    }

    write_line(stream, if ok { REPLY_OK } else { "1" })
}

fn render_page(core: &ReplicaCore, page: u64) -> Vec<String> {
    let board = core.board();
    board
        .page(page)
        .into_iter()
        .filter_map(|m| Frame::from_message(m).encode().ok())
        .collect()
}

fn render_one(core: &ReplicaCore, id: MessageId) -> String {
    let board = core.board();
    board
        .get_by_id(id)
        .and_then(|m| Frame::from_message(m).encode().ok())
        .unwrap_or_else(|| format!("{DOES_NOT_EXIST}: {id}"))
}

/// Pushes this replica's full store to `host:port` and waits for `OK`.
/// The coordinator directs this as the last step of a quorum read.
fn transfer_to(core: &ReplicaCore, host: &str, port: u16) -> ReplicaResult<()> {
    let addr = resolve(host, port)?;
    let lines = core.render_range_from(MessageId::new(1));
    if lines.is_empty() {
        return Ok(());
    }
    let reply = core.transport().push_batch(addr, &lines)?;
    if reply == REPLY_OK {
        Ok(())
    } else {
        Err(ReplicaError::Coordinator(reply))
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address for {host}:{port}"),
        )
    })
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

fn write_batch(stream: &mut TcpStream, lines: &[String]) -> io::Result<()> {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(line);
        payload.push('\n');
    }
    payload.push('\n');
    stream.write_all(payload.as_bytes())?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    use corkboard_client::Transport;
    use corkboard_types::ConsistencyPolicy;

    /// Serves connections with the real handler on a background thread.
    fn serve_replica(core: Arc<ReplicaCore>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            while let Ok((stream, peer)) = listener.accept() {
                handle_connection(&core, stream, peer);
            }
        });
        addr
    }

    fn sequential_core() -> Arc<ReplicaCore> {
        // Sequential reads have no precondition, so a dead coordinator
        // address is fine for read-side tests.
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        Arc::new(ReplicaCore::for_tests(ConsistencyPolicy::Sequential, dead))
    }

    #[test]
    fn version_query_reports_board_version() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));

        let reply = Transport::new().exchange(addr, "VERSION_QUERY").unwrap();
        assert_eq!(reply, "0");

        let batch = vec!["POST::t::a::b::3".to_string()];
        let reply = Transport::new().push_batch(addr, &batch).unwrap();
        assert_eq!(reply, "OK");

        let reply = Transport::new().exchange(addr, "VERSION_QUERY").unwrap();
        assert_eq!(reply, "3");
    }

    #[test]
    fn update_batch_applies_idempotently() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        let transport = Transport::new();

        let batch = vec![
            "POST::t::a::b::1".to_string(),
            "REPLY::1::re::c::d::2".to_string(),
        ];
        assert_eq!(transport.push_batch(addr, &batch).unwrap(), "OK");
        // Replaying the same batch is a no-op, still acknowledged.
        assert_eq!(transport.push_batch(addr, &batch).unwrap(), "OK");
        assert_eq!(core.board().len(), 2);
    }

    #[test]
    fn update_with_missing_parent_is_rejected() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));

        let batch = vec!["REPLY::99::re::c::d::2".to_string()];
        let reply = Transport::new().push_batch(addr, &batch).unwrap();
        assert_eq!(reply, "1");
        assert!(core.board().is_empty());
    }

    #[test]
    fn read_returns_threaded_page() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        let transport = Transport::new();

        let batch = vec![
            "POST::Weather::Alice::Sunny::1".to_string(),
            "REPLY::1::Re::Bob::Cloudy::2".to_string(),
        ];
        transport.push_batch(addr, &batch).unwrap();

        let lines = transport.exchange_batch(addr, "READ::0").unwrap();
        assert_eq!(
            lines,
            vec!["POST::Weather::Alice::Sunny::1", "REPLY::1::Re::Bob::Cloudy::2"]
        );

        // Past the end: empty page.
        assert!(transport.exchange_batch(addr, "READ::5").unwrap().is_empty());
    }

    #[test]
    fn choose_hits_and_misses() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        let transport = Transport::new();

        transport
            .push_batch(addr, &["POST::t::a::b::1".to_string()])
            .unwrap();

        assert_eq!(transport.exchange(addr, "CHOOSE::1").unwrap(), "POST::t::a::b::1");
        let miss = transport.exchange(addr, "CHOOSE::9").unwrap();
        assert!(miss.starts_with(DOES_NOT_EXIST));
    }

    #[test]
    fn malformed_client_frame_gets_failure_code() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        assert_eq!(Transport::new().exchange(addr, "READ::abc").unwrap(), "1");
    }

    #[test]
    fn unknown_tag_drops_connection() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        let result = Transport::new().exchange(addr, "NONSENSE::1");
        assert!(result.is_err(), "no reply expected, got {result:?}");
    }

    #[test]
    fn send_updates_streams_range() {
        let core = sequential_core();
        let addr = serve_replica(Arc::clone(&core));
        let transport = Transport::new();

        let batch = vec![
            "POST::a::a::a::1".to_string(),
            "POST::b::b::b::2".to_string(),
            "POST::c::c::c::3".to_string(),
        ];
        transport.push_batch(addr, &batch).unwrap();

        let lines = transport.exchange_batch(addr, "SEND_UPDATES::2").unwrap();
        assert_eq!(lines, vec!["POST::b::b::b::2", "POST::c::c::c::3"]);
    }

    #[test]
    fn transfer_pushes_store_to_destination() {
        let source = sequential_core();
        let source_addr = serve_replica(Arc::clone(&source));
        let dest = sequential_core();
        let dest_addr = serve_replica(Arc::clone(&dest));
        let transport = Transport::new();

        transport
            .push_batch(source_addr, &["POST::t::a::b::1".to_string()])
            .unwrap();

        let line = format!(
            "SERVER_TO_SERVER_TRANSFER::{}::{}",
            dest_addr.ip(),
            dest_addr.port()
        );
        assert_eq!(transport.exchange(source_addr, &line).unwrap(), "OK");
        assert_eq!(dest.board().len(), 1);
    }
}
