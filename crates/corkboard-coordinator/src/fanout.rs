//! Outbound legs: update pushes and version queries, one thread per
//! destination, joined before the caller replies.

use std::thread;

use tracing::warn;

use corkboard_client::Transport;
use corkboard_types::{MessageId, ReplicaId, Version};
use corkboard_wire::{Frame, REPLY_OK, parse_version};

use crate::registry::ReplicaEntry;

/// Pushes a blank-line-terminated batch to every destination and waits
/// for all acks.
///
/// With `skip_if_covers` set (single-write fan-out), a replica whose last
/// known version already covers that ID is skipped and counted as
/// acknowledged. Sync broadcasts pass `None`: a high version does not
/// imply a gap-free store, so everyone gets the batch.
pub(crate) fn push_updates(
    transport: &Transport,
    lines: &[String],
    dests: &[ReplicaEntry],
    skip_if_covers: Option<MessageId>,
) -> Vec<(ReplicaId, bool)> {
    let mut results = Vec::with_capacity(dests.len());
    let mut handles = Vec::new();

    for entry in dests {
        if skip_if_covers.is_some_and(|id| entry.last_known_version.covers(id)) {
            results.push((entry.id, true));
            continue;
        }
        let transport = transport.clone();
        let lines = lines.to_vec();
        let addr = entry.addr();
        let replica = entry.id;
        handles.push(thread::spawn(move || {
            match transport.push_batch(addr, &lines) {
                Ok(reply) if reply == REPLY_OK => (replica, true),
                Ok(reply) => {
                    warn!(%replica, %addr, %reply, "update push rejected");
                    (replica, false)
                }
                Err(e) => {
                    warn!(%replica, %addr, "update push failed: {e}");
                    (replica, false)
                }
            }
        }));
    }

    for handle in handles {
        match handle.join() {
            Ok(result) => results.push(result),
            Err(_) => warn!("update push thread panicked"),
        }
    }
    results
}

/// Queries each member's version, in parallel. Members that fail to
/// answer are absent from the result.
pub(crate) fn query_versions(
    transport: &Transport,
    members: &[ReplicaEntry],
) -> Vec<(ReplicaEntry, Version)> {
    let mut handles = Vec::new();
    for entry in members {
        let transport = transport.clone();
        let entry = entry.clone();
        handles.push(thread::spawn(move || {
            let line = Frame::VersionQuery.encode().ok()?;
            match transport.exchange(entry.addr(), &line) {
                Ok(reply) => match parse_version(&reply) {
                    Ok(version) => Some((entry, version)),
                    Err(e) => {
                        warn!(replica = %entry.id, "bad version reply: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!(replica = %entry.id, "version query failed: {e}");
                    None
                }
            }
        }));
    }

    handles
        .into_iter()
        .filter_map(|h| h.join().ok().flatten())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{IpAddr, Ipv4Addr, TcpListener};

    fn entry(id: u32, port: u16, version: u64) -> ReplicaEntry {
        ReplicaEntry {
            id: ReplicaId::new(id),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            last_known_version: Version::new(version),
        }
    }

    /// A replica stand-in that ACKs every batch it receives.
    fn acking_replica(expected_batches: usize) -> (u16, thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut served = 0;
            for _ in 0..expected_batches {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line.trim_end().is_empty()
                    {
                        break;
                    }
                }
                let mut stream = stream;
                let _ = stream.write_all(b"OK\n");
                served += 1;
            }
            served
        });
        (port, handle)
    }

    #[test]
    fn push_waits_for_every_ack() {
        let (port_a, handle_a) = acking_replica(1);
        let (port_b, handle_b) = acking_replica(1);
        let dests = vec![entry(0, port_a, 0), entry(1, port_b, 0)];

        let lines = vec!["POST::t::a::b::1".to_string()];
        let results = push_updates(&Transport::new(), &lines, &dests, Some(MessageId::new(1)));

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, ok)| *ok));
        assert_eq!(handle_a.join().unwrap(), 1);
        assert_eq!(handle_b.join().unwrap(), 1);
    }

    #[test]
    fn push_skips_already_current_replicas() {
        // No listener behind this entry: a real push would fail.
        let current = entry(0, 1, 5);
        let lines = vec!["POST::t::a::b::5".to_string()];
        let results = push_updates(&Transport::new(), &lines, &[current], Some(MessageId::new(5)));
        assert_eq!(results, vec![(ReplicaId::new(0), true)]);
    }

    #[test]
    fn push_reports_dead_destination() {
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let dests = vec![entry(0, dead, 0)];
        let lines = vec!["POST::t::a::b::1".to_string()];
        let results = push_updates(&Transport::new(), &lines, &dests, Some(MessageId::new(1)));
        assert_eq!(results, vec![(ReplicaId::new(0), false)]);
    }

    #[test]
    fn version_query_collects_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line.trim_end(), "VERSION_QUERY");
            let mut stream = stream;
            stream.write_all(b"9\n").unwrap();
        });

        let members = vec![entry(0, port, 0)];
        let versions = query_versions(&Transport::new(), &members);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].1, Version::new(9));
    }
}
