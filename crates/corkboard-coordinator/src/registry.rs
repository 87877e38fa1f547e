//! The replica registry and quorum selection.

use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;

use corkboard_types::{ReplicaId, Version};

/// One registered replica.
///
/// The host comes from the registration connection's peer address, the
/// port from the `REGISTER` frame (the replica's client listener).
/// `last_known_version` is bookkeeping only — it is raised by fan-out
/// acks and version queries so healthy replicas can be skipped, never
/// trusted as the replica's exact state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEntry {
    pub id: ReplicaId,
    pub host: IpAddr,
    pub port: u16,
    pub last_known_version: Version,
}

impl ReplicaEntry {
    /// The replica's client listener address.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Registered replicas, ordered by assigned ID starting at 0.
///
/// Capacity is unbounded and entries are never removed; a replica that
/// dies simply keeps failing its fan-out legs.
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    entries: Vec<ReplicaEntry>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica and returns its assigned ID.
    pub fn register(&mut self, host: IpAddr, port: u16) -> ReplicaId {
        let id = ReplicaId::new(self.entries.len() as u32);
        self.entries.push(ReplicaEntry {
            id,
            host,
            port,
            last_known_version: Version::ZERO,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ReplicaId) -> Option<&ReplicaEntry> {
        self.entries.get(u32::from(id) as usize)
    }

    pub fn entries(&self) -> &[ReplicaEntry] {
        &self.entries
    }

    /// Raises a replica's last known version (never lowers it).
    pub fn record_version(&mut self, id: ReplicaId, version: Version) {
        if let Some(entry) = self.entries.get_mut(u32::from(id) as usize) {
            entry.last_known_version = entry.last_known_version.max(version);
        }
    }

    /// A copy of every entry, for use outside the coordinator lock.
    pub fn snapshot(&self) -> Vec<ReplicaEntry> {
        self.entries.clone()
    }

    /// A random-permutation quorum of up to `k` replicas.
    pub fn pick_random(&self, k: usize) -> Vec<ReplicaEntry> {
        let mut picked = self.entries.clone();
        picked.shuffle(&mut rand::thread_rng());
        picked.truncate(k);
        picked
    }

    /// The entry with the highest last known version.
    pub fn freshest(&self) -> Option<&ReplicaEntry> {
        self.entries.iter().max_by_key(|e| e.last_known_version)
    }
}

/// The effective quorum size for `n` registered replicas.
///
/// A configured size of 0, or one below the majority floor ⌊n/2⌋+1, is
/// raised to the floor; a size above `n` is capped at `n`. With both
/// quorums at the floor, `Nr + Nw > n` holds, which is what makes the
/// read-quorum step see every completed write.
pub fn effective_quorum(n: usize, configured: u32) -> usize {
    if n == 0 {
        return 0;
    }
    let floor = n / 2 + 1;
    let configured = configured as usize;
    if configured == 0 || configured < floor {
        floor
    } else {
        configured.min(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn ids_assigned_sequentially_from_zero() {
        let mut registry = ReplicaRegistry::new();
        assert_eq!(registry.register(localhost(), 9000), ReplicaId::new(0));
        assert_eq!(registry.register(localhost(), 9001), ReplicaId::new(1));
        assert_eq!(registry.register(localhost(), 9002), ReplicaId::new(2));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn get_by_id() {
        let mut registry = ReplicaRegistry::new();
        let id = registry.register(localhost(), 9000);
        let entry = registry.get(id).unwrap();
        assert_eq!(entry.port, 9000);
        assert_eq!(entry.last_known_version, Version::ZERO);
        assert!(registry.get(ReplicaId::new(5)).is_none());
    }

    #[test]
    fn record_version_is_monotone() {
        let mut registry = ReplicaRegistry::new();
        let id = registry.register(localhost(), 9000);

        registry.record_version(id, Version::new(4));
        assert_eq!(registry.get(id).unwrap().last_known_version, Version::new(4));

        // A stale observation never lowers the bookkeeping.
        registry.record_version(id, Version::new(2));
        assert_eq!(registry.get(id).unwrap().last_known_version, Version::new(4));
    }

    #[test]
    fn pick_random_returns_distinct_entries() {
        let mut registry = ReplicaRegistry::new();
        for port in 9000..9005 {
            registry.register(localhost(), port);
        }

        for _ in 0..20 {
            let quorum = registry.pick_random(3);
            assert_eq!(quorum.len(), 3);
            let ids: HashSet<_> = quorum.iter().map(|e| e.id).collect();
            assert_eq!(ids.len(), 3, "quorum members must be distinct");
        }
    }

    #[test]
    fn pick_random_caps_at_population() {
        let mut registry = ReplicaRegistry::new();
        registry.register(localhost(), 9000);
        assert_eq!(registry.pick_random(5).len(), 1);
    }

    #[test]
    fn freshest_prefers_highest_version() {
        let mut registry = ReplicaRegistry::new();
        let a = registry.register(localhost(), 9000);
        let b = registry.register(localhost(), 9001);
        registry.record_version(a, Version::new(2));
        registry.record_version(b, Version::new(7));

        assert_eq!(registry.freshest().unwrap().id, b);
    }

    #[test]
    fn quorum_floor_rules() {
        // Zero or too-small configured sizes raise to ⌊n/2⌋+1.
        assert_eq!(effective_quorum(3, 0), 2);
        assert_eq!(effective_quorum(3, 1), 2);
        assert_eq!(effective_quorum(5, 2), 3);

        // Valid configured sizes pass through, capped at n.
        assert_eq!(effective_quorum(3, 2), 2);
        assert_eq!(effective_quorum(3, 3), 3);
        assert_eq!(effective_quorum(3, 9), 3);

        // Degenerate populations.
        assert_eq!(effective_quorum(1, 0), 1);
        assert_eq!(effective_quorum(0, 2), 0);
    }

    #[test]
    fn floor_quorums_overlap() {
        // Nr + Nw > n for every population when both sit at the floor.
        for n in 1..=9 {
            let nr = effective_quorum(n, 0);
            let nw = effective_quorum(n, 0);
            assert!(nr + nw > n, "floor quorums must overlap for n={n}");
        }
    }
}
