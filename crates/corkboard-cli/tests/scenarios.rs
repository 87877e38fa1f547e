//! End-to-end scenarios over real sockets: one in-process coordinator
//! plus in-process replicas, driven through the client-facing protocol.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use corkboard_client::BoardClient;
use corkboard_coordinator::{Coordinator, CoordinatorConfig};
use corkboard_replica::{ReplicaConfig, ReplicaNode};
use corkboard_types::{ConsistencyPolicy, MessageId};

/// A primary's coordinator plus N replicas (the first standing in for the
/// primary's co-located replica).
struct Deployment {
    coordinator: Coordinator,
    replicas: Vec<ReplicaNode>,
}

impl Deployment {
    fn start(policy: ConsistencyPolicy, replicas: usize) -> Self {
        Self::start_tuned(policy, replicas, 0, 0, Duration::from_secs(3600))
    }

    fn start_tuned(
        policy: ConsistencyPolicy,
        replicas: usize,
        write_quorum: u32,
        read_quorum: u32,
        sync_interval: Duration,
    ) -> Self {
        let mut config = CoordinatorConfig::new("127.0.0.1:0".parse().unwrap(), policy);
        config.write_quorum = write_quorum;
        config.read_quorum = read_quorum;
        config.sync_interval = sync_interval;
        let coordinator = Coordinator::spawn(config).expect("coordinator should start");

        let mut nodes = Vec::with_capacity(replicas);
        for _ in 0..replicas {
            nodes.push(join(&coordinator));
        }
        Self {
            coordinator,
            replicas: nodes,
        }
    }

    fn client(&self, replica: usize) -> BoardClient {
        BoardClient::new(self.replicas[replica].local_addr())
    }
}

fn join(coordinator: &Coordinator) -> ReplicaNode {
    let config = ReplicaConfig::new("127.0.0.1:0".parse().unwrap(), coordinator.local_addr());
    ReplicaNode::start(config).expect("replica should start and register")
}

#[test]
fn single_replica_post_then_read() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 1);
    let client = deployment.client(0);

    assert_eq!(client.post("Weather", "Alice", "Sunny").unwrap(), 0);

    let page = client.read_page(0).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, MessageId::new(1));
    assert_eq!(page[0].title, "Weather");
    assert_eq!(page[0].author, "Alice");
    assert_eq!(page[0].body, "Sunny");
    assert_eq!(page[0].parent, None);
}

#[test]
fn reply_to_missing_parent_fails_cleanly() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 1);
    let client = deployment.client(0);

    assert_eq!(client.post("Weather", "Alice", "Sunny").unwrap(), 0);
    assert_eq!(
        client.reply(MessageId::new(99), "Re", "Bob", "Nope").unwrap(),
        1
    );

    // The board is exactly as it was after the successful post.
    let page = client.read_page(0).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, MessageId::new(1));
}

#[test]
fn sequential_write_visible_at_every_replica() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 2);

    assert_eq!(deployment.client(0).post("A", "x", "a").unwrap(), 0);

    // Fan-out completed before the ack, so the other replica serves the
    // write from its local store with no coordination.
    let page = deployment.client(1).read_page(0).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, MessageId::new(1));
    assert_eq!(page[0].title, "A");
}

#[test]
fn sequential_replies_thread_across_replicas() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 2);
    let writer = deployment.client(0);

    assert_eq!(writer.post("Thread", "Alice", "Root").unwrap(), 0);
    assert_eq!(
        writer.reply(MessageId::new(1), "Re", "Bob", "Child").unwrap(),
        0
    );

    let reader = deployment.client(1);
    let page = reader.read_page(0).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, MessageId::new(1));
    assert_eq!(page[1].id, MessageId::new(2));
    assert_eq!(page[1].parent, Some(MessageId::new(1)));

    let chosen = reader.choose(MessageId::new(2)).unwrap().unwrap();
    assert_eq!(chosen.body, "Child");
}

#[test]
fn sequential_stores_converge_under_concurrent_writers() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 2);

    let a = deployment.client(0);
    let b = deployment.client(1);
    let writer_a = thread::spawn(move || {
        for i in 0..3 {
            assert_eq!(a.post(&format!("a{i}"), "alice", "body").unwrap(), 0);
        }
    });
    let writer_b = thread::spawn(move || {
        for i in 0..3 {
            assert_eq!(b.post(&format!("b{i}"), "bob", "body").unwrap(), 0);
        }
    });
    writer_a.join().unwrap();
    writer_b.join().unwrap();

    // All writes quiesced: every replica holds the same flat view.
    let first = deployment.replicas[0].snapshot();
    let second = deployment.replicas[1].snapshot();
    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
}

#[test]
fn quorum_read_sees_any_completed_write() {
    let deployment =
        Deployment::start_tuned(ConsistencyPolicy::Quorum, 3, 2, 2, Duration::from_secs(3600));

    assert_eq!(deployment.client(0).post("T", "u", "b").unwrap(), 0);

    // The write quorum covered 2 of 3 replicas. Wherever this read lands,
    // the read-quorum step must make the write visible first.
    for replica in 0..3 {
        let page = deployment.client(replica).read_page(0).unwrap();
        assert_eq!(page.len(), 1, "replica {replica} misses the write");
        assert_eq!(page[0].id, MessageId::new(1));
    }
}

#[test]
fn quorum_write_leaves_a_replica_behind_until_sync() {
    let deployment =
        Deployment::start_tuned(ConsistencyPolicy::Quorum, 3, 2, 2, Duration::from_secs(3600));

    assert_eq!(deployment.client(0).post("T", "u", "b").unwrap(), 0);

    // Exactly Nw replicas applied the write.
    let have: Vec<bool> = deployment
        .replicas
        .iter()
        .map(|r| u64::from(r.version()) >= 1)
        .collect();
    assert_eq!(have.iter().filter(|h| **h).count(), 2);

    // One forced sync round heals the straggler.
    deployment.coordinator.sync_now();
    for (i, replica) in deployment.replicas.iter().enumerate() {
        assert_eq!(replica.snapshot().len(), 1, "replica {i} not healed");
    }
}

#[test]
fn quorum_sync_timer_converges_all_replicas() {
    let deployment =
        Deployment::start_tuned(ConsistencyPolicy::Quorum, 3, 2, 2, Duration::from_millis(200));

    assert_eq!(deployment.client(0).post("T", "u", "b").unwrap(), 0);
    assert_eq!(deployment.client(1).post("U", "v", "c").unwrap(), 0);

    // Wait out a couple of sync periods.
    thread::sleep(Duration::from_millis(1200));

    let reference = deployment.replicas[0].snapshot();
    assert_eq!(reference.len(), 2);
    for replica in &deployment.replicas[1..] {
        assert_eq!(replica.snapshot(), reference);
    }
}

#[test]
fn ryw_writer_reads_its_own_write() {
    let deployment = Deployment::start(ConsistencyPolicy::ReadYourWrites, 2);
    let client = deployment.client(0);

    assert_eq!(client.post("Mine", "me", "now").unwrap(), 0);

    let chosen = client.choose(MessageId::new(1)).unwrap().unwrap();
    assert_eq!(chosen.title, "Mine");
}

#[test]
fn ryw_concurrent_posts_serialize_under_the_token() {
    let deployment = Deployment::start(ConsistencyPolicy::ReadYourWrites, 2);

    let a = deployment.client(0);
    let b = deployment.client(1);
    let writer_a = thread::spawn(move || a.post("from-a", "alice", "x").unwrap());
    let writer_b = thread::spawn(move || b.post("from-b", "bob", "y").unwrap());
    assert_eq!(writer_a.join().unwrap(), 0);
    assert_eq!(writer_b.join().unwrap(), 0);

    // The token serialized the writes: ids 1 and 2, in some order.
    let first = deployment.replicas[0].snapshot();
    let second = deployment.replicas[1].snapshot();
    assert_eq!(first, second);
    let ids: HashSet<u64> = first.iter().map(|m| u64::from(m.id)).collect();
    assert_eq!(ids, HashSet::from([1, 2]));
}

#[test]
fn version_is_monotone_across_operations() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 1);
    let client = deployment.client(0);
    let replica = &deployment.replicas[0];

    let mut last = u64::from(replica.version());
    for i in 0..4 {
        client.post(&format!("t{i}"), "a", "b").unwrap();
        let now = u64::from(replica.version());
        assert!(now >= last, "version went backwards: {last} -> {now}");
        last = now;
    }
    assert_eq!(last, 4);
}

#[test]
fn choose_missing_id_reports_does_not_exist() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 1);
    let client = deployment.client(0);

    assert_eq!(client.choose(MessageId::new(7)).unwrap(), None);
}

#[test]
fn pagination_across_many_posts() {
    let deployment = Deployment::start(ConsistencyPolicy::Sequential, 1);
    let client = deployment.client(0);

    for i in 0..7 {
        assert_eq!(client.post(&format!("t{i}"), "a", "b").unwrap(), 0);
    }

    assert_eq!(client.read_page(0).unwrap().len(), 5);
    assert_eq!(client.read_page(1).unwrap().len(), 2);
    assert!(client.read_page(2).unwrap().is_empty());
}
