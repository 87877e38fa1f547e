//! Replica startup, registration, and shared state.

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use corkboard_client::Transport;
use corkboard_store::BulletinBoard;
use corkboard_types::{ConsistencyPolicy, Message, ReplicaId, Version};
use corkboard_wire::{Frame, RegistrationReply};

use crate::error::{ReplicaError, ReplicaResult};
use crate::handler;
use crate::server::{ConnectionServer, ServerTuning};

/// Startup parameters for one replica process.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Address the client-facing listener binds to (port 0 for ephemeral).
    pub bind: SocketAddr,
    /// Address of the primary's coordinator listener.
    pub coordinator: SocketAddr,
    /// Listener queue capacity and worker count.
    pub tuning: ServerTuning,
    /// Transport for all outbound exchanges (timeouts, WAN delay).
    pub transport: Transport,
    /// Sleep between RYW `CHECK` retries.
    pub ryw_poll_interval: Duration,
    /// Registration attempts before startup fails.
    pub register_attempts: u32,
    /// Backoff between registration attempts.
    pub register_backoff: Duration,
}

impl ReplicaConfig {
    /// Defaults per the protocol: queue capacity 10, 5 workers, 100 ms RYW
    /// poll, 10 registration attempts 500 ms apart, no WAN delay.
    pub fn new(bind: SocketAddr, coordinator: SocketAddr) -> Self {
        Self {
            bind,
            coordinator,
            tuning: ServerTuning::default(),
            transport: Transport::new(),
            ryw_poll_interval: Duration::from_millis(100),
            register_attempts: 10,
            register_backoff: Duration::from_millis(500),
        }
    }
}

/// State shared between the worker pool and the policy layer.
///
/// The board is guarded by a single mutex: mutations are serialized, and
/// readers observe a consistent snapshot by holding the same lock for the
/// duration of one traversal.
pub struct ReplicaCore {
    board: Mutex<BulletinBoard>,
    policy: ConsistencyPolicy,
    id: ReplicaId,
    coordinator: SocketAddr,
    transport: Transport,
    ryw_poll_interval: Duration,
}

impl ReplicaCore {
    pub fn policy(&self) -> ConsistencyPolicy {
        self.policy
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn ryw_poll_interval(&self) -> Duration {
        self.ryw_poll_interval
    }

    /// Locks the board. A poisoned lock is recovered rather than
    /// propagated: the board itself is never left half-mutated because
    /// `insert` validates before touching any state.
    pub fn board(&self) -> MutexGuard<'_, BulletinBoard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn version(&self) -> Version {
        self.board().version()
    }

    /// Applies one coordinator-originated update, idempotently: an ID
    /// already in the store is silently skipped.
    pub fn apply_update(&self, msg: Message) -> ReplicaResult<()> {
        let mut board = self.board();
        if board.contains(msg.id) {
            return Ok(());
        }
        board.insert(msg)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn for_tests(policy: ConsistencyPolicy, coordinator: SocketAddr) -> Self {
        Self {
            board: Mutex::new(BulletinBoard::new()),
            policy,
            id: ReplicaId::new(0),
            coordinator,
            transport: Transport::new(),
            ryw_poll_interval: Duration::from_millis(10),
        }
    }

    /// Renders the full store as id-bearing frame lines, threaded order.
    pub fn render_range_from(&self, start: corkboard_types::MessageId) -> Vec<String> {
        let board = self.board();
        board
            .range_from(start)
            .into_iter()
            .filter_map(|m| Frame::from_message(m).encode().ok())
            .collect()
    }
}

/// A running replica: local board, listener, policy layer.
pub struct ReplicaNode {
    core: Arc<ReplicaCore>,
    server: ConnectionServer,
}

impl ReplicaNode {
    /// Binds the client listener, registers with the coordinator, and
    /// starts serving.
    ///
    /// The policy is whatever the registration reply says — a replica
    /// never decides its own policy (the primary's tag wins).
    pub fn start(config: ReplicaConfig) -> ReplicaResult<Self> {
        let listener = TcpListener::bind(config.bind)?;
        let local_addr = listener.local_addr()?;

        let reply = register(&config, local_addr.port())?;
        info!(
            replica = %reply.replica,
            policy = %reply.policy,
            %local_addr,
            "registered with coordinator"
        );

        let core = Arc::new(ReplicaCore {
            board: Mutex::new(BulletinBoard::new()),
            policy: reply.policy,
            id: reply.replica,
            coordinator: config.coordinator,
            transport: config.transport,
            ryw_poll_interval: config.ryw_poll_interval,
        });

        let handler_core = Arc::clone(&core);
        let server = ConnectionServer::spawn(
            listener,
            config.tuning,
            &format!("replica-{}", reply.replica),
            move |stream, peer| handler::handle_connection(&handler_core, stream, peer),
        )?;

        Ok(Self { core, server })
    }

    /// The address of the client-facing listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.core.id
    }

    pub fn policy(&self) -> ConsistencyPolicy {
        self.core.policy
    }

    /// The local board version (highest message ID applied here).
    pub fn version(&self) -> Version {
        self.core.version()
    }

    /// A copy of the flat view, in ID order. Two replicas hold the same
    /// state iff their snapshots are equal.
    pub fn snapshot(&self) -> Vec<Message> {
        self.core.board().flat().into_iter().cloned().collect()
    }

    /// Stops the listener and joins all worker threads.
    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

fn register(config: &ReplicaConfig, listen_port: u16) -> ReplicaResult<RegistrationReply> {
    let frame = Frame::Register { port: listen_port };
    let line = frame.encode()?;

    let mut last_error = String::new();
    for attempt in 1..=config.register_attempts.max(1) {
        match config.transport.exchange(config.coordinator, &line) {
            Ok(reply) => return Ok(RegistrationReply::parse(&reply)?),
            Err(e) => {
                warn!(attempt, coordinator = %config.coordinator, "registration attempt failed: {e}");
                last_error = e.to_string();
                std::thread::sleep(config.register_backoff);
            }
        }
    }
    Err(ReplicaError::RegistrationFailed {
        attempts: config.register_attempts,
        last_error,
    })
}
