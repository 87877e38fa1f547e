//! # corkboard-coordinator: Replication control plane
//!
//! The coordinator is the single long-running control component on the
//! primary. It owns no board state — only the replica registry, the ID
//! counters, and the RYW token. All board content lives at the replicas;
//! the coordinator moves it around:
//!
//! ## Normal operation
//! - `REGISTER` — Replica → Coordinator: join, get an ID and the policy tag
//! - `POST`/`REPLY` — Replica → Coordinator: client write to replicate
//! - update fan-out — Coordinator → Replicas: the write, with its assigned ID
//!
//! ## Quorum policy
//! - `QUORUM_READ` — Replica → Coordinator: assemble a read quorum, heal me
//! - `VERSION_QUERY` — Coordinator → Replica: who is freshest?
//! - `SERVER_TO_SERVER_TRANSFER` — Coordinator → Replica: push your store
//! - periodic sync — Coordinator: pull missed updates, broadcast the union
//!
//! ## Read-your-writes policy
//! - `ACQUIRE_LOCK`/`GRANT_LOCK` — the token handshake (grant carries the
//!   reserved message ID)
//! - `UNLOCK` + update — return the token, fan the write out
//! - `CHECK` — read gate: `OK` when the checker is caught up, else `WAIT`
//!
//! One coordinator struct serves all three policies, parameterized by the
//! policy tag: the write path picks its destinations per policy, and the
//! sync timer runs only where the policy can leave replicas behind.

mod error;
mod fanout;
mod handler;
mod registry;
mod sync;

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::info;

use corkboard_client::Transport;
use corkboard_replica::{ConnectionServer, ServerTuning};
use corkboard_types::{ConsistencyPolicy, MessageId};

pub use error::{CoordinatorError, CoordinatorResult};
pub use registry::{ReplicaEntry, ReplicaRegistry, effective_quorum};

/// Startup parameters for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the coordinator listener binds to.
    pub bind: SocketAddr,
    /// The deployment's consistency policy.
    pub policy: ConsistencyPolicy,
    /// Configured write quorum size; 0 or below the floor means ⌊N/2⌋+1.
    pub write_quorum: u32,
    /// Configured read quorum size; same floor rule.
    pub read_quorum: u32,
    /// Period of the update sync loop.
    pub sync_interval: Duration,
    /// Listener queue capacity and worker count.
    pub tuning: ServerTuning,
    /// Transport for fan-out legs and replica queries.
    pub transport: Transport,
}

impl CoordinatorConfig {
    /// Defaults per the protocol: quorum sizes at the floor, 30 s sync,
    /// queue capacity 10, 5 workers, no WAN delay.
    pub fn new(bind: SocketAddr, policy: ConsistencyPolicy) -> Self {
        Self {
            bind,
            policy,
            write_quorum: 0,
            read_quorum: 0,
            sync_interval: Duration::from_secs(30),
            tuning: ServerTuning::default(),
            transport: Transport::new(),
        }
    }
}

/// The RYW write token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenState {
    /// The coordinator holds the token; the next `ACQUIRE_LOCK` wins.
    Held,
    /// A replica holds the token, with this message ID reserved for its
    /// write. Re-enters `Held` once the unlock fan-out completes.
    Granted { reserved: MessageId },
}

/// Registry, counters, and token — everything under the coordinator mutex.
pub(crate) struct CoordinatorState {
    pub registry: ReplicaRegistry,
    /// Pre-incremented before each assignment; the first write gets ID 1.
    pub next_message_id: u64,
    /// Highest ID the sync loop has already broadcast.
    pub last_sent: u64,
    pub token: TokenState,
}

pub(crate) struct Shared {
    state: Mutex<CoordinatorState>,
    token_freed: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                registry: ReplicaRegistry::new(),
                next_message_id: 0,
                last_sent: 0,
                token: TokenState::Held,
            }),
            token_freed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the token is held by the coordinator, then runs `f`
    /// with the guard, leaving the token in whatever state `f` set.
    pub(crate) fn wait_for_token<T>(&self, f: impl FnOnce(&mut CoordinatorState) -> T) -> T {
        let mut guard = self.lock();
        while !matches!(guard.token, TokenState::Held) {
            guard = self
                .token_freed
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        f(&mut *guard)
    }

    /// Re-enters `Held` and wakes one waiting acquirer.
    pub(crate) fn return_token(&self) {
        self.lock().token = TokenState::Held;
        self.token_freed.notify_one();
    }
}

/// Per-connection context shared by the handler workers.
pub(crate) struct Ctx {
    pub shared: Arc<Shared>,
    pub policy: ConsistencyPolicy,
    pub write_quorum: u32,
    pub read_quorum: u32,
    pub transport: Transport,
    /// Held across assign + fan-out under the sequential policy, so every
    /// replica applies writes in assignment order. Quorum writes stay
    /// concurrent (divergence is the sync loop's job), and RYW writes are
    /// already serialized by the token.
    pub write_order: Mutex<()>,
}

/// The running coordinator: listener, worker pool, optional sync timer.
pub struct Coordinator {
    shared: Arc<Shared>,
    ctx: Arc<Ctx>,
    server: ConnectionServer,
    sync: Option<sync::SyncTask>,
}

impl Coordinator {
    /// Binds the coordinator listener and starts serving.
    ///
    /// The sync timer runs for the quorum and RYW policies; sequential
    /// fan-out reaches every replica synchronously, so there is nothing
    /// for a timer to heal.
    pub fn spawn(config: CoordinatorConfig) -> CoordinatorResult<Self> {
        let listener = TcpListener::bind(config.bind)?;
        let shared = Arc::new(Shared::new());

        let ctx = Arc::new(Ctx {
            shared: Arc::clone(&shared),
            policy: config.policy,
            write_quorum: config.write_quorum,
            read_quorum: config.read_quorum,
            transport: config.transport.clone(),
            write_order: Mutex::new(()),
        });

        let handler_ctx = Arc::clone(&ctx);
        let server = ConnectionServer::spawn(
            listener,
            config.tuning,
            "coordinator",
            move |stream, peer| handler::handle_connection(&handler_ctx, stream, peer),
        )?;

        let sync = match config.policy {
            ConsistencyPolicy::Sequential => None,
            ConsistencyPolicy::Quorum | ConsistencyPolicy::ReadYourWrites => {
                Some(sync::SyncTask::spawn(Arc::clone(&ctx), config.sync_interval))
            }
        };

        info!(
            addr = %server.local_addr(),
            policy = %config.policy,
            "coordinator started"
        );

        Ok(Self {
            shared,
            ctx,
            server,
            sync,
        })
    }

    /// The address of the coordinator listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Number of registered replicas.
    pub fn replica_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// The highest message ID assigned so far.
    pub fn highest_assigned_id(&self) -> u64 {
        self.shared.lock().next_message_id
    }

    /// Runs one sync round immediately, in the caller's thread.
    ///
    /// The timer keeps its own schedule; this is for operators and tests
    /// that cannot wait out the interval. A no-op under sequential.
    pub fn sync_now(&self) {
        sync::tick(&self.ctx);
    }

    /// Stops the sync timer and the listener, joining all threads.
    pub fn shutdown(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.stop();
        }
        self.server.shutdown();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
