//! Corkboard node binary.
//!
//! A replicated bulletin board: one primary (coordinator + co-located
//! replica) plus any number of replicas, under a pluggable consistency
//! policy.
//!
//! # Quick Start
//!
//! ```bash
//! # Start the primary (coordinator on 10000, its replica on 9000)
//! corkboard 9000 10000 quorum 2 2
//!
//! # Start two more replicas (new terminals)
//! corkboard 9001 10000
//! corkboard 9002 10000
//! ```
//!
//! The presence of the policy argument makes the process the primary.
//! Replicas register against `localhost:10000` by default; use
//! `--primary-host` when the primary lives elsewhere.
//!
//! For local experiments, the `cluster` subcommand supervises a whole
//! deployment from one terminal:
//!
//! ```bash
//! corkboard cluster init ./cluster --replicas 2 --policy quorum --nw 2 --nr 2
//! corkboard cluster start ./cluster
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use corkboard_client::{DelayEmulation, Transport};
use corkboard_config::{ConfigLoader, CorkboardConfig, NetworkConfig};
use corkboard_coordinator::{Coordinator, CoordinatorConfig};
use corkboard_replica::{ReplicaConfig, ReplicaNode, ServerTuning};
use corkboard_types::ConsistencyPolicy;

/// Corkboard - a replicated bulletin board with pluggable consistency.
#[derive(Parser)]
#[command(name = "corkboard")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Port of the client-facing listener.
    client_port: Option<u16>,

    /// Coordinator port: listened on by the primary, connected to by replicas.
    coordinator_port: Option<u16>,

    /// Consistency policy (sequential, quorum, ryw). Presence makes this
    /// process the primary. Unknown values fall back to sequential.
    policy: Option<String>,

    /// Write quorum size (quorum policy; 0 or too small means ⌊N/2⌋+1).
    nw: Option<u32>,

    /// Read quorum size (quorum policy; same floor rule).
    nr: Option<u32>,

    /// Host of the primary's coordinator listener (replicas only).
    #[arg(long)]
    primary_host: Option<String>,

    /// Directory containing corkboard.toml (defaults to the current dir).
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage a local multi-process cluster (primary + replicas).
    #[command(subcommand)]
    Cluster(ClusterCommands),
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Write a cluster layout to a directory.
    Init {
        /// Directory to hold the layout file.
        dir: PathBuf,

        /// Number of replicas besides the primary.
        #[arg(short, long, default_value_t = 2)]
        replicas: usize,

        /// First client port; nodes take consecutive ports from here.
        #[arg(long, default_value_t = 9000)]
        base_client_port: u16,

        /// Port of the primary's coordinator listener.
        #[arg(long, default_value_t = 10_000)]
        coordinator_port: u16,

        /// Consistency policy for the deployment.
        #[arg(short, long, default_value = "sequential")]
        policy: String,

        /// Write quorum size (quorum policy; 0 means the majority floor).
        #[arg(long, default_value_t = 0)]
        nw: u32,

        /// Read quorum size (quorum policy; same floor rule).
        #[arg(long, default_value_t = 0)]
        nr: u32,

        /// Node binary to spawn (defaults to this executable).
        #[arg(long)]
        binary: Option<PathBuf>,
    },

    /// Start a saved cluster and supervise it until Ctrl+C.
    Start {
        /// Directory holding the layout file.
        dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(command) = cli.command {
        let Commands::Cluster(cluster) = command;
        return run_cluster(cluster);
    }

    let (Some(client_port), Some(coordinator_port)) = (cli.client_port, cli.coordinator_port)
    else {
        bail!("expected <client_port> <coordinator_port> (or a subcommand); try --help");
    };

    let mut loader = ConfigLoader::new();
    if let Some(dir) = &cli.config_dir {
        loader = loader.with_project_dir(dir);
    }
    let config = loader.load()?;

    match cli.policy.clone() {
        Some(tag) => run_primary(&cli, client_port, coordinator_port, &tag, &config),
        None => run_replica(&cli, client_port, coordinator_port, &config),
    }
}

/// Primary: coordinator listener plus the co-located replica.
fn run_primary(
    cli: &Cli,
    client_port: u16,
    coordinator_port: u16,
    tag: &str,
    config: &CorkboardConfig,
) -> Result<()> {
    let policy = parse_policy(tag);
    let transport = transport_from(&config.network);

    let bind = resolve(&config.node.bind_host, coordinator_port)?;
    let coordinator = Coordinator::spawn(CoordinatorConfig {
        bind,
        policy,
        write_quorum: cli.nw.unwrap_or(0),
        read_quorum: cli.nr.unwrap_or(0),
        sync_interval: Duration::from_millis(config.coordinator.sync_interval_ms),
        tuning: ServerTuning {
            queue_capacity: config.coordinator.queue_capacity,
            workers: config.coordinator.workers,
        },
        transport: transport.clone(),
    })
    .context("failed to start the coordinator")?;

    let replica_bind = resolve(&config.node.bind_host, client_port)?;
    let replica = start_replica(replica_bind, coordinator.local_addr(), config, transport)
        .context("failed to start the primary's replica")?;

    info!(
        coordinator = %coordinator.local_addr(),
        replica = %replica.local_addr(),
        %policy,
        "primary up"
    );
    park_forever()
}

/// Replica: register against the primary, then serve clients.
fn run_replica(
    cli: &Cli,
    client_port: u16,
    coordinator_port: u16,
    config: &CorkboardConfig,
) -> Result<()> {
    let primary_host = cli
        .primary_host
        .clone()
        .unwrap_or_else(|| config.node.primary_host.clone());
    let coordinator = resolve(&primary_host, coordinator_port)?;
    let transport = transport_from(&config.network);

    let bind = resolve(&config.node.bind_host, client_port)?;
    let replica = start_replica(bind, coordinator, config, transport)
        .context("failed to start the replica")?;

    info!(
        replica = %replica.local_addr(),
        policy = %replica.policy(),
        %coordinator,
        "replica up"
    );
    park_forever()
}

/// `cluster init` / `cluster start`: drive a whole deployment from one
/// terminal via the supervisor in `corkboard-cluster`.
fn run_cluster(command: ClusterCommands) -> Result<()> {
    match command {
        ClusterCommands::Init {
            dir,
            replicas,
            base_client_port,
            coordinator_port,
            policy,
            nw,
            nr,
            binary,
        } => {
            let policy = parse_policy(&policy);
            let layout = corkboard_cluster::init_cluster(
                dir,
                replicas,
                base_client_port,
                coordinator_port,
                policy,
            )?;

            // Nodes are spawned from this very binary unless told otherwise.
            let binary = match binary {
                Some(path) => path,
                None => std::env::current_exe().context("cannot locate this executable")?,
            };
            let layout = layout.with_quorums(nw, nr).with_binary(binary);
            layout.save()?;

            println!("Cluster layout written to {}", layout.dir.display());
            for node in &layout.nodes {
                let role = if node.primary { " (primary)" } else { "" };
                println!("  node {} -> client port {}{role}", node.id, node.client_port);
            }
            Ok(())
        }

        ClusterCommands::Start { dir } => {
            let runtime =
                tokio::runtime::Runtime::new().context("failed to start the cluster runtime")?;
            runtime.block_on(async {
                let mut supervisor = corkboard_cluster::start_cluster(dir).await?;
                // Watches for crashes and restarts nodes; returns on Ctrl+C.
                supervisor.monitor_loop().await;
                corkboard_cluster::stop_cluster(&mut supervisor).await?;
                anyhow::Ok(())
            })
        }
    }
}

fn start_replica(
    bind: SocketAddr,
    coordinator: SocketAddr,
    config: &CorkboardConfig,
    transport: Transport,
) -> Result<ReplicaNode> {
    let mut replica_config = ReplicaConfig::new(bind, coordinator);
    replica_config.tuning = ServerTuning {
        queue_capacity: config.replica.queue_capacity,
        workers: config.replica.workers,
    };
    replica_config.transport = transport;
    replica_config.ryw_poll_interval = Duration::from_millis(config.replica.ryw_poll_interval_ms);
    replica_config.register_attempts = config.replica.register_attempts;
    replica_config.register_backoff = Duration::from_millis(config.replica.register_backoff_ms);
    Ok(ReplicaNode::start(replica_config)?)
}

/// Parses the policy argument; unknown values warn and fall back to
/// sequential (the documented contract).
fn parse_policy(tag: &str) -> ConsistencyPolicy {
    tag.parse().unwrap_or_else(|e| {
        warn!("{e}; defaulting to sequential");
        ConsistencyPolicy::Sequential
    })
}

fn transport_from(network: &NetworkConfig) -> Transport {
    Transport::new()
        .with_timeout(Some(Duration::from_millis(network.io_timeout_ms)))
        .with_delay(DelayEmulation::uniform_ms(
            network.wan_delay_min_ms,
            network.wan_delay_max_ms,
        ))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

/// The listeners run on their own threads; the main thread just stays out
/// of the way until the process is killed.
fn park_forever() -> ! {
    loop {
        std::thread::park();
    }
}
