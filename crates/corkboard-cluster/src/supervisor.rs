//! Cluster supervisor for managing the primary and its replicas.

use std::collections::BTreeMap;

use tokio::signal;
use tokio::time::{Duration, interval};

use crate::{ClusterConfig, Error, NodeProcess, NodeStatus, Result};

/// Supervisor for a multi-process Corkboard cluster.
pub struct ClusterSupervisor {
    /// Cluster configuration.
    config: ClusterConfig,

    /// Managed node processes, keyed by node ID.
    nodes: BTreeMap<usize, NodeProcess>,

    /// Whether the supervisor is running.
    running: bool,
}

impl ClusterSupervisor {
    /// Creates a new cluster supervisor.
    pub fn new(config: ClusterConfig) -> Self {
        let mut nodes = BTreeMap::new();
        for spec in config.nodes.clone() {
            let args = config.args_for(&spec);
            let node = NodeProcess::new(spec, config.binary.clone(), args);
            nodes.insert(node.id(), node);
        }

        Self {
            config,
            nodes,
            running: false,
        }
    }

    /// Starts all nodes. The primary (node 0) goes first so replicas can
    /// register against its coordinator listener.
    pub async fn start_all(&mut self) -> Result<()> {
        // BTreeMap iteration is ID order, so the primary leads.
        for (id, node) in &mut self.nodes {
            match node.start().await {
                Ok(()) => {
                    println!("Node {} started on client port {}", id, node.client_port());
                }
                Err(e) => {
                    eprintln!("Failed to start node {id}: {e}");
                    // Continue starting other nodes
                }
            }
        }

        self.running = true;
        Ok(())
    }

    /// Starts a specific node.
    pub async fn start_node(&mut self, id: usize) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))?;
        node.start().await?;
        println!("Node {} started on client port {}", id, node.client_port());
        Ok(())
    }

    /// Stops all nodes gracefully, replicas before the primary.
    pub async fn stop_all(&mut self) -> Result<()> {
        for (id, node) in self.nodes.iter_mut().rev() {
            match node.stop().await {
                Ok(()) => println!("Node {id} stopped"),
                Err(e) => eprintln!("Failed to stop node {id}: {e}"),
            }
        }

        self.running = false;
        Ok(())
    }

    /// Stops a specific node.
    pub async fn stop_node(&mut self, id: usize) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))?;
        node.stop().await?;
        println!("Node {id} stopped");
        Ok(())
    }

    /// Returns the status of all nodes, in ID order.
    pub fn status(&mut self) -> Vec<(usize, NodeStatus, u16)> {
        let mut status = Vec::new();

        for (id, node) in &mut self.nodes {
            if node.status == NodeStatus::Running && !node.is_alive() {
                node.status = NodeStatus::Crashed;
            }
            status.push((*id, node.status, node.client_port()));
        }

        status
    }

    /// Monitors all nodes and attempts restarts on crash.
    pub async fn monitor_loop(&mut self) {
        let mut tick = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for (id, node) in &mut self.nodes {
                        if node.status == NodeStatus::Running && !node.is_alive() {
                            eprintln!("Node {id} crashed, attempting restart...");
                            node.status = NodeStatus::Crashed;

                            if let Err(e) = node.restart().await {
                                eprintln!("Failed to restart node {id}: {e}");
                            } else {
                                println!("Node {id} restarted successfully");
                            }
                        }
                    }

                    if !self.running {
                        break;
                    }
                }

                _ = signal::ctrl_c() => {
                    println!("Received Ctrl+C, shutting down cluster...");
                    if let Err(e) = self.stop_all().await {
                        eprintln!("Error during shutdown: {e}");
                    }
                    break;
                }
            }
        }
    }

    /// Returns the number of running nodes.
    pub fn running_count(&mut self) -> usize {
        self.status()
            .iter()
            .filter(|(_, status, _)| *status == NodeStatus::Running)
            .count()
    }

    /// Returns the cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corkboard_types::ConsistencyPolicy;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ClusterConfig {
        // Spawn `sleep` instead of the real binary: supervision logic is
        // independent of what the children do.
        ClusterConfig::new(
            dir.path().to_path_buf(),
            2,
            9100,
            10_000,
            ConsistencyPolicy::Sequential,
        )
        .unwrap()
        .with_binary(PathBuf::from("sleep"))
    }

    #[tokio::test]
    async fn supervisor_tracks_all_nodes() {
        let temp = TempDir::new().unwrap();
        let supervisor = ClusterSupervisor::new(test_config(&temp));

        assert_eq!(supervisor.nodes.len(), 3);
        assert!(!supervisor.running);
    }

    #[tokio::test]
    async fn start_stop_all() {
        let temp = TempDir::new().unwrap();
        let mut supervisor = ClusterSupervisor::new(test_config(&temp));

        supervisor.start_all().await.unwrap();
        assert!(supervisor.running);

        // `sleep` takes the port args as its duration operand and may exit
        // at once; all we assert is bookkeeping consistency.
        let running = supervisor.running_count();
        assert!(running <= 3);

        supervisor.stop_all().await.unwrap();
        assert!(!supervisor.running);
        assert_eq!(supervisor.running_count(), 0);
    }

    #[tokio::test]
    async fn unknown_node_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut supervisor = ClusterSupervisor::new(test_config(&temp));

        let result = supervisor.start_node(10).await;
        assert!(matches!(result, Err(Error::NodeNotFound(10))));
    }

    #[tokio::test]
    async fn status_reports_in_id_order() {
        let temp = TempDir::new().unwrap();
        let mut supervisor = ClusterSupervisor::new(test_config(&temp));

        let status = supervisor.status();
        assert_eq!(status.len(), 3);
        let ids: Vec<usize> = status.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        for (_, node_status, _) in status {
            assert_eq!(node_status, NodeStatus::Stopped);
        }
    }
}
