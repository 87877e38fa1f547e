//! Multi-process cluster management for Corkboard.
//!
//! Provides local cluster orchestration for demos and experiments:
//! - Process supervision for a primary plus N replica processes
//! - Topology generation (ports, policy, quorum sizes) saved as TOML
//! - Health monitoring with restart-on-crash
//!
//! The primary node is always started first so replicas can register
//! against its coordinator listener.

pub mod config;
pub mod error;
pub mod node;
pub mod supervisor;

pub use config::{ClusterConfig, NodeSpec};
pub use error::{Error, Result};
pub use node::{NodeProcess, NodeStatus};
pub use supervisor::ClusterSupervisor;

use std::path::PathBuf;

use corkboard_types::ConsistencyPolicy;

/// Creates and saves a cluster layout: one primary plus `replicas`
/// replica processes on consecutive client ports.
pub fn init_cluster(
    dir: PathBuf,
    replicas: usize,
    base_client_port: u16,
    coordinator_port: u16,
    policy: ConsistencyPolicy,
) -> Result<ClusterConfig> {
    let config = ClusterConfig::new(dir, replicas, base_client_port, coordinator_port, policy)?;
    config.save()?;
    Ok(config)
}

/// Starts a previously saved cluster.
pub async fn start_cluster(dir: PathBuf) -> Result<ClusterSupervisor> {
    let config = ClusterConfig::load(&dir)?;
    let mut supervisor = ClusterSupervisor::new(config);
    supervisor.start_all().await?;
    Ok(supervisor)
}

/// Stops a running cluster gracefully.
pub async fn stop_cluster(supervisor: &mut ClusterSupervisor) -> Result<()> {
    supervisor.stop_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_writes_layout() {
        let temp = TempDir::new().unwrap();
        let config = init_cluster(
            temp.path().to_path_buf(),
            2,
            9100,
            10_000,
            ConsistencyPolicy::Quorum,
        )
        .unwrap();

        assert_eq!(config.nodes.len(), 3, "primary + 2 replicas");
        assert!(temp.path().join("cluster.toml").exists());
    }

    #[test]
    fn save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let config = ClusterConfig::new(
            temp.path().to_path_buf(),
            2,
            9100,
            10_000,
            ConsistencyPolicy::Sequential,
        )
        .unwrap();
        config.save().unwrap();

        let loaded = ClusterConfig::load(temp.path()).unwrap();
        assert_eq!(loaded.nodes.len(), config.nodes.len());
        assert_eq!(loaded.policy, config.policy);
        assert_eq!(loaded.coordinator_port, config.coordinator_port);
    }
}
