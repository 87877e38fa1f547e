//! Cluster layout: who is the primary, which ports, which policy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use corkboard_types::ConsistencyPolicy;

use crate::{Error, Result};

/// File the layout is persisted to, inside the cluster directory.
const LAYOUT_FILE: &str = "cluster.toml";

/// Configuration for a Corkboard cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Directory holding the layout file and node logs.
    pub dir: PathBuf,

    /// The deployment's consistency policy (passed to the primary only;
    /// replicas adopt it at registration).
    pub policy: ConsistencyPolicy,

    /// Configured write quorum size (quorum policy).
    pub write_quorum: u32,

    /// Configured read quorum size (quorum policy).
    pub read_quorum: u32,

    /// Port of the primary's coordinator listener.
    pub coordinator_port: u16,

    /// Path of the `corkboard` binary to spawn.
    pub binary: PathBuf,

    /// Node 0 is the primary; the rest are replicas.
    pub nodes: Vec<NodeSpec>,
}

/// One process of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node index (0 = primary).
    pub id: usize,

    /// Client listener port.
    pub client_port: u16,

    /// Whether this process hosts the coordinator.
    pub primary: bool,
}

impl ClusterConfig {
    /// Generates a layout: one primary plus `replicas` replica processes
    /// on consecutive client ports starting at `base_client_port`.
    pub fn new(
        dir: PathBuf,
        replicas: usize,
        base_client_port: u16,
        coordinator_port: u16,
        policy: ConsistencyPolicy,
    ) -> Result<Self> {
        if replicas == 0 {
            return Err(Error::InvalidReplicaCount(replicas));
        }
        let total = replicas + 1;
        if u16::try_from(total)
            .ok()
            .and_then(|n| base_client_port.checked_add(n))
            .is_none()
        {
            return Err(Error::InvalidPortRange(base_client_port, total));
        }

        let nodes = (0..total)
            .map(|id| NodeSpec {
                id,
                client_port: base_client_port + id as u16,
                primary: id == 0,
            })
            .collect();

        Ok(Self {
            dir,
            policy,
            write_quorum: 0,
            read_quorum: 0,
            coordinator_port,
            binary: PathBuf::from("corkboard"),
            nodes,
        })
    }

    /// Sets the quorum sizes passed to the primary.
    pub fn with_quorums(mut self, write_quorum: u32, read_quorum: u32) -> Self {
        self.write_quorum = write_quorum;
        self.read_quorum = read_quorum;
        self
    }

    /// Sets the binary to spawn (default: `corkboard` from `PATH`).
    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }

    /// Loads a saved layout from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LAYOUT_FILE);
        if !path.exists() {
            return Err(Error::NotInitialized(dir.to_path_buf()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves the layout to its directory.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = toml::to_string_pretty(self)?;
        fs::write(self.dir.join(LAYOUT_FILE), content)?;
        Ok(())
    }

    /// The spec for a single node.
    pub fn node(&self, id: usize) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Command-line arguments for spawning one node, matching the
    /// `corkboard <client_port> <coordinator_port> [policy [Nw [Nr]]]`
    /// invocation.
    pub fn args_for(&self, node: &NodeSpec) -> Vec<String> {
        let mut args = vec![
            node.client_port.to_string(),
            self.coordinator_port.to_string(),
        ];
        if node.primary {
            args.push(self.policy.tag().to_string());
            if self.policy == ConsistencyPolicy::Quorum {
                args.push(self.write_quorum.to_string());
                args.push(self.read_quorum.to_string());
            }
        }
        args
    }
}
