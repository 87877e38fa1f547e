//! Tunables for a Corkboard process and where they come from.
//!
//! A node reads `corkboard.toml` from its project directory, lets a
//! gitignored `corkboard.local.toml` override it, and finally applies
//! `CORKBOARD_*` environment variables; whatever a layer leaves unsaid
//! falls through to the built-in defaults. CLI flags are not part of
//! this crate — the binary applies them on top of the loaded value.
//!
//! The defaults are the protocol's fixed operating points (connection
//! queue of 10, 5 workers, 30 s sync period, WAN delay off), so a bare
//! directory behaves exactly like an untuned deployment.

use serde::{Deserialize, Serialize};

mod loader;

pub use loader::ConfigLoader;

/// Main Corkboard configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorkboardConfig {
    pub node: NodeConfig,
    pub coordinator: CoordinatorTuning,
    pub replica: ReplicaTuning,
    pub network: NetworkConfig,
}

/// Addressing for this process and the primary it talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host the listeners bind to.
    pub bind_host: String,
    /// Host the primary's coordinator listener lives on.
    pub primary_host: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            primary_host: "localhost".to_string(),
        }
    }
}

/// Tuning for the coordinator's listener, workers, and sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorTuning {
    /// Capacity of the bounded incoming-connection queue.
    pub queue_capacity: usize,
    /// Number of worker threads draining the queue.
    pub workers: usize,
    /// Period of the update sync loop, in milliseconds.
    pub sync_interval_ms: u64,
}

impl Default for CoordinatorTuning {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 5,
            sync_interval_ms: 30_000,
        }
    }
}

/// Tuning for the replica's listener, workers, and retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaTuning {
    /// Capacity of the bounded incoming-connection queue.
    pub queue_capacity: usize,
    /// Number of worker threads draining the queue.
    pub workers: usize,
    /// Sleep between RYW `CHECK` retries, in milliseconds.
    pub ryw_poll_interval_ms: u64,
    /// Registration attempts before giving up at startup.
    pub register_attempts: u32,
    /// Backoff between registration attempts, in milliseconds.
    pub register_backoff_ms: u64,
}

impl Default for ReplicaTuning {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 5,
            ryw_poll_interval_ms: 100,
            register_attempts: 10,
            register_backoff_ms: 500,
        }
    }
}

/// Socket timeouts and WAN delay emulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connect/read/write timeout for one-shot exchanges, in milliseconds.
    pub io_timeout_ms: u64,
    /// Lower bound of the per-send WAN delay, in milliseconds.
    pub wan_delay_min_ms: u64,
    /// Upper bound of the per-send WAN delay; 0 disables the emulation.
    pub wan_delay_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 10_000,
            wan_delay_min_ms: 0,
            wan_delay_max_ms: 0,
        }
    }
}
