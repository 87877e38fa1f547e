//! Node process management.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::sleep;

use crate::{Error, NodeSpec, Result};

/// Status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is stopped.
    Stopped,

    /// Node is starting up.
    Starting,

    /// Node is running normally.
    Running,

    /// Node has crashed.
    Crashed,
}

/// A managed Corkboard node process.
pub struct NodeProcess {
    /// The node's slot in the layout.
    pub spec: NodeSpec,

    /// Binary and arguments used to spawn it.
    binary: PathBuf,
    args: Vec<String>,

    /// Child process handle.
    pub process: Option<Child>,

    /// Current status.
    pub status: NodeStatus,

    /// Number of restart attempts.
    pub restart_count: usize,
}

impl NodeProcess {
    /// Creates a new node process (not started).
    pub fn new(spec: NodeSpec, binary: PathBuf, args: Vec<String>) -> Self {
        Self {
            spec,
            binary,
            args,
            process: None,
            status: NodeStatus::Stopped,
            restart_count: 0,
        }
    }

    /// Starts the node process.
    pub async fn start(&mut self) -> Result<()> {
        if self.status != NodeStatus::Stopped && self.status != NodeStatus::Crashed {
            return Err(Error::NodeAlreadyRunning(self.spec.id));
        }

        self.status = NodeStatus::Starting;

        let child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SpawnError(e.to_string()))?;

        self.process = Some(child);

        // Give it a moment to bind its listeners (the primary must be up
        // before replicas can register).
        sleep(Duration::from_millis(200)).await;

        if self.is_alive() {
            self.status = NodeStatus::Running;
            Ok(())
        } else {
            self.status = NodeStatus::Crashed;
            Err(Error::NodeStartFailed(
                self.spec.id,
                "Process died immediately".to_string(),
            ))
        }
    }

    /// Stops the node process.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.process.take() {
            child.kill().await.ok();

            let exit_status = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;

            match exit_status {
                Ok(Ok(_status)) => {
                    self.status = NodeStatus::Stopped;
                    Ok(())
                }
                Ok(Err(e)) => {
                    self.status = NodeStatus::Stopped;
                    Err(Error::Io(e))
                }
                Err(_) => {
                    // Timeout, but we already killed it
                    self.status = NodeStatus::Stopped;
                    Ok(())
                }
            }
        } else {
            Ok(()) // Already stopped
        }
    }

    /// Checks if the node process is alive.
    pub fn is_alive(&mut self) -> bool {
        if let Some(child) = &mut self.process {
            match child.try_wait() {
                Ok(Some(_exit_status)) => false, // Process has exited
                Ok(None) => true,                // Still running
                Err(_) => false,                 // Error checking, assume dead
            }
        } else {
            false
        }
    }

    /// Returns the node ID.
    pub fn id(&self) -> usize {
        self.spec.id
    }

    /// Returns the client listener port.
    pub fn client_port(&self) -> u16 {
        self.spec.client_port
    }

    /// Attempts to restart a crashed node, with exponential backoff.
    pub async fn restart(&mut self) -> Result<()> {
        if self.status != NodeStatus::Crashed {
            return Ok(());
        }

        self.restart_count += 1;

        let backoff = Duration::from_secs(2u64.pow(self.restart_count.min(5) as u32));
        sleep(backoff).await;

        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> NodeProcess {
        let spec = NodeSpec {
            id: 1,
            client_port: 9101,
            primary: false,
        };
        // A binary that is present on any test machine: the node lifecycle
        // logic does not care what the child actually does.
        NodeProcess::new(
            spec,
            PathBuf::from("sleep"),
            vec!["30".to_string()],
        )
    }

    #[test]
    fn starts_stopped() {
        let mut node = test_node();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(node.id(), 1);
        assert_eq!(node.client_port(), 9101);
        assert!(!node.is_alive());
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let mut node = test_node();

        if node.start().await.is_ok() {
            assert_eq!(node.status, NodeStatus::Running);
            assert!(node.is_alive());

            node.stop().await.unwrap();
            assert_eq!(node.status, NodeStatus::Stopped);
            assert!(!node.is_alive());
        } else {
            // `sleep` missing from PATH in a minimal environment.
            assert_eq!(node.status, NodeStatus::Crashed);
        }
    }

    #[tokio::test]
    async fn double_start_is_an_error() {
        let mut node = test_node();

        if node.start().await.is_ok() {
            let result = node.start().await;
            assert!(matches!(result, Err(Error::NodeAlreadyRunning(1))));
            node.stop().await.ok();
        }
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_noop() {
        let mut node = test_node();
        node.stop().await.unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
    }
}
