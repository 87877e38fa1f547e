//! Coordinator error types.
//!
//! Errors never cross the coordinator boundary as exceptions — replicas
//! and clients see integer codes or text replies. What remains here is
//! the startup surface: binding the listener and spawning the workers.

use thiserror::Error;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur while bringing the coordinator up.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
