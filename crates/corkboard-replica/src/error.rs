//! Replica error types.

use thiserror::Error;

use corkboard_client::ClientError;
use corkboard_store::StoreError;
use corkboard_wire::WireError;

/// Result type for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Errors that can occur during replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Local board error.
    #[error("board error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound exchange failed.
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    /// The coordinator answered something other than the expected reply.
    #[error("unexpected coordinator reply: {0:?}")]
    Coordinator(String),

    /// Registration with the coordinator never succeeded.
    #[error("registration failed after {attempts} attempts: {last_error}")]
    RegistrationFailed { attempts: u32, last_error: String },
}
