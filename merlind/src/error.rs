//! Error kinds per spec §7. `TransientIO` is deliberately not logged by
//! callers — it represents EAGAIN / in-progress-connect, the normal case
//! for non-blocking sockets, not a fault.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("transient I/O: {0}")]
    TransientIO(#[from] std::io::Error),

    #[error("peer reset: {0}")]
    PeerReset(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("external command failed: {0}")]
    External(String),
}

impl From<merlin_wire::CodecError> for MeshError {
    fn from(e: merlin_wire::CodecError) -> Self {
        MeshError::ProtocolViolation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
