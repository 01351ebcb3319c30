//! Error types for the registry layer.

use parlor_protocol::ClientId;

/// Errors that can occur during client tracking and admission.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The id is already connected. A second live connection with the
    /// same id is always a protocol violation, never a reconnection.
    #[error("client {0} is already connected")]
    DuplicateClient(ClientId),

    /// No record exists for the given id.
    #[error("client {0} not found")]
    NotFound(ClientId),

    /// The admission code was never issued.
    #[error("unknown access code: {0}")]
    UnknownCode(String),

    /// The admission code was already consumed by an earlier entry.
    #[error("access code already used: {0}")]
    CodeAlreadyUsed(String),
}
