//! Unified error type for the Parlor server.

use parlor_protocol::ProtocolError;
use parlor_registry::RegistryError;
use parlor_room::RoomError;
use parlor_timer::TimerError;
use parlor_transport::TransportError;

/// Top-level error wrapping all layer-specific errors.
///
/// The `#[from]` attributes auto-generate `From` impls, so `?`
/// converts layer errors automatically at the channel and server
/// boundaries.
#[derive(Debug, thiserror::Error)]
pub enum ParlorError {
    /// A transport-level error (accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid envelope).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registry-level error (duplicate client, unknown code).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A room-level error (setup, id generation, bad config).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A wait-timer error (bad deadline config).
    #[error(transparent)]
    Timer(#[from] TimerError),
}
