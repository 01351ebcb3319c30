//! Error types for the room layer.

use parlor_protocol::RoomId;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// Unique-id generation exhausted its collision-retry budget.
    /// Defensive: with 64-bit random ids this should never happen in
    /// practice, but exhaustion is fatal and surfaced to the channel
    /// rather than looping forever.
    #[error("room id generation exhausted retries")]
    IdGeneration,

    /// `setup_game` failed: the factory produced no valid logic, or
    /// setup was called on an already-initialized room.
    #[error("game setup failed: {0}")]
    Setup(String),

    /// A room or pool configuration is malformed. Fatal at
    /// construction; required fields are never silently defaulted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A wait-timer configuration error bubbled up from the timer
    /// layer.
    #[error(transparent)]
    Timer(#[from] parlor_timer::TimerError),
}
