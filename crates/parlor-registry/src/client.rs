//! The data structures that represent a tracked client.

use std::time::Instant;

use parlor_protocol::{ClientId, ClientRole, RoomId};

/// The connection state of a tracked client.
///
/// Two states only:
///
/// ```text
///   Connected ──(socket close)──→ Disconnected
///       ↑                              │
///       └─────────(HI_AGAIN)───────────┘
/// ```
///
/// There is deliberately no "expired" state here: a disconnected client
/// is kept until an explicit administrative purge, because experiment
/// participants may reconnect much later and must be matched back to
/// their original identity and queue position.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    /// The client is actively connected.
    Connected,
    /// The client's socket closed at the given instant. The record
    /// stays for reconnection matching.
    Disconnected { since: Instant },
}

/// One tracked client.
///
/// Exclusively owned by the [`ClientRegistry`](crate::ClientRegistry);
/// everything else refers to clients by id.
#[derive(Debug, Clone)]
pub struct Client {
    /// The client's wire id, chosen in its HI handshake.
    pub id: ClientId,

    /// The role the client registered with. Fixed for the client's
    /// lifetime; a reconnection does not change it.
    pub role: ClientRole,

    /// Current connection state.
    pub state: ConnectionState,

    /// The room the client currently belongs to, if any. A client is in
    /// at most one room at a time; the registry is the single source of
    /// truth for this mapping.
    pub room: Option<RoomId>,

    /// The client's last self-reported game stage (from SAY.STATE).
    /// The admin router's sync check compares these across a room.
    pub stage: Option<String>,
}

impl Client {
    /// `true` if the client is currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }
}
