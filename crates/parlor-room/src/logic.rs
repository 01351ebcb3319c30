//! The `GameLogic` trait: the extension point a game implements.
//!
//! The framework drives the room state machine; the game only answers
//! whether transitions are legal right now and reacts to the ones that
//! happen. Experiment games usually attach as a separate process over
//! their own socket, which is why attachment is a two-phase protocol
//! ([`AttachState`]) rather than a constructor argument.

/// The behavior a room's attached game must provide.
///
/// The `is_*` guards let the logic veto transitions (a game that is
/// mid-sync reports not-pausable, for instance). Guard failures are
/// tolerated as no-ops by the room, so implementations should answer
/// honestly rather than defensively.
pub trait GameLogic: Send + 'static {
    /// Can the game start right now?
    fn is_startable(&self) -> bool {
        true
    }

    /// Can the game pause right now?
    fn is_pausable(&self) -> bool {
        true
    }

    /// Can the game resume right now?
    fn is_resumable(&self) -> bool {
        true
    }

    /// Can the game stop right now?
    fn is_stoppable(&self) -> bool {
        true
    }

    /// `true` if this logic attaches asynchronously (a separate process
    /// connecting over its own socket). When `true`, the room stays in
    /// [`AttachState::Pending`] after setup until
    /// [`Room::confirm_attached`](crate::Room::confirm_attached) is
    /// called; a `start_game` issued in between is queued, not raced.
    fn requires_attachment(&self) -> bool {
        false
    }

    /// The game is starting.
    fn on_start(&mut self) {}

    /// The game is pausing.
    fn on_pause(&mut self) {}

    /// The game is resuming.
    fn on_resume(&mut self) {}

    /// The game is stopping. Terminal.
    fn on_stop(&mut self) {}
}

/// Produces a logic instance for each dispatched game room.
///
/// Returning `None` means the factory could not produce a valid logic
/// object; the dispatch attempt fails, the room is discarded, and the
/// matched clients return to the pool.
pub type LogicFactory = Box<dyn Fn() -> Option<Box<dyn GameLogic>> + Send + Sync>;

/// Progress of the two-phase logic attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    /// No logic requested yet.
    Detached,
    /// Logic created; waiting for its connection acknowledgment.
    Pending,
    /// Logic confirmed attached; start commands may run.
    Attached,
}
