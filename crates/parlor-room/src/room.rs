//! The room: a client container plus the game lifecycle state machine.

use parlor_protocol::{ClientId, RoomId};
use tracing::{debug, info, warn};

use crate::{AttachState, GameLogic, RoomError, RoomKind, RoomState};

/// A lifecycle command a room wants delivered to a player client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Start the client-side game.
    Start,
    /// Pause the client-side game.
    Pause,
    /// Resume the client-side game.
    Resume,
    /// Stop the client-side game.
    Stop,
}

impl RemoteCommand {
    /// The wire form sent to clients.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One remote command addressed to one client. Rooms return these
/// instead of touching sockets; the channel delivers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Which client the command goes to.
    pub client: ClientId,
    /// The command itself.
    pub command: RemoteCommand,
}

/// A named, uniquely-identified container for clients plus an attached
/// game-logic instance and its run state.
///
/// Rooms index membership only; the client registry remains the
/// authoritative owner of every client. Membership is partitioned into
/// a player view and an admin view because the two endpoint routers
/// expose different rosters.
pub struct Room {
    id: RoomId,
    kind: RoomKind,
    parent: Option<RoomId>,
    children: Vec<RoomId>,
    player_view: Vec<ClientId>,
    admin_view: Vec<ClientId>,
    state: RoomState,
    logic: Option<Box<dyn GameLogic>>,
    attach: AttachState,
    /// A start requested while attachment was pending; runs when the
    /// logic confirms. The payload is the `start_players` flag.
    queued_start: Option<bool>,
}

impl Room {
    pub(crate) fn new(id: RoomId, kind: RoomKind, parent: Option<RoomId>) -> Self {
        Self {
            id,
            kind,
            parent,
            children: Vec::new(),
            player_view: Vec::new(),
            admin_view: Vec::new(),
            state: RoomState::Uninitialized,
            logic: None,
            attach: AttachState::Detached,
            queued_start: None,
        }
    }

    // -- Accessors --------------------------------------------------------

    /// The room's unique id.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// What the room is for.
    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.state
    }

    /// The parent room, if this room was spawned by one.
    pub fn parent(&self) -> Option<RoomId> {
        self.parent
    }

    /// Child rooms, in creation order.
    pub fn children(&self) -> &[RoomId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: RoomId) {
        self.children.push(child);
    }

    /// `true` once the logic has confirmed attachment.
    pub fn is_attached(&self) -> bool {
        self.attach == AttachState::Attached
    }

    // -- Membership (weak references; the registry owns clients) ----------

    /// Adds a client to the player view. Duplicate adds are no-ops.
    pub fn add_player(&mut self, client: ClientId) {
        if !self.player_view.contains(&client) {
            self.player_view.push(client);
        }
    }

    /// Adds a client to the admin view. Duplicate adds are no-ops.
    pub fn add_admin(&mut self, client: ClientId) {
        if !self.admin_view.contains(&client) {
            self.admin_view.push(client);
        }
    }

    /// Removes a client from whichever view holds it. Returns `true`
    /// if anything was removed.
    pub fn remove_client(&mut self, client: &ClientId) -> bool {
        let before = self.player_view.len() + self.admin_view.len();
        self.player_view.retain(|c| c != client);
        self.admin_view.retain(|c| c != client);
        before != self.player_view.len() + self.admin_view.len()
    }

    /// Player-view members, in join order.
    pub fn player_clients(&self) -> &[ClientId] {
        &self.player_view
    }

    /// Admin-view members, in join order.
    pub fn admin_clients(&self) -> &[ClientId] {
        &self.admin_view
    }

    /// `true` if either view holds the client.
    pub fn contains(&self, client: &ClientId) -> bool {
        self.player_view.contains(client) || self.admin_view.contains(client)
    }

    // -- State machine ----------------------------------------------------

    /// Attaches game logic and moves to `Initialized`.
    ///
    /// Valid only from `Uninitialized`. A logic that attaches over its
    /// own socket leaves the room in `AttachState::Pending` until
    /// [`confirm_attached`](Self::confirm_attached); everything else is
    /// attached immediately.
    ///
    /// # Errors
    /// [`RoomError::Setup`] if `logic` is `None` (the factory produced
    /// nothing valid) or if setup already ran.
    pub fn setup_game(
        &mut self,
        logic: Option<Box<dyn GameLogic>>,
    ) -> Result<(), RoomError> {
        if !self.state.can_setup() {
            return Err(RoomError::Setup(format!(
                "setup_game called in state {}",
                self.state
            )));
        }
        let logic = logic.ok_or_else(|| {
            RoomError::Setup("logic factory returned no logic".into())
        })?;

        self.attach = if logic.requires_attachment() {
            AttachState::Pending
        } else {
            AttachState::Attached
        };
        self.logic = Some(logic);
        self.state = RoomState::Initialized;
        info!(room_id = %self.id, attach = ?self.attach, "game set up");
        Ok(())
    }

    /// Completes a pending attachment.
    ///
    /// If a start was queued while the logic was still connecting, it
    /// runs now and its directives are returned.
    pub fn confirm_attached(&mut self) -> Vec<Directive> {
        match self.attach {
            AttachState::Pending => {
                self.attach = AttachState::Attached;
                info!(room_id = %self.id, "game logic attached");
                match self.queued_start.take() {
                    Some(start_players) => self.start_game(start_players),
                    None => Vec::new(),
                }
            }
            AttachState::Detached | AttachState::Attached => {
                warn!(
                    room_id = %self.id,
                    attach = ?self.attach,
                    "confirm_attached with nothing pending, ignoring"
                );
                Vec::new()
            }
        }
    }

    /// Starts the game: `Initialized → Running`.
    ///
    /// With `start_players`, returns a `Start` directive per player
    /// client. While attachment is pending the start is queued instead
    /// of raced. A failed guard (wrong state, logic not startable) is a
    /// logged warning and a no-op.
    pub fn start_game(&mut self, start_players: bool) -> Vec<Directive> {
        if !self.state.can_start() {
            warn!(
                room_id = %self.id,
                state = %self.state,
                "start_game not valid in this state, ignoring"
            );
            return Vec::new();
        }
        if self.attach == AttachState::Pending {
            debug!(
                room_id = %self.id,
                "start_game queued until logic attaches"
            );
            self.queued_start = Some(start_players);
            return Vec::new();
        }
        match &mut self.logic {
            Some(logic) if logic.is_startable() => {
                logic.on_start();
            }
            Some(_) => {
                warn!(room_id = %self.id, "logic reports not startable, ignoring");
                return Vec::new();
            }
            None => {
                warn!(room_id = %self.id, "start_game without logic, ignoring");
                return Vec::new();
            }
        }
        self.state = RoomState::Running;
        info!(room_id = %self.id, "game started");
        self.player_directives(start_players, RemoteCommand::Start)
    }

    /// Pauses the game: `Running → Paused`. Same no-op policy.
    pub fn pause_game(&mut self, pause_players: bool) -> Vec<Directive> {
        if !self.state.can_pause() {
            warn!(
                room_id = %self.id,
                state = %self.state,
                "pause_game not valid in this state, ignoring"
            );
            return Vec::new();
        }
        match &mut self.logic {
            Some(logic) if logic.is_pausable() => logic.on_pause(),
            _ => {
                warn!(room_id = %self.id, "logic reports not pausable, ignoring");
                return Vec::new();
            }
        }
        self.state = RoomState::Paused;
        info!(room_id = %self.id, "game paused");
        self.player_directives(pause_players, RemoteCommand::Pause)
    }

    /// Resumes the game: `Paused → Running`. Same no-op policy.
    pub fn resume_game(&mut self, resume_players: bool) -> Vec<Directive> {
        if !self.state.can_resume() {
            warn!(
                room_id = %self.id,
                state = %self.state,
                "resume_game not valid in this state, ignoring"
            );
            return Vec::new();
        }
        match &mut self.logic {
            Some(logic) if logic.is_resumable() => logic.on_resume(),
            _ => {
                warn!(room_id = %self.id, "logic reports not resumable, ignoring");
                return Vec::new();
            }
        }
        self.state = RoomState::Running;
        info!(room_id = %self.id, "game resumed");
        self.player_directives(resume_players, RemoteCommand::Resume)
    }

    /// Stops the game: `Running | Paused → Stopped` (terminal). Same
    /// no-op policy.
    pub fn stop_game(&mut self, stop_players: bool) -> Vec<Directive> {
        if !self.state.can_stop() {
            warn!(
                room_id = %self.id,
                state = %self.state,
                "stop_game not valid in this state, ignoring"
            );
            return Vec::new();
        }
        match &mut self.logic {
            Some(logic) if logic.is_stoppable() => logic.on_stop(),
            _ => {
                warn!(room_id = %self.id, "logic reports not stoppable, ignoring");
                return Vec::new();
            }
        }
        self.state = RoomState::Stopped;
        info!(room_id = %self.id, "game stopped");
        self.player_directives(stop_players, RemoteCommand::Stop)
    }

    fn player_directives(
        &self,
        include_players: bool,
        command: RemoteCommand,
    ) -> Vec<Directive> {
        if !include_players {
            return Vec::new();
        }
        self.player_view
            .iter()
            .map(|client| Directive {
                client: client.clone(),
                command,
            })
            .collect()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // -- Helpers ----------------------------------------------------------

    fn cid(id: &str) -> ClientId {
        ClientId::new(id)
    }

    /// A logic that counts its lifecycle callbacks and can veto
    /// transitions.
    struct ProbeLogic {
        startable: bool,
        pausable: bool,
        needs_attach: bool,
        starts: Arc<AtomicUsize>,
    }

    impl ProbeLogic {
        fn permissive(starts: Arc<AtomicUsize>) -> Self {
            Self {
                startable: true,
                pausable: true,
                needs_attach: false,
                starts,
            }
        }
    }

    impl GameLogic for ProbeLogic {
        fn is_startable(&self) -> bool {
            self.startable
        }
        fn is_pausable(&self) -> bool {
            self.pausable
        }
        fn requires_attachment(&self) -> bool {
            self.needs_attach
        }
        fn on_start(&mut self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn game_room() -> Room {
        Room::new(RoomId(1), RoomKind::Game, None)
    }

    fn ready_room(starts: Arc<AtomicUsize>) -> Room {
        let mut room = game_room();
        room.setup_game(Some(Box::new(ProbeLogic::permissive(starts))))
            .unwrap();
        room
    }

    // =====================================================================
    // setup_game()
    // =====================================================================

    #[test]
    fn test_setup_game_moves_to_initialized() {
        let starts = Arc::new(AtomicUsize::new(0));
        let room = ready_room(starts);

        assert_eq!(room.state(), RoomState::Initialized);
        assert!(room.is_attached());
    }

    #[test]
    fn test_setup_game_twice_is_setup_error() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts.clone());

        let second =
            room.setup_game(Some(Box::new(ProbeLogic::permissive(starts))));

        assert!(matches!(second, Err(RoomError::Setup(_))));
    }

    #[test]
    fn test_setup_game_with_no_logic_is_setup_error() {
        let mut room = game_room();

        let result = room.setup_game(None);

        assert!(matches!(result, Err(RoomError::Setup(_))));
        assert_eq!(room.state(), RoomState::Uninitialized);
    }

    // =====================================================================
    // start_game()
    // =====================================================================

    #[test]
    fn test_start_game_runs_and_commands_players() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts.clone());
        room.add_player(cid("p1"));
        room.add_player(cid("p2"));

        let directives = room.start_game(true);

        assert_eq!(room.state(), RoomState::Running);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(directives.len(), 2);
        assert!(directives
            .iter()
            .all(|d| d.command == RemoteCommand::Start));
    }

    #[test]
    fn test_start_game_without_players_flag_has_no_directives() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts);
        room.add_player(cid("p1"));

        let directives = room.start_game(false);

        assert_eq!(room.state(), RoomState::Running);
        assert!(directives.is_empty());
    }

    #[test]
    fn test_start_game_before_setup_is_noop() {
        let mut room = game_room();

        let directives = room.start_game(true);

        assert!(directives.is_empty());
        assert_eq!(room.state(), RoomState::Uninitialized);
    }

    #[test]
    fn test_start_game_vetoed_by_logic_is_noop() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = game_room();
        room.setup_game(Some(Box::new(ProbeLogic {
            startable: false,
            pausable: true,
            needs_attach: false,
            starts: starts.clone(),
        })))
        .unwrap();

        room.start_game(true);

        assert_eq!(room.state(), RoomState::Initialized);
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    // =====================================================================
    // Two-phase attachment
    // =====================================================================

    #[test]
    fn test_pending_attachment_queues_start() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = game_room();
        room.setup_game(Some(Box::new(ProbeLogic {
            startable: true,
            pausable: true,
            needs_attach: true,
            starts: starts.clone(),
        })))
        .unwrap();
        room.add_player(cid("p1"));
        assert!(!room.is_attached());

        // Start before the logic has connected: queued, not run.
        let directives = room.start_game(true);
        assert!(directives.is_empty());
        assert_eq!(room.state(), RoomState::Initialized);
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        // Attachment completes: the queued start runs exactly once.
        let directives = room.confirm_attached();
        assert_eq!(room.state(), RoomState::Running);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].command, RemoteCommand::Start);
    }

    #[test]
    fn test_confirm_attached_without_queued_start_stays_initialized() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = game_room();
        room.setup_game(Some(Box::new(ProbeLogic {
            startable: true,
            pausable: true,
            needs_attach: true,
            starts,
        })))
        .unwrap();

        let directives = room.confirm_attached();

        assert!(directives.is_empty());
        assert!(room.is_attached());
        assert_eq!(room.state(), RoomState::Initialized);
    }

    #[test]
    fn test_confirm_attached_twice_is_noop() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = game_room();
        room.setup_game(Some(Box::new(ProbeLogic {
            startable: true,
            pausable: true,
            needs_attach: true,
            starts,
        })))
        .unwrap();

        room.confirm_attached();
        let directives = room.confirm_attached();

        assert!(directives.is_empty());
        assert!(room.is_attached());
    }

    // =====================================================================
    // pause / resume / stop
    // =====================================================================

    #[test]
    fn test_pause_resume_cycle() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts);
        room.start_game(false);

        room.pause_game(false);
        assert_eq!(room.state(), RoomState::Paused);

        room.resume_game(false);
        assert_eq!(room.state(), RoomState::Running);
    }

    #[test]
    fn test_pause_twice_second_is_noop() {
        // Idempotent-command tolerance: the second pause changes
        // nothing and raises nothing.
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts);
        room.add_player(cid("p1"));
        room.start_game(false);

        let first = room.pause_game(true);
        let second = room.pause_game(true);

        assert_eq!(room.state(), RoomState::Paused);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty(), "second pause must be a pure no-op");
    }

    #[test]
    fn test_stop_from_paused_is_terminal() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts);
        room.start_game(false);
        room.pause_game(false);

        room.stop_game(false);
        assert_eq!(room.state(), RoomState::Stopped);

        // Nothing escapes the terminal state.
        room.start_game(false);
        room.resume_game(false);
        assert_eq!(room.state(), RoomState::Stopped);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut room = ready_room(starts);

        room.stop_game(true);

        assert_eq!(room.state(), RoomState::Initialized);
    }

    // =====================================================================
    // Membership
    // =====================================================================

    #[test]
    fn test_membership_views_are_partitioned() {
        let mut room = game_room();
        room.add_player(cid("p1"));
        room.add_admin(cid("a1"));

        assert_eq!(room.player_clients(), &[cid("p1")]);
        assert_eq!(room.admin_clients(), &[cid("a1")]);
        assert!(room.contains(&cid("p1")));
        assert!(room.contains(&cid("a1")));
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut room = game_room();
        room.add_player(cid("p1"));
        room.add_player(cid("p1"));

        assert_eq!(room.player_clients().len(), 1);
    }

    #[test]
    fn test_remove_client_from_either_view() {
        let mut room = game_room();
        room.add_player(cid("p1"));
        room.add_admin(cid("a1"));

        assert!(room.remove_client(&cid("p1")));
        assert!(room.remove_client(&cid("a1")));
        assert!(!room.remove_client(&cid("p1")));
        assert!(!room.contains(&cid("p1")));
    }
}
