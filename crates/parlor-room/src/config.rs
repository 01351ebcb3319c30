//! Room taxonomy, lifecycle state machine, and pool configuration.

use serde::{Deserialize, Serialize};

use parlor_timer::WaitDeadline;

use crate::RoomError;

// ---------------------------------------------------------------------------
// RoomKind
// ---------------------------------------------------------------------------

/// What a room is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Accumulates connecting players until dispatch.
    Waiting,
    /// Screens clients against participation requirements.
    Requirements,
    /// Hosts a running game.
    Game,
}

impl std::fmt::Display for RoomKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Requirements => "requirements",
            Self::Game => "game",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room's attached game.
///
/// ```text
/// Uninitialized → Initialized → Running ⇄ Paused → Stopped
/// ```
///
/// `Stopped` is terminal. Transition attempts whose guard fails are
/// warn-level no-ops, never errors: a supervising admin may
/// legitimately issue redundant commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    /// No game logic attached yet.
    Uninitialized,
    /// Logic attached (or attaching); game not started.
    Initialized,
    /// Game in progress.
    Running,
    /// Game suspended; can resume.
    Paused,
    /// Game over. Terminal.
    Stopped,
}

impl RoomState {
    /// `true` if `setup_game` is valid from this state.
    pub fn can_setup(self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// `true` if `start_game` is valid from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// `true` if `pause_game` is valid from this state.
    pub fn can_pause(self) -> bool {
        matches!(self, Self::Running)
    }

    /// `true` if `resume_game` is valid from this state.
    pub fn can_resume(self) -> bool {
        matches!(self, Self::Paused)
    }

    /// `true` if `stop_game` is valid from this state.
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// `true` once the room can never leave its state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initialized => "Initialized",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Pool configuration
// ---------------------------------------------------------------------------

/// What makes a waiting pool dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Dispatch the moment the pool holds the target number of
    /// connected players.
    WaitForN,
    /// Dispatch whoever is present when the wait deadline fires
    /// (session start date).
    Timeout,
    /// Dispatch only on an explicit admin command.
    Manual,
}

/// Configuration for one waiting pool.
///
/// There is no `Default`: every field is required, and a malformed
/// config is rejected at construction instead of silently patched.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// How many players a dispatched game room gets.
    pub target_size: usize,
    /// Per-client wait deadline (relative max wait or absolute start
    /// date).
    pub deadline: WaitDeadline,
    /// The dispatch trigger.
    pub dispatch: DispatchPolicy,
}

impl PoolConfig {
    /// Validates the configuration. Fatal at construction time.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidConfig`] if `target_size` is zero:
    /// no policy can meaningfully dispatch empty game rooms.
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.target_size == 0 {
            return Err(RoomError::InvalidConfig(
                "pool target_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_room_state_can_setup_only_uninitialized() {
        assert!(RoomState::Uninitialized.can_setup());
        assert!(!RoomState::Initialized.can_setup());
        assert!(!RoomState::Running.can_setup());
        assert!(!RoomState::Stopped.can_setup());
    }

    #[test]
    fn test_room_state_start_pause_resume_guards() {
        assert!(RoomState::Initialized.can_start());
        assert!(!RoomState::Running.can_start());
        assert!(!RoomState::Paused.can_start());

        assert!(RoomState::Running.can_pause());
        assert!(!RoomState::Paused.can_pause());

        assert!(RoomState::Paused.can_resume());
        assert!(!RoomState::Running.can_resume());
    }

    #[test]
    fn test_room_state_stop_from_running_or_paused() {
        assert!(RoomState::Running.can_stop());
        assert!(RoomState::Paused.can_stop());
        assert!(!RoomState::Initialized.can_stop());
        assert!(!RoomState::Stopped.can_stop());
    }

    #[test]
    fn test_room_state_stopped_is_terminal() {
        assert!(RoomState::Stopped.is_terminal());
        assert!(!RoomState::Paused.is_terminal());
    }

    #[test]
    fn test_room_state_display() {
        assert_eq!(RoomState::Uninitialized.to_string(), "Uninitialized");
        assert_eq!(RoomState::Running.to_string(), "Running");
    }

    #[test]
    fn test_pool_config_rejects_zero_target() {
        let cfg = PoolConfig {
            target_size: 0,
            deadline: WaitDeadline::After(Duration::from_secs(60)),
            dispatch: DispatchPolicy::WaitForN,
        };
        assert!(matches!(
            cfg.validate(),
            Err(RoomError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pool_config_accepts_valid() {
        let cfg = PoolConfig {
            target_size: 2,
            deadline: WaitDeadline::After(Duration::from_secs(60)),
            dispatch: DispatchPolicy::WaitForN,
        };
        assert!(cfg.validate().is_ok());
    }
}
