//! The room registry: creates, tracks, and retires rooms.

use std::collections::{HashMap, HashSet};

use parlor_protocol::RoomId;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::{Room, RoomError, RoomKind};

/// Bounded retry budget for random-id collisions. With 64-bit ids the
/// loop all but never iterates; the bound exists so a broken RNG fails
/// loudly instead of spinning.
const MAX_ID_RETRIES: usize = 16;

/// Owns every room in the process and guarantees id uniqueness for the
/// registry's whole lifetime, across all room kinds.
///
/// Destroyed ids go into a tombstone set and are never handed out
/// again: "unique for the lifetime of the process" includes rooms that
/// no longer exist.
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    retired: HashSet<RoomId>,
}

impl RoomRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Creates a room with a fresh process-wide unique id.
    ///
    /// When `parent` names a live room, the new room is linked as its
    /// child (in creation order).
    ///
    /// # Errors
    /// [`RoomError::IdGeneration`] after [`MAX_ID_RETRIES`] collisions.
    pub fn create_room(
        &mut self,
        kind: RoomKind,
        parent: Option<RoomId>,
    ) -> Result<RoomId, RoomError> {
        let id = self.generate_id()?;
        self.rooms.insert(id, Room::new(id, kind, parent));

        if let Some(parent_id) = parent {
            match self.rooms.get_mut(&parent_id) {
                Some(parent_room) => parent_room.add_child(id),
                None => {
                    warn!(
                        room_id = %id,
                        parent = %parent_id,
                        "parent room not found, child link skipped"
                    );
                }
            }
        }

        info!(room_id = %id, %kind, "room created");
        Ok(id)
    }

    fn generate_id(&self) -> Result<RoomId, RoomError> {
        let mut rng = rand::rng();
        for _ in 0..MAX_ID_RETRIES {
            let candidate = RoomId(rng.random());
            if !self.rooms.contains_key(&candidate)
                && !self.retired.contains(&candidate)
            {
                return Ok(candidate);
            }
            debug!(candidate = %candidate, "room id collision, retrying");
        }
        Err(RoomError::IdGeneration)
    }

    /// Looks up a room by id.
    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    /// Looks up a room mutably.
    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&id)
    }

    /// Removes a room. Idempotent teardown: an absent id is a logged
    /// no-op. The id is tombstoned either way.
    pub fn destroy_room(&mut self, id: RoomId) {
        if self.rooms.remove(&id).is_some() {
            info!(room_id = %id, "room destroyed");
        } else {
            debug!(room_id = %id, "destroy of unknown room, ignoring");
        }
        self.retired.insert(id);
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Ids of all live rooms.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_room_registers_it() {
        let mut reg = RoomRegistry::new();

        let id = reg.create_room(RoomKind::Waiting, None).unwrap();

        let room = reg.get(id).expect("room should exist");
        assert_eq!(room.id(), id);
        assert_eq!(room.kind(), RoomKind::Waiting);
        assert_eq!(reg.room_count(), 1);
    }

    #[test]
    fn test_create_burst_yields_distinct_ids() {
        // N creations must yield N distinct ids, across room kinds.
        let mut reg = RoomRegistry::new();
        let mut seen = HashSet::new();

        for i in 0..200 {
            let kind = if i % 2 == 0 {
                RoomKind::Game
            } else {
                RoomKind::Waiting
            };
            let id = reg.create_room(kind, None).unwrap();
            assert!(seen.insert(id), "id {id} repeated");
        }
        assert_eq!(reg.room_count(), 200);
    }

    #[test]
    fn test_parent_child_link() {
        let mut reg = RoomRegistry::new();
        let pool = reg.create_room(RoomKind::Waiting, None).unwrap();

        let game = reg.create_room(RoomKind::Game, Some(pool)).unwrap();

        assert_eq!(reg.get(pool).unwrap().children(), &[game]);
        assert_eq!(reg.get(game).unwrap().parent(), Some(pool));
    }

    #[test]
    fn test_children_keep_creation_order() {
        let mut reg = RoomRegistry::new();
        let pool = reg.create_room(RoomKind::Waiting, None).unwrap();

        let g1 = reg.create_room(RoomKind::Game, Some(pool)).unwrap();
        let g2 = reg.create_room(RoomKind::Game, Some(pool)).unwrap();
        let g3 = reg.create_room(RoomKind::Game, Some(pool)).unwrap();

        assert_eq!(reg.get(pool).unwrap().children(), &[g1, g2, g3]);
    }

    #[test]
    fn test_create_with_missing_parent_still_creates() {
        let mut reg = RoomRegistry::new();

        let id = reg
            .create_room(RoomKind::Game, Some(RoomId(424242)))
            .unwrap();

        assert!(reg.get(id).is_some());
        assert_eq!(reg.get(id).unwrap().parent(), Some(RoomId(424242)));
    }

    #[test]
    fn test_destroy_room_removes_it() {
        let mut reg = RoomRegistry::new();
        let id = reg.create_room(RoomKind::Game, None).unwrap();

        reg.destroy_room(id);

        assert!(reg.get(id).is_none());
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn test_destroy_room_is_idempotent() {
        let mut reg = RoomRegistry::new();
        let id = reg.create_room(RoomKind::Game, None).unwrap();

        reg.destroy_room(id);
        reg.destroy_room(id);
        reg.destroy_room(RoomId(999));

        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn test_destroyed_ids_are_never_reissued() {
        // Destroyed ids are tombstoned; later creations must not
        // collide with them.
        let mut reg = RoomRegistry::new();
        let mut retired = HashSet::new();
        for _ in 0..50 {
            let id = reg.create_room(RoomKind::Game, None).unwrap();
            reg.destroy_room(id);
            retired.insert(id);
        }

        for _ in 0..50 {
            let id = reg.create_room(RoomKind::Game, None).unwrap();
            assert!(!retired.contains(&id), "retired id {id} reissued");
        }
    }
}
