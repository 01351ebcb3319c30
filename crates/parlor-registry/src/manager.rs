//! The client registry: tracks every client the server has seen.
//!
//! # Concurrency note
//!
//! `ClientRegistry` is NOT thread-safe by itself; it uses a plain
//! `HashMap`, not a concurrent one. This is intentional: the registry is
//! owned by the channel and accessed through a mutex at a higher level.
//! Keeping it simple here avoids hidden locking overhead.

use std::collections::HashMap;
use std::time::Instant;

use parlor_protocol::{ClientId, ClientRole, RoomId, RosterEntry};

use crate::{Client, ConnectionState, RegistryError};

/// Tracks every client by id: role, connection state, room membership,
/// and last reported game stage.
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ mark_disconnected() ──→ register()  (reconnection)
///     │                  │
///     ▼                  ▼
/// [Connected]      [Disconnected]  (kept until purge())
/// ```
///
/// Clients are never deleted on disconnect. Only [`purge`](Self::purge)
/// (explicit administrative removal) or [`clear`](Self::clear) (server
/// shutdown) remove records.
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
}

impl ClientRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registers a client, or resumes a disconnected one.
    ///
    /// A brand-new id gets a fresh `Connected` record. An id that
    /// exists but is disconnected is a reconnection: the record flips
    /// back to `Connected`, keeping its role, room, and stage.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateClient`] if the id is already
    /// connected.
    pub fn register(
        &mut self,
        id: ClientId,
        role: ClientRole,
    ) -> Result<&Client, RegistryError> {
        if let Some(existing) = self.clients.get_mut(&id) {
            if existing.is_connected() {
                return Err(RegistryError::DuplicateClient(id));
            }
            // Reconnection: resume the original record. The role from
            // the handshake is ignored; identity was fixed at first HI.
            if existing.role != role {
                tracing::warn!(
                    client_id = %id,
                    original = %existing.role,
                    requested = %role,
                    "reconnection requested a different role, keeping original"
                );
            }
            existing.state = ConnectionState::Connected;
            tracing::info!(client_id = %id, "client reconnected");
            return Ok(self.clients.get(&id).expect("just modified"));
        }

        let client = Client {
            id: id.clone(),
            role,
            state: ConnectionState::Connected,
            room: None,
            stage: None,
        };
        self.clients.insert(id.clone(), client);
        tracing::info!(client_id = %id, %role, "client registered");
        Ok(self.clients.get(&id).expect("just inserted"))
    }

    /// Marks a client as disconnected. Idempotent.
    ///
    /// An unknown id is a logged no-op: socket teardown can race with
    /// an administrative purge, and neither side should fail for it.
    pub fn mark_disconnected(&mut self, id: &ClientId) {
        match self.clients.get_mut(id) {
            Some(client) => {
                if client.is_connected() {
                    client.state = ConnectionState::Disconnected {
                        since: Instant::now(),
                    };
                    tracing::info!(client_id = %id, "client disconnected");
                }
            }
            None => {
                tracing::debug!(
                    client_id = %id,
                    "mark_disconnected for unknown client, ignoring"
                );
            }
        }
    }

    /// Looks up a client by id.
    pub fn lookup(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// The routing guard: `true` only if the id is registered AND
    /// currently connected. Every forward and broadcast checks this
    /// before delivery.
    pub fn is_valid_recipient(&self, id: &ClientId) -> bool {
        self.clients.get(id).is_some_and(Client::is_connected)
    }

    /// Records which room a client belongs to.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub fn set_room(
        &mut self,
        id: &ClientId,
        room: Option<RoomId>,
    ) -> Result<(), RegistryError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        client.room = room;
        Ok(())
    }

    /// The room a client currently belongs to, if any.
    pub fn room_of(&self, id: &ClientId) -> Option<RoomId> {
        self.clients.get(id).and_then(|c| c.room)
    }

    /// Records a client's self-reported game stage (from SAY.STATE).
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub fn set_stage(
        &mut self,
        id: &ClientId,
        stage: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        client.stage = Some(stage.into());
        Ok(())
    }

    /// A client's last reported stage.
    pub fn stage_of(&self, id: &ClientId) -> Option<&str> {
        self.clients.get(id).and_then(|c| c.stage.as_deref())
    }

    /// A roster snapshot of every tracked client, sorted by id so
    /// repeated broadcasts are byte-identical for identical state.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .clients
            .values()
            .map(|c| RosterEntry {
                id: c.id.clone(),
                role: c.role,
                connected: c.is_connected(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        entries
    }

    /// All clients of the given role currently assigned to `room`.
    pub fn clients_in(&self, room: RoomId, role: ClientRole) -> Vec<&Client> {
        let mut found: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.room == Some(room) && c.role == role)
            .collect();
        found.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        found
    }

    /// Ids of all connected clients, sorted.
    pub fn connected_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Explicit administrative removal. Idempotent: purging an unknown
    /// id is a logged no-op. This is the only way a client record dies
    /// short of [`clear`](Self::clear).
    pub fn purge(&mut self, id: &ClientId) {
        if self.clients.remove(id).is_some() {
            tracing::info!(client_id = %id, "client purged");
        } else {
            tracing::debug!(client_id = %id, "purge for unknown client, ignoring");
        }
    }

    /// Removes every client record. Shutdown path only.
    pub fn clear(&mut self) {
        let n = self.clients.len();
        self.clients.clear();
        tracing::info!(cleared = n, "client registry cleared");
    }

    /// Number of tracked clients (any state).
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
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

    // -- Helpers ----------------------------------------------------------

    fn cid(id: &str) -> ClientId {
        ClientId::new(id)
    }

    fn registry_with_player(id: &str) -> ClientRegistry {
        let mut reg = ClientRegistry::new();
        reg.register(cid(id), ClientRole::Player).unwrap();
        reg
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_register_new_client_is_connected() {
        let mut reg = ClientRegistry::new();

        let client = reg.register(cid("p1"), ClientRole::Player).unwrap();

        assert!(client.is_connected());
        assert_eq!(client.id, cid("p1"));
        assert_eq!(client.role, ClientRole::Player);
        assert!(client.room.is_none());
    }

    #[test]
    fn test_register_connected_id_returns_duplicate_error() {
        let mut reg = registry_with_player("p1");

        let result = reg.register(cid("p1"), ClientRole::Player);

        assert!(matches!(
            result,
            Err(RegistryError::DuplicateClient(id)) if id == cid("p1")
        ));
    }

    #[test]
    fn test_register_disconnected_id_is_reconnection() {
        let mut reg = registry_with_player("p1");
        reg.set_room(&cid("p1"), Some(RoomId(4))).unwrap();
        reg.set_stage(&cid("p1"), "instructions").unwrap();
        reg.mark_disconnected(&cid("p1"));

        let client = reg.register(cid("p1"), ClientRole::Player).unwrap();

        // Reconnection resumes the original record wholesale.
        assert!(client.is_connected());
        assert_eq!(client.room, Some(RoomId(4)));
        assert_eq!(client.stage.as_deref(), Some("instructions"));
    }

    #[test]
    fn test_register_reconnection_keeps_original_role() {
        let mut reg = registry_with_player("p1");
        reg.mark_disconnected(&cid("p1"));

        // A reconnect claiming a different role must not escalate.
        let client = reg.register(cid("p1"), ClientRole::Admin).unwrap();

        assert_eq!(client.role, ClientRole::Player);
    }

    // =====================================================================
    // mark_disconnected()
    // =====================================================================

    #[test]
    fn test_mark_disconnected_flips_state() {
        let mut reg = registry_with_player("p1");

        reg.mark_disconnected(&cid("p1"));

        let client = reg.lookup(&cid("p1")).unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.state,
            ConnectionState::Disconnected { .. }
        ));
    }

    #[test]
    fn test_mark_disconnected_is_idempotent() {
        let mut reg = registry_with_player("p1");

        reg.mark_disconnected(&cid("p1"));
        reg.mark_disconnected(&cid("p1"));

        assert!(!reg.lookup(&cid("p1")).unwrap().is_connected());
    }

    #[test]
    fn test_mark_disconnected_unknown_id_is_noop() {
        let mut reg = ClientRegistry::new();

        // Must not panic or create a record.
        reg.mark_disconnected(&cid("ghost"));

        assert!(reg.is_empty());
    }

    #[test]
    fn test_disconnect_never_deletes_record() {
        let mut reg = registry_with_player("p1");

        reg.mark_disconnected(&cid("p1"));

        assert_eq!(reg.len(), 1);
        assert!(reg.lookup(&cid("p1")).is_some());
    }

    // =====================================================================
    // is_valid_recipient()
    // =====================================================================

    #[test]
    fn test_is_valid_recipient_true_only_when_connected() {
        let mut reg = registry_with_player("p1");
        assert!(reg.is_valid_recipient(&cid("p1")));

        reg.mark_disconnected(&cid("p1"));
        assert!(!reg.is_valid_recipient(&cid("p1")));

        assert!(!reg.is_valid_recipient(&cid("never-seen")));
    }

    // =====================================================================
    // set_room() / room_of()
    // =====================================================================

    #[test]
    fn test_set_room_and_room_of() {
        let mut reg = registry_with_player("p1");

        reg.set_room(&cid("p1"), Some(RoomId(7))).unwrap();
        assert_eq!(reg.room_of(&cid("p1")), Some(RoomId(7)));

        reg.set_room(&cid("p1"), None).unwrap();
        assert_eq!(reg.room_of(&cid("p1")), None);
    }

    #[test]
    fn test_set_room_unknown_client_errors() {
        let mut reg = ClientRegistry::new();

        let result = reg.set_room(&cid("ghost"), Some(RoomId(1)));

        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_client_in_at_most_one_room() {
        // Membership is a function: assigning a new room replaces the
        // old one, it never accumulates.
        let mut reg = registry_with_player("p1");

        reg.set_room(&cid("p1"), Some(RoomId(1))).unwrap();
        reg.set_room(&cid("p1"), Some(RoomId(2))).unwrap();

        assert_eq!(reg.room_of(&cid("p1")), Some(RoomId(2)));
        assert!(reg.clients_in(RoomId(1), ClientRole::Player).is_empty());
    }

    // =====================================================================
    // stages
    // =====================================================================

    #[test]
    fn test_set_stage_and_stage_of() {
        let mut reg = registry_with_player("p1");

        reg.set_stage(&cid("p1"), "lobby").unwrap();
        assert_eq!(reg.stage_of(&cid("p1")), Some("lobby"));

        reg.set_stage(&cid("p1"), "round-1").unwrap();
        assert_eq!(reg.stage_of(&cid("p1")), Some("round-1"));
    }

    // =====================================================================
    // roster() / views
    // =====================================================================

    #[test]
    fn test_roster_reports_connection_state() {
        let mut reg = ClientRegistry::new();
        reg.register(cid("a"), ClientRole::Admin).unwrap();
        reg.register(cid("b"), ClientRole::Player).unwrap();
        reg.mark_disconnected(&cid("b"));

        let roster = reg.roster();

        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, cid("a"));
        assert!(roster[0].connected);
        assert_eq!(roster[1].id, cid("b"));
        assert!(!roster[1].connected);
    }

    #[test]
    fn test_roster_is_sorted_by_id() {
        let mut reg = ClientRegistry::new();
        reg.register(cid("zed"), ClientRole::Player).unwrap();
        reg.register(cid("amy"), ClientRole::Player).unwrap();

        let roster = reg.roster();

        assert_eq!(roster[0].id, cid("amy"));
        assert_eq!(roster[1].id, cid("zed"));
    }

    #[test]
    fn test_clients_in_filters_by_room_and_role() {
        let mut reg = ClientRegistry::new();
        reg.register(cid("p1"), ClientRole::Player).unwrap();
        reg.register(cid("p2"), ClientRole::Player).unwrap();
        reg.register(cid("m1"), ClientRole::Monitor).unwrap();
        reg.set_room(&cid("p1"), Some(RoomId(1))).unwrap();
        reg.set_room(&cid("p2"), Some(RoomId(2))).unwrap();
        reg.set_room(&cid("m1"), Some(RoomId(1))).unwrap();

        let players = reg.clients_in(RoomId(1), ClientRole::Player);
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, cid("p1"));

        let monitors = reg.clients_in(RoomId(1), ClientRole::Monitor);
        assert_eq!(monitors.len(), 1);
    }

    // =====================================================================
    // purge() / clear()
    // =====================================================================

    #[test]
    fn test_purge_removes_record() {
        let mut reg = registry_with_player("p1");

        reg.purge(&cid("p1"));

        assert!(reg.lookup(&cid("p1")).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_purge_unknown_id_is_noop() {
        let mut reg = registry_with_player("p1");

        reg.purge(&cid("ghost"));

        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut reg = ClientRegistry::new();
        reg.register(cid("p1"), ClientRole::Player).unwrap();
        reg.register(cid("a1"), ClientRole::Admin).unwrap();

        reg.clear();

        assert!(reg.is_empty());
    }

    // =====================================================================
    // Full lifecycle
    // =====================================================================

    #[test]
    fn test_full_lifecycle_register_disconnect_reconnect() {
        // A participant connects, their network drops, they come back
        // with HI_AGAIN before anyone purges them.
        let mut reg = ClientRegistry::new();

        reg.register(cid("p1"), ClientRole::Player).unwrap();
        reg.set_room(&cid("p1"), Some(RoomId(3))).unwrap();

        reg.mark_disconnected(&cid("p1"));
        assert!(!reg.is_valid_recipient(&cid("p1")));

        reg.register(cid("p1"), ClientRole::Player).unwrap();
        assert!(reg.is_valid_recipient(&cid("p1")));
        // Queue position and room survive the round trip.
        assert_eq!(reg.room_of(&cid("p1")), Some(RoomId(3)));
    }
}
