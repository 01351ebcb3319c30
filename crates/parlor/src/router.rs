//! Message routing: the two endpoint policies and their shared seams.
//!
//! Forwarding policy differs by endpoint role, not by message verb:
//! the same SAY.STATE is relayed verbatim for a player but
//! sync-checked and sender-masked for an admin. Each policy is a
//! stateless strategy implementing [`EndpointPolicy`]; dispatch is an
//! explicit match over `(verb, target)` pairs so the compiler checks
//! exhaustiveness instead of a listener table checking nothing.
//!
//! The routers own no data. They read and mutate registries through
//! [`RouterContext`] and reach clients only through the [`Outbox`]
//! seam, which is what makes every policy decision testable with a
//! recording outbox.

use parlor_protocol::{
    ActionVerb, Address, ClientId, ClientRole, Endpoint, Message, RoomId,
    Target,
};
use parlor_registry::{AccessCodes, ClientRegistry};
use parlor_room::{
    Directive, DispatchContext, LogicFactory, PoolEffect, RefusalReason,
    RoomRegistry, WaitingPool,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{MemoryStore, ParlorError};

/// The notice an admin gets when a state change is rejected because
/// the target room is not synchronized.
pub const NOT_READY_NOTICE: &str =
    "Not possible to change state: some players are not ready";

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The outbound side of the transport, as the routers see it.
pub trait Outbox {
    /// Delivers a message to one client.
    fn send(&mut self, message: &Message, recipient: &ClientId);

    /// Delivers a message to every connected client, optionally
    /// excluding one (usually the sender).
    fn broadcast(&mut self, message: &Message, exclude: Option<&ClientId>);
}

/// Everything a policy may touch while handling one message. All of it
/// is owned by the channel; the context borrows it per message.
pub struct RouterContext<'a> {
    /// The client registry.
    pub clients: &'a mut ClientRegistry,
    /// The room registry.
    pub rooms: &'a mut RoomRegistry,
    /// The default waiting pool.
    pub pool: &'a mut WaitingPool,
    /// Admission codes.
    pub codes: &'a mut AccessCodes,
    /// The game-logic factory for dispatched rooms.
    pub factory: &'a LogicFactory,
    /// The memory log.
    pub memory: &'a mut dyn MemoryStore,
    /// The outbound transport seam.
    pub outbox: &'a mut dyn Outbox,
}

/// One endpoint's forwarding policy.
pub trait EndpointPolicy {
    /// Handles a single inbound message. Routing failures are local
    /// (drop + log); only fatal conditions (room-id exhaustion) are
    /// errors.
    fn handle(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError>;
}

// ---------------------------------------------------------------------------
// Player-facing policy
// ---------------------------------------------------------------------------

/// Forwarding rules for the player endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerPolicy;

impl EndpointPolicy for PlayerPolicy {
    fn handle(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError> {
        match (msg.action, &msg.target) {
            (ActionVerb::Say, Target::Hi) => self.handle_hi(msg, ctx, false),
            (ActionVerb::Say, Target::HiAgain) => {
                self.handle_hi(msg, ctx, true)
            }
            (ActionVerb::Say, Target::Txt | Target::Data) => {
                self.relay(msg, ctx);
                Ok(())
            }
            (ActionVerb::Set, Target::Data) => {
                self.set_data(msg, ctx);
                Ok(())
            }
            (ActionVerb::Say, Target::State) => {
                self.say_state(msg, ctx);
                Ok(())
            }
            (ActionVerb::Get, Target::Plist) => {
                let reply = roster_message(
                    ctx.clients,
                    Address::Client(msg.from.clone()),
                );
                ctx.outbox.send(&reply, &msg.from);
                Ok(())
            }
            _ => {
                debug!(
                    action = %msg.action,
                    target = %msg.target,
                    from = %msg.from,
                    "unhandled player message, dropped"
                );
                Ok(())
            }
        }
    }
}

impl PlayerPolicy {
    /// HI / HI_AGAIN: register (or resume) the client, admit it into
    /// the pool, and push the updated roster everywhere.
    fn handle_hi(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
        reconnect: bool,
    ) -> Result<(), ParlorError> {
        if let Err(e) =
            ctx.clients.register(msg.from.clone(), ClientRole::Player)
        {
            debug!(from = %msg.from, error = %e, "handshake rejected");
            return Ok(());
        }

        let code = handshake_code(msg);
        let effects = {
            let mut dctx = DispatchContext {
                rooms: &mut *ctx.rooms,
                clients: &mut *ctx.clients,
                codes: &mut *ctx.codes,
                factory: ctx.factory,
            };
            if reconnect {
                ctx.pool.on_client_reconnect(&msg.from, &mut dctx)?
            } else {
                ctx.pool.on_client_connect(
                    &msg.from,
                    code.as_deref(),
                    &mut dctx,
                )?
            }
        };
        deliver_pool_effects(effects, ctx.clients, &mut *ctx.outbox);

        // Roster after the membership mutation, to everyone; the
        // admin-facing listeners are part of the broadcast set, which
        // is the mirror the observers rely on.
        broadcast_roster(ctx.clients, &mut *ctx.outbox);
        Ok(())
    }

    /// SAY.TXT / SAY.DATA: forward verbatim, guarded per recipient.
    fn relay(&self, msg: &Message, ctx: &mut RouterContext<'_>) {
        match &msg.to {
            Address::Client(to) => {
                if ctx.clients.is_valid_recipient(to) {
                    ctx.outbox.send(msg, to);
                } else {
                    debug!(
                        to = %to,
                        from = %msg.from,
                        "recipient unknown or disconnected, message dropped"
                    );
                }
            }
            Address::All => ctx.outbox.broadcast(msg, Some(&msg.from)),
            Address::Room => send_to_sender_room(msg, msg, ctx),
        }
    }

    /// SET.DATA: unicast when the recipient is a specific valid
    /// client; otherwise room-wide state, which goes to the admin side
    /// and into the memory log.
    fn set_data(&self, msg: &Message, ctx: &mut RouterContext<'_>) {
        if let Address::Client(to) = &msg.to {
            if ctx.clients.is_valid_recipient(to) {
                ctx.outbox.send(msg, to);
                return;
            }
        }
        for id in admin_side(ctx.clients) {
            ctx.outbox.send(msg, &id);
        }
        ctx.memory
            .add(msg.text.as_deref().unwrap_or(""), &msg.data, &msg.from);
    }

    /// SAY.STATE: track the sender's stage, forward to the declared
    /// recipient, and mirror to the admin side for observer
    /// visibility.
    fn say_state(&self, msg: &Message, ctx: &mut RouterContext<'_>) {
        let stage = stage_string(msg);
        if let Err(e) = ctx.clients.set_stage(&msg.from, stage) {
            debug!(from = %msg.from, error = %e, "stage update failed");
        }

        let mut direct = None;
        if let Address::Client(to) = &msg.to {
            if ctx.clients.is_valid_recipient(to) {
                ctx.outbox.send(msg, to);
                direct = Some(to.clone());
            }
        }
        for id in admin_side(ctx.clients) {
            if Some(&id) != direct.as_ref() && id != msg.from {
                ctx.outbox.send(msg, &id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Admin-facing policy
// ---------------------------------------------------------------------------

/// Forwarding rules for the admin endpoint (admins, monitors, logic
/// processes). Same verbs as the player policy, different treatment:
/// senders are masked and SET is rewritten to SAY before relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminPolicy;

impl EndpointPolicy for AdminPolicy {
    fn handle(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError> {
        // The verb rewrite law: a SET never leaves this router as SET.
        // Admin state-setting commands reach recipients as ordinary
        // narrated events.
        let msg = if msg.action == ActionVerb::Set {
            msg.as_say()
        } else {
            msg.clone()
        };

        match (msg.action, &msg.target) {
            (ActionVerb::Say, Target::Hi | Target::HiAgain) => {
                self.handle_hi(&msg, ctx)
            }
            (ActionVerb::Say, Target::State) => self.handle_state(&msg, ctx),
            (ActionVerb::Say, Target::Txt | Target::Data) => {
                self.masked_relay(&msg, ctx);
                Ok(())
            }
            (ActionVerb::Say, Target::Command) => {
                self.game_command(&msg, ctx)
            }
            (ActionVerb::Get, Target::Plist) => {
                let reply = roster_message(
                    ctx.clients,
                    Address::Client(msg.from.clone()),
                );
                ctx.outbox.send(&reply, &msg.from);
                Ok(())
            }
            _ => {
                debug!(
                    action = %msg.action,
                    target = %msg.target,
                    from = %msg.from,
                    "unhandled admin message, dropped"
                );
                Ok(())
            }
        }
    }
}

impl AdminPolicy {
    /// HI / HI_AGAIN from the admin side. A logic process announces
    /// the room it attaches to, completing the two-phase attachment.
    fn handle_hi(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError> {
        let role = handshake_role(msg);
        if let Err(e) = ctx.clients.register(msg.from.clone(), role) {
            debug!(from = %msg.from, error = %e, "handshake rejected");
            return Ok(());
        }

        if role == ClientRole::Logic {
            if let Some(room_id) =
                msg.data.get("room").and_then(Value::as_u64).map(RoomId)
            {
                let _ = ctx.clients.set_room(&msg.from, Some(room_id));
                match ctx.rooms.get_mut(room_id) {
                    Some(room) => {
                        room.add_admin(msg.from.clone());
                        let directives = room.confirm_attached();
                        deliver_directives(directives, &mut *ctx.outbox);
                    }
                    None => {
                        warn!(
                            from = %msg.from,
                            room = %room_id,
                            "logic announced an unknown room"
                        );
                    }
                }
            }
        }

        // The admin-facing listeners get the refreshed roster.
        for id in admin_side(ctx.clients) {
            let reply =
                roster_message(ctx.clients, Address::Client(id.clone()));
            ctx.outbox.send(&reply, &id);
        }
        Ok(())
    }

    /// SAY.STATE from an admin: rejected with a text notice unless
    /// every player in the target room reports the same stage;
    /// otherwise forwarded (masked) and broadcast to the other
    /// observers.
    fn handle_state(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError> {
        let Some(room_id) = target_room(msg, ctx.clients) else {
            ctx.outbox.send(
                &server_notice(Target::Txt, &msg.from, NOT_READY_NOTICE),
                &msg.from,
            );
            return Ok(());
        };
        if !check_sync(room_id, ctx.clients) {
            ctx.outbox.send(
                &server_notice(Target::Txt, &msg.from, NOT_READY_NOTICE),
                &msg.from,
            );
            return Ok(());
        }

        let fwd = msg.masked();
        match &msg.to {
            Address::Client(to) => {
                if ctx.clients.is_valid_recipient(to) {
                    ctx.outbox.send(&fwd, to);
                } else {
                    debug!(to = %to, "state recipient gone, dropped");
                }
            }
            Address::Room | Address::All => {
                let players: Vec<ClientId> = ctx
                    .clients
                    .clients_in(room_id, ClientRole::Player)
                    .iter()
                    .filter(|c| c.is_connected())
                    .map(|c| c.id.clone())
                    .collect();
                for player in players {
                    ctx.outbox.send(&fwd, &player);
                }
            }
        }

        for id in admin_side(ctx.clients) {
            if id != msg.from {
                ctx.outbox.send(&fwd, &id);
            }
        }
        Ok(())
    }

    /// SAY.TXT / SAY.DATA with the sender hidden: recipients never see
    /// which admin spoke.
    fn masked_relay(&self, msg: &Message, ctx: &mut RouterContext<'_>) {
        let fwd = msg.masked();
        match &msg.to {
            Address::Client(to) => {
                if ctx.clients.is_valid_recipient(to) {
                    ctx.outbox.send(&fwd, to);
                } else {
                    debug!(to = %to, "recipient gone, admin message dropped");
                }
            }
            Address::All => ctx.outbox.broadcast(&fwd, Some(&msg.from)),
            Address::Room => send_to_sender_room(msg, &fwd, ctx),
        }
    }

    /// GAMECOMMAND: lifecycle commands for a room's state machine, and
    /// the manual dispatch trigger for the pool.
    fn game_command(
        &self,
        msg: &Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<(), ParlorError> {
        let Some(command) = msg.data.get("command").and_then(Value::as_str)
        else {
            debug!(from = %msg.from, "game command without a command field");
            return Ok(());
        };

        if command == "dispatch" {
            let effects = {
                let mut dctx = DispatchContext {
                    rooms: &mut *ctx.rooms,
                    clients: &mut *ctx.clients,
                    codes: &mut *ctx.codes,
                    factory: ctx.factory,
                };
                ctx.pool.dispatch_now(&mut dctx)?
            };
            deliver_pool_effects(effects, ctx.clients, &mut *ctx.outbox);
            return Ok(());
        }

        let room_id = msg
            .data
            .get("room")
            .and_then(Value::as_u64)
            .map(RoomId)
            .or_else(|| target_room(msg, ctx.clients));
        let Some(room_id) = room_id else {
            ctx.outbox.send(
                &server_notice(
                    Target::Txt,
                    &msg.from,
                    "No target room for command",
                ),
                &msg.from,
            );
            return Ok(());
        };
        let Some(room) = ctx.rooms.get_mut(room_id) else {
            ctx.outbox.send(
                &server_notice(Target::Txt, &msg.from, "Unknown room"),
                &msg.from,
            );
            return Ok(());
        };

        let directives = match command {
            "start" => room.start_game(true),
            "pause" => room.pause_game(true),
            "resume" => room.resume_game(true),
            "stop" => room.stop_game(true),
            other => {
                debug!(command = other, "unknown game command, ignoring");
                Vec::new()
            }
        };
        deliver_directives(directives, &mut *ctx.outbox);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// The role a handshake declares in its payload. Defaults to player.
pub(crate) fn handshake_role(msg: &Message) -> ClientRole {
    msg.data
        .get("role")
        .and_then(Value::as_str)
        .and_then(|s| match s {
            "player" => Some(ClientRole::Player),
            "admin" => Some(ClientRole::Admin),
            "monitor" => Some(ClientRole::Monitor),
            "logic" => Some(ClientRole::Logic),
            _ => None,
        })
        .unwrap_or(ClientRole::Player)
}

/// The admission code a handshake presents, if any.
fn handshake_code(msg: &Message) -> Option<String> {
    msg.data
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The stage string a SAY.STATE reports: the data string itself, or
/// the text label, or the compact JSON of a structured payload.
fn stage_string(msg: &Message) -> String {
    if let Some(s) = msg.data.as_str() {
        s.to_string()
    } else if msg.data.is_null() {
        msg.text.clone().unwrap_or_default()
    } else {
        msg.data.to_string()
    }
}

/// Resolves which room a message is aimed at: the recipient's room
/// for a direct address, the sender's room otherwise.
fn target_room(msg: &Message, clients: &ClientRegistry) -> Option<RoomId> {
    match &msg.to {
        Address::Client(c) => clients.room_of(c),
        Address::Room | Address::All => clients.room_of(&msg.from),
    }
}

/// `true` when every player in the room is connected and reports the
/// same stage. An empty room is trivially synchronized.
fn check_sync(room: RoomId, clients: &ClientRegistry) -> bool {
    let players = clients.clients_in(room, ClientRole::Player);
    if players.is_empty() {
        return true;
    }
    if !players.iter().all(|p| p.is_connected()) {
        return false;
    }
    let first = players[0].stage.as_deref();
    first.is_some() && players.iter().all(|p| p.stage.as_deref() == first)
}

/// Connected clients handled by the admin-facing policy.
fn admin_side(clients: &ClientRegistry) -> Vec<ClientId> {
    clients
        .roster()
        .into_iter()
        .filter(|e| {
            e.connected && e.role.endpoint() == Endpoint::AdminFacing
        })
        .map(|e| e.id)
        .collect()
}

/// Delivers a verbatim or transformed message to every member of the
/// sender's room except the sender, guarded per recipient. `original`
/// carries the sender identity for room resolution; `fwd` is what
/// actually goes out.
fn send_to_sender_room(
    original: &Message,
    fwd: &Message,
    ctx: &mut RouterContext<'_>,
) {
    let Some(room_id) = ctx.clients.room_of(&original.from) else {
        debug!(from = %original.from, "sender has no room, message dropped");
        return;
    };
    let Some(room) = ctx.rooms.get(room_id) else {
        debug!(room = %room_id, "sender's room is gone, message dropped");
        return;
    };
    let members: Vec<ClientId> = room
        .player_clients()
        .iter()
        .chain(room.admin_clients())
        .cloned()
        .collect();
    for member in members {
        if member != original.from && ctx.clients.is_valid_recipient(&member)
        {
            ctx.outbox.send(fwd, &member);
        }
    }
}

/// A server-originated plain-text notice.
pub(crate) fn server_notice(
    target: Target,
    to: &ClientId,
    text: &str,
) -> Message {
    Message::say(target, ClientId::server(), Address::Client(to.clone()))
        .with_text(text)
}

/// A PLIST snapshot of the current roster.
pub(crate) fn roster_message(
    clients: &ClientRegistry,
    to: Address,
) -> Message {
    let roster = clients.roster();
    Message::say(Target::Plist, ClientId::server(), to)
        .with_data(serde_json::to_value(roster).unwrap_or(Value::Null))
}

/// Broadcasts the roster to every connected client.
pub(crate) fn broadcast_roster(
    clients: &ClientRegistry,
    outbox: &mut dyn Outbox,
) {
    outbox.broadcast(&roster_message(clients, Address::All), None);
}

/// Turns room directives into GAMECOMMAND messages.
pub(crate) fn deliver_directives(
    directives: Vec<Directive>,
    outbox: &mut dyn Outbox,
) {
    for directive in directives {
        let msg = Message::say(
            Target::Command,
            ClientId::server(),
            Address::Client(directive.client.clone()),
        )
        .with_data(json!({ "command": directive.command.as_str() }));
        outbox.send(&msg, &directive.client);
    }
}

/// Translates pool effects into outbound traffic.
pub(crate) fn deliver_pool_effects(
    effects: Vec<PoolEffect>,
    clients: &ClientRegistry,
    outbox: &mut dyn Outbox,
) {
    for effect in effects {
        match effect {
            PoolEffect::Refused { client, reason } => {
                let notice = match reason {
                    RefusalReason::Closed => server_notice(
                        Target::RoomClosed,
                        &client,
                        "Room closed",
                    ),
                    RefusalReason::InvalidCode => server_notice(
                        Target::Txt,
                        &client,
                        "Invalid access code",
                    ),
                };
                outbox.send(&notice, &client);
            }
            PoolEffect::PoolSize { recipients, size } => {
                for recipient in recipients {
                    let msg = Message::say(
                        Target::Data,
                        ClientId::server(),
                        Address::Client(recipient.clone()),
                    )
                    .with_data(json!({ "poolSize": size }))
                    .with_text("pool-size");
                    outbox.send(&msg, &recipient);
                }
            }
            PoolEffect::TimedOut { client } => {
                let notice = server_notice(
                    Target::Time,
                    &client,
                    "Wait time exceeded",
                );
                outbox.send(&notice, &client);
            }
            PoolEffect::GameStarted { directives, .. } => {
                deliver_directives(directives, outbox);
                // Roster strictly after the membership move.
                broadcast_roster(clients, outbox);
            }
            PoolEffect::DispatchFailed { reason } => {
                for id in admin_side(clients) {
                    let notice = server_notice(
                        Target::Txt,
                        &id,
                        &format!("Game dispatch failed: {reason}"),
                    );
                    outbox.send(&notice, &id);
                }
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(id: &str) -> ClientId {
        ClientId::new(id)
    }

    #[test]
    fn test_handshake_role_parses_known_roles() {
        let mut msg =
            Message::say(Target::Hi, cid("x"), Address::All);
        msg.data = json!({"role": "monitor"});
        assert_eq!(handshake_role(&msg), ClientRole::Monitor);

        msg.data = json!({"role": "logic"});
        assert_eq!(handshake_role(&msg), ClientRole::Logic);
    }

    #[test]
    fn test_handshake_role_defaults_to_player() {
        let msg = Message::say(Target::Hi, cid("x"), Address::All);
        assert_eq!(handshake_role(&msg), ClientRole::Player);

        let mut msg = msg;
        msg.data = json!({"role": "superuser"});
        assert_eq!(handshake_role(&msg), ClientRole::Player);
    }

    #[test]
    fn test_stage_string_prefers_data_string() {
        let msg = Message::say(Target::State, cid("x"), Address::All)
            .with_data(json!("round-2"))
            .with_text("ignored");
        assert_eq!(stage_string(&msg), "round-2");
    }

    #[test]
    fn test_stage_string_falls_back_to_text_then_json() {
        let msg = Message::say(Target::State, cid("x"), Address::All)
            .with_text("lobby");
        assert_eq!(stage_string(&msg), "lobby");

        let msg = Message::say(Target::State, cid("x"), Address::All)
            .with_data(json!({"stage": 3}));
        assert_eq!(stage_string(&msg), r#"{"stage":3}"#);
    }

    #[test]
    fn test_check_sync_requires_identical_stages() {
        let mut clients = ClientRegistry::new();
        let room = RoomId(9);
        for id in ["p1", "p2"] {
            clients.register(cid(id), ClientRole::Player).unwrap();
            clients.set_room(&cid(id), Some(room)).unwrap();
        }

        // Nobody reported yet: not synchronized.
        assert!(!check_sync(room, &clients));

        clients.set_stage(&cid("p1"), "round-1").unwrap();
        assert!(!check_sync(room, &clients));

        clients.set_stage(&cid("p2"), "round-1").unwrap();
        assert!(check_sync(room, &clients));

        clients.set_stage(&cid("p2"), "round-2").unwrap();
        assert!(!check_sync(room, &clients));
    }

    #[test]
    fn test_check_sync_fails_on_disconnected_player() {
        let mut clients = ClientRegistry::new();
        let room = RoomId(9);
        for id in ["p1", "p2"] {
            clients.register(cid(id), ClientRole::Player).unwrap();
            clients.set_room(&cid(id), Some(room)).unwrap();
            clients.set_stage(&cid(id), "round-1").unwrap();
        }
        clients.mark_disconnected(&cid("p2"));

        assert!(!check_sync(room, &clients));
    }

    #[test]
    fn test_check_sync_empty_room_is_synchronized() {
        let clients = ClientRegistry::new();
        assert!(check_sync(RoomId(1), &clients));
    }

    #[test]
    fn test_admin_side_filters_roles_and_connectivity() {
        let mut clients = ClientRegistry::new();
        clients.register(cid("p1"), ClientRole::Player).unwrap();
        clients.register(cid("a1"), ClientRole::Admin).unwrap();
        clients.register(cid("m1"), ClientRole::Monitor).unwrap();
        clients.register(cid("a2"), ClientRole::Admin).unwrap();
        clients.mark_disconnected(&cid("a2"));

        let side = admin_side(&clients);

        assert_eq!(side, vec![cid("a1"), cid("m1")]);
    }
}
