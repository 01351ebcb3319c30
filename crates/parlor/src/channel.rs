//! The channel: the coordinating facade binding registries, rooms,
//! the waiting pool, and the two endpoint routers together.
//!
//! All mutable state lives here, owned, with lifecycle tied to server
//! start and stop; routers and rooms receive it by reference per
//! message. Nothing in this module is globally shared.
//!
//! # Concurrency
//!
//! The channel is single-writer: every inbound socket event and timer
//! fire is serialized through one `&mut self` call (the server holds
//! the channel behind a mutex). That is what makes multi-step actions
//! like pool dispatch atomic from the routers' point of view.

use parlor_protocol::{
    Address, ClientId, Endpoint, Message, RoomId, Target,
};
use parlor_registry::{AccessCodes, ClientRegistry};
use parlor_room::{
    DispatchContext, LogicFactory, PoolConfig, RemoteCommand, RoomError,
    RoomRegistry, WaitingPool,
};
use parlor_timer::TimerFired;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::router::{
    broadcast_roster, deliver_directives, deliver_pool_effects,
    handshake_role, AdminPolicy, EndpointPolicy, Outbox, PlayerPolicy,
    RouterContext,
};
use crate::{MemoryStore, NullMemory, ParlorError};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Channel`].
///
/// The pool configuration and the logic factory are required; a
/// missing one is a construction error, never a silent default.
pub struct ChannelBuilder {
    pool: Option<PoolConfig>,
    factory: Option<LogicFactory>,
    memory: Box<dyn MemoryStore>,
    access_codes: Vec<String>,
}

impl ChannelBuilder {
    /// Creates a builder with no pool, no factory, and a no-op memory
    /// store.
    pub fn new() -> Self {
        Self {
            pool: None,
            factory: None,
            memory: Box::new(NullMemory),
            access_codes: Vec::new(),
        }
    }

    /// Sets the waiting-pool configuration (required).
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Sets the game-logic factory (required).
    pub fn logic_factory(mut self, factory: LogicFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the memory store.
    pub fn memory(mut self, memory: Box<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    /// Registers an externally issued admission code.
    pub fn access_code(mut self, code: impl Into<String>) -> Self {
        self.access_codes.push(code.into());
        self
    }

    /// Builds the channel and the receiver for its pool-timeout
    /// events.
    ///
    /// # Errors
    /// [`RoomError::InvalidConfig`] for a missing or malformed pool
    /// config or a missing factory.
    pub fn build(
        self,
    ) -> Result<(Channel, mpsc::UnboundedReceiver<TimerFired>), ParlorError>
    {
        let pool_config = self.pool.ok_or_else(|| {
            RoomError::InvalidConfig("pool configuration is required".into())
        })?;
        let factory = self.factory.ok_or_else(|| {
            RoomError::InvalidConfig("logic factory is required".into())
        })?;

        let mut rooms = RoomRegistry::new();
        let (pool, timer_rx) = WaitingPool::new(&mut rooms, pool_config)?;

        let mut codes = AccessCodes::new();
        for code in self.access_codes {
            codes.add(code);
        }

        Ok((
            Channel {
                clients: ClientRegistry::new(),
                rooms,
                pool,
                codes,
                factory,
                memory: self.memory,
                player_policy: PlayerPolicy,
                admin_policy: AdminPolicy,
                shut_down: false,
            },
            timer_rx,
        ))
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// The coordinating facade. One per server.
pub struct Channel {
    clients: ClientRegistry,
    rooms: RoomRegistry,
    pool: WaitingPool,
    codes: AccessCodes,
    factory: LogicFactory,
    memory: Box<dyn MemoryStore>,
    player_policy: PlayerPolicy,
    admin_policy: AdminPolicy,
    shut_down: bool,
}

impl Channel {
    /// Creates a builder.
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Routes one inbound message.
    ///
    /// The sender guard runs first: a non-handshake message whose
    /// `from` is unknown or disconnected is dropped before any router
    /// sees it. Handshakes are the one exception, because they are
    /// what creates the sender.
    ///
    /// # Errors
    /// Only fatal conditions (room-id exhaustion during dispatch).
    pub fn handle_message(
        &mut self,
        msg: &Message,
        outbox: &mut dyn Outbox,
    ) -> Result<(), ParlorError> {
        if self.shut_down {
            debug!(from = %msg.from, "message after shutdown, dropped");
            return Ok(());
        }

        let endpoint = if msg.is_handshake() {
            handshake_role(msg).endpoint()
        } else {
            match self.clients.lookup(&msg.from) {
                Some(client) if client.is_connected() => {
                    client.role.endpoint()
                }
                _ => {
                    debug!(
                        from = %msg.from,
                        "message from unknown or disconnected sender, dropped"
                    );
                    return Ok(());
                }
            }
        };

        match endpoint {
            Endpoint::PlayerFacing => {
                let policy = self.player_policy;
                policy.handle(msg, &mut self.ctx(outbox))
            }
            Endpoint::AdminFacing => {
                let policy = self.admin_policy;
                policy.handle(msg, &mut self.ctx(outbox))
            }
        }
    }

    /// A client's socket closed. Marks it disconnected, updates the
    /// pool, and pushes a fresh roster.
    pub fn client_disconnected(
        &mut self,
        id: &ClientId,
        outbox: &mut dyn Outbox,
    ) {
        if self.shut_down {
            return;
        }
        self.clients.mark_disconnected(id);

        if self.pool.contains(id) {
            let effects = {
                let mut dctx = DispatchContext {
                    rooms: &mut self.rooms,
                    clients: &mut self.clients,
                    codes: &mut self.codes,
                    factory: &self.factory,
                };
                self.pool.on_client_disconnect(id, &mut dctx)
            };
            deliver_pool_effects(effects, &self.clients, outbox);
        }

        broadcast_roster(&self.clients, outbox);
    }

    /// A pool wait timeout fired. Stale fires are filtered inside the
    /// pool.
    ///
    /// # Errors
    /// Fatal dispatch errors only.
    pub fn timer_fired(
        &mut self,
        fired: &TimerFired,
        outbox: &mut dyn Outbox,
    ) -> Result<(), ParlorError> {
        if self.shut_down {
            return Ok(());
        }
        let effects = {
            let mut dctx = DispatchContext {
                rooms: &mut self.rooms,
                clients: &mut self.clients,
                codes: &mut self.codes,
                factory: &self.factory,
            };
            self.pool.on_timeout(fired, &mut dctx)?
        };
        deliver_pool_effects(effects, &self.clients, outbox);
        Ok(())
    }

    /// Server-wide shutdown. Runs exactly once no matter how many
    /// callers race it: a final roster snapshot goes out, every client
    /// list is cleared, and the memory sink is closed.
    pub fn shutdown(&mut self, outbox: &mut dyn Outbox) {
        if self.shut_down {
            debug!("shutdown already ran, ignoring");
            return;
        }
        self.shut_down = true;

        broadcast_roster(&self.clients, outbox);
        self.pool.close();
        self.clients.clear();
        self.memory.close();
        info!("channel shut down");
    }

    // -- Logic-facing API -------------------------------------------------

    /// Sends a remote lifecycle command to one player client, guarded
    /// by recipient validity.
    pub fn remote_command(
        &mut self,
        command: RemoteCommand,
        client: &ClientId,
        outbox: &mut dyn Outbox,
    ) {
        if !self.clients.is_valid_recipient(client) {
            debug!(client_id = %client, "remote command to invalid recipient, dropped");
            return;
        }
        let msg = Message::say(
            Target::Command,
            ClientId::server(),
            Address::Client(client.clone()),
        )
        .with_data(json!({ "command": command.as_str() }));
        outbox.send(&msg, client);
    }

    /// Sends a remote setup instruction configuring a client-side
    /// module.
    pub fn remote_setup(
        &mut self,
        module: &str,
        client: &ClientId,
        config: serde_json::Value,
        outbox: &mut dyn Outbox,
    ) {
        if !self.clients.is_valid_recipient(client) {
            debug!(client_id = %client, "remote setup to invalid recipient, dropped");
            return;
        }
        let msg = Message::say(
            Target::Setup,
            ClientId::server(),
            Address::Client(client.clone()),
        )
        .with_data(json!({ "module": module, "config": config }))
        .with_text(module);
        outbox.send(&msg, client);
    }

    /// Completes a room's pending logic attachment programmatically
    /// (the logic HI handshake does the same through the admin
    /// router).
    pub fn confirm_logic_attached(
        &mut self,
        room: RoomId,
        outbox: &mut dyn Outbox,
    ) {
        match self.rooms.get_mut(room) {
            Some(room) => {
                let directives = room.confirm_attached();
                deliver_directives(directives, outbox);
            }
            None => {
                debug!(room_id = %room, "attach confirmation for unknown room");
            }
        }
    }

    /// Issues a fresh admission code.
    pub fn issue_code(&mut self) -> String {
        self.codes.issue()
    }

    // -- Read access ------------------------------------------------------

    /// The client registry (read-only).
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The player-side roster view.
    pub fn player_roster(&self) -> Vec<parlor_protocol::RosterEntry> {
        self.clients
            .roster()
            .into_iter()
            .filter(|e| e.role.endpoint() == Endpoint::PlayerFacing)
            .collect()
    }

    /// The admin-side roster view (admins, monitors, logic processes).
    pub fn admin_roster(&self) -> Vec<parlor_protocol::RosterEntry> {
        self.clients
            .roster()
            .into_iter()
            .filter(|e| e.role.endpoint() == Endpoint::AdminFacing)
            .collect()
    }

    /// The room registry (read-only).
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// The default waiting pool (read-only).
    pub fn pool(&self) -> &WaitingPool {
        &self.pool
    }

    /// `true` if the id is currently connected.
    pub fn is_connected(&self, id: &ClientId) -> bool {
        self.clients.is_valid_recipient(id)
    }

    /// `true` once [`shutdown`](Self::shutdown) ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn ctx<'a>(&'a mut self, outbox: &'a mut dyn Outbox) -> RouterContext<'a> {
        RouterContext {
            clients: &mut self.clients,
            rooms: &mut self.rooms,
            pool: &mut self.pool,
            codes: &mut self.codes,
            factory: &self.factory,
            memory: self.memory.as_mut(),
            outbox,
        }
    }
}
