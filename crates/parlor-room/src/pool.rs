//! The waiting pool: accumulates players, then dispatches a matched
//! subset into a freshly created game room.
//!
//! The pool is deliberately socket-free. Every operation returns
//! [`PoolEffect`] values describing the notices and broadcasts the
//! channel must deliver, and mutates rooms/clients/codes only through
//! the [`DispatchContext`] handed in by the caller. That keeps the
//! dispatch decision and the membership mutation in one synchronous
//! step, which is what makes dispatch atomic from the router's point
//! of view.
//!
//! # Dispatch determinism
//!
//! Selection is the FIFO prefix of *connected* members: the first
//! `target_size` clients in arrival order. Every selected client is
//! re-validated against the client registry immediately before the
//! move; a client whose disconnect won the race is skipped and the
//! pool keeps waiting for a replacement.

use parlor_protocol::{ClientId, RoomId};
use parlor_registry::{AccessCodes, ClientRegistry};
use parlor_timer::{TimerFired, WaitConfig, WaitTimers};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    Directive, DispatchPolicy, LogicFactory, PoolConfig, RoomError,
    RoomKind, RoomRegistry,
};

// ---------------------------------------------------------------------------
// Context and effects
// ---------------------------------------------------------------------------

/// Mutable access to everything a dispatch touches. The channel owns
/// all of these; the pool borrows them per call.
pub struct DispatchContext<'a> {
    /// The room registry (game rooms are created here).
    pub rooms: &'a mut RoomRegistry,
    /// The client registry (membership and connectivity truth).
    pub clients: &'a mut ClientRegistry,
    /// Admission codes (consumed on entry, released on loss).
    pub codes: &'a mut AccessCodes,
    /// Produces logic instances for dispatched game rooms.
    pub factory: &'a LogicFactory,
}

/// Why a connection attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// The pool is closed to new entries.
    Closed,
    /// The presented admission code was unknown or already used.
    InvalidCode,
}

/// Something the channel must do on the pool's behalf.
#[derive(Debug)]
pub enum PoolEffect {
    /// Tell a client it was not admitted.
    Refused {
        /// Who was refused.
        client: ClientId,
        /// Why.
        reason: RefusalReason,
    },
    /// Broadcast the current pool size to the listed members.
    PoolSize {
        /// Connected members at the time of the mutation.
        recipients: Vec<ClientId>,
        /// The size to report.
        size: usize,
    },
    /// A member's wait expired; send it a TIME notice.
    TimedOut {
        /// Whose wait expired.
        client: ClientId,
    },
    /// A game room was created and started.
    GameStarted {
        /// The new room.
        room: RoomId,
        /// The dispatched clients, in selection order.
        clients: Vec<ClientId>,
        /// Remote start commands to deliver.
        directives: Vec<Directive>,
    },
    /// A dispatch attempt failed (logic factory); clients stayed
    /// pooled.
    DispatchFailed {
        /// Human-readable reason, for admin visibility.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// WaitingPool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PoolEntry {
    client: ClientId,
    connected: bool,
    /// The admission code this entry consumed, if any. Released back
    /// when the member disconnects undispatched.
    code: Option<String>,
}

/// A room specialization that accumulates connecting players and
/// triggers dispatch once its policy condition is satisfied.
pub struct WaitingPool {
    room_id: RoomId,
    config: PoolConfig,
    /// FIFO member list. Disconnected members keep their position
    /// until timeout or purge so a reconnection resumes, not re-joins.
    entries: Vec<PoolEntry>,
    timers: WaitTimers,
    closed: bool,
}

impl WaitingPool {
    /// Creates the pool and its backing Waiting room.
    ///
    /// Returns the receiver for the pool's timeout events; the channel
    /// feeds those back through [`on_timeout`](Self::on_timeout).
    ///
    /// # Errors
    /// [`RoomError::InvalidConfig`] for a malformed pool config, or
    /// any room/timer construction error.
    pub fn new(
        rooms: &mut RoomRegistry,
        config: PoolConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TimerFired>), RoomError> {
        config.validate()?;
        let room_id = rooms.create_room(RoomKind::Waiting, None)?;
        let (timers, timer_rx) = WaitTimers::new(WaitConfig {
            deadline: config.deadline,
        })?;
        Ok((
            Self {
                room_id,
                config,
                entries: Vec::new(),
                timers,
                closed: false,
            },
            timer_rx,
        ))
    }

    /// The pool's backing room id.
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// `true` once the pool stopped admitting clients.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of connected members.
    pub fn member_count(&self) -> usize {
        self.entries.iter().filter(|e| e.connected).count()
    }

    /// `true` if the client has an entry (connected or not).
    pub fn contains(&self, client: &ClientId) -> bool {
        self.entries.iter().any(|e| &e.client == client)
    }

    // -- Connect / disconnect / reconnect ---------------------------------

    /// A player connected and wants into the pool.
    ///
    /// Closed pool: a single refusal notice, nothing else. Otherwise
    /// the admission code (if presented) is consumed, the client is
    /// appended to the FIFO list, its wait timeout armed, and the new
    /// pool size broadcast. Under `WaitForN` this may trigger dispatch.
    ///
    /// # Errors
    /// Only fatal errors escape (id-generation exhaustion during a
    /// triggered dispatch). Refusals are effects, not errors.
    pub fn on_client_connect(
        &mut self,
        client: &ClientId,
        code: Option<&str>,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<Vec<PoolEffect>, RoomError> {
        if self.closed {
            return Ok(vec![PoolEffect::Refused {
                client: client.clone(),
                reason: RefusalReason::Closed,
            }]);
        }

        if let Some(entry) =
            self.entries.iter().find(|e| &e.client == client)
        {
            if entry.connected {
                debug!(client_id = %client, "connect from already-pooled client, ignoring");
                return Ok(Vec::new());
            }
            // A plain HI from a member we still hold as disconnected
            // is a reconnection in disguise: resume the entry instead
            // of double-counting it.
            return self.on_client_reconnect(client, ctx);
        }

        // Single-use admission: the code dies the moment it admits.
        if let Some(code) = code {
            if let Err(e) = ctx.codes.consume(code) {
                debug!(client_id = %client, error = %e, "admission refused");
                return Ok(vec![PoolEffect::Refused {
                    client: client.clone(),
                    reason: RefusalReason::InvalidCode,
                }]);
            }
        }

        self.entries.push(PoolEntry {
            client: client.clone(),
            connected: true,
            code: code.map(str::to_string),
        });
        self.index_member(client, ctx);
        self.timers.arm(client.clone());
        info!(
            client_id = %client,
            pool_size = self.member_count(),
            "client joined pool"
        );

        let mut effects = vec![self.size_broadcast()];
        if self.config.dispatch == DispatchPolicy::WaitForN {
            effects.extend(self.try_dispatch(ctx, self.config.target_size)?);
        }
        Ok(effects)
    }

    /// A pool member's socket closed.
    ///
    /// The wait timeout is cancelled (exactly once), the admission
    /// slot released for a replacement, and the entry kept in place so
    /// a reconnection resumes the original queue position.
    pub fn on_client_disconnect(
        &mut self,
        client: &ClientId,
        ctx: &mut DispatchContext<'_>,
    ) -> Vec<PoolEffect> {
        let Some(entry) =
            self.entries.iter_mut().find(|e| &e.client == client)
        else {
            debug!(client_id = %client, "disconnect from non-member, ignoring");
            return Vec::new();
        };
        if !entry.connected {
            return Vec::new();
        }

        entry.connected = false;
        if let Some(code) = &entry.code {
            ctx.codes.release(code);
        }
        self.timers.cancel(client);
        info!(
            client_id = %client,
            pool_size = self.member_count(),
            "pool member disconnected"
        );

        vec![self.size_broadcast()]
    }

    /// A disconnected member came back (HI_AGAIN) before being purged.
    ///
    /// Resumes the original entry: same queue position, no second
    /// admission, no double-counted pool size. Then re-runs the
    /// connect-path logic, so a reconnection can re-trigger dispatch.
    pub fn on_client_reconnect(
        &mut self,
        client: &ClientId,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<Vec<PoolEffect>, RoomError> {
        if self.closed {
            return Ok(vec![PoolEffect::Refused {
                client: client.clone(),
                reason: RefusalReason::Closed,
            }]);
        }

        match self.entries.iter().position(|e| &e.client == client) {
            Some(pos) => {
                let entry = &mut self.entries[pos];
                if entry.connected {
                    debug!(client_id = %client, "reconnect from connected member, ignoring");
                    return Ok(Vec::new());
                }
                entry.connected = true;
                // The slot was released at disconnect; take it back if
                // nobody claimed it meanwhile.
                let code = entry.code.clone();
                if let Some(code) = code {
                    if let Err(e) = ctx.codes.consume(&code) {
                        debug!(
                            client_id = %client,
                            error = %e,
                            "admission slot was taken while away"
                        );
                    }
                }
            }
            None => {
                // The wait list already purged this client (timeout);
                // treat it as a fresh codeless entry at the tail.
                self.entries.push(PoolEntry {
                    client: client.clone(),
                    connected: true,
                    code: None,
                });
            }
        }

        self.index_member(client, ctx);
        self.timers.arm(client.clone());
        info!(
            client_id = %client,
            pool_size = self.member_count(),
            "pool member reconnected"
        );

        let mut effects = vec![self.size_broadcast()];
        if self.config.dispatch == DispatchPolicy::WaitForN {
            effects.extend(self.try_dispatch(ctx, self.config.target_size)?);
        }
        Ok(effects)
    }

    // -- Timeouts ---------------------------------------------------------

    /// A wait timeout fired.
    ///
    /// Stale fires (generation mismatch: the member already left or
    /// was re-armed) are ignored. Under the `Timeout` policy a current
    /// fire means the session start date arrived, which triggers
    /// dispatch of whoever is present; under the other policies the
    /// individual member's wait is over.
    pub fn on_timeout(
        &mut self,
        fired: &TimerFired,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<Vec<PoolEffect>, RoomError> {
        if !self.timers.is_current(&fired.client, fired.generation) {
            debug!(
                client_id = %fired.client,
                generation = fired.generation,
                "stale timeout fire, ignoring"
            );
            return Ok(Vec::new());
        }
        self.timers.cancel(&fired.client);

        let mut effects = Vec::new();
        if self.config.dispatch == DispatchPolicy::Timeout {
            // Start date reached: everyone present plays. Drain the
            // pool in FIFO groups of up to target size, so the result
            // doesn't depend on which member's fire arrives first.
            while self.member_count() > 0 {
                let batch = self.try_dispatch(ctx, 1)?;
                let dispatched = batch
                    .iter()
                    .any(|e| matches!(e, PoolEffect::GameStarted { .. }));
                effects.extend(batch);
                if !dispatched {
                    break;
                }
            }
            if !self.contains(&fired.client) {
                return Ok(effects);
            }
        }

        // The member's wait is over: notify, drop the entry, free the
        // admission slot.
        if let Some(pos) =
            self.entries.iter().position(|e| e.client == fired.client)
        {
            let entry = self.entries.remove(pos);
            if let Some(code) = &entry.code {
                ctx.codes.release(code);
            }
        }
        if let Some(pool_room) = ctx.rooms.get_mut(self.room_id) {
            pool_room.remove_client(&fired.client);
        }
        if ctx.clients.lookup(&fired.client).is_some() {
            let _ = ctx.clients.set_room(&fired.client, None);
        }
        info!(
            client_id = %fired.client,
            pool_size = self.member_count(),
            "pool member timed out"
        );

        effects.push(PoolEffect::TimedOut {
            client: fired.client.clone(),
        });
        effects.push(self.size_broadcast());
        Ok(effects)
    }

    // -- Explicit triggers ------------------------------------------------

    /// The `Manual` policy's admin trigger: dispatch whoever is
    /// connected, up to the target size.
    ///
    /// # Errors
    /// Fatal id-generation exhaustion only.
    pub fn dispatch_now(
        &mut self,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<Vec<PoolEffect>, RoomError> {
        self.try_dispatch(ctx, 1)
    }

    /// Closes the pool: cancels every wait timeout and refuses all
    /// later connects. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.timers.cancel_all();
            info!(room_id = %self.room_id, "pool closed");
        }
    }

    // -- Internals --------------------------------------------------------

    /// Syncs the registry's room pointer and the pool room's player
    /// view for a (re)joining member.
    fn index_member(&self, client: &ClientId, ctx: &mut DispatchContext<'_>) {
        if ctx.clients.set_room(client, Some(self.room_id)).is_err() {
            warn!(client_id = %client, "pool member unknown to registry");
        }
        if let Some(pool_room) = ctx.rooms.get_mut(self.room_id) {
            pool_room.add_player(client.clone());
        }
    }

    fn size_broadcast(&self) -> PoolEffect {
        let recipients: Vec<ClientId> = self
            .entries
            .iter()
            .filter(|e| e.connected)
            .map(|e| e.client.clone())
            .collect();
        PoolEffect::PoolSize {
            size: recipients.len(),
            recipients,
        }
    }

    /// Attempts a dispatch if at least `want` connected members exist.
    ///
    /// Selection, re-validation, room creation, membership move, and
    /// game start happen in one synchronous pass; the roster effects
    /// are emitted only after the move is applied.
    fn try_dispatch(
        &mut self,
        ctx: &mut DispatchContext<'_>,
        want: usize,
    ) -> Result<Vec<PoolEffect>, RoomError> {
        if self.member_count() < want {
            return Ok(Vec::new());
        }

        // FIFO prefix of connected members, re-validated against the
        // registry at the moment of selection. Disconnect wins the
        // race: a member the registry no longer sees as connected is
        // dropped here even if our entry hadn't caught up yet.
        let mut selected: Vec<ClientId> = Vec::new();
        let mut corrected = false;
        for entry in self.entries.iter_mut().filter(|e| e.connected) {
            if selected.len() == self.config.target_size {
                break;
            }
            if ctx.clients.is_valid_recipient(&entry.client) {
                selected.push(entry.client.clone());
            } else {
                warn!(
                    client_id = %entry.client,
                    "selected member no longer connected, dropping from dispatch"
                );
                entry.connected = false;
                corrected = true;
            }
        }

        if selected.len() < want {
            // Not enough survivors; keep waiting for replacements.
            return Ok(if corrected {
                vec![self.size_broadcast()]
            } else {
                Vec::new()
            });
        }

        // Exactly-once timeout clearing for the matched set.
        for client in &selected {
            self.timers.cancel(client);
        }

        let game_id = ctx.rooms.create_room(RoomKind::Game, Some(self.room_id))?;

        let logic = (ctx.factory)();
        let game = ctx.rooms.get_mut(game_id).expect("just created");
        if let Err(e) = game.setup_game(logic) {
            // The factory produced nothing valid: discard the room and
            // return the matched clients to waiting. Their entries were
            // never removed, so order is preserved; only the timeouts
            // need re-arming.
            warn!(room_id = %game_id, error = %e, "dispatch failed, clients stay pooled");
            ctx.rooms.destroy_room(game_id);
            for client in &selected {
                self.timers.arm(client.clone());
            }
            return Ok(vec![PoolEffect::DispatchFailed {
                reason: e.to_string(),
            }]);
        }

        // The move: one membership mutation, roster effects after.
        for client in &selected {
            self.entries.retain(|e| &e.client != client);
            if let Some(pool_room) = ctx.rooms.get_mut(self.room_id) {
                pool_room.remove_client(client);
            }
        }
        let game = ctx.rooms.get_mut(game_id).expect("just created");
        for client in &selected {
            game.add_player(client.clone());
        }
        let directives = game.start_game(true);
        for client in &selected {
            let _ = ctx.clients.set_room(client, Some(game_id));
        }

        info!(
            room_id = %game_id,
            players = selected.len(),
            "pool dispatched into game room"
        );

        Ok(vec![
            PoolEffect::GameStarted {
                room: game_id,
                clients: selected,
                directives,
            },
            self.size_broadcast(),
        ])
    }
}
