//! `ParlorServer` builder and connection handling.
//!
//! This ties the layers together: transport → protocol → channel. Each
//! accepted connection gets its own task; the first envelope must be a
//! HI or HI_AGAIN handshake, which binds the connection to a client id
//! and registers its outbound sender. A drop guard marks the client
//! disconnected however the handler exits.
//!
//! Lock order is channel, then outbox, everywhere. Never the reverse.

use std::collections::HashMap;
use std::sync::Arc;

use parlor_protocol::{ClientId, Codec, JsonCodec, Message};
use parlor_room::{LogicFactory, PoolConfig};
use parlor_timer::TimerFired;
use parlor_transport::{
    Connection, Transport, WebSocketConnection, WebSocketTransport,
};
use tokio::sync::{mpsc, Mutex};

use crate::{Channel, ChannelBuilder, MemoryStore, Outbox, ParlorError};

// ---------------------------------------------------------------------------
// Shared outbox
// ---------------------------------------------------------------------------

/// The server's [`Outbox`]: one mpsc sender per connected client,
/// drained by per-connection writer tasks.
#[derive(Default)]
pub struct SharedOutbox {
    senders: HashMap<ClientId, mpsc::UnboundedSender<Message>>,
}

impl SharedOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(
        &mut self,
        client: ClientId,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        if self.senders.insert(client.clone(), sender).is_some() {
            tracing::warn!(client_id = %client, "outbox sender replaced");
        }
    }

    fn detach(&mut self, client: &ClientId) {
        self.senders.remove(client);
    }

    fn clear(&mut self) {
        self.senders.clear();
    }
}

impl Outbox for SharedOutbox {
    fn send(&mut self, message: &Message, recipient: &ClientId) {
        if let Some(sender) = self.senders.get(recipient) {
            // A send failure means the writer task died; the reader
            // side will run disconnect cleanup shortly.
            let _ = sender.send(message.clone());
        }
    }

    fn broadcast(&mut self, message: &Message, exclude: Option<&ClientId>) {
        for (client, sender) in &self.senders {
            if Some(client) != exclude {
                let _ = sender.send(message.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a Parlor server.
///
/// # Example
///
/// ```rust,ignore
/// use parlor::prelude::*;
///
/// let server = ParlorServer::builder()
///     .bind("0.0.0.0:8080")
///     .pool_config(pool)
///     .logic_factory(factory)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct ParlorServerBuilder {
    bind_addr: String,
    channel: ChannelBuilder,
}

impl ParlorServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            channel: ChannelBuilder::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the waiting-pool configuration (required).
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.channel = self.channel.pool_config(config);
        self
    }

    /// Sets the game-logic factory (required).
    pub fn logic_factory(mut self, factory: LogicFactory) -> Self {
        self.channel = self.channel.logic_factory(factory);
        self
    }

    /// Sets the memory store.
    pub fn memory(mut self, memory: Box<dyn MemoryStore>) -> Self {
        self.channel = self.channel.memory(memory);
        self
    }

    /// Registers an externally issued admission code.
    pub fn access_code(mut self, code: impl Into<String>) -> Self {
        self.channel = self.channel.access_code(code);
        self
    }

    /// Binds the transport, builds the channel, and starts the timer
    /// pump.
    pub async fn build(self) -> Result<ParlorServer, ParlorError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let (channel, timer_rx) = self.channel.build()?;

        let state = Arc::new(ServerState {
            channel: Mutex::new(channel),
            outbox: Mutex::new(SharedOutbox::new()),
        });

        tokio::spawn(pump_timers(Arc::clone(&state), timer_rx));

        Ok(ParlorServer { transport, state })
    }
}

impl Default for ParlorServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub(crate) struct ServerState {
    pub(crate) channel: Mutex<Channel>,
    pub(crate) outbox: Mutex<SharedOutbox>,
}

/// A running Parlor server.
pub struct ParlorServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

/// A cloneable handle for steering a running server from outside the
/// accept loop.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Triggers the channel's exactly-once shutdown and drops every
    /// outbound sender, which unwinds the writer tasks.
    pub async fn shutdown(&self) {
        let mut channel = self.state.channel.lock().await;
        let mut outbox = self.state.outbox.lock().await;
        channel.shutdown(&mut *outbox);
        outbox.clear();
    }

    /// Issues a fresh admission code.
    pub async fn issue_code(&self) -> String {
        self.state.channel.lock().await.issue_code()
    }
}

impl ParlorServer {
    /// Creates a new builder.
    pub fn builder() -> ParlorServerBuilder {
        ParlorServerBuilder::new()
    }

    /// The local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for shutdown and admin operations.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the accept loop until the process terminates.
    pub async fn run(mut self) -> Result<(), ParlorError> {
        tracing::info!("Parlor server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

/// Drop guard that disconnects a client when its handler exits, even
/// on panic. `Drop` is synchronous, so the async cleanup is spawned
/// fire-and-forget.
struct ClientGuard {
    client_id: ClientId,
    state: Arc<ServerState>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let client_id = self.client_id.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut channel = state.channel.lock().await;
            let mut outbox = state.outbox.lock().await;
            outbox.detach(&client_id);
            channel.client_disconnected(&client_id, &mut *outbox);
        });
    }
}

/// Handles a single connection from accept to close.
async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), ParlorError> {
    let conn = Arc::new(conn);
    let codec = JsonCodec;
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // Until the handshake binds an id, we only know the connection.
    let mut bound: Option<ClientId> = None;
    let mut _guard: Option<ClientGuard> = None;

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };

        let msg: Message = match codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "undecodable envelope, dropped");
                continue;
            }
        };

        match &bound {
            None => {
                if !msg.is_handshake() {
                    tracing::debug!(
                        %conn_id,
                        "first message must be a handshake, dropped"
                    );
                    continue;
                }

                // Bind, attach the writer, and route the handshake
                // under one channel lock so two connections racing the
                // same id cannot both win.
                let mut channel = state.channel.lock().await;
                if channel.is_connected(&msg.from) {
                    tracing::debug!(
                        %conn_id,
                        client_id = %msg.from,
                        "id already connected, handshake ignored"
                    );
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                let mut outbox = state.outbox.lock().await;
                outbox.attach(msg.from.clone(), tx);
                spawn_writer(Arc::clone(&conn), rx);

                bound = Some(msg.from.clone());
                _guard = Some(ClientGuard {
                    client_id: msg.from.clone(),
                    state: Arc::clone(&state),
                });

                channel.handle_message(&msg, &mut *outbox)?;
            }
            Some(client_id) => {
                // A connection only speaks for the id it bound at
                // handshake; anything else is spoofing.
                if &msg.from != client_id {
                    tracing::debug!(
                        %conn_id,
                        bound = %client_id,
                        claimed = %msg.from,
                        "sender mismatch, dropped"
                    );
                    continue;
                }
                let mut channel = state.channel.lock().await;
                let mut outbox = state.outbox.lock().await;
                channel.handle_message(&msg, &mut *outbox)?;
            }
        }
    }

    // _guard drops here → disconnect cleanup fires.
    Ok(())
}

/// Drains a client's outbound queue onto its connection. Exits when
/// the sender is detached (queue closes) or the socket breaks.
fn spawn_writer(
    conn: Arc<WebSocketConnection>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    tokio::spawn(async move {
        let codec = JsonCodec;
        while let Some(msg) = rx.recv().await {
            let bytes = match codec.encode(&msg) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(error = %e, "encode failed, message dropped");
                    continue;
                }
            };
            if conn.send(&bytes).await.is_err() {
                break;
            }
        }
        let _ = conn.close().await;
    });
}

/// Feeds pool-timeout fires into the channel's event stream.
async fn pump_timers(
    state: Arc<ServerState>,
    mut timer_rx: mpsc::UnboundedReceiver<TimerFired>,
) {
    while let Some(fired) = timer_rx.recv().await {
        let mut channel = state.channel.lock().await;
        let mut outbox = state.outbox.lock().await;
        if let Err(e) = channel.timer_fired(&fired, &mut *outbox) {
            tracing::error!(error = %e, "timer handling failed");
        }
    }
}
