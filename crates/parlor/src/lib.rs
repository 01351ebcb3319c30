//! # Parlor
//!
//! A real-time multiplayer experiment server core: browser clients
//! connect over a socket channel, land in rooms (waiting pools,
//! requirement checks, game rooms), and two endpoint routers relay
//! typed messages between players, admins, and monitors with
//! role-specific visibility rules.
//!
//! ## Layers
//!
//! ```text
//! Transport (frames)            parlor-transport
//!     ↕
//! Protocol (Message envelopes)  parlor-protocol
//!     ↕
//! Channel + routers             this crate
//!     ↕
//! Registries / rooms / pool     parlor-registry, parlor-room
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use parlor::prelude::*;
//!
//! let server = ParlorServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .pool_config(pool)
//!     .logic_factory(factory)
//!     .build()
//!     .await?;
//! server.run().await
//! ```

mod channel;
mod error;
mod memory;
mod router;
mod server;

pub use channel::{Channel, ChannelBuilder};
pub use error::ParlorError;
pub use memory::{BufferMemory, MemoryEntry, MemoryStore, NullMemory};
pub use router::{
    AdminPolicy, EndpointPolicy, Outbox, PlayerPolicy, RouterContext,
    NOT_READY_NOTICE,
};
pub use server::{
    ParlorServer, ParlorServerBuilder, ServerHandle, SharedOutbox,
};

/// Installs a tracing subscriber honoring `RUST_LOG`. Call once at
/// process start; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// The common imports for building on Parlor.
pub mod prelude {
    pub use crate::{
        BufferMemory, Channel, ChannelBuilder, MemoryStore, NullMemory,
        Outbox, ParlorError, ParlorServer,
    };
    pub use parlor_protocol::{
        ActionVerb, Address, ClientId, ClientRole, Message, RoomId, Target,
    };
    pub use parlor_room::{
        DispatchPolicy, GameLogic, LogicFactory, PoolConfig, RoomKind,
        RoomState,
    };
    pub use parlor_timer::WaitDeadline;
}
