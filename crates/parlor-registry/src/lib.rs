//! Client lifecycle tracking for Parlor.
//!
//! This crate owns the answer to "who is connected right now":
//!
//! 1. **Registration**: a client appears on its first HI handshake
//!    ([`ClientRegistry::register`])
//! 2. **Disconnection**: socket close marks the client disconnected,
//!    never deletes it, so a later HI_AGAIN can resume it
//! 3. **Admission**: single-use access codes gate entry into the
//!    waiting pool ([`AccessCodes`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)   ← holds weak membership references into here
//!     ↕
//! Registry (this crate) ← the authoritative owner of every Client
//!     ↕
//! Protocol layer (below) ← provides ClientId, ClientRole
//! ```
//!
//! A client's authoritative home is always the registry; rooms only
//! index membership.

mod client;
mod codes;
mod error;
mod manager;

pub use client::{Client, ConnectionState};
pub use codes::AccessCodes;
pub use error::RegistryError;
pub use manager::ClientRegistry;
