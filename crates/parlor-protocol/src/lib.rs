//! Wire protocol for Parlor.
//!
//! This crate defines the "language" that players, admins, and game-logic
//! processes speak with the server:
//!
//! - **Types** ([`Message`], [`ActionVerb`], [`Target`], [`Address`], etc.)
//!   are the envelopes that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) is how those envelopes are
//!   converted to and from bytes.
//! - **Errors** ([`ProtocolError`]) cover what can go wrong during
//!   encoding and decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the channel
//! (client identity, rooms). It doesn't know about connections or rooms,
//! it only knows how to serialize and deserialize envelopes.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Channel (client context)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ActionVerb, Address, ClientId, ClientRole, Endpoint, Message, RoomId,
    RosterEntry, Target,
};
