//! Core protocol types for Parlor's wire format.
//!
//! Every type in this module travels "on the wire": these are the
//! structures that get serialized, sent over the socket channel, and
//! deserialized on the other side. The envelope shape is fixed by the
//! client SDKs, so each type carries unit tests pinning its exact JSON
//! representation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a connected client.
///
/// Client ids are researcher-visible strings chosen by the connecting
/// client in its HI handshake (session codes, participant ids). The
/// newtype keeps them from being confused with other strings, and
/// `#[serde(transparent)]` makes a `ClientId` serialize as the plain
/// string, not as a wrapper object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

/// The reserved sender id used when the admin router hides who spoke.
const MASKED_SENDER: &str = "admin";

impl ClientId {
    /// Creates a client id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The anonymous sender id substituted for admin-originated messages.
    pub fn masked() -> Self {
        Self(MASKED_SENDER.to_string())
    }

    /// The sender id used for server-originated system notices.
    pub fn server() -> Self {
        Self("server".to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unique identifier for a room.
///
/// Unlike client ids, room ids are generated server-side (random,
/// collision-checked) and never leave the process in any load-bearing
/// way, so a compact `u64` newtype is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Roles and endpoints
// ---------------------------------------------------------------------------

/// What kind of client this is, which decides the routing policy its
/// messages go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// A participant playing the game.
    Player,
    /// An experimenter steering the session.
    Admin,
    /// A read-mostly observer watching session progress.
    Monitor,
    /// A game-logic process attached to a room.
    Logic,
}

/// The two routing policy contexts. Forwarding rules differ per endpoint,
/// not per individual role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Player-facing policy.
    PlayerFacing,
    /// Admin-facing policy (admins, monitors, and logic processes).
    AdminFacing,
}

impl ClientRole {
    /// Maps a role to the endpoint whose policy handles its messages.
    pub fn endpoint(self) -> Endpoint {
        match self {
            Self::Player => Endpoint::PlayerFacing,
            Self::Admin | Self::Monitor | Self::Logic => Endpoint::AdminFacing,
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Player => "player",
            Self::Admin => "admin",
            Self::Monitor => "monitor",
            Self::Logic => "logic",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// ActionVerb
// ---------------------------------------------------------------------------

/// The action verb of a message: what the sender wants done.
///
/// Serialized lowercase (`"say"`, `"set"`, `"get"`). Clients are sloppy
/// about case, so deserialization normalizes to lowercase before
/// matching; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionVerb {
    /// Narrate an event. The default verb for ordinary traffic.
    Say,
    /// Impose state on the recipient.
    Set,
    /// Request data from the recipient.
    Get,
}

impl ActionVerb {
    /// The canonical lowercase wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Say => "say",
            Self::Set => "set",
            Self::Get => "get",
        }
    }
}

impl From<ActionVerb> for String {
    fn from(verb: ActionVerb) -> String {
        verb.as_str().to_string()
    }
}

impl TryFrom<String> for ActionVerb {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "say" => Ok(Self::Say),
            "set" => Ok(Self::Set),
            "get" => Ok(Self::Get),
            other => Err(format!("unknown action verb: {other}")),
        }
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The message target: what the verb applies to.
///
/// Targets are application-defined strings on the wire (`"HI"`,
/// `"DATA"`, ...). The named variants cover everything the server
/// routes on; anything else round-trips through [`Target::Other`]
/// untouched so games can define their own targets without a protocol
/// change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    /// First-contact handshake: registers the sender.
    Hi,
    /// Reconnection handshake: resumes a disconnected client.
    HiAgain,
    /// Free-form text between clients.
    Txt,
    /// Application data between clients.
    Data,
    /// A game-state report or command.
    State,
    /// A roster (player list) snapshot.
    Plist,
    /// A wait-pool timeout notice.
    Time,
    /// Notice that a pool refused a connection.
    RoomClosed,
    /// A remote lifecycle command (start/pause/resume/stop) sent to a
    /// player client.
    Command,
    /// A remote setup instruction configuring a client-side module.
    Setup,
    /// Any application-defined target the server relays untouched.
    Other(String),
}

impl Target {
    /// The wire form of this target.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hi => "HI",
            Self::HiAgain => "HI_AGAIN",
            Self::Txt => "TXT",
            Self::Data => "DATA",
            Self::State => "STATE",
            Self::Plist => "PLIST",
            Self::Time => "TIME",
            Self::RoomClosed => "ROOM_CLOSED",
            Self::Command => "GAMECOMMAND",
            Self::Setup => "SETUP",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        match s.as_str() {
            "HI" => Self::Hi,
            "HI_AGAIN" => Self::HiAgain,
            "TXT" => Self::Txt,
            "DATA" => Self::Data,
            "STATE" => Self::State,
            "PLIST" => Self::Plist,
            "TIME" => Self::Time,
            "ROOM_CLOSED" => Self::RoomClosed,
            "GAMECOMMAND" => Self::Command,
            "SETUP" => Self::Setup,
            _ => Self::Other(s),
        }
    }
}

impl From<Target> for String {
    fn from(target: Target) -> String {
        target.as_str().to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Who a message is for.
///
/// On the wire this is a single string field: the sentinels `"ALL"` and
/// `"ROOM"`, or a client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Address {
    /// One specific client.
    Client(ClientId),
    /// Every connected client on the endpoint.
    All,
    /// Every client in the sender's room.
    Room,
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ALL" => Self::All,
            "ROOM" => Self::Room,
            _ => Self::Client(ClientId(s)),
        }
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        match addr {
            Address::All => "ALL".to_string(),
            Address::Room => "ROOM".to_string(),
            Address::Client(id) => id.0,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Room => write!(f, "ROOM"),
            Self::Client(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message: the envelope
// ---------------------------------------------------------------------------

/// The typed envelope every wire message is carried in.
///
/// A message is immutable once constructed: the routing layer never
/// mutates one in place. Transformations (the admin verb rewrite,
/// sender masking) build a new value via [`Message::as_say`] and
/// [`Message::masked`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// What the sender wants done.
    pub action: ActionVerb,

    /// What the verb applies to.
    pub target: Target,

    /// Who sent it. Must be a known, connected client at routing time;
    /// the channel enforces this before a message reaches any router.
    pub from: ClientId,

    /// Who it's for.
    pub to: Address,

    /// Opaque payload. The server relays it without interpreting it.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,

    /// Optional human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Message {
    /// Creates a message with no payload and no text.
    pub fn new(
        action: ActionVerb,
        target: Target,
        from: ClientId,
        to: Address,
    ) -> Self {
        Self {
            action,
            target,
            from,
            to,
            data: serde_json::Value::Null,
            text: None,
        }
    }

    /// Shorthand for a SAY message.
    pub fn say(target: Target, from: ClientId, to: Address) -> Self {
        Self::new(ActionVerb::Say, target, from, to)
    }

    /// Shorthand for a SET message.
    pub fn set(target: Target, from: ClientId, to: Address) -> Self {
        Self::new(ActionVerb::Set, target, from, to)
    }

    /// Attaches a data payload (builder style).
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attaches a text label (builder style).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Returns a copy with the verb rewritten to SAY.
    ///
    /// The admin router relays every SET as a SAY so that admin
    /// state-setting commands appear to recipients as ordinary narrated
    /// events. Everything else in the envelope is preserved.
    pub fn as_say(&self) -> Self {
        Self {
            action: ActionVerb::Say,
            ..self.clone()
        }
    }

    /// Returns a copy with the sender replaced by the anonymous admin id.
    pub fn masked(&self) -> Self {
        Self {
            from: ClientId::masked(),
            ..self.clone()
        }
    }

    /// `true` for the two handshake messages, which are the only ones
    /// allowed from a sender the registry doesn't know yet.
    pub fn is_handshake(&self) -> bool {
        self.action == ActionVerb::Say
            && matches!(self.target, Target::Hi | Target::HiAgain)
    }
}

// ---------------------------------------------------------------------------
// RosterEntry: one line of a PLIST payload
// ---------------------------------------------------------------------------

/// One client's line in a roster (PLIST) snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// The client's id.
    pub id: ClientId,
    /// The client's role.
    pub role: ClientRole,
    /// Whether the client is currently connected.
    pub connected: bool,
}

// =========================================================================
// Tests
// =========================================================================
