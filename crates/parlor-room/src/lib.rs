//! Room lifecycle management for Parlor.
//!
//! Rooms are uniquely-identified containers for a subset of connected
//! clients plus an attached game-logic instance and its run state. The
//! waiting pool is the room specialization that accumulates players and
//! dispatches matched sets into fresh game rooms.
//!
//! # Key types
//!
//! - [`Room`]: the lifecycle state machine
//! - [`RoomRegistry`]: creates, tracks, and retires rooms
//! - [`GameLogic`]: the trait game developers implement
//! - [`WaitingPool`]: accumulates players, triggers dispatch
//! - [`RoomState`] / [`RoomKind`]: state machine and room taxonomy
//!
//! Rooms never touch sockets: operations that need to reach clients
//! return [`Directive`] values for the channel to deliver.

mod config;
mod error;
mod logic;
mod pool;
mod registry;
mod room;

pub use config::{DispatchPolicy, PoolConfig, RoomKind, RoomState};
pub use error::RoomError;
pub use logic::{AttachState, GameLogic, LogicFactory};
pub use pool::{DispatchContext, PoolEffect, RefusalReason, WaitingPool};
pub use registry::RoomRegistry;
pub use room::{Directive, RemoteCommand, Room};
