//! Cancellable per-client wait timeouts for Parlor's waiting pools.
//!
//! Every player sitting in a wait pool has at most one live timeout. The
//! timeout must be cleared exactly once, on dispatch, on disconnect, or
//! on pool closure; double-cancellation is a safe no-op, and a timer
//! that fires after its client already left the pool is detected by
//! generation counter and ignored.
//!
//! # Integration
//!
//! Fired timeouts arrive as [`TimerFired`] events on an mpsc channel so
//! they join the pool's single logical event queue instead of mutating
//! pool state from a timer task:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(msg) = inbound.recv() => { /* route it */ }
//!         Some(fired) = timer_rx.recv() => {
//!             if timers.is_current(&fired.client, fired.generation) {
//!                 pool.on_timeout(&fired.client);
//!             }
//!         }
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use parlor_protocol::ClientId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// When a pool member's wait expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDeadline {
    /// A relative maximum wait, measured from the moment the timeout
    /// is armed (per client).
    After(Duration),
    /// An absolute session start date. Every client armed against it
    /// expires at the same instant.
    At(Instant),
}

/// Wait-timeout configuration for one pool.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// The deadline policy for pool members.
    pub deadline: WaitDeadline,
}

impl WaitConfig {
    /// Rejects configurations that could never fire meaningfully.
    ///
    /// A zero relative wait is always a configuration mistake (the
    /// client would time out before the admission broadcast reaches
    /// it), and required fields are never silently defaulted.
    ///
    /// # Errors
    /// Returns [`TimerError::InvalidConfig`] for a zero duration.
    pub fn validate(&self) -> Result<(), TimerError> {
        match self.deadline {
            WaitDeadline::After(d) if d.is_zero() => Err(
                TimerError::InvalidConfig("max wait must be non-zero".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Resolves the deadline to an absolute instant, as of now.
    fn resolve(&self) -> Instant {
        match self.deadline {
            WaitDeadline::After(d) => Instant::now() + d,
            WaitDeadline::At(at) => at,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the timer layer.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// The wait configuration is malformed. Fatal at construction.
    #[error("invalid wait config: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Fired events
// ---------------------------------------------------------------------------

/// A timeout that fired. Consumers MUST check
/// [`WaitTimers::is_current`] before acting: the client may have been
/// dispatched or disconnected between the fire and this event being
/// processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    /// Whose wait expired.
    pub client: ClientId,
    /// The arming generation that produced this fire.
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// WaitTimers
// ---------------------------------------------------------------------------

struct Armed {
    generation: u64,
    task: JoinHandle<()>,
}

/// The pool's timeout table: at most one live timeout per client.
///
/// Each arm increments a global generation counter, and the generation
/// travels with the fire event. An event whose generation no longer
/// matches the client's live entry is stale and must be ignored; this
/// is what makes a missed cancellation harmless.
pub struct WaitTimers {
    config: WaitConfig,
    tx: mpsc::UnboundedSender<TimerFired>,
    armed: HashMap<ClientId, Armed>,
    next_generation: u64,
}

impl WaitTimers {
    /// Creates the timeout table and the receiving end of its event
    /// channel.
    ///
    /// # Errors
    /// Returns [`TimerError::InvalidConfig`] for a malformed config.
    pub fn new(
        config: WaitConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TimerFired>), TimerError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                config,
                tx,
                armed: HashMap::new(),
                next_generation: 0,
            },
            rx,
        ))
    }

    /// Arms (or re-arms) the timeout for a client.
    ///
    /// Re-arming first cancels the previous handle, preserving the
    /// at-most-one-live-timeout invariant.
    pub fn arm(&mut self, client: ClientId) {
        if self.cancel(&client) {
            debug!(client_id = %client, "re-arming replaced a live timeout");
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = self.config.resolve();
        let tx = self.tx.clone();
        let fired_client = client.clone();

        let task = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            // The receiver side re-validates the generation; a send
            // after the consumer is gone just means shutdown.
            let _ = tx.send(TimerFired {
                client: fired_client,
                generation,
            });
        });

        trace!(client_id = %client, generation, "wait timeout armed");
        self.armed.insert(client, Armed { generation, task });
    }

    /// Cancels a client's live timeout.
    ///
    /// Returns `true` only if a live handle was actually cancelled.
    /// Cancelling a client with no live timeout is a safe no-op, so
    /// dispatch, disconnect, and closure can each call this without
    /// coordinating who got there first.
    pub fn cancel(&mut self, client: &ClientId) -> bool {
        match self.armed.remove(client) {
            Some(entry) => {
                entry.task.abort();
                trace!(client_id = %client, generation = entry.generation, "wait timeout cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every live timeout. Pool-closure path.
    pub fn cancel_all(&mut self) {
        let n = self.armed.len();
        for (_, entry) in self.armed.drain() {
            entry.task.abort();
        }
        if n > 0 {
            debug!(cancelled = n, "all wait timeouts cancelled");
        }
    }

    /// `true` if `generation` is still the client's live arming.
    ///
    /// The staleness guard: a fire event that raced a cancel (or a
    /// re-arm) carries an old generation and must be dropped.
    pub fn is_current(&self, client: &ClientId, generation: u64) -> bool {
        self.armed
            .get(client)
            .is_some_and(|a| a.generation == generation)
    }

    /// Number of live timeouts.
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

impl Drop for WaitTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// =========================================================================
// Tests
// =========================================================================
