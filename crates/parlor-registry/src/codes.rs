//! Single-use admission codes for wait-pool entry.
//!
//! Researchers hand out access codes (in recruitment emails, MTurk
//! HITs, ...). A code admits exactly one client into the pool; it is
//! consumed on entry and released again only if that client disconnects
//! without ever being dispatched, freeing the slot for someone else.

use std::collections::HashMap;

use rand::Rng;

use crate::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeState {
    /// Issued, not yet used.
    Fresh,
    /// Consumed by a pool admission.
    Used,
}

/// The set of issued admission codes and their use state.
#[derive(Debug, Default)]
pub struct AccessCodes {
    codes: HashMap<String, CodeState>,
}

impl AccessCodes {
    /// Creates an empty code set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh random code and returns it.
    pub fn issue(&mut self) -> String {
        let code = generate_code();
        self.codes.insert(code.clone(), CodeState::Fresh);
        code
    }

    /// Registers an externally chosen code (e.g. from a session config
    /// file) as fresh.
    pub fn add(&mut self, code: impl Into<String>) {
        self.codes.insert(code.into(), CodeState::Fresh);
    }

    /// Consumes a code on pool admission. Single-use: a second consume
    /// of the same code fails.
    ///
    /// # Errors
    /// - [`RegistryError::UnknownCode`] if the code was never issued
    /// - [`RegistryError::CodeAlreadyUsed`] if it was already consumed
    pub fn consume(&mut self, code: &str) -> Result<(), RegistryError> {
        match self.codes.get_mut(code) {
            None => Err(RegistryError::UnknownCode(code.to_string())),
            Some(state @ CodeState::Fresh) => {
                *state = CodeState::Used;
                Ok(())
            }
            Some(CodeState::Used) => {
                Err(RegistryError::CodeAlreadyUsed(code.to_string()))
            }
        }
    }

    /// Releases a consumed code so another client can take the slot.
    ///
    /// Used when a pool member disconnects for good before dispatch.
    /// Releasing an unknown or already-fresh code is a logged no-op:
    /// disconnect handling must never fail on slot bookkeeping.
    pub fn release(&mut self, code: &str) {
        match self.codes.get_mut(code) {
            Some(state @ CodeState::Used) => {
                *state = CodeState::Fresh;
                tracing::info!(code, "admission slot released");
            }
            Some(CodeState::Fresh) => {
                tracing::debug!(code, "release of unconsumed code, ignoring");
            }
            None => {
                tracing::debug!(code, "release of unknown code, ignoring");
            }
        }
    }

    /// `true` if the code exists and has not been consumed.
    pub fn is_valid(&self, code: &str) -> bool {
        self.codes.get(code) == Some(&CodeState::Fresh)
    }

    /// Number of issued codes (any state).
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` if no codes were issued.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Generates a random 16-character hex code (64 bits of entropy).
///
/// Short enough to paste from a recruitment email, long enough that
/// guessing a valid code is infeasible.
fn generate_code() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 8] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
