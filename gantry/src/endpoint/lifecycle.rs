//! Endpoint lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Endpoint lifecycle state.
///
/// # State Transitions
///
/// ```text
/// Created → Started → Stopping → Terminated
///    ↓                    ↑
///    └────────────────────┘ (shut down before start)
/// ```
///
/// # Validation Rules
///
/// - Invocations are dispatched only while `Started`
/// - No transition goes backward and `Stopping` is never skipped
/// - `Terminated` is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleState {
    /// Mailbox and worker exist; invocations are discarded.
    Created = 0,

    /// Invocations are dispatched to the endpoint.
    Started = 1,

    /// Shutdown requested; the shutdown hook has not finished yet.
    Stopping = 2,

    /// Torn down; the mailbox is closed.
    Terminated = 3,
}

impl LifecycleState {
    /// Check if transition to next state is valid.
    ///
    /// # Valid Transitions
    ///
    /// - Created → Started
    /// - Created → Stopping
    /// - Started → Stopping
    /// - Stopping → Terminated
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, Started) | (Created, Stopping) | (Started, Stopping) | (Stopping, Terminated)
        )
    }

    /// Check if invocations may reach application logic in this state.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, LifecycleState::Started)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Created,
            1 => LifecycleState::Started,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Terminated,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Lifecycle state shared between an endpoint's handles and its worker.
///
/// Only valid transitions are applied; each one is a compare-and-swap so
/// concurrent callers agree on a single winner.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Created as u8))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`, returning the previous state.
    ///
    /// Fails with the current state when the transition is not allowed.
    pub(crate) fn transition(&self, next: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        let mut current = self.get();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(observed) => current = LifecycleState::from_u8(observed),
            }
        }
    }
}
