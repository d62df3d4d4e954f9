//! Per-entity sync state
//!
//! State machine for optimistic writes:
//! - `Clean` → `OptimisticallyApplied` when a local edit is issued
//! - `OptimisticallyApplied` → `Clean` on acknowledgement
//! - `OptimisticallyApplied` → `RolledBack` on failure
//! - `RolledBack` → `Clean` once the restore is done
//!
//! An entity can carry several unacknowledged writes; it only returns to
//! `Clean` when the last one settles.

use crate::error::SyncError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use taskboard_model::Identifier;

/// Sync state of one entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Local state matches last known durable state
    #[default]
    Clean,
    /// Local edit issued, write unacknowledged
    OptimisticallyApplied,
    /// Write failed and local state was restored
    RolledBack,
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::OptimisticallyApplied => "optimistically-applied",
            Self::RolledBack => "rolled-back",
        })
    }
}

/// Validates a state transition
///
/// # Errors
/// Returns `SyncError::InvalidTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: SyncState, to: SyncState) -> Result<(), SyncError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition { from, to })
    }
}

pub fn allowed_transitions(from: SyncState) -> Vec<SyncState> {
    use SyncState::{Clean, OptimisticallyApplied, RolledBack};
    match from {
        Clean => vec![OptimisticallyApplied],
        OptimisticallyApplied => vec![OptimisticallyApplied, Clean, RolledBack],
        RolledBack => vec![Clean, OptimisticallyApplied],
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tracked {
    state: SyncState,
    in_flight: u32,
}

/// Sync-state table keyed by entity id
///
/// Entities without an entry are `Clean`.
#[derive(Debug, Default)]
pub struct SyncLedger {
    states: DashMap<Identifier, Tracked>,
}

impl SyncLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of an entity
    #[must_use]
    pub fn state(&self, id: &Identifier) -> SyncState {
        self.states.get(id).map(|t| t.state).unwrap_or_default()
    }

    /// Check if the entity's local value is acknowledged
    #[inline]
    #[must_use]
    pub fn is_clean(&self, id: &Identifier) -> bool {
        self.state(id) == SyncState::Clean
    }

    /// Number of entities with unacknowledged writes
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.states.len()
    }

    /// Record a local edit awaiting acknowledgement
    ///
    /// # Errors
    /// Returns `SyncError::InvalidTransition` on an illegal transition
    pub fn begin(&self, id: &Identifier) -> Result<(), SyncError> {
        let mut tracked = self.states.entry(id.clone()).or_default();
        validate_transition(tracked.state, SyncState::OptimisticallyApplied)?;
        tracked.state = SyncState::OptimisticallyApplied;
        tracked.in_flight += 1;
        Ok(())
    }

    /// Record an acknowledged write
    ///
    /// # Errors
    /// Returns `SyncError::InvalidTransition` if no write was in flight
    pub fn acknowledge(&self, id: &Identifier) -> Result<SyncState, SyncError> {
        self.settle(id, SyncState::Clean)
    }

    /// Record a failed write whose local effect was undone
    ///
    /// # Errors
    /// Returns `SyncError::InvalidTransition` if no write was in flight
    pub fn roll_back(&self, id: &Identifier) -> Result<SyncState, SyncError> {
        self.settle(id, SyncState::RolledBack)
    }

    fn settle(&self, id: &Identifier, outcome: SyncState) -> Result<SyncState, SyncError> {
        let state = {
            let Some(mut tracked) = self.states.get_mut(id) else {
                return Err(SyncError::InvalidTransition {
                    from: SyncState::Clean,
                    to: outcome,
                });
            };
            validate_transition(tracked.state, outcome)?;
            tracked.in_flight = tracked.in_flight.saturating_sub(1);

            let next = if tracked.in_flight == 0 {
                SyncState::Clean
            } else {
                SyncState::OptimisticallyApplied
            };
            if outcome != next {
                validate_transition(outcome, next)?;
            }
            tracked.state = next;
            next
        };

        if state == SyncState::Clean {
            self.states.remove_if(id, |_, t| t.in_flight == 0);
        }
        Ok(state)
    }
}
