// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Endpoint lifecycle state machine.
//!
//! Implements `Pending → Active → (Orphaned) → Deleted`.
//! Invalid transitions result in StateTransitionError.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::EndpointIndex;

/// Endpoint lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointState {
    /// Slot reserved, waiting for the host to confirm the device.
    Pending,

    /// Confirmed; takes part in the generation protocol.
    Active,

    /// Owning session is gone but external references remain.
    Orphaned,

    /// Last reference released; slot and cells returned.
    Deleted,
}

impl EndpointState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Orphaned => "Orphaned",
            Self::Deleted => "Deleted",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: EndpointState) -> bool {
        matches!(
            (self, target),
            // Host confirmed / host rejected
            (Self::Pending, Self::Active) |
            (Self::Pending, Self::Deleted) |
            // Session disconnected / last reference dropped
            (Self::Active, Self::Orphaned) |
            (Self::Active, Self::Deleted) |
            // Last external reference dropped
            (Self::Orphaned, Self::Deleted)
        )
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one endpoint's lifecycle.
#[derive(Debug)]
pub struct EndpointStateMachine {
    index: EndpointIndex,
    current_state: EndpointState,
    last_transition: Instant,
    transition_count: u64,
}

impl EndpointStateMachine {
    pub fn new(index: EndpointIndex) -> Self {
        Self {
            index,
            current_state: EndpointState::Pending,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    pub fn state(&self) -> EndpointState {
        self.current_state
    }

    pub fn index(&self) -> EndpointIndex {
        self.index
    }

    pub fn time_in_current_state(&self) -> std::time::Duration {
        self.last_transition.elapsed()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: EndpointState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                index: self.index,
                state: self.current_state.name(),
            });
        }

        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                index: self.index,
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            endpoint = %self.index,
            from = self.current_state.name(),
            to = target.name(),
            "Endpoint state transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    /// Fail unless the endpoint is Active.
    pub fn require_active(&self) -> Result<(), StateTransitionError> {
        if self.current_state != EndpointState::Active {
            return Err(StateTransitionError::NotActive {
                index: self.index,
                state: self.current_state.name(),
            });
        }
        Ok(())
    }
}
