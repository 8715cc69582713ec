// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Handler and sandbox lifecycle states.
//!
//! Handler lifecycle: Uninitialized → Running ⇄ Paused → … → Stopped.
//! Invalid transitions result in StateTransitionError.

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::FunctionName;

/// Handler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerState {
    /// No sandbox exists (never created, or released by eviction).
    Uninitialized,

    /// Sandbox is unpaused; requests may be in flight.
    Running,

    /// Sandbox is paused with no in-flight requests.
    Paused,

    /// Terminal: the handler was reaped and its sandbox torn down.
    Stopped,
}

impl HandlerState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: HandlerState) -> bool {
        matches!(
            (self, target),
            (Self::Uninitialized, Self::Running) |
            (Self::Running, Self::Paused) |
            (Self::Paused, Self::Running) |
            // Eviction releases the sandbox but keeps the handler registered
            (Self::Paused, Self::Uninitialized) |
            (Self::Uninitialized, Self::Stopped) |
            (Self::Running, Self::Stopped) |
            (Self::Paused, Self::Stopped)
        )
    }

    /// Validate a transition for `name`, returning the target on success.
    pub fn transition(
        self,
        name: &FunctionName,
        target: HandlerState,
    ) -> Result<HandlerState, StateTransitionError> {
        if self == Self::Stopped {
            return Err(StateTransitionError::TerminalState {
                name: name.clone(),
                state: self.name(),
            });
        }

        if !self.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                name: name.clone(),
                from: self.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            function = %name,
            from = self.name(),
            to = target.name(),
            "State transition"
        );

        Ok(target)
    }
}

impl std::fmt::Display for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State a sandbox reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    Stopped,
    Paused,
    Running,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Running => "Running",
        };
        write!(f, "{}", name)
    }
}
