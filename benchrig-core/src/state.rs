// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Trial state machine with typed state transitions.
//!
//! Implements the trial lifecycle:
//! Pending → Launching → Running → {Parsing, TimedOut, Crashed} → {Succeeded, Failed}.
//! TimedOut and Crashed may loop back to Launching for a retry.
//! Invalid transitions result in StateTransitionError.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Trial lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    /// Initial state - trial scheduled but not yet started.
    Pending,

    /// Worker command is being built and the process started.
    Launching,

    /// Worker is running and its output is being streamed.
    Running,

    /// Worker signalled completion; measurements are being validated.
    Parsing,

    /// Worker exceeded the trial timeout and was terminated.
    TimedOut,

    /// Worker failed to start or exited abnormally.
    Crashed,

    /// Terminal: the trial produced its measurements.
    Succeeded,

    /// Terminal: the trial failed permanently.
    Failed,
}

impl TrialState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Launching => "Launching",
            Self::Running => "Running",
            Self::Parsing => "Parsing",
            Self::TimedOut => "TimedOut",
            Self::Crashed => "Crashed",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: TrialState) -> bool {
        // Cancellation may fail a trial from any live state.
        if !self.is_terminal() && target == Self::Failed {
            return true;
        }
        matches!(
            (self, target),
            (Self::Pending, Self::Launching) |
            // From Launching
            (Self::Launching, Self::Running) |
            (Self::Launching, Self::Crashed) |
            // From Running
            (Self::Running, Self::Parsing) |
            (Self::Running, Self::TimedOut) |
            (Self::Running, Self::Crashed) |
            // From Parsing
            (Self::Parsing, Self::Succeeded) |
            (Self::Parsing, Self::TimedOut) |
            (Self::Parsing, Self::Crashed) |
            // Retries
            (Self::TimedOut, Self::Launching) |
            (Self::Crashed, Self::Launching)
        )
    }
}

impl std::fmt::Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one trial's lifecycle.
/// Enforces valid state transitions and tracks timing.
#[derive(Debug)]
pub struct TrialStateMachine {
    label: String,
    current_state: TrialState,
    last_transition: Instant,
    transition_count: u64,
}

impl TrialStateMachine {
    /// Create a new state machine for the experiment labelled `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            current_state: TrialState::Pending,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> TrialState {
        self.current_state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get time since last transition.
    pub fn time_in_current_state(&self) -> Duration {
        self.last_transition.elapsed()
    }

    /// Get total number of transitions.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: TrialState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                experiment: self.label.clone(),
                state: self.current_state.name(),
            });
        }
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                experiment: self.label.clone(),
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            experiment = %self.label,
            from = self.current_state.name(),
            to = target.name(),
            "State transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.current_state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = TrialStateMachine::new("sort/default/runtime");
        assert_eq!(sm.state(), TrialState::Pending);
        assert_eq!(sm.transition_count(), 0);
        assert!(!sm.is_finished());
    }

    #[test]
    fn test_happy_path() {
        let mut sm = TrialStateMachine::new("sort/default/runtime");
        for state in [
            TrialState::Launching,
            TrialState::Running,
            TrialState::Parsing,
            TrialState::Succeeded,
        ] {
            sm.transition_to(state).unwrap();
            assert_eq!(sm.state(), state);
        }
        assert_eq!(sm.transition_count(), 4);
        assert!(sm.is_finished());
    }

    #[test]
    fn test_crash_then_retry() {
        let mut sm = TrialStateMachine::new("sort/default/runtime");
        sm.transition_to(TrialState::Launching).unwrap();
        sm.transition_to(TrialState::Crashed).unwrap();
        sm.transition_to(TrialState::Launching).unwrap();
        sm.transition_to(TrialState::Running).unwrap();
        sm.transition_to(TrialState::TimedOut).unwrap();
        sm.transition_to(TrialState::Failed).unwrap();
        assert!(sm.is_finished());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = TrialStateMachine::new("sort/default/runtime");

        // Pending → Running skips the launch
        assert!(matches!(
            sm.transition_to(TrialState::Running),
            Err(StateTransitionError::InvalidTransition { .. })
        ));
        assert_eq!(sm.state(), TrialState::Pending);

        sm.transition_to(TrialState::Launching).unwrap();
        assert!(sm.transition_to(TrialState::Succeeded).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut sm = TrialStateMachine::new("sort/default/runtime");
        sm.transition_to(TrialState::Failed).unwrap();
        assert!(matches!(
            sm.transition_to(TrialState::Launching),
            Err(StateTransitionError::TerminalState { .. })
        ));
        assert!(matches!(
            sm.transition_to(TrialState::Failed),
            Err(StateTransitionError::TerminalState { .. })
        ));
    }
}
