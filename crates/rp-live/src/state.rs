//! Monitor lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use rp_types::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Inactive,
    Active,
    Paused,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Inactive => "INACTIVE",
            SystemState::Active => "ACTIVE",
            SystemState::Paused => "PAUSED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
        };
        write!(f, "{}", s)
    }
}

/// Tracks the lifecycle state and rejects transitions that are not allowed.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SystemState,
    changed_at: DateTime<Utc>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SystemState::Inactive,
            changed_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Target state of `command` from `state`, if the transition is allowed.
    pub fn next(state: SystemState, command: Command) -> Option<SystemState> {
        use Command::*;
        use SystemState::*;
        match (state, command) {
            (Inactive, Start) => Some(Active),
            (Active, Pause) => Some(Paused),
            (Paused, Resume) => Some(Active),
            (Active | Paused, Stop) => Some(Inactive),
            _ => None,
        }
    }

    /// Apply `command`. On error the state is unchanged.
    pub fn apply(&mut self, command: Command) -> Result<SystemState, StateError> {
        let next = Self::next(self.state, command).ok_or_else(|| StateError::InvalidTransition {
            from: self.state.to_string(),
            command: command.to_string(),
        })?;
        info!(from = %self.state, to = %next, %command, "monitor state changed");
        self.state = next;
        self.changed_at = Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(Command::Start).unwrap(), SystemState::Active);
        assert_eq!(sm.apply(Command::Pause).unwrap(), SystemState::Paused);
        assert_eq!(sm.apply(Command::Resume).unwrap(), SystemState::Active);
        assert_eq!(sm.apply(Command::Stop).unwrap(), SystemState::Inactive);
    }

    #[test]
    fn stop_from_paused() {
        let mut sm = StateMachine::new();
        sm.apply(Command::Start).unwrap();
        sm.apply(Command::Pause).unwrap();
        assert_eq!(sm.apply(Command::Stop).unwrap(), SystemState::Inactive);
    }

    #[test]
    fn invalid_transitions_leave_state_unchanged() {
        let mut sm = StateMachine::new();
        let err = sm.apply(Command::Pause).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: "INACTIVE".into(),
                command: "pause".into()
            }
        );
        assert_eq!(sm.state(), SystemState::Inactive);

        assert!(sm.apply(Command::Resume).is_err());
        assert!(sm.apply(Command::Stop).is_err());

        sm.apply(Command::Start).unwrap();
        assert!(sm.apply(Command::Start).is_err());
        assert!(sm.apply(Command::Resume).is_err());
        assert_eq!(sm.state(), SystemState::Active);
    }
}
