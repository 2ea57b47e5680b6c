//! Lifecycle states of a sweep

use crate::SweepError;
use std::fmt;

/// Represents the current state of a sweep
///
/// ```text
/// Idle -> Authenticating -> Running -> Draining -> Reporting -> Done
///               |              |                       |
///               +--------------+--------> Aborted <----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepState {
    Idle,
    Authenticating,
    Running,
    /// Workers finished or were cancelled; the publisher flushes what is left
    Draining,
    Reporting,
    Done,
    Aborted,
}

impl SweepState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: SweepState) -> bool {
        use SweepState::*;
        matches!(
            (self, next),
            (Idle, Authenticating)
                | (Authenticating, Running)
                | (Authenticating, Aborted)
                | (Running, Draining)
                | (Running, Aborted)
                | (Draining, Reporting)
                | (Reporting, Done)
                | (Reporting, Aborted)
        )
    }

    /// Validates and performs a transition
    pub fn transition(self, next: SweepState) -> Result<SweepState, SweepError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SweepError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
