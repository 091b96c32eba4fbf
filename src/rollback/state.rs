//! Rollback state machine: the allowed transitions between `State` values
//! and an append-only log of the transitions a rollback attempt went
//! through (spec §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Triggered,
    InProgress,
    Verifying,
    Completed,
    Failed,
}

impl State {
    /// The allowed-transition table (spec §4.5).
    pub fn can_transition_to(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Idle, Triggered)
                | (Triggered, InProgress)
                | (Triggered, Failed)
                | (InProgress, Verifying)
                | (InProgress, Failed)
                | (Verifying, Completed)
                | (Verifying, Failed)
                | (Completed, Idle)
                | (Failed, Idle)
                | (Failed, Triggered)
        )
    }

    /// `completed` and `failed` are the only terminal states (spec §4.5).
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: State,
    pub to: State,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Append-only record of every transition a single rollback attempt made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionLog {
    entries: Vec<Transition>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, from: State, to: State, at: DateTime<Utc>, reason: impl Into<String>) {
        self.entries.push(Transition {
            from,
            to,
            at,
            reason: reason.into(),
        });
    }

    pub fn entries(&self) -> &[Transition] {
        &self.entries
    }
}
