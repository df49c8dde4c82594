//! The per-query state machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RagError, Result};

/// Where a query is in its lifecycle.
///
/// ```text
/// Received -> Embedding -> Retrieving -> Generating -> Completed
///     \____________\____________\____________\______-> Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Embedding,
    Retrieving,
    Generating,
    Completed,
    Errored,
}

impl QueryState {
    /// `Completed` and `Errored` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_advance_to(self, next: QueryState) -> bool {
        use QueryState::*;
        match (self, next) {
            (Received, Embedding)
            | (Embedding, Retrieving)
            | (Retrieving, Generating)
            | (Generating, Completed) => true,
            (from, Errored) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Embedding => "embedding",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// A single run of the query state machine.
#[derive(Debug, Clone)]
pub struct QueryLifecycle {
    id: Uuid,
    state: QueryState,
}

impl QueryLifecycle {
    /// Start a new query in [`QueryState::Received`].
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        debug!(query_id = %id, state = %QueryState::Received, "query received");
        Self { id, state: QueryState::Received }
    }

    /// Identifier used to correlate log lines for this query.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The current state.
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidTransition`] if the move is not allowed;
    /// the state is left unchanged.
    pub fn advance(&mut self, next: QueryState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            warn!(query_id = %self.id, from = %self.state, to = %next, "rejected query transition");
            return Err(RagError::InvalidTransition { from: self.state, to: next });
        }
        debug!(query_id = %self.id, from = %self.state, to = %next, "query transition");
        self.state = next;
        Ok(())
    }

    /// Move to [`QueryState::Errored`] unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            debug!(query_id = %self.id, from = %self.state, "query errored");
            self.state = QueryState::Errored;
        }
    }
}

impl Default for QueryLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
