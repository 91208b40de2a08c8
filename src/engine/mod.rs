// Position lifecycle: tick orchestration, reconciliation, status surface
pub mod position_machine;
pub mod reconcile;
pub mod status;

pub use position_machine::{EngineParts, EngineSettings, PositionStateMachine, TickOutcome, Transition};
pub use reconcile::ReconcileAction;
pub use status::{PositionStatus, StatusSnapshot};

use serde::Serialize;
use std::fmt;

use crate::models::BotState;

/// Lifecycle phase derived from `BotState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionPhase {
    #[default]
    Flat,
    PendingEntry,
    Open,
}

impl PositionPhase {
    pub fn of(state: &BotState) -> Self {
        if state.has_position() {
            PositionPhase::Open
        } else if state.pending_confirmation() {
            PositionPhase::PendingEntry
        } else {
            PositionPhase::Flat
        }
    }
}

impl fmt::Display for PositionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PositionPhase::Flat => "FLAT",
            PositionPhase::PendingEntry => "PENDING_ENTRY",
            PositionPhase::Open => "OPEN",
        };
        f.write_str(label)
    }
}
