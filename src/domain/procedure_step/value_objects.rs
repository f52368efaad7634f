use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Procedure Step Value Objects
// ============================================================================

/// Activity state shared by every step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Scheduled,
    InProgress,
    Suspended,
    Completed,
    Discontinued,
}

impl StepState {
    pub fn code(&self) -> &'static str {
        match self {
            StepState::Scheduled => "SC",
            StepState::InProgress => "IP",
            StepState::Suspended => "SU",
            StepState::Completed => "CM",
            StepState::Discontinued => "DC",
        }
    }

    pub fn is_initial(&self) -> bool {
        *self == StepState::Scheduled
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Discontinued)
    }

    pub fn can_transition_to(&self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Scheduled, InProgress | Suspended | Completed | Discontinued)
                | (InProgress, Suspended | Completed | Discontinued)
                | (Suspended, InProgress | Completed | Discontinued)
        )
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Scheduled performer and window for a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepScheduling {
    pub performer: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Kind of downstream work item a step can be linked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Report,
    Protocol,
}
