use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Procedure Commands
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcedureCommand {
    CheckIn {
        staff: Uuid,
        time: Option<DateTime<Utc>>,
    },
    CheckOut {
        time: Option<DateTime<Utc>>,
    },
    RevertCheckIn,
    Cancel,
    Discontinue,
    StartStep {
        step_id: Uuid,
        performer: Uuid,
        time: Option<DateTime<Utc>>,
    },
    SuspendStep {
        step_id: Uuid,
        time: Option<DateTime<Utc>>,
    },
    ResumeStep {
        step_id: Uuid,
        time: Option<DateTime<Utc>>,
    },
    CompleteStep {
        step_id: Uuid,
        performer: Option<Uuid>,
        time: Option<DateTime<Utc>>,
    },
    DiscontinueStep {
        step_id: Uuid,
        time: Option<DateTime<Utc>>,
    },
    ReassignStep {
        step_id: Uuid,
        performer: Uuid,
    },
}
