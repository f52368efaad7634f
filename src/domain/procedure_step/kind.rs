use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::value_objects::ArtifactKind;

// ============================================================================
// Procedure Step Kinds
// ============================================================================
//
// One enum instead of a class per step. Each kind answers a fixed set of
// capability questions through `capabilities()`.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureStepKind {
    Registration,
    Modality,
    ProtocolAssignment,
    Interpretation,
    Transcription,
    Verification,
    Publication,
}

/// How a step's scheduled time follows the procedure's scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingOffset {
    /// Scheduled once, at the step's own creation time.
    AtCreation,
    /// Not driven by procedure scheduling at all.
    Independent,
    /// Procedure start (truncated to the minute) plus this offset.
    Offset(TimeDelta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCapabilities {
    pub name: &'static str,
    pub is_pre_step: bool,
    pub scheduling_offset: SchedulingOffset,
    pub create_in_downtime_mode: bool,
    /// Artifact this kind links through, if linking is supported.
    pub link_target: Option<ArtifactKind>,
}

impl ProcedureStepKind {
    pub fn capabilities(&self) -> StepCapabilities {
        use ProcedureStepKind::*;
        match self {
            Registration => StepCapabilities {
                name: "Registration",
                is_pre_step: true,
                scheduling_offset: SchedulingOffset::Offset(TimeDelta::zero()),
                create_in_downtime_mode: true,
                link_target: None,
            },
            Modality => StepCapabilities {
                name: "Modality",
                is_pre_step: false,
                scheduling_offset: SchedulingOffset::Offset(TimeDelta::zero()),
                create_in_downtime_mode: true,
                link_target: None,
            },
            ProtocolAssignment => StepCapabilities {
                name: "Protocol Assignment",
                is_pre_step: true,
                scheduling_offset: SchedulingOffset::AtCreation,
                create_in_downtime_mode: false,
                link_target: Some(ArtifactKind::Protocol),
            },
            Interpretation => StepCapabilities {
                name: "Interpretation",
                is_pre_step: false,
                scheduling_offset: SchedulingOffset::Independent,
                create_in_downtime_mode: false,
                link_target: Some(ArtifactKind::Report),
            },
            Transcription => reporting("Transcription"),
            Verification => reporting("Verification"),
            Publication => reporting("Publication"),
        }
    }

    pub fn is_pre_step(&self) -> bool {
        self.capabilities().is_pre_step
    }

    /// Artifact family the kind shares with its siblings.
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        match self {
            ProcedureStepKind::ProtocolAssignment => Some(ArtifactKind::Protocol),
            kind if kind.reporting_rank().is_some() => Some(ArtifactKind::Report),
            _ => None,
        }
    }

    /// Position in the report chain: interpretation, transcription, verification, publication.
    pub fn reporting_rank(&self) -> Option<u8> {
        match self {
            ProcedureStepKind::Interpretation => Some(0),
            ProcedureStepKind::Transcription => Some(1),
            ProcedureStepKind::Verification => Some(2),
            ProcedureStepKind::Publication => Some(3),
            _ => None,
        }
    }
}

fn reporting(name: &'static str) -> StepCapabilities {
    StepCapabilities {
        name,
        is_pre_step: false,
        scheduling_offset: SchedulingOffset::Independent,
        create_in_downtime_mode: false,
        link_target: None,
    }
}
