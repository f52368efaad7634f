use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{Result, WorkflowError};
use crate::domain::scheduling::shift;
use super::kind::ProcedureStepKind;
use super::value_objects::{StepScheduling, StepState};

// ============================================================================
// Procedure Step - Leaf State Machine
// ============================================================================
//
// A step never reaches its procedure directly. Procedure::with_step wraps
// every mutation and propagates status and scheduling afterwards.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub id: Uuid,
    kind: ProcedureStepKind,
    procedure_id: Uuid,
    state: StepState,

    creation_time: DateTime<Utc>,
    last_state_change_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,

    scheduling: StepScheduling,
    performer: Option<Uuid>,

    /// Step this one was discontinued in favour of.
    link_step: Option<Uuid>,
    /// Report or protocol shared with related steps.
    artifact: Option<Uuid>,

    pub modality: Option<String>,
}

impl ProcedureStep {
    pub fn new(procedure_id: Uuid, kind: ProcedureStepKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            procedure_id,
            state: StepState::Scheduled,
            creation_time: now,
            last_state_change_time: now,
            start_time: None,
            end_time: None,
            scheduling: StepScheduling::default(),
            performer: None,
            link_step: None,
            artifact: None,
            modality: None,
        }
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Uuid) -> Self {
        self.artifact = Some(artifact);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn kind(&self) -> ProcedureStepKind {
        self.kind
    }

    pub fn procedure_id(&self) -> Uuid {
        self.procedure_id
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn is_pre_step(&self) -> bool {
        self.kind.is_pre_step()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminated()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn last_state_change_time(&self) -> DateTime<Utc> {
        self.last_state_change_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn scheduling(&self) -> &StepScheduling {
        &self.scheduling
    }

    pub fn performer(&self) -> Option<Uuid> {
        self.performer
    }

    pub fn link_step(&self) -> Option<Uuid> {
        self.link_step
    }

    pub fn artifact(&self) -> Option<Uuid> {
        self.artifact
    }

    pub(crate) fn set_artifact(&mut self, artifact: Uuid) {
        self.artifact = Some(artifact);
    }

    // ========================================================================
    // Scheduling (SC only)
    // ========================================================================

    pub fn schedule(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
        self.require_scheduled("scheduled")?;
        self.scheduling.start_time = start;
        self.scheduling.end_time = end;
        Ok(())
    }

    pub fn assign(&mut self, performer: Uuid) -> Result<()> {
        self.require_scheduled("assigned")?;
        self.scheduling.performer = Some(performer);
        Ok(())
    }

    fn require_scheduled(&self, action: &str) -> Result<()> {
        if self.state != StepState::Scheduled {
            return Err(WorkflowError::violation(format!(
                "Only procedure steps in the SC status can be {}",
                action
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Activity Transitions
    // ========================================================================

    /// SC to IP only. Suspended steps go back to IP through `resume`.
    pub fn start(&mut self, performer: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        if self.state != StepState::Scheduled {
            return Err(WorkflowError::IllegalStateTransition {
                from: self.state,
                to: StepState::InProgress,
            });
        }
        let time = time.unwrap_or_else(Utc::now);
        self.transition(StepState::InProgress, time)?;
        self.performer = Some(performer);
        self.start_time = Some(time);
        Ok(())
    }

    pub fn suspend(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        self.transition(StepState::Suspended, time.unwrap_or_else(Utc::now))
    }

    pub fn resume(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        if self.state != StepState::Suspended {
            return Err(WorkflowError::IllegalStateTransition {
                from: self.state,
                to: StepState::InProgress,
            });
        }
        self.transition(StepState::InProgress, time.unwrap_or_else(Utc::now))
    }

    /// Completes the step. A performer must be given unless one is already recorded.
    pub fn complete(&mut self, performer: Option<Uuid>, time: Option<DateTime<Utc>>) -> Result<()> {
        if !self.state.can_transition_to(StepState::Completed) {
            return Err(WorkflowError::IllegalStateTransition {
                from: self.state,
                to: StepState::Completed,
            });
        }
        match (performer, self.performer) {
            (None, None) => {
                return Err(WorkflowError::violation(
                    "A performer must be specified to complete this procedure step",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(WorkflowError::violation("Procedure step already has a performer"))
            }
            _ => {}
        }

        let time = time.unwrap_or_else(Utc::now);
        self.transition(StepState::Completed, time)?;
        if performer.is_some() {
            self.performer = performer;
        }
        self.end_time = Some(time);
        if self.start_time.is_none() {
            self.start_time = Some(time);
        }
        Ok(())
    }

    pub fn discontinue(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        let time = time.unwrap_or_else(Utc::now);
        self.transition(StepState::Discontinued, time)?;
        self.end_time = Some(time);
        Ok(())
    }

    fn transition(&mut self, to: StepState, time: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(WorkflowError::IllegalStateTransition { from: self.state, to });
        }

        tracing::debug!(
            step_id = %self.id,
            kind = ?self.kind,
            from = %self.state,
            to = %to,
            "procedure step state change"
        );

        self.state = to;
        self.last_state_change_time = time;
        Ok(())
    }

    // ========================================================================
    // Linking & Copies
    // ========================================================================

    /// Links this step to `target` and discontinues it. Returns the shared artifact.
    pub fn link_to(&mut self, target: &ProcedureStep) -> Result<Uuid> {
        if self.state != StepState::Scheduled {
            return Err(WorkflowError::violation(
                "Only procedure steps in the SC status can be linked",
            ));
        }
        if self.kind.capabilities().link_target.is_none() || target.kind != self.kind {
            return Err(WorkflowError::violation(format!(
                "Linking is not supported for {} steps",
                self.kind.capabilities().name
            )));
        }
        let artifact = target.artifact.ok_or_else(|| {
            WorkflowError::violation("Target procedure step has nothing to link into")
        })?;

        self.link_step = Some(target.id);
        self.artifact = Some(artifact);
        self.discontinue(None)?;
        Ok(artifact)
    }

    /// Fresh scheduled step of the same kind carrying this step's window.
    pub fn scheduled_copy(&self) -> ProcedureStep {
        let mut copy = ProcedureStep::new(self.procedure_id, self.kind);
        copy.modality = self.modality.clone();
        copy.artifact = self.artifact;
        copy.scheduling.start_time = self.scheduling.start_time;
        copy.scheduling.end_time = self.scheduling.end_time;
        copy
    }

    /// Next step in the report chain, sharing this step's report.
    pub fn follow_on(&self, kind: ProcedureStepKind) -> Result<ProcedureStep> {
        let later = match (self.kind.reporting_rank(), kind.reporting_rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        };
        if !later {
            return Err(WorkflowError::violation(format!(
                "{:?} cannot follow {:?}",
                kind, self.kind
            )));
        }
        let report = self.artifact.ok_or_else(|| {
            WorkflowError::violation("Procedure step has no report to follow on from")
        })?;

        Ok(ProcedureStep::new(self.procedure_id, kind).with_artifact(report))
    }

    /// Sibling on the same procedure sharing this step's report or protocol.
    pub fn is_related_step(&self, other: &ProcedureStep) -> bool {
        if other.id == self.id {
            return true;
        }
        self.procedure_id == other.procedure_id
            && self.kind.artifact_kind().is_some()
            && self.kind.artifact_kind() == other.kind.artifact_kind()
            && self.artifact.is_some()
            && self.artifact == other.artifact
    }

    pub fn time_shift(&mut self, minutes: i64) {
        self.creation_time = shift(Some(self.creation_time), minutes).unwrap_or(self.creation_time);
        self.last_state_change_time =
            shift(Some(self.last_state_change_time), minutes).unwrap_or(self.last_state_change_time);
        self.start_time = shift(self.start_time, minutes);
        self.end_time = shift(self.end_time, minutes);
        self.scheduling.start_time = shift(self.scheduling.start_time, minutes);
        self.scheduling.end_time = shift(self.scheduling.end_time, minutes);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
