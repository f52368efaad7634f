use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{Result, WorkflowError};
use crate::domain::events::{ReportPublished, WorkflowEvent};
use crate::domain::procedure_step::{
    ArtifactKind, ProcedureStep, ProcedureStepKind, SchedulingOffset, StepScheduling, StepState,
};
use crate::domain::scheduling::{max_value, min_value, shift, truncate_to_minute};
use crate::events::Aggregate;
use super::commands::ProcedureCommand;
use super::plan::PlanProvider;
use super::value_objects::{Facility, ProcedureCheckIn, ProcedureStatus, ProcedureType};

// ============================================================================
// Procedure - Mid-Level State Machine
// ============================================================================
//
// Status is inferred from the steps after every step mutation. Steps are
// only reachable mutably through `with_step` and the wrappers built on it,
// so the procedure is consistent again before any call returns.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    // Identity
    pub id: Uuid,
    pub number: String,
    pub procedure_type: ProcedureType,
    pub performing_facility: Facility,
    pub performing_department: Option<String>,
    pub(crate) order_id: Option<Uuid>,

    // Derived state
    status: ProcedureStatus,
    scheduled_start_time: Option<DateTime<Utc>>,
    scheduled_duration: i64,
    scheduled_end_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,

    // Children
    steps: Vec<ProcedureStep>,
    check_in: ProcedureCheckIn,
    reports: Vec<Uuid>,
    protocols: Vec<Uuid>,

    ghost_of: Option<Uuid>,
    downtime_recovery_mode: bool,

    #[serde(skip)]
    pending_events: Vec<WorkflowEvent>,
}

impl Procedure {
    pub fn new(procedure_type: ProcedureType, number: impl Into<String>, performing_facility: Facility) -> Self {
        let scheduled_duration = procedure_type.default_duration;
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            procedure_type,
            performing_facility,
            performing_department: None,
            order_id: None,
            status: ProcedureStatus::Scheduled,
            scheduled_start_time: None,
            scheduled_duration,
            scheduled_end_time: None,
            start_time: None,
            end_time: None,
            steps: Vec::new(),
            check_in: ProcedureCheckIn::default(),
            reports: Vec::new(),
            protocols: Vec::new(),
            ghost_of: None,
            downtime_recovery_mode: false,
            pending_events: Vec::new(),
        }
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.performing_department = Some(department.into());
        self
    }

    pub fn with_downtime_recovery(mut self, enabled: bool) -> Self {
        self.downtime_recovery_mode = enabled;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn order_id(&self) -> Option<Uuid> {
        self.order_id
    }

    pub fn status(&self) -> ProcedureStatus {
        self.status
    }

    pub fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }

    pub fn is_defunct(&self) -> bool {
        self.status.is_defunct()
    }

    pub fn is_ghost(&self) -> bool {
        self.status == ProcedureStatus::Ghost
    }

    pub fn scheduled_start_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_start_time
    }

    /// Minutes.
    pub fn scheduled_duration(&self) -> i64 {
        self.scheduled_duration
    }

    pub fn scheduled_end_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_end_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn steps(&self) -> &[ProcedureStep] {
        &self.steps
    }

    pub fn step(&self, step_id: Uuid) -> Result<&ProcedureStep> {
        self.steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| WorkflowError::not_found("procedure step", step_id))
    }

    pub fn steps_of_kind(&self, kind: ProcedureStepKind) -> impl Iterator<Item = &ProcedureStep> {
        self.steps.iter().filter(move |s| s.kind() == kind)
    }

    pub fn check_in_record(&self) -> &ProcedureCheckIn {
        &self.check_in
    }

    pub fn is_pre_check_in(&self) -> bool {
        self.check_in.is_pre_check_in()
    }

    pub fn is_checked_in(&self) -> bool {
        self.check_in.is_checked_in()
    }

    pub fn is_checked_out(&self) -> bool {
        self.check_in.is_checked_out()
    }

    pub fn reports(&self) -> &[Uuid] {
        &self.reports
    }

    pub fn protocols(&self) -> &[Uuid] {
        &self.protocols
    }

    pub fn ghost_of(&self) -> Option<Uuid> {
        self.ghost_of
    }

    pub fn is_downtime_recovery_mode(&self) -> bool {
        self.downtime_recovery_mode
    }

    /// Latest end time among completed modality steps.
    pub fn performed_time(&self) -> Option<DateTime<Utc>> {
        max_value(
            &self.steps,
            |s| s.kind() == ProcedureStepKind::Modality && s.state() == StepState::Completed,
            |s| s.end_time(),
        )
    }

    /// All modality steps terminated and at least one of them completed.
    pub fn is_performed(&self) -> bool {
        let mut modality = self.steps_of_kind(ProcedureStepKind::Modality).peekable();
        modality.peek().is_some()
            && self.steps_of_kind(ProcedureStepKind::Modality).all(|s| s.is_terminated())
            && self
                .steps_of_kind(ProcedureStepKind::Modality)
                .any(|s| s.state() == StepState::Completed)
    }

    /// Steps on this procedure related to `step_id` through a shared artifact.
    pub fn related_steps(&self, step_id: Uuid) -> Result<Vec<&ProcedureStep>> {
        let step = self.step(step_id)?;
        Ok(self.steps.iter().filter(|s| step.is_related_step(s)).collect())
    }

    pub(crate) fn set_order(&mut self, order_id: Option<Uuid>) {
        self.order_id = order_id;
    }

    pub(crate) fn drain_events(&mut self) -> Vec<WorkflowEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn raise(&mut self, event: WorkflowEvent) {
        self.pending_events.push(event);
    }

    // ========================================================================
    // Step Mutation & Propagation
    // ========================================================================

    fn step_index(&self, step_id: Uuid) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| WorkflowError::not_found("procedure step", step_id))
    }

    /// Runs `f` against one step, then propagates its status and scheduling.
    pub fn with_step<R>(
        &mut self,
        step_id: Uuid,
        f: impl FnOnce(&mut ProcedureStep) -> Result<R>,
    ) -> Result<R> {
        let idx = self.step_index(step_id)?;
        self.with_step_at(idx, f)
    }

    fn with_step_at<R>(&mut self, idx: usize, f: impl FnOnce(&mut ProcedureStep) -> Result<R>) -> Result<R> {
        let before_state = self.steps[idx].state();
        let before_scheduling = self.steps[idx].scheduling().clone();

        let result = f(&mut self.steps[idx]);

        self.after_step_change(idx, before_state, &before_scheduling);
        result
    }

    fn after_step_change(&mut self, idx: usize, before_state: StepState, before_scheduling: &StepScheduling) {
        let step = &self.steps[idx];
        let state = step.state();
        let is_pre_step = step.is_pre_step();
        let kind = step.kind();
        let end_time = step.end_time();
        let artifact = step.artifact();
        let scheduling_changed = step.scheduling() != before_scheduling;

        if scheduling_changed {
            self.update_scheduling();
        }

        if state != before_state {
            if !is_pre_step {
                self.update_status();
            }
            if kind == ProcedureStepKind::Publication && state == StepState::Completed {
                self.publish_report(artifact, end_time.unwrap_or_else(Utc::now));
            }
        }
    }

    fn publish_report(&mut self, report_id: Option<Uuid>, time: DateTime<Utc>) {
        if self.status == ProcedureStatus::InProgress {
            self.mark_completed(time);
        }

        tracing::info!(procedure_id = %self.id, report_id = ?report_id, "report published");
        self.raise(WorkflowEvent::ReportPublished(ReportPublished {
            procedure_id: self.id,
            report_id,
        }));
    }

    pub(crate) fn update_scheduling(&mut self) {
        self.scheduled_start_time = min_value(
            &self.steps,
            |s| !s.is_pre_step(),
            |s| s.scheduling().start_time,
        );
    }

    /// Infers status from the steps. Only the two deterministic cases apply.
    pub(crate) fn update_status(&mut self) {
        if matches!(self.status, ProcedureStatus::Scheduled | ProcedureStatus::InProgress) {
            let all_modality_discontinued = {
                let mut modality = self.steps_of_kind(ProcedureStepKind::Modality).peekable();
                modality.peek().is_some() && modality.all(|s| s.state() == StepState::Discontinued)
            };

            if all_modality_discontinued {
                self.set_status(ProcedureStatus::Discontinued);
            }
        }

        if self.status == ProcedureStatus::Scheduled {
            let any_started = self.steps.iter().any(|s| {
                !s.is_pre_step() && !s.state().is_initial() && s.state() != StepState::Discontinued
            });

            if any_started {
                self.set_status(ProcedureStatus::InProgress);
            }
        }
    }

    fn set_status(&mut self, status: ProcedureStatus) {
        if self.status == status {
            return;
        }

        tracing::debug!(
            procedure_id = %self.id,
            from = %self.status,
            to = %status,
            "procedure status change"
        );
        self.status = status;

        if status == ProcedureStatus::InProgress {
            self.update_start_time();
        }
        if status.is_terminated() {
            self.update_end_time();
        }
        if matches!(status, ProcedureStatus::Cancelled | ProcedureStatus::Discontinued) {
            self.downtime_recovery_mode = false;
        }
    }

    fn update_start_time(&mut self) {
        self.start_time = min_value(&self.steps, |s| !s.is_pre_step(), |s| s.start_time());
    }

    fn update_end_time(&mut self) {
        self.end_time = max_value(&self.steps, |_| true, |s| s.end_time());
    }

    // ========================================================================
    // Step Operations
    // ========================================================================

    /// Starts a step. Reporting and protocol steps open their artifact here.
    pub fn start_step(&mut self, step_id: Uuid, performer: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        let idx = self.step_index(step_id)?;
        self.with_step_at(idx, |s| s.start(performer, time))?;
        self.ensure_artifact(idx);
        Ok(())
    }

    pub fn suspend_step(&mut self, step_id: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        self.with_step(step_id, |s| s.suspend(time))
    }

    pub fn resume_step(&mut self, step_id: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        self.with_step(step_id, |s| s.resume(time))
    }

    pub fn complete_step(
        &mut self,
        step_id: Uuid,
        performer: Option<Uuid>,
        time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_step(step_id, |s| s.complete(performer, time))
    }

    pub fn discontinue_step(&mut self, step_id: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        self.with_step(step_id, |s| s.discontinue(time))
    }

    fn ensure_artifact(&mut self, idx: usize) {
        let step = &self.steps[idx];
        if step.artifact().is_some() {
            return;
        }
        let Some(kind) = step.kind().capabilities().link_target else {
            return;
        };

        let artifact = Uuid::new_v4();
        self.steps[idx].set_artifact(artifact);
        self.register_artifact(kind, artifact);
    }

    fn register_artifact(&mut self, kind: ArtifactKind, artifact: Uuid) {
        let list = match kind {
            ArtifactKind::Report => &mut self.reports,
            ArtifactKind::Protocol => &mut self.protocols,
        };
        if !list.contains(&artifact) {
            list.push(artifact);
        }
    }

    /// Adds a new scheduled step built for this procedure.
    pub fn add_procedure_step(&mut self, step: ProcedureStep) -> Result<()> {
        self.ensure_not_ghost()?;
        if step.procedure_id() != self.id {
            return Err(WorkflowError::violation("Procedure step belongs to another procedure"));
        }
        if step.state() != StepState::Scheduled {
            return Err(WorkflowError::violation(
                "Only procedure steps in the SC status can be added to a procedure",
            ));
        }
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(WorkflowError::violation("Procedure step is already part of this procedure"));
        }

        if let (Some(kind), Some(artifact)) = (step.kind().artifact_kind(), step.artifact()) {
            self.register_artifact(kind, artifact);
        }
        self.steps.push(step);
        self.update_scheduling();
        Ok(())
    }

    /// Adds the next report-chain step after `step_id`. Returns its id.
    pub fn create_follow_on_step(&mut self, step_id: Uuid, kind: ProcedureStepKind) -> Result<Uuid> {
        let follow_on = self.step(step_id)?.follow_on(kind)?;
        let id = follow_on.id;
        self.add_procedure_step(follow_on)?;
        Ok(id)
    }

    /// Reassigns a step. Active work goes to a fresh scheduled copy, whose id is returned.
    pub fn reassign_step(&mut self, step_id: Uuid, performer: Uuid) -> Result<Uuid> {
        let idx = self.step_index(step_id)?;
        let step = &self.steps[idx];

        if step.is_terminated() {
            return Err(WorkflowError::violation("Cannot reassign a terminated procedure step"));
        }
        if step.state() == StepState::Scheduled {
            self.with_step_at(idx, |s| s.assign(performer))?;
            return Ok(step_id);
        }

        let mut copy = step.scheduled_copy();
        copy.assign(performer)?;
        let copy_id = copy.id;

        // copy first, otherwise discontinuing the last modality step would discontinue the procedure
        self.add_procedure_step(copy)?;
        self.with_step_at(idx, |s| s.discontinue(None))?;

        tracing::info!(
            procedure_id = %self.id,
            step_id = %step_id,
            replacement_id = %copy_id,
            performer = %performer,
            "procedure step reassigned"
        );
        Ok(copy_id)
    }

    /// Links one of this procedure's steps to `target` and discontinues it.
    pub fn link_step_to(&mut self, step_id: Uuid, target: &ProcedureStep) -> Result<Uuid> {
        let idx = self.step_index(step_id)?;
        let artifact = self.with_step_at(idx, |s| s.link_to(target))?;

        if let Some(kind) = target.kind().capabilities().link_target {
            self.register_artifact(kind, artifact);
        }
        Ok(artifact)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedules every scheduled step from `start`, creating steps from the plan if needed.
    pub fn schedule(
        &mut self,
        start: Option<DateTime<Utc>>,
        duration: i64,
        plans: &dyn PlanProvider,
    ) -> Result<()> {
        if self.status != ProcedureStatus::Scheduled {
            return Err(WorkflowError::violation(
                "Only procedures in the SC status may be scheduled or re-scheduled",
            ));
        }

        if self.steps.is_empty() {
            self.create_procedure_steps(plans)?;
        }

        for step in self.steps.iter_mut().filter(|s| s.state() == StepState::Scheduled) {
            match step.kind().capabilities().scheduling_offset {
                SchedulingOffset::AtCreation => {
                    if step.scheduling().start_time.is_none() {
                        let created = step.creation_time();
                        step.schedule(Some(created), None)?;
                    }
                }
                SchedulingOffset::Independent => {}
                SchedulingOffset::Offset(offset) => {
                    let end = step.scheduling().end_time;
                    step.schedule(start.map(|t| truncate_to_minute(t) + offset), end)?;
                }
            }
        }
        self.update_scheduling();

        self.scheduled_duration = if duration > 0 { duration } else { self.compute_default_duration() };
        self.scheduled_end_time = self
            .scheduled_start_time
            .map(|t| t + TimeDelta::minutes(self.scheduled_duration));

        tracing::debug!(
            procedure_id = %self.id,
            scheduled_start = ?self.scheduled_start_time,
            duration = self.scheduled_duration,
            "procedure scheduled"
        );
        self.raise(WorkflowEvent::procedure_modified(self.order_id, self.id));
        Ok(())
    }

    /// Moves the schedule to `start`, keeping the current duration.
    pub fn reschedule(&mut self, start: Option<DateTime<Utc>>, plans: &dyn PlanProvider) -> Result<()> {
        self.schedule(start, self.scheduled_duration, plans)
    }

    fn compute_default_duration(&self) -> i64 {
        let Some(start) = self.scheduled_start_time else {
            return 0;
        };
        max_value(&self.steps, |_| true, |s| s.scheduling().end_time)
            .map(|end| (end - start).num_minutes())
            .unwrap_or(0)
    }

    /// Materialises steps from the plan. Downtime procedures only get downtime kinds.
    pub fn create_procedure_steps(&mut self, plans: &dyn PlanProvider) -> Result<()> {
        if !self.steps.is_empty() {
            return Err(WorkflowError::violation("Procedure steps have already been created"));
        }

        for plan_step in plans.plan_steps(&self.procedure_type)? {
            if self.downtime_recovery_mode && !plan_step.kind.capabilities().create_in_downtime_mode {
                continue;
            }
            let mut step = ProcedureStep::new(self.id, plan_step.kind);
            step.modality = plan_step.modality;
            self.steps.push(step);
        }

        tracing::debug!(
            procedure_id = %self.id,
            procedure_type = %self.procedure_type.id,
            steps = self.steps.len(),
            "procedure steps created"
        );
        Ok(())
    }

    // ========================================================================
    // Check-In
    // ========================================================================

    pub fn check_in(&mut self, staff: Uuid, time: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure_not_ghost()?;
        self.check_in.check_in(time)?;

        if let Some(idx) = self.registration_index() {
            if self.steps[idx].state() == StepState::Scheduled {
                self.with_step_at(idx, |s| s.start(staff, time))?;
            }
        }
        tracing::debug!(procedure_id = %self.id, "patient checked in");
        Ok(())
    }

    pub fn check_out(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure_not_ghost()?;
        self.check_in.check_out(time)?;

        if let Some(idx) = self.registration_index() {
            let step = &self.steps[idx];
            if !step.is_terminated() && step.performer().is_some() {
                self.with_step_at(idx, |s| s.complete(None, time))?;
            }
        }
        tracing::debug!(procedure_id = %self.id, "patient checked out");
        Ok(())
    }

    pub fn revert_check_in(&mut self) -> Result<()> {
        self.ensure_not_ghost()?;
        self.check_in.revert_check_in()
    }

    fn ensure_not_ghost(&self) -> Result<()> {
        if self.is_ghost() {
            return Err(WorkflowError::violation("Ghost procedures cannot be modified"));
        }
        Ok(())
    }

    fn registration_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.kind() == ProcedureStepKind::Registration)
    }

    // ========================================================================
    // Terminal Commands
    // ========================================================================

    pub fn cancel(&mut self) -> Result<()> {
        if self.status != ProcedureStatus::Scheduled {
            return Err(WorkflowError::violation("Only procedures in the SC status can be cancelled"));
        }

        // status first, so the steps do not re-infer it
        self.set_status(ProcedureStatus::Cancelled);
        for step in self.steps.iter_mut().filter(|s| !s.is_terminated()) {
            step.discontinue(None)?;
        }
        self.update_end_time();

        tracing::info!(procedure_id = %self.id, "procedure cancelled");
        self.raise(WorkflowEvent::procedure_cancelled(self.order_id, self.id));
        Ok(())
    }

    pub fn discontinue(&mut self) -> Result<()> {
        if self.status != ProcedureStatus::InProgress {
            return Err(WorkflowError::violation(
                "Only procedures in the IP status can be discontinued",
            ));
        }

        self.set_status(ProcedureStatus::Discontinued);
        for step in self.steps.iter_mut().filter(|s| !s.is_terminated()) {
            step.discontinue(None)?;
        }
        self.update_end_time();

        tracing::info!(procedure_id = %self.id, "procedure discontinued");
        self.raise(WorkflowEvent::procedure_cancelled(self.order_id, self.id));
        Ok(())
    }

    /// Completes the procedure. `time` overrides the aggregated end time.
    pub fn complete(&mut self, time: DateTime<Utc>) -> Result<()> {
        if self.status != ProcedureStatus::InProgress {
            return Err(WorkflowError::violation("Only procedures in the IP status can be completed"));
        }
        self.mark_completed(time);
        Ok(())
    }

    fn mark_completed(&mut self, time: DateTime<Utc>) {
        self.set_status(ProcedureStatus::Completed);
        self.end_time = Some(time);
        tracing::info!(procedure_id = %self.id, end_time = %time, "procedure completed");
    }

    /// Inert placeholder left behind by a merge or unmerge.
    pub fn create_ghost_copy(&self) -> Procedure {
        Procedure {
            id: Uuid::new_v4(),
            number: self.number.clone(),
            procedure_type: self.procedure_type.clone(),
            performing_facility: self.performing_facility.clone(),
            performing_department: self.performing_department.clone(),
            order_id: self.order_id,
            status: ProcedureStatus::Ghost,
            scheduled_start_time: self.scheduled_start_time,
            scheduled_duration: self.scheduled_duration,
            scheduled_end_time: self.scheduled_end_time,
            start_time: self.start_time,
            end_time: self.end_time,
            steps: Vec::new(),
            check_in: ProcedureCheckIn::default(),
            reports: Vec::new(),
            protocols: Vec::new(),
            ghost_of: Some(self.id),
            downtime_recovery_mode: self.downtime_recovery_mode,
            pending_events: Vec::new(),
        }
    }

    /// Shifts every time on the procedure. Used to back-date demo data.
    pub fn time_shift(&mut self, minutes: i64) {
        self.scheduled_start_time = shift(self.scheduled_start_time, minutes);
        self.scheduled_end_time = shift(self.scheduled_end_time, minutes);
        self.start_time = shift(self.start_time, minutes);
        self.end_time = shift(self.end_time, minutes);
        self.check_in.time_shift(minutes);
        for step in &mut self.steps {
            step.time_shift(minutes);
        }
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for Procedure {
    type Command = ProcedureCommand;
    type Event = WorkflowEvent;
    type Error = WorkflowError;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn handle_command(&mut self, command: Self::Command) -> Result<()> {
        match command {
            ProcedureCommand::CheckIn { staff, time } => self.check_in(staff, time),
            ProcedureCommand::CheckOut { time } => self.check_out(time),
            ProcedureCommand::RevertCheckIn => self.revert_check_in(),
            ProcedureCommand::Cancel => self.cancel(),
            ProcedureCommand::Discontinue => self.discontinue(),
            ProcedureCommand::StartStep { step_id, performer, time } => {
                self.start_step(step_id, performer, time)
            }
            ProcedureCommand::SuspendStep { step_id, time } => self.suspend_step(step_id, time),
            ProcedureCommand::ResumeStep { step_id, time } => self.resume_step(step_id, time),
            ProcedureCommand::CompleteStep { step_id, performer, time } => {
                self.complete_step(step_id, performer, time)
            }
            ProcedureCommand::DiscontinueStep { step_id, time } => self.discontinue_step(step_id, time),
            ProcedureCommand::ReassignStep { step_id, performer } => {
                self.reassign_step(step_id, performer).map(|_| ())
            }
        }
    }

    fn take_events(&mut self) -> Vec<Self::Event> {
        self.drain_events()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
