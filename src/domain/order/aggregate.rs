use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::{Result, WorkflowError};
use crate::domain::events::WorkflowEvent;
use crate::domain::procedure::{Facility, Procedure, ProcedureStatus};
use crate::domain::procedure_step::ProcedureStep;
use crate::domain::scheduling::{max_value, min_value, shift};
use crate::events::Aggregate;
use super::commands::{OrderCommand, OrderCreationArgs};
use super::value_objects::{
    CancelInfo, MergeInfo, OrderAttachment, OrderNote, OrderPriority, OrderStatus, ResultRecipient, Visit,
};

// ============================================================================
// Order Aggregate - Top-Level State Machine
// ============================================================================
//
// Owns its procedures. Status and scheduled times are inferred from them
// after every change made through `with_procedure`, and are only set
// directly by the terminal commands (cancel, discontinue, merge, unmerge).
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub accession_number: String,
    pub patient_id: Uuid,
    pub visit: Option<Visit>,

    // Ordering details
    pub ordering_facility: Facility,
    pub ordering_practitioner_id: Uuid,
    pub diagnostic_service: String,
    pub reason_for_study: Option<String>,
    pub priority: OrderPriority,
    pub entered_time: DateTime<Utc>,

    // Derived state
    pub(crate) status: OrderStatus,
    scheduled_start_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,

    // Children
    pub(crate) procedures: Vec<Procedure>,
    pub(crate) result_recipients: Vec<ResultRecipient>,
    pub(crate) notes: Vec<OrderNote>,
    pub(crate) attachments: Vec<OrderAttachment>,

    // Merge & cancel bookkeeping
    pub(crate) merge_info: Option<MergeInfo>,
    pub(crate) merge_source_orders: Vec<Uuid>,
    pub(crate) cancel_info: Option<CancelInfo>,

    #[serde(skip)]
    pending_events: Vec<WorkflowEvent>,
}

impl Order {
    /// Creates an order with its procedures attached. Required fields are enforced here.
    pub fn new_order(args: OrderCreationArgs) -> Result<Self> {
        let accession_number = args
            .accession_number
            .filter(|a| !a.trim().is_empty())
            .ok_or(WorkflowError::MissingField("accession_number"))?;
        let patient_id = args.patient_id.ok_or(WorkflowError::MissingField("patient_id"))?;
        let ordering_facility = args
            .ordering_facility
            .ok_or(WorkflowError::MissingField("ordering_facility"))?;
        let practitioner = args
            .ordering_practitioner
            .ok_or(WorkflowError::MissingField("ordering_practitioner"))?;
        let diagnostic_service = args
            .diagnostic_service
            .ok_or(WorkflowError::MissingField("diagnostic_service"))?;
        if args.procedures.is_empty() {
            return Err(WorkflowError::MissingField("procedures"));
        }

        let mut order = Order {
            id: Uuid::new_v4(),
            accession_number,
            patient_id,
            visit: args.visit,
            ordering_facility,
            ordering_practitioner_id: practitioner.id,
            diagnostic_service,
            reason_for_study: args.reason_for_study,
            priority: args.priority,
            entered_time: Utc::now(),
            status: OrderStatus::Scheduled,
            scheduled_start_time: None,
            start_time: None,
            end_time: None,
            procedures: Vec::new(),
            result_recipients: Vec::new(),
            notes: Vec::new(),
            attachments: Vec::new(),
            merge_info: None,
            merge_source_orders: Vec::new(),
            cancel_info: None,
            pending_events: Vec::new(),
        };

        for procedure in args.procedures {
            order.add_procedure(procedure)?;
        }

        for recipient in args.result_recipients {
            order.add_result_recipient(recipient);
        }

        // the ordering practitioner always receives results
        let has_ordering_practitioner = order
            .result_recipients
            .iter()
            .any(|r| r.practitioner_id == practitioner.id);
        if !has_ordering_practitioner {
            match practitioner.preferred_contact_point(&order.ordering_facility.information_authority) {
                Some(cp) => {
                    order.add_result_recipient(ResultRecipient {
                        practitioner_id: practitioner.id,
                        contact_point_id: cp.id,
                    });
                }
                None => tracing::warn!(
                    practitioner_id = %practitioner.id,
                    "ordering practitioner has no contact point"
                ),
            }
        }

        tracing::info!(
            order_id = %order.id,
            accession_number = %order.accession_number,
            procedures = order.procedures.len(),
            "order created"
        );
        order.raise(WorkflowEvent::order_created(order.id));
        Ok(order)
    }

    /// Fresh scheduled order carrying `source`'s ordering details, with no procedures yet.
    pub(crate) fn replacement_for(source: &Order, accession_number: String) -> Order {
        Order {
            id: Uuid::new_v4(),
            accession_number,
            patient_id: source.patient_id,
            visit: source.visit.clone(),
            ordering_facility: source.ordering_facility.clone(),
            ordering_practitioner_id: source.ordering_practitioner_id,
            diagnostic_service: source.diagnostic_service.clone(),
            reason_for_study: source.reason_for_study.clone(),
            priority: source.priority,
            entered_time: Utc::now(),
            status: OrderStatus::Scheduled,
            scheduled_start_time: None,
            start_time: None,
            end_time: None,
            procedures: Vec::new(),
            result_recipients: source.result_recipients.clone(),
            notes: Vec::new(),
            attachments: Vec::new(),
            merge_info: None,
            merge_source_orders: Vec::new(),
            cancel_info: None,
            pending_events: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }

    pub fn scheduled_start_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_start_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    pub fn procedure(&self, procedure_id: Uuid) -> Result<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.id == procedure_id)
            .ok_or_else(|| WorkflowError::not_found("procedure", procedure_id))
    }

    pub fn result_recipients(&self) -> &[ResultRecipient] {
        &self.result_recipients
    }

    pub fn notes(&self) -> &[OrderNote] {
        &self.notes
    }

    pub fn attachments(&self) -> &[OrderAttachment] {
        &self.attachments
    }

    pub fn merge_info(&self) -> Option<&MergeInfo> {
        self.merge_info.as_ref()
    }

    pub fn merge_source_orders(&self) -> &[Uuid] {
        &self.merge_source_orders
    }

    pub fn cancel_info(&self) -> Option<&CancelInfo> {
        self.cancel_info.as_ref()
    }

    pub fn is_downtime_recovery_mode(&self) -> bool {
        self.procedures.iter().any(|p| p.is_downtime_recovery_mode())
    }

    pub fn are_all_active_procedures_performed(&self) -> bool {
        self.procedures
            .iter()
            .filter(|p| !p.is_defunct())
            .all(|p| p.is_performed())
    }

    // ========================================================================
    // Procedure Membership
    // ========================================================================

    pub(crate) fn can_add_procedure(&self, procedure: &Procedure) -> Result<()> {
        if procedure.status() != ProcedureStatus::Scheduled {
            return Err(WorkflowError::violation(
                "Only procedures in the SC status may be added to an order",
            ));
        }
        if procedure.order_id() == Some(self.id) || self.procedures.iter().any(|p| p.id == procedure.id) {
            return Err(WorkflowError::violation("This procedure is already part of this order"));
        }
        if self.is_terminated() {
            return Err(WorkflowError::violation(format!(
                "Cannot add procedure to order with status {}",
                self.status
            )));
        }
        Ok(())
    }

    pub fn add_procedure(&mut self, mut procedure: Procedure) -> Result<()> {
        self.can_add_procedure(&procedure)?;

        procedure.set_order(Some(self.id));
        self.procedures.push(procedure);
        self.update_scheduling();
        Ok(())
    }

    /// Detaches a scheduled procedure. `Ok(None)` when it is not on this order.
    /// The last live procedure cannot be removed.
    pub fn remove_procedure(&mut self, procedure_id: Uuid) -> Result<Option<Procedure>> {
        let Some(idx) = self.procedures.iter().position(|p| p.id == procedure_id) else {
            return Ok(None);
        };
        if self.procedures[idx].status() != ProcedureStatus::Scheduled {
            return Err(WorkflowError::violation(
                "Only procedures in the SC status can be removed from an order",
            ));
        }
        if self.live_procedure_count() <= 1 {
            return Err(WorkflowError::violation("An order must have at least one procedure"));
        }

        let mut procedure = self.procedures.remove(idx);
        procedure.set_order(None);
        self.pending_events.extend(procedure.drain_events());
        self.update_scheduling();
        Ok(Some(procedure))
    }

    /// Procedures that are not ghosts.
    pub fn live_procedure_count(&self) -> usize {
        self.procedures.iter().filter(|p| !p.is_ghost()).count()
    }

    /// Ghosts skip the membership rules; they only ever arrive through merge or unmerge.
    pub(crate) fn attach_ghost(&mut self, mut ghost: Procedure) {
        ghost.set_order(Some(self.id));
        self.procedures.push(ghost);
    }

    fn procedure_index(&self, procedure_id: Uuid) -> Result<usize> {
        self.procedures
            .iter()
            .position(|p| p.id == procedure_id)
            .ok_or_else(|| WorkflowError::not_found("procedure", procedure_id))
    }

    /// Runs `f` against one procedure, then propagates its scheduling and status.
    pub fn with_procedure<R>(
        &mut self,
        procedure_id: Uuid,
        f: impl FnOnce(&mut Procedure) -> Result<R>,
    ) -> Result<R> {
        let idx = self.procedure_index(procedure_id)?;
        let before_status = self.procedures[idx].status();
        let before_scheduled = self.procedures[idx].scheduled_start_time();

        let result = f(&mut self.procedures[idx]);

        let procedure = &mut self.procedures[idx];
        let status = procedure.status();
        let scheduled = procedure.scheduled_start_time();
        let events = procedure.drain_events();

        if scheduled != before_scheduled {
            self.update_scheduling();
        }
        if status != before_status {
            self.update_status();
        }

        for event in events {
            if let WorkflowEvent::ReportPublished(published) = &event {
                if let Some(report_id) = published.report_id {
                    self.complete_linked_procedures(report_id, published.procedure_id);
                }
            }
            self.raise(event);
        }
        result
    }

    /// Completes in-progress procedures that were linked into a published report.
    fn complete_linked_procedures(&mut self, report_id: Uuid, published_by: Uuid) {
        let time = self
            .procedures
            .iter()
            .find(|p| p.id == published_by)
            .and_then(|p| p.end_time())
            .unwrap_or_else(Utc::now);

        let mut completed = Vec::new();
        for procedure in self.procedures.iter_mut().filter(|p| {
            p.id != published_by && p.status() == ProcedureStatus::InProgress && p.reports().contains(&report_id)
        }) {
            match procedure.complete(time) {
                Ok(()) => completed.push(procedure.id),
                Err(e) => tracing::warn!(procedure_id = %procedure.id, error = %e, "linked procedure not completed"),
            }
        }

        if !completed.is_empty() {
            tracing::info!(order_id = %self.id, report_id = %report_id, linked = completed.len(), "linked procedures completed");
            self.update_status();
        }
    }

    // ========================================================================
    // Inference
    // ========================================================================

    pub(crate) fn update_scheduling(&mut self) {
        self.scheduled_start_time = min_value(&self.procedures, |p| !p.is_ghost(), |p| p.scheduled_start_time());
    }

    /// Infers status from the procedures. Never moves a terminated order.
    /// Ghosts take no part in the inference.
    pub(crate) fn update_status(&mut self) {
        let live: Vec<ProcedureStatus> = self
            .procedures
            .iter()
            .filter(|p| !p.is_ghost())
            .map(|p| p.status())
            .collect();
        if live.is_empty() {
            return;
        }

        if !self.is_terminated() {
            if live.iter().all(|s| *s == ProcedureStatus::Cancelled) {
                self.set_status(OrderStatus::Cancelled);
            } else if live
                .iter()
                .all(|s| matches!(s, ProcedureStatus::Cancelled | ProcedureStatus::Discontinued))
            {
                self.set_status(OrderStatus::Discontinued);
            } else if live.iter().all(|s| s.is_terminated()) {
                self.set_status(OrderStatus::Completed);
            }
        }

        if self.status == OrderStatus::Scheduled
            && live
                .iter()
                .any(|s| matches!(s, ProcedureStatus::InProgress | ProcedureStatus::Completed))
        {
            self.set_status(OrderStatus::InProgress);
        }
    }

    pub(crate) fn set_status(&mut self, status: OrderStatus) {
        if self.status == status {
            return;
        }

        tracing::debug!(order_id = %self.id, from = %self.status, to = %status, "order status change");
        self.status = status;

        if status == OrderStatus::InProgress {
            self.start_time = min_value(&self.procedures, |p| !p.is_ghost(), |p| p.start_time());
        }
        if status.is_terminated() {
            self.update_end_time();
        }
    }

    pub(crate) fn update_end_time(&mut self) {
        self.end_time = max_value(&self.procedures, |p| !p.is_ghost(), |p| p.end_time());
    }

    // ========================================================================
    // Terminal Commands
    // ========================================================================

    pub fn cancel(&mut self, cancel_info: CancelInfo) -> Result<()> {
        if self.status != OrderStatus::Scheduled {
            return Err(WorkflowError::violation("Only orders in the SC status can be cancelled"));
        }

        let replaced = cancel_info.replacement_order_id.is_some();
        self.cancel_info = Some(cancel_info);

        for procedure in self.procedures.iter_mut().filter(|p| p.status() == ProcedureStatus::Scheduled) {
            procedure.cancel()?;
            self.pending_events.extend(procedure.drain_events());
        }
        self.update_status();

        if replaced {
            self.set_status(OrderStatus::Replaced);
        } else if !self.is_terminated() {
            self.set_status(OrderStatus::Cancelled);
        }
        self.update_end_time();

        tracing::info!(order_id = %self.id, status = %self.status, "order cancelled");
        self.raise(WorkflowEvent::order_cancelled(self.id));
        Ok(())
    }

    pub fn discontinue(&mut self, cancel_info: CancelInfo) -> Result<()> {
        if self.status != OrderStatus::InProgress {
            return Err(WorkflowError::violation("Only orders in the IP status can be discontinued"));
        }

        self.cancel_info = Some(cancel_info);
        // status first, so procedure changes do not re-infer it
        self.set_status(OrderStatus::Discontinued);

        for procedure in self.procedures.iter_mut().filter(|p| !p.is_terminated()) {
            if procedure.status() == ProcedureStatus::Scheduled {
                procedure.cancel()?;
            } else {
                procedure.discontinue()?;
            }
            self.pending_events.extend(procedure.drain_events());
        }
        self.update_end_time();

        tracing::info!(order_id = %self.id, "order discontinued");
        self.raise(WorkflowEvent::order_cancelled(self.id));
        Ok(())
    }

    /// Cancels a scheduled order or discontinues an in-progress one.
    pub fn cancel_or_discontinue(&mut self, cancel_info: CancelInfo) -> Result<()> {
        match self.status {
            OrderStatus::Scheduled => self.cancel(cancel_info),
            OrderStatus::InProgress => self.discontinue(cancel_info),
            status => Err(WorkflowError::violation(format!(
                "Orders in the {} status cannot be cancelled or discontinued",
                status
            ))),
        }
    }

    // ========================================================================
    // Recipients, Notes, Attachments
    // ========================================================================

    /// Adds a recipient unless its contact point is already present.
    pub fn add_result_recipient(&mut self, recipient: ResultRecipient) -> bool {
        if self
            .result_recipients
            .iter()
            .any(|r| r.contact_point_id == recipient.contact_point_id)
        {
            return false;
        }
        self.result_recipients.push(recipient);
        true
    }

    pub fn add_note(&mut self, note: OrderNote) -> Result<()> {
        if note.order_id != self.id {
            return Err(WorkflowError::violation("Note belongs to another order"));
        }
        self.notes.push(note);
        Ok(())
    }

    pub fn add_attachment(&mut self, attachment: OrderAttachment) {
        self.attachments.push(attachment);
    }

    // ========================================================================
    // Linking & History
    // ========================================================================

    /// Links a step to a step of another procedure on this order. Returns the shared artifact.
    pub fn link_procedure_step(
        &mut self,
        source_procedure: Uuid,
        source_step: Uuid,
        target_procedure: Uuid,
        target_step: Uuid,
    ) -> Result<Uuid> {
        let target = self.procedure(target_procedure)?.step(target_step)?.clone();
        let artifact = self.with_procedure(source_procedure, |p| p.link_step_to(source_step, &target))?;

        tracing::info!(
            order_id = %self.id,
            source_step = %source_step,
            target_step = %target_step,
            "procedure step linked"
        );
        Ok(artifact)
    }

    fn step_owner(&self, step_id: Uuid) -> Option<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.steps().iter().any(|s| s.id == step_id))
    }

    /// Steps of a procedure plus, transitively, the related steps reached through links.
    pub fn workflow_history(&self, procedure_id: Uuid) -> Result<Vec<&ProcedureStep>> {
        let procedure = self.procedure(procedure_id)?;
        let mut history: Vec<&ProcedureStep> = procedure.steps().iter().collect();
        let mut seen: HashSet<Uuid> = history.iter().map(|s| s.id).collect();
        let mut frontier: Vec<Uuid> = history.iter().filter_map(|s| s.link_step()).collect();

        while let Some(linked_id) = frontier.pop() {
            let Some(owner) = self.step_owner(linked_id) else {
                continue;
            };
            for step in owner.related_steps(linked_id)? {
                if seen.insert(step.id) {
                    history.push(step);
                    frontier.extend(step.link_step());
                }
            }
        }
        Ok(history)
    }

    // ========================================================================
    // Events & Utilities
    // ========================================================================

    pub(crate) fn raise(&mut self, event: WorkflowEvent) {
        self.pending_events.push(event);
    }

    fn drain_events(&mut self) -> Vec<WorkflowEvent> {
        let mut events = std::mem::take(&mut self.pending_events);
        for procedure in &mut self.procedures {
            events.extend(procedure.drain_events());
        }
        events
    }

    /// Shifts every time on the order and its procedures. Used to back-date demo data.
    pub fn time_shift(&mut self, minutes: i64) {
        self.entered_time = shift(Some(self.entered_time), minutes).unwrap_or(self.entered_time);
        self.scheduled_start_time = shift(self.scheduled_start_time, minutes);
        self.start_time = shift(self.start_time, minutes);
        self.end_time = shift(self.end_time, minutes);
        for procedure in &mut self.procedures {
            procedure.time_shift(minutes);
        }
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = WorkflowEvent;
    type Error = WorkflowError;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn handle_command(&mut self, command: Self::Command) -> Result<()> {
        match command {
            OrderCommand::AddProcedure(procedure) => {
                let procedure_id = procedure.id;
                self.add_procedure(*procedure)?;
                self.raise(WorkflowEvent::procedure_created(Some(self.id), procedure_id));
                self.raise(WorkflowEvent::order_modified(self.id));
                Ok(())
            }
            OrderCommand::RemoveProcedure { procedure_id } => {
                if self.remove_procedure(procedure_id)?.is_some() {
                    self.raise(WorkflowEvent::procedure_cancelled(Some(self.id), procedure_id));
                    self.raise(WorkflowEvent::order_modified(self.id));
                }
                Ok(())
            }
            OrderCommand::Cancel(info) => self.cancel(info),
            OrderCommand::Discontinue(info) => self.discontinue(info),
            OrderCommand::CancelOrDiscontinue(info) => self.cancel_or_discontinue(info),
            OrderCommand::AddNote(note) => self.add_note(note),
            OrderCommand::AddAttachment(attachment) => {
                self.add_attachment(attachment);
                Ok(())
            }
            OrderCommand::LinkProcedureStep { source_procedure, source_step, target_procedure, target_step } => {
                self.link_procedure_step(source_procedure, source_step, target_procedure, target_step)
                    .map(|_| ())
            }
            OrderCommand::Procedure { procedure_id, command } => {
                self.with_procedure(procedure_id, |p| p.handle_command(command))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::procedure::ProcedureCommand;
    use crate::domain::procedure_step::{ProcedureStepKind, StepState};
    use crate::test_support::{ct_procedure, order_args, order_with, plans, practitioner, scheduled_procedure};
    use chrono::TimeDelta;

    fn first_modality(order: &Order, procedure_id: Uuid) -> Uuid {
        order
            .procedure(procedure_id)
            .unwrap()
            .steps_of_kind(ProcedureStepKind::Modality)
            .next()
            .unwrap()
            .id
    }

    fn procedure_ids(order: &Order) -> Vec<Uuid> {
        order.procedures().iter().map(|p| p.id).collect()
    }

    fn start_procedure(order: &mut Order, procedure_id: Uuid) {
        let step = first_modality(order, procedure_id);
        order
            .with_procedure(procedure_id, |p| p.start_step(step, Uuid::new_v4(), None))
            .unwrap();
    }

    #[test]
    fn test_new_order_requires_fields() {
        let missing_procedures = Order::new_order(order_args("A1", Uuid::new_v4(), vec![]));
        assert!(matches!(missing_procedures.unwrap_err(), WorkflowError::MissingField("procedures")));

        let mut args = order_args("A1", Uuid::new_v4(), vec![scheduled_procedure()]);
        args.diagnostic_service = None;
        assert!(matches!(
            Order::new_order(args).unwrap_err(),
            WorkflowError::MissingField("diagnostic_service")
        ));

        let blank = order_args("  ", Uuid::new_v4(), vec![scheduled_procedure()]);
        assert!(matches!(
            Order::new_order(blank).unwrap_err(),
            WorkflowError::MissingField("accession_number")
        ));
    }

    #[test]
    fn test_new_order_attaches_procedures_and_recipient() {
        let order = order_with("A1", Uuid::new_v4(), 2);

        assert_eq!(order.status(), OrderStatus::Scheduled);
        assert_eq!(order.procedures().len(), 2);
        assert!(order.procedures().iter().all(|p| p.order_id() == Some(order.id)));
        assert_eq!(order.result_recipients().len(), 1);
        assert_eq!(order.result_recipients()[0].practitioner_id, order.ordering_practitioner_id);
        assert!(order.scheduled_start_time().is_some());
    }

    #[test]
    fn test_new_order_raises_created_event() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let events = order.take_events();
        assert!(matches!(events.first(), Some(WorkflowEvent::OrderCreated(e)) if e.order_id == order.id));
        assert!(order.take_events().is_empty());
    }

    #[test]
    fn test_add_procedure_rules() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let existing = order.procedures()[0].clone();
        assert!(order.add_procedure(existing).is_err());

        let mut cancelled = scheduled_procedure();
        cancelled.cancel().unwrap();
        assert!(order.add_procedure(cancelled).is_err());

        order.add_procedure(ct_procedure()).unwrap();
        assert_eq!(order.procedures().len(), 2);
    }

    #[test]
    fn test_add_procedure_to_terminated_order_fails() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        order.cancel(CancelInfo::new("entered in error")).unwrap();
        let result = order.add_procedure(scheduled_procedure());
        assert!(matches!(result.unwrap_err(), WorkflowError::Violation(_)));
    }

    #[test]
    fn test_add_procedure_updates_scheduling() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let mut earlier = ct_procedure();
        let start = Utc::now() - TimeDelta::days(1);
        earlier.schedule(Some(start), 30, &plans()).unwrap();
        let expected = earlier.scheduled_start_time();

        order.add_procedure(earlier).unwrap();

        assert_eq!(order.scheduled_start_time(), expected);
    }

    #[test]
    fn test_remove_procedure() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);

        let removed = order.remove_procedure(ids[0]).unwrap().unwrap();
        assert_eq!(removed.order_id(), None);
        assert_eq!(order.procedures().len(), 1);
        assert!(order.remove_procedure(Uuid::new_v4()).unwrap().is_none());

        start_procedure(&mut order, ids[1]);
        assert!(order.remove_procedure(ids[1]).is_err());
    }

    #[test]
    fn test_last_procedure_cannot_be_removed() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let only = order.procedures()[0].id;

        let result = order.remove_procedure(only);

        assert!(matches!(result.unwrap_err(), WorkflowError::Violation(_)));
        assert_eq!(order.procedures().len(), 1);
        assert_eq!(order.procedures()[0].order_id(), Some(order.id));

        order.cancel(CancelInfo::new("entered in error")).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_cancelling_procedures_one_by_one() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);

        order.with_procedure(ids[0], |p| p.cancel()).unwrap();
        assert_eq!(order.status(), OrderStatus::Scheduled);

        order.with_procedure(ids[1], |p| p.cancel()).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);

        let expected = order.procedures().iter().filter_map(|p| p.end_time()).max();
        assert_eq!(order.end_time(), expected);
    }

    #[test]
    fn test_starting_procedure_starts_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);

        start_procedure(&mut order, ids[0]);

        assert_eq!(order.status(), OrderStatus::InProgress);
        assert_eq!(order.start_time(), order.procedure(ids[0]).unwrap().start_time());
    }

    #[test]
    fn test_pre_step_does_not_start_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let id = order.procedures()[0].id;
        order.with_procedure(id, |p| p.check_in(Uuid::new_v4(), None)).unwrap();
        assert_eq!(order.status(), OrderStatus::Scheduled);
        assert_eq!(order.procedure(id).unwrap().status(), ProcedureStatus::Scheduled);
    }

    #[test]
    fn test_mixed_terminal_procedures_complete_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);

        order.with_procedure(ids[0], |p| p.cancel()).unwrap();
        start_procedure(&mut order, ids[1]);
        assert_eq!(order.status(), OrderStatus::InProgress);

        order.with_procedure(ids[1], |p| p.complete(Utc::now())).unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.end_time().is_some());
    }

    #[test]
    fn test_cancelled_and_discontinued_procedures_discontinue_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);

        order.with_procedure(ids[0], |p| p.cancel()).unwrap();
        start_procedure(&mut order, ids[1]);
        order.with_procedure(ids[1], |p| p.discontinue()).unwrap();

        // already IP, so the inference chain lands on DC
        assert_eq!(order.status(), OrderStatus::Discontinued);
    }

    #[test]
    fn test_terminated_order_is_not_regressed() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);
        start_procedure(&mut order, ids[0]);
        order.discontinue(CancelInfo::new("patient left")).unwrap();
        assert_eq!(order.status(), OrderStatus::Discontinued);

        order.update_status();
        assert_eq!(order.status(), OrderStatus::Discontinued);
        let result = order.with_procedure(ids[1], |p| p.cancel());
        assert!(result.is_err());
        assert_eq!(order.status(), OrderStatus::Discontinued);
    }

    #[test]
    fn test_cancel_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        order.cancel(CancelInfo::new("entered in error")).unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(order.procedures().iter().all(|p| p.status() == ProcedureStatus::Cancelled));
        assert_eq!(order.cancel_info().unwrap().reason, "entered in error");
        assert!(order.end_time().is_some());

        let events = order.take_events();
        let cancelled = events.iter().filter(|e| matches!(e, WorkflowEvent::ProcedureCancelled(_))).count();
        assert_eq!(cancelled, 2);
        assert!(matches!(events.last(), Some(WorkflowEvent::OrderCancelled(_))));
    }

    #[test]
    fn test_cancel_with_replacement_sets_replaced() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let replacement = Uuid::new_v4();
        order.cancel(CancelInfo::new("replaced").replaced_by(replacement)).unwrap();
        assert_eq!(order.status(), OrderStatus::Replaced);
        assert_eq!(order.cancel_info().unwrap().replacement_order_id, Some(replacement));
    }

    #[test]
    fn test_cancel_requires_scheduled_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let id = order.procedures()[0].id;
        start_procedure(&mut order, id);
        let result = order.cancel(CancelInfo::new("too late"));
        assert!(matches!(result.unwrap_err(), WorkflowError::Violation(_)));
        assert!(order.cancel_info().is_none());
    }

    #[test]
    fn test_discontinue_order() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);
        start_procedure(&mut order, ids[0]);

        order.discontinue(CancelInfo::new("patient left")).unwrap();

        assert_eq!(order.status(), OrderStatus::Discontinued);
        assert_eq!(order.procedure(ids[0]).unwrap().status(), ProcedureStatus::Discontinued);
        assert_eq!(order.procedure(ids[1]).unwrap().status(), ProcedureStatus::Cancelled);
        assert!(order.end_time().is_some());
    }

    #[test]
    fn test_discontinue_requires_in_progress() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        assert!(order.discontinue(CancelInfo::new("x")).is_err());
    }

    #[test]
    fn test_cancel_or_discontinue() {
        let mut scheduled = order_with("A1", Uuid::new_v4(), 1);
        scheduled.cancel_or_discontinue(CancelInfo::new("x")).unwrap();
        assert_eq!(scheduled.status(), OrderStatus::Cancelled);

        let mut started = order_with("A2", Uuid::new_v4(), 1);
        let id = started.procedures()[0].id;
        start_procedure(&mut started, id);
        started.cancel_or_discontinue(CancelInfo::new("x")).unwrap();
        assert_eq!(started.status(), OrderStatus::Discontinued);

        assert!(started.cancel_or_discontinue(CancelInfo::new("x")).is_err());
    }

    #[test]
    fn test_order_in_progress_only_with_started_procedure() {
        let mut order = order_with("A1", Uuid::new_v4(), 3);
        let ids = procedure_ids(&order);

        order.with_procedure(ids[0], |p| p.cancel()).unwrap();
        assert_eq!(order.status(), OrderStatus::Scheduled);

        start_procedure(&mut order, ids[1]);
        assert_eq!(order.status(), OrderStatus::InProgress);
    }

    #[test]
    fn test_linked_procedure_completes_on_publication() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);
        let radiologist = Uuid::new_v4();

        for id in &ids {
            let step = first_modality(&order, *id);
            order
                .with_procedure(*id, |p| {
                    p.start_step(step, Uuid::new_v4(), None)?;
                    p.complete_step(step, None, None)
                })
                .unwrap();
        }

        let mut interpretations = Vec::new();
        for id in &ids {
            let step = ProcedureStep::new(*id, ProcedureStepKind::Interpretation);
            interpretations.push(step.id);
            order.with_procedure(*id, |p| p.add_procedure_step(step)).unwrap();
        }

        order
            .with_procedure(ids[0], |p| p.start_step(interpretations[0], radiologist, None))
            .unwrap();
        let report = order
            .link_procedure_step(ids[1], interpretations[1], ids[0], interpretations[0])
            .unwrap();

        let linked = order.procedure(ids[1]).unwrap();
        assert_eq!(linked.step(interpretations[1]).unwrap().state(), StepState::Discontinued);
        assert_eq!(linked.step(interpretations[1]).unwrap().link_step(), Some(interpretations[0]));
        assert!(linked.reports().contains(&report));

        let publication = order
            .with_procedure(ids[0], |p| {
                p.complete_step(interpretations[0], None, None)?;
                p.create_follow_on_step(interpretations[0], ProcedureStepKind::Publication)
            })
            .unwrap();
        order
            .with_procedure(ids[0], |p| p.complete_step(publication, Some(radiologist), None))
            .unwrap();

        assert_eq!(order.procedure(ids[0]).unwrap().status(), ProcedureStatus::Completed);
        assert_eq!(order.procedure(ids[1]).unwrap().status(), ProcedureStatus::Completed);
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.are_all_active_procedures_performed());
    }

    #[test]
    fn test_link_requires_scheduled_source() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);
        let source = first_modality(&order, ids[1]);
        let target = first_modality(&order, ids[0]);

        let result = order.link_procedure_step(ids[1], source, ids[0], target);

        assert!(matches!(result.unwrap_err(), WorkflowError::Violation(_)));
        assert_eq!(order.procedure(ids[1]).unwrap().step(source).unwrap().state(), StepState::Scheduled);
    }

    #[test]
    fn test_workflow_history_follows_links() {
        let mut order = order_with("A1", Uuid::new_v4(), 2);
        let ids = procedure_ids(&order);
        let radiologist = Uuid::new_v4();

        let target = ProcedureStep::new(ids[0], ProcedureStepKind::Interpretation);
        let target_id = target.id;
        order.with_procedure(ids[0], |p| p.add_procedure_step(target)).unwrap();
        order.with_procedure(ids[0], |p| p.start_step(target_id, radiologist, None)).unwrap();
        let transcription = order
            .with_procedure(ids[0], |p| p.create_follow_on_step(target_id, ProcedureStepKind::Transcription))
            .unwrap();

        let source = ProcedureStep::new(ids[1], ProcedureStepKind::Interpretation);
        let source_id = source.id;
        order.with_procedure(ids[1], |p| p.add_procedure_step(source)).unwrap();
        order.link_procedure_step(ids[1], source_id, ids[0], target_id).unwrap();

        let history: Vec<Uuid> = order.workflow_history(ids[1]).unwrap().iter().map(|s| s.id).collect();

        assert!(history.contains(&source_id));
        assert!(history.contains(&target_id));
        assert!(history.contains(&transcription));
        assert!(!history.contains(&first_modality(&order, ids[0])));
    }

    #[test]
    fn test_handle_command_routes_procedure_commands() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let id = order.procedures()[0].id;
        let step = first_modality(&order, id);

        order
            .handle_command(OrderCommand::Procedure {
                procedure_id: id,
                command: ProcedureCommand::StartStep { step_id: step, performer: Uuid::new_v4(), time: None },
            })
            .unwrap();

        assert_eq!(order.status(), OrderStatus::InProgress);
    }

    #[test]
    fn test_handle_command_add_procedure_raises_events() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        order.take_events();

        order.handle_command(OrderCommand::AddProcedure(Box::new(ct_procedure()))).unwrap();

        let names: Vec<&str> = order.take_events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["ProcedureCreated", "OrderModified"]);
    }

    #[test]
    fn test_add_note_checks_owner() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        assert!(order.add_note(OrderNote::new(Uuid::new_v4(), "General", "x")).is_err());
        order.add_note(OrderNote::new(order.id, "General", "x")).unwrap();
        assert_eq!(order.notes().len(), 1);
    }

    #[test]
    fn test_recipients_deduplicated_by_contact_point() {
        let doctor = practitioner("EAST");
        let cp = doctor.contact_points()[0].id;
        let args = order_args("A1", Uuid::new_v4(), vec![scheduled_procedure()])
            .with_recipient(ResultRecipient { practitioner_id: doctor.id, contact_point_id: cp })
            .with_recipient(ResultRecipient { practitioner_id: doctor.id, contact_point_id: cp });

        let order = Order::new_order(args).unwrap();

        // duplicate contact point dropped, ordering practitioner added
        assert_eq!(order.result_recipients().len(), 2);
    }

    #[test]
    fn test_time_shift_moves_order_and_children() {
        let mut order = order_with("A1", Uuid::new_v4(), 1);
        let before = order.scheduled_start_time().unwrap();
        order.time_shift(-120);
        assert_eq!(order.scheduled_start_time(), Some(before - TimeDelta::minutes(120)));
        assert_eq!(order.procedures()[0].scheduled_start_time(), Some(before - TimeDelta::minutes(120)));
    }
}
