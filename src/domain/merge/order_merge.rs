use chrono::Utc;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::domain::errors::{MergeRejection, Result};
use crate::domain::events::WorkflowEvent;
use crate::domain::order::{CancelInfo, MergeInfo, Order, OrderStatus};
use crate::domain::procedure::{Procedure, ProcedureStatus};

// ============================================================================
// Order Merge Engine
// ============================================================================
//
// Moves the procedures, notes and attachments of a source order onto a
// destination order, leaving ghosts behind so the source's history stays
// readable. Every precondition is checked before the first mutation.
//
// ============================================================================

/// Result of merging one source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub source_order_id: Uuid,
    pub destination_order_id: Uuid,
    pub moved_procedures: Vec<Uuid>,
    pub ghost_procedures: Vec<Uuid>,
}

/// Result of an unmerge. The replacement order is new and must be persisted by the caller.
#[derive(Debug, Clone)]
pub struct UnmergeOutcome {
    pub replacement: Order,
    pub reclaimed_procedures: Vec<Uuid>,
    /// Orders previously merged into the source. Point them at the replacement
    /// with [`redirect_merged_order`].
    pub redirected_orders: Vec<Uuid>,
}

/// Issues accession numbers for orders created by an unmerge.
pub trait AccessionNumberSource {
    fn next_accession_number(&mut self) -> String;
}

/// Prefix plus zero-padded counter, e.g. `RIS00000001`.
#[derive(Debug, Clone)]
pub struct SequentialAccessionNumbers {
    prefix: String,
    next: u64,
}

impl SequentialAccessionNumbers {
    pub fn new(prefix: impl Into<String>, start: u64) -> Self {
        Self { prefix: prefix.into(), next: start }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(config.accession_prefix.clone(), config.accession_start)
    }
}

impl AccessionNumberSource for SequentialAccessionNumbers {
    fn next_accession_number(&mut self) -> String {
        let number = format!("{}{:08}", self.prefix, self.next);
        self.next += 1;
        number
    }
}

pub struct MergeEngine {
    config: WorkflowConfig,
}

impl MergeEngine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    // ========================================================================
    // Merge
    // ========================================================================

    pub fn can_merge(&self, source: &Order, destination: &Order) -> std::result::Result<(), MergeRejection> {
        if source.id == destination.id {
            return Err(MergeRejection::SameOrder);
        }
        if source.accession_number == destination.accession_number {
            return Err(MergeRejection::SameAccessionNumber);
        }
        if source.status() != OrderStatus::Scheduled || destination.status() != OrderStatus::Scheduled {
            return Err(MergeRejection::AlreadyStarted);
        }
        if source.patient_id != destination.patient_id {
            return Err(MergeRejection::DifferentPatient);
        }
        if source.ordering_facility.information_authority != destination.ordering_facility.information_authority {
            return Err(MergeRejection::DifferentInformationAuthority);
        }
        if source.is_downtime_recovery_mode() || destination.is_downtime_recovery_mode() {
            return Err(MergeRejection::DowntimeRecovery);
        }
        // the destination only accepts scheduled procedures; ghosts stay behind
        if source
            .procedures()
            .iter()
            .any(|p| !p.is_ghost() && p.status() != ProcedureStatus::Scheduled)
        {
            return Err(MergeRejection::ProceduresNotScheduled);
        }
        Ok(())
    }

    /// Merges `source` into `destination`. On rejection neither order is touched.
    pub fn merge(&self, source: &mut Order, destination: &mut Order, merged_by: Option<Uuid>) -> Result<MergeOutcome> {
        if let Err(rejection) = self.can_merge(source, destination) {
            tracing::warn!(
                source_order_id = %source.id,
                destination_order_id = %destination.id,
                reason = %rejection,
                "order merge rejected"
            );
            return Err(rejection.into());
        }

        for recipient in source.result_recipients.clone() {
            destination.add_result_recipient(recipient);
        }

        let (ghost_attachments, attachments): (Vec<_>, Vec<_>) =
            std::mem::take(&mut source.attachments).into_iter().partition(|a| a.is_ghost());
        source.attachments = ghost_attachments;
        for attachment in attachments {
            source.attachments.push(attachment.ghost_copy());
            destination.attachments.push(attachment);
        }

        let (ghost_notes, notes): (Vec<_>, Vec<_>) =
            std::mem::take(&mut source.notes).into_iter().partition(|n| n.is_ghost());
        source.notes = ghost_notes;
        for mut note in notes {
            source.notes.push(note.ghost_copy());
            note.order_id = destination.id;
            destination.notes.push(note);
        }

        let (earlier_ghosts, live): (Vec<Procedure>, Vec<Procedure>) =
            std::mem::take(&mut source.procedures).into_iter().partition(|p| p.is_ghost());
        source.procedures = earlier_ghosts;
        let ghosts: Vec<Procedure> = live.iter().map(Procedure::create_ghost_copy).collect();
        let moved_procedures: Vec<Uuid> = live.iter().map(|p| p.id).collect();
        for procedure in live {
            destination.add_procedure(procedure)?;
        }

        let mut ghost_procedures = Vec::with_capacity(ghosts.len());
        for ghost in ghosts {
            let ghost_id = ghost.id;
            let original_id = ghost.ghost_of().unwrap_or(ghost_id);
            source.attach_ghost(ghost);
            source.raise(WorkflowEvent::procedure_cancelled(Some(source.id), ghost_id));
            destination.raise(WorkflowEvent::procedure_created(Some(destination.id), original_id));
            ghost_procedures.push(ghost_id);
        }

        source.merge_info = Some(MergeInfo {
            destination_order_id: destination.id,
            merged_by,
            merged_time: Utc::now(),
        });
        source.set_status(OrderStatus::Merged);
        destination.merge_source_orders.push(source.id);
        destination.raise(WorkflowEvent::order_modified(destination.id));

        tracing::info!(
            source_order_id = %source.id,
            destination_order_id = %destination.id,
            procedures = moved_procedures.len(),
            "orders merged"
        );

        Ok(MergeOutcome {
            source_order_id: source.id,
            destination_order_id: destination.id,
            moved_procedures,
            ghost_procedures,
        })
    }

    /// Merges several sources into one destination. All sources are validated
    /// before any is merged; `validate_only` stops after validation.
    pub fn merge_many(
        &self,
        sources: &mut [Order],
        destination: &mut Order,
        merged_by: Option<Uuid>,
        validate_only: bool,
    ) -> Result<Vec<MergeOutcome>> {
        for source in sources.iter() {
            self.can_merge(source, destination)?;
        }
        if validate_only {
            return Ok(Vec::new());
        }

        sources
            .iter_mut()
            .map(|source| self.merge(source, destination, merged_by))
            .collect()
    }

    // ========================================================================
    // Unmerge
    // ========================================================================

    pub fn can_unmerge(
        &self,
        source: &Order,
        destination: &Order,
        reason: &str,
    ) -> std::result::Result<(), MergeRejection> {
        if !self.config.unmerge_enabled {
            return Err(MergeRejection::NotSupported);
        }
        match source.merge_info() {
            Some(info) if source.status() == OrderStatus::Merged && info.destination_order_id == destination.id => {}
            _ => return Err(MergeRejection::NotMerged),
        }
        if destination.status() != OrderStatus::Scheduled {
            return Err(MergeRejection::DestinationStarted);
        }
        if destination
            .procedures()
            .iter()
            .any(|p| p.status() == ProcedureStatus::Cancelled)
        {
            return Err(MergeRejection::DestinationHasCancelledProcedures);
        }
        if reason.trim().is_empty() {
            return Err(MergeRejection::MissingReason);
        }
        if source.is_downtime_recovery_mode() || destination.is_downtime_recovery_mode() {
            return Err(MergeRejection::DowntimeRecovery);
        }

        let reclaimable = reclaimable_procedures(source);
        if destination
            .procedures()
            .iter()
            .any(|p| reclaimable.contains(&p.id) && p.status() != ProcedureStatus::Scheduled)
        {
            return Err(MergeRejection::ProceduresNotScheduled);
        }
        if !destination
            .procedures()
            .iter()
            .any(|p| !p.is_ghost() && !reclaimable.contains(&p.id))
        {
            return Err(MergeRejection::DestinationWouldBeEmpty);
        }
        Ok(())
    }

    /// Reverses a merge into a brand new order. The source becomes RP, pointing at the replacement.
    pub fn unmerge(
        &self,
        source: &mut Order,
        destination: &mut Order,
        reason: &str,
        cancelled_by: Option<Uuid>,
        accession_numbers: &mut dyn AccessionNumberSource,
    ) -> Result<UnmergeOutcome> {
        if let Err(rejection) = self.can_unmerge(source, destination, reason) {
            tracing::warn!(
                source_order_id = %source.id,
                destination_order_id = %destination.id,
                reason = %rejection,
                "order unmerge rejected"
            );
            return Err(rejection.into());
        }

        let mut replacement = Order::replacement_for(source, accession_numbers.next_accession_number());

        let mut reclaimed_procedures = Vec::new();
        for original_id in reclaimable_procedures(source) {
            let Some(procedure) = destination.remove_procedure(original_id)? else {
                continue;
            };
            let ghost = procedure.create_ghost_copy();
            let ghost_id = ghost.id;
            destination.attach_ghost(ghost);
            destination.raise(WorkflowEvent::procedure_cancelled(Some(destination.id), ghost_id));
            replacement.add_procedure(procedure)?;
            reclaimed_procedures.push(original_id);
        }

        let note_ids: Vec<Uuid> = source.notes.iter().filter_map(|n| n.ghost_of).collect();
        for note_id in note_ids {
            let Some(idx) = destination.notes.iter().position(|n| n.id == note_id) else {
                continue;
            };
            let mut note = destination.notes.remove(idx);
            destination.notes.push(note.ghost_copy());
            note.order_id = replacement.id;
            replacement.notes.push(note);
        }

        let attachment_ids: Vec<Uuid> = source.attachments.iter().filter_map(|a| a.ghost_of).collect();
        for attachment_id in attachment_ids {
            let Some(idx) = destination.attachments.iter().position(|a| a.id == attachment_id) else {
                continue;
            };
            let attachment = destination.attachments.remove(idx);
            destination.attachments.push(attachment.ghost_copy());
            replacement.attachments.push(attachment);
        }

        let redirected_orders = std::mem::take(&mut source.merge_source_orders);
        replacement.merge_source_orders = redirected_orders.clone();
        replacement.raise(WorkflowEvent::order_created(replacement.id));

        let mut cancel_info = CancelInfo::new(reason).replaced_by(replacement.id);
        cancel_info.cancelled_by = cancelled_by;
        source.cancel_info = Some(cancel_info);
        source.merge_info = None;
        source.set_status(OrderStatus::Replaced);
        source.end_time = Some(Utc::now());
        source.raise(WorkflowEvent::order_cancelled(source.id));

        destination.merge_source_orders.retain(|id| *id != source.id);
        destination.raise(WorkflowEvent::order_modified(destination.id));

        tracing::info!(
            source_order_id = %source.id,
            destination_order_id = %destination.id,
            replacement_order_id = %replacement.id,
            accession_number = %replacement.accession_number,
            procedures = reclaimed_procedures.len(),
            "order unmerged"
        );

        Ok(UnmergeOutcome {
            replacement,
            reclaimed_procedures,
            redirected_orders,
        })
    }
}

/// Points an order merged into an unmerged source at that source's replacement.
pub fn redirect_merged_order(order: &mut Order, new_destination: Uuid) -> bool {
    match order.merge_info.as_mut() {
        Some(info) if order.status == OrderStatus::Merged => {
            tracing::debug!(
                order_id = %order.id,
                from = %info.destination_order_id,
                to = %new_destination,
                "merged order redirected"
            );
            info.destination_order_id = new_destination;
            true
        }
        _ => false,
    }
}

fn reclaimable_procedures(source: &Order) -> Vec<Uuid> {
    source.procedures().iter().filter_map(|p| p.ghost_of()).collect()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::WorkflowError;
    use crate::domain::order::{OrderAttachment, OrderNote};
    use crate::domain::procedure_step::ProcedureStepKind;
    use crate::events::Aggregate;
    use crate::test_support::{order_with, plans, procedure_of_type};

    fn engine() -> MergeEngine {
        MergeEngine::new(WorkflowConfig::default())
    }

    fn unmerge_engine() -> MergeEngine {
        MergeEngine::new(WorkflowConfig::with_unmerge())
    }

    fn merged_pair() -> (Order, Order) {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 2);
        let mut destination = order_with("A2", patient, 1);
        source.add_note(OrderNote::new(source.id, "General", "bring prior films")).unwrap();
        source.add_attachment(OrderAttachment::new(Uuid::new_v4(), "Requisition"));
        engine().merge(&mut source, &mut destination, None).unwrap();
        (source, destination)
    }

    #[test]
    fn test_merge_moves_procedures_and_leaves_ghosts() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 2);
        let mut destination = order_with("A2", patient, 1);
        let source_procedures: Vec<Uuid> = source.procedures().iter().map(|p| p.id).collect();
        let staff = Uuid::new_v4();

        let outcome = engine().merge(&mut source, &mut destination, Some(staff)).unwrap();

        assert_eq!(outcome.moved_procedures, source_procedures);
        assert_eq!(source.status(), OrderStatus::Merged);
        assert_eq!(destination.status(), OrderStatus::Scheduled);
        assert_eq!(destination.procedures().len(), 3);
        for id in &source_procedures {
            assert_eq!(destination.procedure(*id).unwrap().order_id(), Some(destination.id));
        }

        assert_eq!(source.procedures().len(), 2);
        for ghost in source.procedures() {
            assert_eq!(ghost.status(), ProcedureStatus::Ghost);
            assert!(source_procedures.contains(&ghost.ghost_of().unwrap()));
            assert_eq!(ghost.order_id(), Some(source.id));
        }

        let info = source.merge_info().unwrap();
        assert_eq!(info.destination_order_id, destination.id);
        assert_eq!(info.merged_by, Some(staff));
        assert_eq!(destination.merge_source_orders(), &[source.id]);
    }

    #[test]
    fn test_merge_moves_notes_and_attachments() {
        let (source, destination) = merged_pair();

        assert_eq!(destination.notes().len(), 1);
        assert_eq!(destination.notes()[0].order_id, destination.id);
        assert_eq!(source.notes().len(), 1);
        assert_eq!(source.notes()[0].ghost_of, Some(destination.notes()[0].id));

        assert_eq!(destination.attachments().len(), 1);
        assert_eq!(source.attachments()[0].ghost_of, Some(destination.attachments()[0].id));
    }

    #[test]
    fn test_merge_unions_result_recipients() {
        let (source, destination) = merged_pair();
        for recipient in source.result_recipients() {
            assert!(destination.result_recipients().contains(recipient));
        }
    }

    #[test]
    fn test_merge_events() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 1);
        let mut destination = order_with("A2", patient, 1);
        source.take_events();
        destination.take_events();

        engine().merge(&mut source, &mut destination, None).unwrap();

        let source_events: Vec<&str> = source.take_events().iter().map(|e| e.name()).collect();
        assert_eq!(source_events, vec!["ProcedureCancelled"]);
        let destination_events: Vec<&str> = destination.take_events().iter().map(|e| e.name()).collect();
        assert_eq!(destination_events, vec!["ProcedureCreated", "OrderModified"]);
    }

    #[test]
    fn test_rejected_merge_leaves_orders_untouched() {
        let mut source = order_with("A1", Uuid::new_v4(), 2);
        let mut destination = order_with("A2", Uuid::new_v4(), 1);

        let result = engine().merge(&mut source, &mut destination, None);

        assert!(matches!(
            result.unwrap_err(),
            WorkflowError::MergeRejected(MergeRejection::DifferentPatient)
        ));
        assert_eq!(source.status(), OrderStatus::Scheduled);
        assert_eq!(source.procedures().len(), 2);
        assert!(source.procedures().iter().all(|p| p.ghost_of().is_none()));
        assert_eq!(destination.procedures().len(), 1);
        assert!(source.merge_info().is_none());
    }

    #[test]
    fn test_same_accession_merge_leaves_orders_untouched() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 2);
        let mut destination = order_with("A1", patient, 1);
        source.add_note(OrderNote::new(source.id, "General", "duplicate")).unwrap();

        let result = engine().merge(&mut source, &mut destination, None);

        assert!(matches!(
            result.unwrap_err(),
            WorkflowError::MergeRejected(MergeRejection::SameAccessionNumber)
        ));
        assert_eq!(source.status(), OrderStatus::Scheduled);
        assert_eq!(source.procedures().len(), 2);
        assert_eq!(source.notes().len(), 1);
        assert!(source.notes()[0].ghost_of.is_none());
        assert_eq!(destination.procedures().len(), 1);
        assert!(destination.notes().is_empty());
        assert!(destination.merge_source_orders().is_empty());
    }

    #[test]
    fn test_merge_with_unscheduled_procedures_leaves_orders_untouched() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 2);
        let mut destination = order_with("A2", patient, 1);
        let cancelled = source.procedures()[0].id;
        source.with_procedure(cancelled, |p| p.cancel()).unwrap();

        let result = engine().merge(&mut source, &mut destination, None);

        assert!(matches!(
            result.unwrap_err(),
            WorkflowError::MergeRejected(MergeRejection::ProceduresNotScheduled)
        ));
        assert_eq!(source.status(), OrderStatus::Scheduled);
        assert_eq!(source.procedures().len(), 2);
        assert_eq!(source.procedure(cancelled).unwrap().order_id(), Some(source.id));
        assert_eq!(destination.procedures().len(), 1);
        assert!(source.merge_info().is_none());
    }

    #[test]
    fn test_merge_preconditions() {
        let patient = Uuid::new_v4();
        let source = order_with("A1", patient, 1);

        assert_eq!(engine().can_merge(&source, &source), Err(MergeRejection::SameOrder));

        let same_accession = order_with("A1", patient, 1);
        assert_eq!(
            engine().can_merge(&source, &same_accession),
            Err(MergeRejection::SameAccessionNumber)
        );

        let mut other_authority = order_with("A3", patient, 1);
        other_authority.ordering_facility.information_authority = "OTHER".to_string();
        assert_eq!(
            engine().can_merge(&source, &other_authority),
            Err(MergeRejection::DifferentInformationAuthority)
        );
    }

    #[test]
    fn test_merge_requires_scheduled_orders() {
        let patient = Uuid::new_v4();
        let source = order_with("A1", patient, 1);
        let mut started = order_with("A2", patient, 1);
        let id = started.procedures()[0].id;
        let step = started.procedures()[0]
            .steps_of_kind(ProcedureStepKind::Modality)
            .next()
            .unwrap()
            .id;
        started
            .with_procedure(id, |p| p.start_step(step, Uuid::new_v4(), None))
            .unwrap();

        assert_eq!(engine().can_merge(&source, &started), Err(MergeRejection::AlreadyStarted));
        assert_eq!(engine().can_merge(&started, &source), Err(MergeRejection::AlreadyStarted));
    }

    #[test]
    fn test_merge_rejects_cancelled_source_procedures() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 2);
        let destination = order_with("A2", patient, 1);
        let id = source.procedures()[0].id;
        source.with_procedure(id, |p| p.cancel()).unwrap();

        assert_eq!(
            engine().can_merge(&source, &destination),
            Err(MergeRejection::ProceduresNotScheduled)
        );
    }

    #[test]
    fn test_merge_rejects_downtime_orders() {
        let patient = Uuid::new_v4();
        let mut source = order_with("A1", patient, 1);
        let destination = order_with("A2", patient, 1);
        let mut downtime = procedure_of_type("CT-HEAD").with_downtime_recovery(true);
        downtime.schedule(Some(Utc::now()), 30, &plans()).unwrap();
        source.add_procedure(downtime).unwrap();

        assert_eq!(engine().can_merge(&source, &destination), Err(MergeRejection::DowntimeRecovery));
    }

    #[test]
    fn test_merge_many_validates_everything_first() {
        let patient = Uuid::new_v4();
        let mut sources = vec![order_with("A1", patient, 1), order_with("A2", Uuid::new_v4(), 1)];
        let mut destination = order_with("A3", patient, 1);

        let result = engine().merge_many(&mut sources, &mut destination, None, false);

        assert!(result.is_err());
        assert!(sources.iter().all(|s| s.status() == OrderStatus::Scheduled));
        assert_eq!(destination.procedures().len(), 1);
    }

    #[test]
    fn test_merge_many() {
        let patient = Uuid::new_v4();
        let mut sources = vec![order_with("A1", patient, 1), order_with("A2", patient, 2)];
        let mut destination = order_with("A3", patient, 1);

        let validated = engine().merge_many(&mut sources, &mut destination, None, true).unwrap();
        assert!(validated.is_empty());
        assert_eq!(destination.procedures().len(), 1);

        let outcomes = engine().merge_many(&mut sources, &mut destination, None, false).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(destination.procedures().len(), 4);
        assert_eq!(destination.merge_source_orders().len(), 2);
    }

    #[test]
    fn test_unmerge_disabled_by_default() {
        let (mut source, mut destination) = merged_pair();
        let mut numbers = SequentialAccessionNumbers::new("T", 1);

        let result = engine().unmerge(&mut source, &mut destination, "wrong patient", None, &mut numbers);

        assert!(matches!(
            result.unwrap_err(),
            WorkflowError::MergeRejected(MergeRejection::NotSupported)
        ));
        assert_eq!(source.status(), OrderStatus::Merged);
    }

    #[test]
    fn test_unmerge_restores_into_replacement_order() {
        let (mut source, mut destination) = merged_pair();
        let reclaimable: Vec<Uuid> = source.procedures().iter().filter_map(|p| p.ghost_of()).collect();
        let mut numbers = SequentialAccessionNumbers::new("T", 7);

        let outcome = unmerge_engine()
            .unmerge(&mut source, &mut destination, "merged in error", None, &mut numbers)
            .unwrap();
        let replacement = outcome.replacement;

        assert_eq!(replacement.accession_number, "T00000007");
        assert_eq!(replacement.status(), OrderStatus::Scheduled);
        assert_eq!(replacement.patient_id, source.patient_id);
        assert_eq!(outcome.reclaimed_procedures, reclaimable);
        for id in &reclaimable {
            assert_eq!(replacement.procedure(*id).unwrap().order_id(), Some(replacement.id));
        }
        assert_eq!(replacement.notes().len(), 1);
        assert_eq!(replacement.notes()[0].order_id, replacement.id);
        assert_eq!(replacement.attachments().len(), 1);

        // destination keeps its own procedure plus fresh ghosts of the reclaimed ones
        let ghosts = destination.procedures().iter().filter(|p| p.status() == ProcedureStatus::Ghost).count();
        assert_eq!(ghosts, reclaimable.len());
        assert_eq!(destination.procedures().len(), 1 + reclaimable.len());
        assert!(destination.merge_source_orders().is_empty());

        assert_eq!(source.status(), OrderStatus::Replaced);
        assert!(source.merge_info().is_none());
        assert_eq!(source.cancel_info().unwrap().replacement_order_id, Some(replacement.id));
        assert!(source.end_time().is_some());
    }

    #[test]
    fn test_unmerge_preconditions() {
        let (source, destination) = merged_pair();
        let engine = unmerge_engine();

        assert_eq!(engine.can_unmerge(&source, &destination, "  "), Err(MergeRejection::MissingReason));
        assert_eq!(engine.can_unmerge(&destination, &source, "x"), Err(MergeRejection::NotMerged));

        let unrelated = order_with("A9", source.patient_id, 1);
        assert_eq!(engine.can_unmerge(&source, &unrelated, "x"), Err(MergeRejection::NotMerged));
        assert_eq!(engine.can_unmerge(&source, &destination, "x"), Ok(()));
    }

    #[test]
    fn test_unmerge_rejects_started_destination() {
        let (source, mut destination) = merged_pair();
        let procedure = destination.procedures()[0].id;
        let step = destination.procedures()[0]
            .steps_of_kind(ProcedureStepKind::Modality)
            .next()
            .unwrap()
            .id;
        destination
            .with_procedure(procedure, |p| p.start_step(step, Uuid::new_v4(), None))
            .unwrap();

        assert_eq!(
            unmerge_engine().can_unmerge(&source, &destination, "x"),
            Err(MergeRejection::DestinationStarted)
        );
    }

    #[test]
    fn test_unmerge_rejects_destination_with_cancelled_procedures() {
        let (source, mut destination) = merged_pair();
        let own = destination
            .procedures()
            .iter()
            .find(|p| p.ghost_of().is_none() && !source.procedures().iter().any(|g| g.ghost_of() == Some(p.id)))
            .unwrap()
            .id;
        destination.with_procedure(own, |p| p.cancel()).unwrap();

        assert_eq!(
            unmerge_engine().can_unmerge(&source, &destination, "x"),
            Err(MergeRejection::DestinationHasCancelledProcedures)
        );
    }

    #[test]
    fn test_redirect_merged_order() {
        let (mut source, _) = merged_pair();
        let new_destination = Uuid::new_v4();
        assert!(redirect_merged_order(&mut source, new_destination));
        assert_eq!(source.merge_info().unwrap().destination_order_id, new_destination);

        let mut scheduled = order_with("A5", Uuid::new_v4(), 1);
        assert!(!redirect_merged_order(&mut scheduled, new_destination));
    }

    #[test]
    fn test_unmerge_reports_orders_to_redirect() {
        let patient = Uuid::new_v4();
        let mut earlier = order_with("A0", patient, 1);
        let mut middle = order_with("A1", patient, 1);
        let mut last = order_with("A2", patient, 1);
        engine().merge(&mut earlier, &mut middle, None).unwrap();
        engine().merge(&mut middle, &mut last, None).unwrap();
        let mut numbers = SequentialAccessionNumbers::new("T", 1);

        let outcome = unmerge_engine()
            .unmerge(&mut middle, &mut last, "merged in error", None, &mut numbers)
            .unwrap();

        assert_eq!(outcome.redirected_orders, vec![earlier.id]);
        assert_eq!(outcome.replacement.merge_source_orders(), &[earlier.id]);
        assert!(middle.merge_source_orders().is_empty());
        assert_eq!(outcome.replacement.procedures().len(), 2);
        assert!(redirect_merged_order(&mut earlier, outcome.replacement.id));
        assert_eq!(earlier.merge_info().unwrap().destination_order_id, outcome.replacement.id);
    }

    fn unmerged_pair() -> (Order, Order, Order) {
        let (mut source, mut destination) = merged_pair();
        let mut numbers = SequentialAccessionNumbers::new("T", 1);
        let outcome = unmerge_engine()
            .unmerge(&mut source, &mut destination, "merged in error", None, &mut numbers)
            .unwrap();
        (source, destination, outcome.replacement)
    }

    #[test]
    fn test_destination_cancels_after_unmerge() {
        let (_, mut destination, _) = unmerged_pair();
        assert!(destination.procedures().iter().any(|p| p.is_ghost()));

        destination.cancel(CancelInfo::new("no longer required")).unwrap();

        assert_eq!(destination.status(), OrderStatus::Cancelled);
        assert!(destination
            .procedures()
            .iter()
            .all(|p| p.is_ghost() || p.status() == ProcedureStatus::Cancelled));
        assert!(destination.end_time().is_some());
    }

    #[test]
    fn test_destination_status_ignores_ghosts_after_unmerge() {
        let (_, mut destination, _) = unmerged_pair();
        let own = destination.procedures().iter().find(|p| !p.is_ghost()).unwrap().id;

        destination.with_procedure(own, |p| p.cancel()).unwrap();

        assert_eq!(destination.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_destination_progresses_after_unmerge() {
        let (_, mut destination, _) = unmerged_pair();
        let own = destination.procedures().iter().find(|p| !p.is_ghost()).unwrap().id;
        let step = destination
            .procedure(own)
            .unwrap()
            .steps_of_kind(ProcedureStepKind::Modality)
            .next()
            .unwrap()
            .id;
        let technologist = Uuid::new_v4();

        destination.with_procedure(own, |p| p.start_step(step, technologist, None)).unwrap();
        assert_eq!(destination.status(), OrderStatus::InProgress);

        destination.with_procedure(own, |p| p.discontinue()).unwrap();
        assert_eq!(destination.status(), OrderStatus::Discontinued);
    }

    #[test]
    fn test_order_with_ghosts_merges_only_live_procedures() {
        let (_, mut destination, mut replacement) = unmerged_pair();
        let own = destination.procedures().iter().find(|p| !p.is_ghost()).unwrap().id;
        let ghosts_before = destination.procedures().iter().filter(|p| p.is_ghost()).count();

        let outcome = engine().merge(&mut destination, &mut replacement, None).unwrap();

        assert_eq!(outcome.moved_procedures, vec![own]);
        assert_eq!(replacement.procedure(own).unwrap().order_id(), Some(replacement.id));
        assert!(replacement.procedures().iter().all(|p| !p.is_ghost()));
        assert_eq!(destination.procedures().len(), ghosts_before + 1);
        assert!(destination.procedures().iter().all(|p| p.is_ghost()));
    }

    #[test]
    fn test_unmerge_rejects_emptying_destination() {
        let (mut source, mut destination) = merged_pair();
        let own = destination
            .procedures()
            .iter()
            .find(|p| !source.procedures().iter().any(|g| g.ghost_of() == Some(p.id)))
            .unwrap()
            .id;
        destination.remove_procedure(own).unwrap();
        let mut numbers = SequentialAccessionNumbers::new("T", 1);

        let result = unmerge_engine().unmerge(&mut source, &mut destination, "merged in error", None, &mut numbers);

        assert!(matches!(
            result.unwrap_err(),
            WorkflowError::MergeRejected(MergeRejection::DestinationWouldBeEmpty)
        ));
        assert_eq!(source.status(), OrderStatus::Merged);
        assert_eq!(destination.procedures().len(), 2);
        assert!(destination.procedures().iter().all(|p| !p.is_ghost()));
    }

    #[test]
    fn test_sequential_accession_numbers() {
        let mut numbers = SequentialAccessionNumbers::from_config(&WorkflowConfig::default());
        assert_eq!(numbers.next_accession_number(), "RIS00000001");
        assert_eq!(numbers.next_accession_number(), "RIS00000002");
    }
}
