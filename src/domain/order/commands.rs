use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::practitioner::ExternalPractitioner;
use crate::domain::procedure::{Facility, Procedure, ProcedureCommand};
use super::value_objects::{CancelInfo, OrderAttachment, OrderNote, OrderPriority, ResultRecipient, Visit};

// ============================================================================
// Order Commands
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderCommand {
    AddProcedure(Box<Procedure>),
    RemoveProcedure {
        procedure_id: Uuid,
    },
    Cancel(CancelInfo),
    Discontinue(CancelInfo),
    CancelOrDiscontinue(CancelInfo),
    AddNote(OrderNote),
    AddAttachment(OrderAttachment),
    LinkProcedureStep {
        source_procedure: Uuid,
        source_step: Uuid,
        target_procedure: Uuid,
        target_step: Uuid,
    },
    /// Routed to one procedure through `Order::with_procedure`.
    Procedure {
        procedure_id: Uuid,
        command: ProcedureCommand,
    },
}

// ============================================================================
// Factory Arguments
// ============================================================================

/// Input to `Order::new_order`. Missing required fields are rejected there.
#[derive(Debug, Clone, Default)]
pub struct OrderCreationArgs {
    pub accession_number: Option<String>,
    pub patient_id: Option<Uuid>,
    pub visit: Option<Visit>,
    pub ordering_facility: Option<Facility>,
    pub ordering_practitioner: Option<ExternalPractitioner>,
    pub diagnostic_service: Option<String>,
    pub reason_for_study: Option<String>,
    pub priority: OrderPriority,
    pub procedures: Vec<Procedure>,
    pub result_recipients: Vec<ResultRecipient>,
}

impl OrderCreationArgs {
    pub fn new(accession_number: impl Into<String>, patient_id: Uuid) -> Self {
        Self {
            accession_number: Some(accession_number.into()),
            patient_id: Some(patient_id),
            ..Self::default()
        }
    }

    pub fn ordered_by(mut self, practitioner: ExternalPractitioner, facility: Facility) -> Self {
        self.ordering_practitioner = Some(practitioner);
        self.ordering_facility = Some(facility);
        self
    }

    pub fn for_service(mut self, diagnostic_service: impl Into<String>) -> Self {
        self.diagnostic_service = Some(diagnostic_service.into());
        self
    }

    pub fn with_visit(mut self, visit: Visit) -> Self {
        self.visit = Some(visit);
        self
    }

    pub fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn with_recipient(mut self, recipient: ResultRecipient) -> Self {
        self.result_recipients.push(recipient);
        self
    }
}
