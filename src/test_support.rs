// Factories shared by the unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::order::{Order, OrderCreationArgs};
use crate::domain::practitioner::{ContactPoint, ExternalPractitioner};
use crate::domain::procedure::{Facility, PlanRegistry, PlanStep, Procedure, ProcedurePlan, ProcedureType};
use crate::domain::procedure_step::ProcedureStepKind;

pub fn plans() -> PlanRegistry {
    PlanRegistry::new()
        .with_plan("BASE", ProcedurePlan::new(vec![PlanStep::new(ProcedureStepKind::Registration)]))
        .with_plan("CT-HEAD", ProcedurePlan::inheriting("BASE", vec![PlanStep::modality("CT")]))
        .with_plan(
            "CT-2",
            ProcedurePlan::inheriting("BASE", vec![PlanStep::modality("CT"), PlanStep::modality("CT")]),
        )
        .with_plan(
            "CT-PROTOCOL",
            ProcedurePlan::inheriting(
                "CT-HEAD",
                vec![
                    PlanStep::new(ProcedureStepKind::ProtocolAssignment),
                    PlanStep::new(ProcedureStepKind::Interpretation),
                ],
            ),
        )
}

pub fn procedure_of_type(type_id: &str) -> Procedure {
    Procedure::new(
        ProcedureType::new(type_id, format!("{type_id} exam"), 30),
        "1",
        Facility::new("MAIN", "HA1"),
    )
}

/// Unscheduled CT head procedure with no steps yet.
pub fn ct_procedure() -> Procedure {
    procedure_of_type("CT-HEAD")
}

/// CT head procedure scheduled now for 30 minutes, steps created.
pub fn scheduled_procedure() -> Procedure {
    let mut procedure = ct_procedure();
    procedure
        .schedule(Some(Utc::now()), 30, &plans())
        .expect("CT-HEAD plan schedules");
    procedure
}

pub fn practitioner(authority: &str) -> ExternalPractitioner {
    let mut practitioner = ExternalPractitioner::new("Referrer", "Rita");
    let contact_point = ContactPoint::new(practitioner.id, "Office").in_authority(authority);
    practitioner
        .add_contact_point(contact_point)
        .expect("own contact point");
    practitioner
}

pub fn order_args(accession_number: &str, patient_id: Uuid, procedures: Vec<Procedure>) -> OrderCreationArgs {
    let mut args = OrderCreationArgs::new(accession_number, patient_id)
        .ordered_by(practitioner("HA1"), Facility::new("MAIN", "HA1"))
        .for_service("CT Head");
    for procedure in procedures {
        args = args.with_procedure(procedure);
    }
    args
}

/// Scheduled order with `procedures` scheduled CT head procedures.
pub fn order_with(accession_number: &str, patient_id: Uuid, procedures: usize) -> Order {
    let procedures = (0..procedures).map(|_| scheduled_procedure()).collect();
    Order::new_order(order_args(accession_number, patient_id, procedures)).expect("valid order")
}
