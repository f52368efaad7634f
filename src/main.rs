use anyhow::Context;
use chrono::{TimeDelta, Utc};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use ris_workflow::domain::merge::{
    merge_contact_points, merge_practitioners, MergeEngine, MergedContactPointSpec, MergedPractitionerSpec,
    SequentialAccessionNumbers,
};
use ris_workflow::domain::order::{Order, OrderCreationArgs, OrderNote};
use ris_workflow::domain::practitioner::{ContactPoint, ExternalPractitioner};
use ris_workflow::domain::procedure::{Facility, PlanRegistry, PlanStep, Procedure, ProcedurePlan, ProcedureType};
use ris_workflow::domain::procedure_step::{ProcedureStep, ProcedureStepKind};
use ris_workflow::domain::validation::{order_rules, validate};
use ris_workflow::events::{publish_pending, InMemoryEventSink};
use ris_workflow::{WorkflowConfig, WorkflowEvent};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize structured logging with environment-based filtering
    // Example: RUST_LOG=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ris_workflow=debug")),
        )
        .init();

    let config = WorkflowConfig::from_env();
    tracing::info!(
        unmerge_enabled = config.unmerge_enabled,
        accession_prefix = %config.accession_prefix,
        "Starting imaging workflow demo"
    );

    let plans = demo_plans();
    let facility = Facility::new("MAIN", "HA1");
    let mut referrer = ExternalPractitioner::new("Kildare", "James");
    referrer.add_contact_point(ContactPoint::new(referrer.id, "Clinic").in_authority("HA1"))?;
    let patient_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let mut sink: InMemoryEventSink<WorkflowEvent> = InMemoryEventSink::new();

    // === 1. Order two procedures for tomorrow ===
    let start = Utc::now() + TimeDelta::days(1);
    let mut head = Procedure::new(ProcedureType::new("CT-HEAD", "CT Head", 20), "1", facility.clone());
    head.schedule(Some(start), 20, &plans)?;
    let mut chest = Procedure::new(ProcedureType::new("CT-CHEST", "CT Chest", 30), "2", facility.clone());
    chest.schedule(Some(start + TimeDelta::minutes(20)), 30, &plans)?;
    let (head_id, chest_id) = (head.id, chest.id);

    let mut order = Order::new_order(
        OrderCreationArgs::new("ACC1001", patient_id)
            .ordered_by(referrer.clone(), facility.clone())
            .for_service("CT")
            .with_procedure(head)
            .with_procedure(chest),
    )?;
    tracing::info!(order_id = %order.id, scheduled_start = ?order.scheduled_start_time(), "order placed");

    // === 2. Check in and acquire both procedures ===
    let technologist = Uuid::new_v4();
    for procedure_id in [head_id, chest_id] {
        let modality = modality_step(&order, procedure_id)?;
        order.with_procedure(procedure_id, |p| {
            p.check_in(technologist, None)?;
            p.start_step(modality, technologist, None)?;
            p.complete_step(modality, None, None)?;
            p.check_out(None)
        })?;
    }
    tracing::info!(status = %order.status(), "images acquired");

    // === 3. One report covers both procedures ===
    let radiologist = Uuid::new_v4();
    let head_interpretation = ProcedureStep::new(head_id, ProcedureStepKind::Interpretation);
    let head_interpretation_id = head_interpretation.id;
    order.with_procedure(head_id, |p| {
        p.add_procedure_step(head_interpretation)?;
        p.start_step(head_interpretation_id, radiologist, None)
    })?;

    let chest_interpretation = ProcedureStep::new(chest_id, ProcedureStepKind::Interpretation);
    let chest_interpretation_id = chest_interpretation.id;
    order.with_procedure(chest_id, |p| p.add_procedure_step(chest_interpretation))?;
    let report = order.link_procedure_step(chest_id, chest_interpretation_id, head_id, head_interpretation_id)?;

    let publication = order.with_procedure(head_id, |p| {
        p.complete_step(head_interpretation_id, None, None)?;
        p.create_follow_on_step(head_interpretation_id, ProcedureStepKind::Publication)
    })?;
    order.with_procedure(head_id, |p| p.complete_step(publication, Some(radiologist), None))?;
    tracing::info!(report_id = %report, status = %order.status(), "report published");

    for broken in validate(&order, &order_rules()) {
        tracing::warn!(order_id = %order.id, rule = broken, "validation rule broken");
    }
    publish_pending(&mut order, &mut sink, correlation_id, Some(radiologist))?;

    // === 4. Merge a duplicate order ===
    let clerk = Uuid::new_v4();
    let mut duplicate = simple_order("ACC1002", patient_id, &referrer, &facility, &plans)?;
    duplicate.add_note(OrderNote::new(duplicate.id, "General", "duplicate requisition"))?;
    let mut target = simple_order("ACC1003", patient_id, &referrer, &facility, &plans)?;

    let engine = MergeEngine::new(config.clone());
    let outcome = engine.merge(&mut duplicate, &mut target, Some(clerk))?;
    tracing::info!(moved = outcome.moved_procedures.len(), "duplicate merged");

    if config.unmerge_enabled {
        let mut accession_numbers = SequentialAccessionNumbers::from_config(&config);
        let unmerged = engine.unmerge(&mut duplicate, &mut target, "merged in error", Some(clerk), &mut accession_numbers)?;
        let mut replacement = unmerged.replacement;
        tracing::info!(accession_number = %replacement.accession_number, "duplicate restored");
        publish_pending(&mut replacement, &mut sink, correlation_id, Some(clerk))?;
    }
    publish_pending(&mut duplicate, &mut sink, correlation_id, Some(clerk))?;
    publish_pending(&mut target, &mut sink, correlation_id, Some(clerk))?;

    // === 5. Tidy the referrer's contact points ===
    let clinic = referrer
        .default_contact_point()
        .map(|cp| cp.id)
        .context("referrer has no contact point")?;
    let office = referrer.add_contact_point(ContactPoint::new(referrer.id, "Office").in_authority("HA1"))?;
    let merged = merge_contact_points(
        &mut referrer,
        office,
        clinic,
        MergedContactPointSpec::named("Clinic and office"),
        None,
    )?;
    tracing::info!(contact_point_id = %merged, "contact points merged");

    // === 6. Fold a duplicate referrer record into the original ===
    let mut duplicate_referrer = ExternalPractitioner::new("Kildare", "Jim");
    duplicate_referrer.add_contact_point(ContactPoint::new(duplicate_referrer.id, "Home"))?;
    let spec = MergedPractitionerSpec::from_practitioner(&referrer);
    let combined = merge_practitioners(&mut duplicate_referrer, &mut referrer, spec, None)?;
    tracing::info!(
        practitioner_id = %combined.id,
        contact_points = combined.contact_points().len(),
        "referrers merged"
    );

    for line in sink.to_json_lines()? {
        println!("{line}");
    }
    tracing::info!(events = sink.len(), "demo finished");
    Ok(())
}

fn demo_plans() -> PlanRegistry {
    PlanRegistry::new()
        .with_plan("BASE", ProcedurePlan::new(vec![PlanStep::new(ProcedureStepKind::Registration)]))
        .with_plan("CT-HEAD", ProcedurePlan::inheriting("BASE", vec![PlanStep::modality("CT")]))
        .with_plan("CT-CHEST", ProcedurePlan::inheriting("BASE", vec![PlanStep::modality("CT")]))
}

fn simple_order(
    accession_number: &str,
    patient_id: Uuid,
    referrer: &ExternalPractitioner,
    facility: &Facility,
    plans: &PlanRegistry,
) -> anyhow::Result<Order> {
    let mut procedure = Procedure::new(ProcedureType::new("CT-HEAD", "CT Head", 20), "1", facility.clone());
    procedure.schedule(Some(Utc::now() + TimeDelta::days(2)), 20, plans)?;
    let order = Order::new_order(
        OrderCreationArgs::new(accession_number, patient_id)
            .ordered_by(referrer.clone(), facility.clone())
            .for_service("CT")
            .with_procedure(procedure),
    )?;
    Ok(order)
}

fn modality_step(order: &Order, procedure_id: Uuid) -> anyhow::Result<Uuid> {
    order
        .procedure(procedure_id)?
        .steps_of_kind(ProcedureStepKind::Modality)
        .next()
        .map(|s| s.id)
        .context("procedure has no modality step")
}
