// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The imaging workflow state machines and the operations around them.
// Each aggregate has its own subdirectory with:
// - Value objects
// - Commands
// - Aggregate implementation
//
// Order owns Procedures, Procedure owns ProcedureSteps. Changes flow
// upwards through `Order::with_procedure` and `Procedure::with_step`.
//
// This layer is completely separate from the event delivery infrastructure.
//
// ============================================================================

pub mod errors;
pub mod scheduling;
pub mod events;
pub mod procedure_step;
pub mod procedure;
pub mod order;
pub mod practitioner;
pub mod merge;
pub mod validation;

pub use errors::{MergeRejection, Result, WorkflowError};
pub use events::WorkflowEvent;
