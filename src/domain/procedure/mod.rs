// ============================================================================
// Procedure Domain
// ============================================================================
//
// - Value objects (ProcedureStatus, ProcedureCheckIn, ProcedureType, Facility)
// - Plans (PlanProvider, PlanRegistry)
// - Commands (ProcedureCommand)
// - Procedure aggregate with status inference over its steps
//
// ============================================================================

pub mod value_objects;
pub mod plan;
pub mod commands;
pub mod aggregate;

pub use value_objects::*;
pub use plan::*;
pub use commands::*;
pub use aggregate::*;
