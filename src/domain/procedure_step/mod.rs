// ============================================================================
// Procedure Step Domain
// ============================================================================
//
// - Value objects (StepState, StepScheduling, ArtifactKind)
// - Kinds and their capabilities (pre-step, scheduling offset, linking)
// - ProcedureStep entity with the activity transitions
//
// ============================================================================

pub mod value_objects;
pub mod kind;
pub mod aggregate;

pub use value_objects::*;
pub use kind::*;
pub use aggregate::*;
