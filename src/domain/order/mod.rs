// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (OrderStatus, CancelInfo, MergeInfo, notes, attachments)
// - Commands (OrderCommand, OrderCreationArgs)
// - Order aggregate with status inference over its procedures
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod aggregate;

pub use value_objects::*;
pub use commands::*;
pub use aggregate::*;
