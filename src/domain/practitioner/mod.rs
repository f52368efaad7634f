// ============================================================================
// External Practitioner Domain
// ============================================================================
//
// Referring practitioners and the contact points results are sent to.
// Contact point and practitioner merging live in `domain::merge`.
//
// ============================================================================

pub mod value_objects;
pub mod aggregate;

pub use value_objects::*;
pub use aggregate::*;
