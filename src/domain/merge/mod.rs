// ============================================================================
// Merge Domain
// ============================================================================
//
// - Order merge and unmerge (MergeEngine)
// - Contact point merge for external practitioners
// - External practitioner merge and merge chain lookups
//
// ============================================================================

pub mod order_merge;
pub mod contact_point;
pub mod practitioner;

pub use order_merge::*;
pub use contact_point::*;
pub use practitioner::*;
