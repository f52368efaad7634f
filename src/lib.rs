// ============================================================================
// RIS Workflow - Imaging Order State Machines
// ============================================================================
//
// Orders own procedures, procedures own procedure steps. Step activity
// drives procedure status, which drives order status. Orders can be merged
// and (when enabled) unmerged; practitioner contact points can be merged.
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod events;

#[cfg(test)]
mod test_support;

pub use config::WorkflowConfig;
pub use domain::{MergeRejection, Result, WorkflowError, WorkflowEvent};
pub use events::{Aggregate, EventEnvelope, EventSink, InMemoryEventSink};
