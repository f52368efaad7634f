// ============================================================================
// Event Infrastructure
// ============================================================================
//
// Generic, reusable plumbing for the events aggregates raise.
// Domain-specific code is in src/domain/
//
// ============================================================================

pub mod aggregate;
pub mod envelope;
pub mod sink;

pub use aggregate::Aggregate;
pub use envelope::{serialize_event, DomainEvent, EventEnvelope};
pub use sink::{publish_pending, EventSink, InMemoryEventSink};
