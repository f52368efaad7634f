use uuid::Uuid;

// ============================================================================
// Aggregate Root Pattern
// ============================================================================
//
// Key Principles:
// 1. Commands are validated before any state changes
// 2. State changes happen in place; the aggregate is the source of truth
// 3. Every change worth telling the outside world about raises an event
// 4. Raised events wait on the aggregate until someone takes them
//
// ============================================================================

/// Generic Aggregate trait - the workflow aggregates implement this
///
/// Type Parameters:
/// - `Command`: The command type for this aggregate
/// - `Event`: The event type this aggregate raises
/// - `Error`: The error type for business rule violations
pub trait Aggregate: Sized + Send + Sync {
    type Command;
    type Event;
    type Error;

    /// Get aggregate ID
    fn aggregate_id(&self) -> Uuid;

    /// Handle command, mutating state and raising events (business logic)
    fn handle_command(&mut self, command: Self::Command) -> Result<(), Self::Error>;

    /// Drain the events raised since the last call, oldest first
    fn take_events(&mut self) -> Vec<Self::Event>;
}
