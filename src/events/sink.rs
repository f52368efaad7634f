use anyhow::{bail, Result};
use std::collections::HashMap;
use uuid::Uuid;

use super::aggregate::Aggregate;
use super::envelope::{serialize_event, DomainEvent, EventEnvelope};

// ============================================================================
// Event Sink - Where Raised Events Go
// ============================================================================
//
// Responsibilities:
// 1. Accept envelopes per aggregate in sequence order (append-only)
// 2. Reject appends that skip or reuse a sequence number
//
// Delivery to queues or storage is an implementation detail of the sink.
//
// ============================================================================

pub trait EventSink<E> {
    /// Last sequence number appended for the aggregate, 0 if none.
    fn current_version(&self, aggregate_id: Uuid) -> i64;

    /// Appends envelopes for one aggregate. Returns the new version.
    fn append(&mut self, aggregate_id: Uuid, envelopes: Vec<EventEnvelope<E>>) -> Result<i64>;
}

/// Keeps every envelope in memory, in append order.
#[derive(Debug, Clone)]
pub struct InMemoryEventSink<E> {
    envelopes: Vec<EventEnvelope<E>>,
    versions: HashMap<Uuid, i64>,
}

impl<E> Default for InMemoryEventSink<E> {
    fn default() -> Self {
        Self {
            envelopes: Vec::new(),
            versions: HashMap::new(),
        }
    }
}

impl<E> InMemoryEventSink<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> &[EventEnvelope<E>] {
        &self.envelopes
    }

    pub fn envelopes_for(&self, aggregate_id: Uuid) -> impl Iterator<Item = &EventEnvelope<E>> {
        self.envelopes.iter().filter(move |e| e.aggregate_id == aggregate_id)
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

impl<E: DomainEvent> InMemoryEventSink<E> {
    /// One JSON document per envelope.
    pub fn to_json_lines(&self) -> Result<Vec<String>> {
        self.envelopes.iter().map(serialize_event).collect()
    }
}

impl<E> EventSink<E> for InMemoryEventSink<E> {
    fn current_version(&self, aggregate_id: Uuid) -> i64 {
        self.versions.get(&aggregate_id).copied().unwrap_or(0)
    }

    fn append(&mut self, aggregate_id: Uuid, envelopes: Vec<EventEnvelope<E>>) -> Result<i64> {
        if envelopes.is_empty() {
            bail!("Cannot append empty event list");
        }

        let mut version = self.current_version(aggregate_id);
        for envelope in &envelopes {
            if envelope.aggregate_id != aggregate_id {
                bail!(
                    "Envelope for aggregate {} appended to stream {}",
                    envelope.aggregate_id,
                    aggregate_id
                );
            }
            if envelope.sequence_number != version + 1 {
                bail!(
                    "Sequence conflict: expected {}, got {}",
                    version + 1,
                    envelope.sequence_number
                );
            }
            version = envelope.sequence_number;
        }

        self.envelopes.extend(envelopes);
        self.versions.insert(aggregate_id, version);
        Ok(version)
    }
}

/// Drains the aggregate's pending events into `sink`, stamped with the acting
/// `user_id`. Returns how many were published.
pub fn publish_pending<A>(
    aggregate: &mut A,
    sink: &mut dyn EventSink<A::Event>,
    correlation_id: Uuid,
    user_id: Option<Uuid>,
) -> Result<usize>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    let events = aggregate.take_events();
    if events.is_empty() {
        return Ok(0);
    }

    let aggregate_id = aggregate.aggregate_id();
    let mut sequence = sink.current_version(aggregate_id);
    let envelopes: Vec<EventEnvelope<A::Event>> = events
        .into_iter()
        .map(|event| {
            sequence += 1;
            EventEnvelope::new(aggregate_id, sequence, event, correlation_id).with_user(user_id)
        })
        .collect();

    let count = envelopes.len();
    let version = sink.append(aggregate_id, envelopes)?;

    tracing::debug!(
        aggregate_id = %aggregate_id,
        correlation_id = %correlation_id,
        user_id = ?user_id,
        events = count,
        version,
        "events published"
    );
    Ok(count)
}
