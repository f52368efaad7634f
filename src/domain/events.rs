use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::DomainEvent;

// ============================================================================
// Workflow Events - Facts Raised for External Consumers
// ============================================================================
//
// Payloads carry identifiers only. Delivery belongs to whatever EventSink
// the caller publishes into.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    OrderCreated(OrderRef),
    OrderModified(OrderRef),
    OrderCancelled(OrderRef),
    ProcedureCreated(ProcedureRef),
    ProcedureModified(ProcedureRef),
    ProcedureCancelled(ProcedureRef),
    ReportPublished(ReportPublished),
}

impl DomainEvent for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        self.name()
    }
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::OrderCreated(_) => "OrderCreated",
            WorkflowEvent::OrderModified(_) => "OrderModified",
            WorkflowEvent::OrderCancelled(_) => "OrderCancelled",
            WorkflowEvent::ProcedureCreated(_) => "ProcedureCreated",
            WorkflowEvent::ProcedureModified(_) => "ProcedureModified",
            WorkflowEvent::ProcedureCancelled(_) => "ProcedureCancelled",
            WorkflowEvent::ReportPublished(_) => "ReportPublished",
        }
    }

    pub fn order_created(order_id: Uuid) -> Self {
        WorkflowEvent::OrderCreated(OrderRef { order_id })
    }

    pub fn order_modified(order_id: Uuid) -> Self {
        WorkflowEvent::OrderModified(OrderRef { order_id })
    }

    pub fn order_cancelled(order_id: Uuid) -> Self {
        WorkflowEvent::OrderCancelled(OrderRef { order_id })
    }

    pub fn procedure_created(order_id: Option<Uuid>, procedure_id: Uuid) -> Self {
        WorkflowEvent::ProcedureCreated(ProcedureRef { order_id, procedure_id })
    }

    pub fn procedure_modified(order_id: Option<Uuid>, procedure_id: Uuid) -> Self {
        WorkflowEvent::ProcedureModified(ProcedureRef { order_id, procedure_id })
    }

    pub fn procedure_cancelled(order_id: Option<Uuid>, procedure_id: Uuid) -> Self {
        WorkflowEvent::ProcedureCancelled(ProcedureRef { order_id, procedure_id })
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureRef {
    pub order_id: Option<Uuid>,
    pub procedure_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPublished {
    pub procedure_id: Uuid,
    pub report_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let order_id = Uuid::new_v4();
        let json = serde_json::to_value(WorkflowEvent::order_cancelled(order_id)).unwrap();
        assert_eq!(json["type"], "OrderCancelled");
        assert_eq!(json["data"]["order_id"], order_id.to_string());
    }

    #[test]
    fn test_event_names_match_tags() {
        let event = WorkflowEvent::procedure_created(None, Uuid::new_v4());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
