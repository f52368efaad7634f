use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Discontinued,
    Replaced,
    Merged,
}

impl OrderStatus {
    pub fn code(&self) -> &'static str {
        match self {
            OrderStatus::Scheduled => "SC",
            OrderStatus::InProgress => "IP",
            OrderStatus::Completed => "CM",
            OrderStatus::Cancelled => "CA",
            OrderStatus::Discontinued => "DC",
            OrderStatus::Replaced => "RP",
            OrderStatus::Merged => "MG",
        }
    }

    pub fn is_terminated(&self) -> bool {
        !matches!(self, OrderStatus::Scheduled | OrderStatus::InProgress)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPriority {
    #[default]
    Routine,
    Asap,
    Stat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub information_authority: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInfo {
    pub reason: String,
    pub cancelled_by: Option<Uuid>,
    pub replacement_order_id: Option<Uuid>,
}

impl CancelInfo {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), cancelled_by: None, replacement_order_id: None }
    }

    pub fn by(mut self, staff: Uuid) -> Self {
        self.cancelled_by = Some(staff);
        self
    }

    pub fn replaced_by(mut self, order_id: Uuid) -> Self {
        self.replacement_order_id = Some(order_id);
        self
    }
}

/// Present only while the order is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeInfo {
    pub destination_order_id: Uuid,
    pub merged_by: Option<Uuid>,
    pub merged_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecipient {
    pub practitioner_id: Uuid,
    pub contact_point_id: Uuid,
}

// ============================================================================
// Notes & Attachments
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNote {
    pub id: Uuid,
    pub order_id: Uuid,
    pub category: String,
    pub body: String,
    pub author_id: Option<Uuid>,
    pub posted_time: DateTime<Utc>,
    pub ghost_of: Option<Uuid>,
}

impl OrderNote {
    pub fn new(order_id: Uuid, category: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            category: category.into(),
            body: body.into(),
            author_id: None,
            posted_time: Utc::now(),
            ghost_of: None,
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_of.is_some()
    }

    pub fn ghost_copy(&self) -> OrderNote {
        OrderNote {
            id: Uuid::new_v4(),
            ghost_of: Some(self.id),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAttachment {
    pub id: Uuid,
    pub document_id: Uuid,
    pub category: String,
    pub attached_by: Option<Uuid>,
    pub attached_time: DateTime<Utc>,
    pub ghost_of: Option<Uuid>,
}

impl OrderAttachment {
    pub fn new(document_id: Uuid, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            category: category.into(),
            attached_by: None,
            attached_time: Utc::now(),
            ghost_of: None,
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_of.is_some()
    }

    pub fn ghost_copy(&self) -> OrderAttachment {
        OrderAttachment {
            id: Uuid::new_v4(),
            ghost_of: Some(self.id),
            ..self.clone()
        }
    }
}
